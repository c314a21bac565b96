use std::sync::LazyLock;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::error::KbError;
use crate::http::Fetch;
use crate::mapping::IdentifierMapping;

pub const PAGE_ID_ATTRIBUTE: &str = "data-vp-page-id";

#[allow(clippy::expect_used)]
static NO_JS_ROOT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html.no-js").expect("NO_JS_ROOT selector"));

pub fn page_id_from_html(html: &str, url: &str) -> Result<String, KbError> {
    let document = Html::parse_document(html);
    let root = document
        .select(&NO_JS_ROOT)
        .next()
        .ok_or_else(|| KbError::MissingMarker {
            url: url.to_string(),
        })?;
    root.value()
        .attr(PAGE_ID_ATTRIBUTE)
        .map(ToString::to_string)
        .ok_or_else(|| KbError::MissingPageId {
            url: url.to_string(),
            attribute: PAGE_ID_ATTRIBUTE,
        })
}

/// Fetches every url in order and collects its page id.
///
/// Requests are strictly sequential and the first failure aborts the whole
/// resolution; no partial mapping is returned.
pub fn resolve_page_ids<F: Fetch + ?Sized>(
    fetcher: &F,
    urls: &[String],
) -> Result<IdentifierMapping> {
    let progress = ProgressBar::new(urls.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        progress.set_style(style.progress_chars("=> "));
    }

    let mut mapping = IdentifierMapping::new();
    for url in urls {
        let html = fetcher
            .get_text(url)
            .with_context(|| format!("failed to resolve page id for {url}"))?;
        let page_id = page_id_from_html(&html, url)?;
        debug!(url = url.as_str(), page_id = page_id.as_str(), "resolved");
        mapping.insert(url.as_str(), page_id);
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!(page_ids = mapping.len(), "resolved page ids");
    Ok(mapping)
}
