use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use regex::{NoExpand, RegexBuilder};
use scraper::{ElementRef, Html, Selector};

use crate::record::{ExportRecord, Paragraph, write_json};

pub const NO_TITLE: &str = "No Title";

pub const DEFAULT_PAGE_TEMPLATE: &str = include_str!("../templates/page.html");

#[allow(clippy::expect_used)]
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("TITLE selector"));

/// Flattens a page into section-annotated paragraphs.
///
/// Elements are visited in document order. Each `h1`..`h9` replaces the running
/// header and each `p` is emitted under whichever header is current, so a
/// paragraph before the first heading gets `""`.
pub fn extract_content(html: &str, source_url: &str) -> ExportRecord {
    let document = Html::parse_document(html);

    let mut current_header = String::new();
    let mut paragraphs = Vec::new();
    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        if is_heading(name) {
            current_header = element_text(&element);
        } else if name == "p" {
            paragraphs.push(Paragraph {
                header: current_header.clone(),
                content: element_text(&element),
            });
        }
    }

    let title = document
        .select(&TITLE)
        .next()
        .map(|element| element_text(&element))
        .unwrap_or_else(|| NO_TITLE.to_string());

    ExportRecord {
        title,
        internal_url: None,
        url: source_url.to_string(),
        paragraphs,
    }
}

fn is_heading(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 2 && bytes[0] == b'h' && (b'1'..=b'9').contains(&bytes[1])
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect()
}

/// Fills `{% title %}`, `{% content %}` and `{% additional_headers %}` in an
/// HTML template. Placeholder names are case-insensitive and may carry
/// whitespace inside the braces.
pub fn render_template(
    template: &str,
    title: &str,
    content: &str,
    additional_headers: &[String],
) -> String {
    let headers = additional_headers.join("\n\t");
    let replacements = [
        ("title", title),
        ("content", content),
        ("additional_headers", headers.as_str()),
    ];

    let mut rendered = template.to_string();
    for (placeholder, replacement) in replacements {
        let pattern = format!(r"\{{%\s*{placeholder}\s*%\}}");
        let Ok(regex) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
            continue;
        };
        rendered = regex
            .replace_all(&rendered, NoExpand(replacement))
            .into_owned();
    }
    rendered
}

pub fn write_page_json(
    html_path: &Path,
    title: &str,
    content: &str,
    template: &str,
    web_url: &str,
    additional_headers: &[String],
) -> Result<PathBuf> {
    let rendered = render_template(template, title, content, additional_headers);
    let record = extract_content(&rendered, web_url);
    let json_path = html_path.with_extension("json");
    write_json(&json_path, &record)?;
    Ok(json_path)
}
