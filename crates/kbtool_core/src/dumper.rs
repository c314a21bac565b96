//! Dumps Confluence spaces through the REST API into per-page JSON records.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::content::write_page_json;
use crate::http::Fetch;
use crate::naming::{
    NameKind, UniqueNames, decode_url, derive_download_file_name, encode_url, sanitize_for_filename,
};

pub const PAGE_LIMIT: usize = 25;
pub const ATTACHMENTS_DIR_NAME: &str = "attachments";

/// Video and image attachments are not downloaded.
const SKIPPED_ATTACHMENT_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".mp4", ".mov"];

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub api_base: String,
    /// Browser url pattern with `{space}` and `{page_id}` placeholders.
    pub web_url_pattern: String,
    pub export_dir: PathBuf,
    pub template: String,
    /// Space keys to dump. Empty means every space the API lists.
    pub spaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpReport {
    pub spaces: Vec<String>,
    pub pages: usize,
    pub attachments: usize,
    pub failed_pages: Vec<String>,
    pub failed_spaces: Vec<String>,
}

pub fn web_url(pattern: &str, space_key: &str, page_id: &str) -> String {
    pattern
        .replace("{space}", space_key)
        .replace("{page_id}", page_id)
}

pub fn list_spaces<F: Fetch + ?Sized>(fetch: &F, api_base: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let first = format!("{api_base}/rest/api/space?limit={PAGE_LIMIT}");
    for_each_result(fetch, api_base, &first, |space| {
        if let Some(key) = space.get("key").and_then(Value::as_str) {
            keys.push(key.to_string());
        }
        Ok(())
    })?;
    Ok(keys)
}

/// Recreates `options.export_dir` and writes one folder per space.
///
/// A space or page that fails is logged and recorded in the report; the dump
/// carries on with the next one.
pub fn dump_spaces<F: Fetch + ?Sized>(fetch: &F, options: &DumpOptions) -> Result<DumpReport> {
    let export_dir = options.export_dir.as_path();
    if export_dir.exists() {
        fs::remove_dir_all(export_dir)
            .with_context(|| format!("failed to remove {}", export_dir.display()))?;
    }
    fs::create_dir_all(export_dir)
        .with_context(|| format!("failed to create {}", export_dir.display()))?;

    let space_keys = if options.spaces.is_empty() {
        list_spaces(fetch, &options.api_base)?
    } else {
        options.spaces.clone()
    };
    info!(spaces = space_keys.len(), "dumping into {}", export_dir.display());

    let mut report = DumpReport::default();
    let mut folder_names = UniqueNames::new();
    for space_key in &space_keys {
        let folder = export_dir.join(folder_names.provide(space_key, NameKind::Folder));
        let mut space = SpaceDump {
            fetch,
            options,
            space_key,
            folder,
            report: &mut report,
        };
        match space.run() {
            Ok(()) => report.spaces.push(space_key.clone()),
            Err(err) => {
                error!("failed to dump space {space_key}: {err:#}");
                report.failed_spaces.push(space_key.clone());
            }
        }
    }

    info!(
        spaces = report.spaces.len(),
        pages = report.pages,
        attachments = report.attachments,
        failed_pages = report.failed_pages.len(),
        "dump finished"
    );
    Ok(report)
}

struct SpaceDump<'a, F: Fetch + ?Sized> {
    fetch: &'a F,
    options: &'a DumpOptions,
    space_key: &'a str,
    folder: PathBuf,
    report: &'a mut DumpReport,
}

impl<F: Fetch + ?Sized> SpaceDump<'_, F> {
    fn run(&mut self) -> Result<()> {
        let attachments_dir = self.folder.join(ATTACHMENTS_DIR_NAME);
        fs::create_dir_all(&attachments_dir)
            .with_context(|| format!("failed to create {}", attachments_dir.display()))?;

        let url = format!(
            "{}/rest/api/space/{}?expand=homepage",
            self.options.api_base, self.space_key
        );
        let space = self.fetch.get_json(&url)?;
        let name = space.get("name").and_then(Value::as_str).unwrap_or(self.space_key);
        let Some(homepage_id) = space.get("homepage").and_then(id_of) else {
            bail!("space {} has no homepage", self.space_key);
        };
        info!(space = self.space_key, "exporting {name}");

        let mut page_names = UniqueNames::new();
        self.export_tree(&homepage_id, &mut page_names, 0);
        Ok(())
    }

    /// Exports a page and then its children, depth first. Failures are
    /// recorded per page so one bad page does not stop its siblings.
    fn export_tree(&mut self, page_id: &str, page_names: &mut UniqueNames, depth: usize) {
        let children = match self.export_page(page_id, page_names, depth) {
            Ok(children) => children,
            Err(err) => {
                error!("failed to export page {page_id}: {err:#}");
                self.report.failed_pages.push(page_id.to_string());
                return;
            }
        };
        for child_id in children {
            self.export_tree(&child_id, page_names, depth + 1);
        }
    }

    fn export_page(
        &mut self,
        page_id: &str,
        page_names: &mut UniqueNames,
        depth: usize,
    ) -> Result<Vec<String>> {
        let options = self.options;
        let api_base = options.api_base.as_str();
        let url = format!(
            "{api_base}/rest/api/content/{page_id}?expand=children.page,children.attachment,body.view.value"
        );
        let page = self.fetch.get_json(&url)?;
        let title = page
            .get("title")
            .and_then(Value::as_str)
            .with_context(|| format!("page {page_id} has no title"))?
            .to_string();
        let content = page
            .pointer("/body/view/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(page_id, depth, "{title}");

        let file_name = page_names.provide(&title, NameKind::Extension("html"));
        self.download_attachments(page_id)?;

        let web_url = web_url(&self.options.web_url_pattern, self.space_key, page_id);
        write_page_json(
            &self.folder.join(&file_name),
            &title,
            &content,
            &self.options.template,
            &web_url,
            &[],
        )?;
        self.report.pages += 1;

        // Old links address pages by id; leave a redirect under that name.
        let target = encode_url(&sanitize_for_filename(&file_name));
        let forward_content = format!(
            "<p>This page has moved to <a href=\"{target}\">{title}</a>. \
             If you are not forwarded automatically, follow the link.</p>"
        );
        write_page_json(
            &self.folder.join(format!("{page_id}.html")),
            &format!("Forward to page {title}"),
            &forward_content,
            &self.options.template,
            &web_url,
            &[format!(
                "<meta http-equiv=\"refresh\" content=\"0; url={target}\" />"
            )],
        )?;

        let mut children = Vec::new();
        let first = format!("{api_base}/rest/api/content/{page_id}/child/page?limit={PAGE_LIMIT}");
        for_each_result(self.fetch, api_base, &first, |child| {
            if let Some(child_id) = id_of(child) {
                children.push(child_id);
            }
            Ok(())
        })?;
        Ok(children)
    }

    fn download_attachments(&mut self, page_id: &str) -> Result<()> {
        let options = self.options;
        let api_base = options.api_base.as_str();
        let attachments_dir = self.folder.join(ATTACHMENTS_DIR_NAME);
        let mut attachment_names = UniqueNames::new();
        let mut links = Vec::new();

        let first =
            format!("{api_base}/rest/api/content/{page_id}/child/attachment?limit={PAGE_LIMIT}");
        for_each_result(self.fetch, api_base, &first, |attachment| {
            if let Some(link) = attachment.pointer("/_links/download").and_then(Value::as_str) {
                links.push(link.to_string());
            }
            Ok(())
        })?;

        for link in links {
            let Some(derived) = derive_download_file_name(&decode_url(&link)) else {
                debug!(page_id, link = link.as_str(), "no local name for attachment");
                continue;
            };
            let lowered = derived.to_ascii_lowercase();
            if SKIPPED_ATTACHMENT_EXTENSIONS
                .iter()
                .any(|extension| lowered.ends_with(extension))
            {
                continue;
            }

            let path = attachments_dir.join(attachment_names.provide(&derived, NameKind::Inferred));
            if path.exists() {
                continue;
            }
            match self.fetch.download(&format!("{api_base}{link}"), &path) {
                Ok(bytes) => {
                    debug!(path = %path.display(), bytes, "downloaded");
                    self.report.attachments += 1;
                }
                Err(err) => {
                    warn!("failed to download {link}: {err:#}");
                    remove_partial(&path);
                }
            }
        }
        Ok(())
    }
}

fn remove_partial(path: &Path) {
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        warn!("failed to remove partial download {}: {err}", path.display());
    }
}

/// Calls `visit` for every entry of a paginated `results` listing.
fn for_each_result<F, V>(fetch: &F, api_base: &str, first_url: &str, mut visit: V) -> Result<()>
where
    F: Fetch + ?Sized,
    V: FnMut(&Value) -> Result<()>,
{
    let mut next = Some(first_url.to_string());
    while let Some(url) = next.take() {
        let listing = fetch.get_json(&url)?;
        if let Some(results) = listing.get("results").and_then(Value::as_array) {
            for result in results {
                visit(result)?;
            }
        }
        next = listing
            .pointer("/_links/next")
            .and_then(Value::as_str)
            .map(|path| format!("{api_base}{path}"));
    }
    Ok(())
}

/// Confluence ids come back as strings, older servers send numbers.
fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
