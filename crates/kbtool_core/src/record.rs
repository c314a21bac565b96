use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Paragraph {
    pub header: String,
    pub content: String,
}

/// One exported page. Field order here is the order written to disk; fields
/// the struct does not know about are dropped on load.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExportRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
    pub url: String,
    pub paragraphs: Vec<Paragraph>,
}

impl ExportRecord {
    /// Final non-empty path segment of `url`, after trailing slashes are stripped.
    pub fn page_id(&self) -> &str {
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn is_forward_stub(&self) -> bool {
        self.title.starts_with(FORWARD_TITLE_PREFIX)
    }
}

pub const FORWARD_TITLE_PREFIX: &str = "Forward to";

pub fn read_record(path: &Path) -> Result<ExportRecord> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse export record {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, buffer).with_context(|| format!("failed to write {}", path.display()))
}
