use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters left alone when encoding a relative link: unreserved plus `/`.
const LINK_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const DOWNLOAD_MARKER: &str = "/download/";
const PREVIEW_MARKER: &str = "/rest/documentConversion/latest/conversion/thumbnail/";

pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

pub fn decode_url(value: &str) -> Cow<'_, str> {
    percent_decode_str(value).decode_utf8_lossy()
}

pub fn encode_url(value: &str) -> String {
    utf8_percent_encode(value, LINK_ENCODE_SET).to_string()
}

/// Local file name for a Confluence download link.
///
/// `/download/attachments/524291/peak.jpeg?version=1` becomes
/// `524291_attachments_peak.jpeg`; generated previews become
/// `generated_preview_<id>.jpg`. Anything else has no local name.
pub fn derive_download_file_name(download_url: &str) -> Option<String> {
    if let Some(start) = download_url.find(DOWNLOAD_MARKER) {
        let mut parts = download_url[start + DOWNLOAD_MARKER.len()..].split('/');
        let file_type = parts.next()?;
        let page_id = parts.next()?;
        let file_name = parts.next()?;
        let file_name = file_name.split('?').next().unwrap_or(file_name);
        if file_type.is_empty() || page_id.is_empty() || file_name.is_empty() {
            return None;
        }
        return Some(format!("{page_id}_{file_type}_{file_name}"));
    }
    let (_, rest) = download_url.split_once(PREVIEW_MARKER)?;
    let file_id = rest.strip_suffix("/1").unwrap_or(rest);
    Some(format!("generated_preview_{file_id}.jpg"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind<'a> {
    Folder,
    /// Always end in this extension (without the dot).
    Extension(&'a str),
    Inferred,
}

/// Hands out sanitized file names that stay unique after sanitizing.
///
/// The same title always maps to the same name; distinct titles that sanitize
/// to the same stem get `_1`, `_2`, ... appended before the extension.
#[derive(Debug, Clone, Default)]
pub struct UniqueNames {
    duplicates: HashMap<String, usize>,
    assigned: HashMap<String, String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&mut self, title: &str, kind: NameKind<'_>) -> String {
        if let Some(name) = self.assigned.get(title) {
            return name.clone();
        }

        let sanitized = sanitize_for_filename(title);
        let (stem, extension) = match kind {
            NameKind::Folder => (sanitized, None),
            NameKind::Extension(extension) => (sanitized, Some(extension.to_string())),
            NameKind::Inferred => match sanitized.rsplit_once('.') {
                Some((stem, extension)) => (stem.to_string(), Some(extension.to_string())),
                None => (sanitized, None),
            },
        };

        let mut name = match self.duplicates.get_mut(&stem) {
            Some(count) => {
                *count += 1;
                format!("{stem}_{count}")
            }
            None => {
                self.duplicates.insert(stem.clone(), 0);
                stem
            }
        };
        if let Some(extension) = extension.filter(|extension| !extension.is_empty()) {
            name.push('.');
            name.push_str(&extension);
        }

        self.assigned.insert(title.to_string(), name.clone());
        name
    }
}
