use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::record::write_json;

/// URL → page id pairs in insertion order.
///
/// Reconciliation picks the *first* entry whose id occurs in a record url, so
/// iteration order is part of the contract and a hash map will not do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierMapping {
    entries: Vec<(String, String)>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MappingEntry {
    url: String,
    page_id: String,
}

impl IdentifierMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the id of an existing url in place, otherwise appends.
    pub fn insert(&mut self, url: impl Into<String>, page_id: impl Into<String>) {
        let url = url.into();
        let page_id = page_id.into();
        match self.entries.iter_mut().find(|(key, _)| *key == url) {
            Some(entry) => entry.1 = page_id,
            None => self.entries.push((url, page_id)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(url, page_id)| (url.as_str(), page_id.as_str()))
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(_, page_id)| page_id)
    }

    pub fn contains_page_id(&self, page_id: &str) -> bool {
        self.page_ids().any(|candidate| candidate == page_id)
    }

    /// First entry, in insertion order, whose page id is a substring of `text`.
    pub fn first_contained_in(&self, text: &str) -> Option<(&str, &str)> {
        self.iter().find(|(_, page_id)| text.contains(page_id))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for IdentifierMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (url, page_id) in iter {
            mapping.insert(url, page_id);
        }
        mapping
    }
}

pub fn save_mapping(path: &Path, mapping: &IdentifierMapping) -> Result<()> {
    let entries = mapping
        .iter()
        .map(|(url, page_id)| MappingEntry {
            url: url.to_string(),
            page_id: page_id.to_string(),
        })
        .collect::<Vec<_>>();
    write_json(path, &entries)
}

pub fn load_mapping(path: &Path) -> Result<IdentifierMapping> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<MappingEntry> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse mapping {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.url, entry.page_id))
        .collect())
}
