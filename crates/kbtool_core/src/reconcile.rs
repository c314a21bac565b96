//! Reconciles a folder of exported page records against resolved page ids.
//!
//! A record is kept when the last segment of its url equals one of the
//! resolved ids. Its url is then swapped for the first mapping url whose id
//! occurs anywhere in the old url, and the old url moves to `internal_url`.
//! Membership is exact equality; the rewrite is substring containment in
//! mapping order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::mapping::IdentifierMapping;
use crate::record::{ExportRecord, read_record, write_json};

pub const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    /// New canonical urls of the records written, in processing order.
    pub succeeded: Vec<String>,
    /// Original urls of records whose page id matched nothing.
    pub failed: Vec<String>,
    /// Files that were not export records. Not part of the ratio.
    pub skipped: Vec<PathBuf>,
    /// Matched "Forward to" stubs that were dropped.
    pub forwarded: usize,
}

impl ReconciliationReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// `None` when no record was reconciled or failed.
    pub fn success_ratio(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.succeeded.len() as f64 / total as f64),
        }
    }

    pub fn sample_succeeded(&self) -> &[String] {
        &self.succeeded[..self.succeeded.len().min(SAMPLE_SIZE)]
    }

    pub fn sample_failed(&self) -> &[String] {
        &self.failed[..self.failed.len().min(SAMPLE_SIZE)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Cleaned record, ready to be written.
    Reconciled(ExportRecord),
    /// Matched, but a redirect stub with no content of its own.
    Forwarded,
    /// No page id matched; carries the record's url.
    Unmatched(String),
}

pub fn reconcile_record(mut record: ExportRecord, mapping: &IdentifierMapping) -> RecordOutcome {
    if !mapping.contains_page_id(record.page_id()) {
        return RecordOutcome::Unmatched(record.url);
    }

    if let Some((canonical_url, _)) = mapping.first_contained_in(&record.url) {
        // Already-cleaned records keep their original internal_url.
        let already_clean = record.url == canonical_url && record.internal_url.is_some();
        if !already_clean {
            let previous = std::mem::replace(&mut record.url, canonical_url.to_string());
            record.internal_url = Some(previous);
        }
    }

    if record.is_forward_stub() {
        return RecordOutcome::Forwarded;
    }
    RecordOutcome::Reconciled(record)
}

/// Rebuilds `output_folder` from the `.json` records directly inside
/// `input_folder`. Anything already at `output_folder` is deleted first.
pub fn reconcile(
    input_folder: &Path,
    output_folder: &Path,
    mapping: &IdentifierMapping,
) -> Result<ReconciliationReport> {
    if output_folder.exists() {
        fs::remove_dir_all(output_folder)
            .with_context(|| format!("failed to remove {}", output_folder.display()))?;
    }
    fs::create_dir_all(output_folder)
        .with_context(|| format!("failed to create {}", output_folder.display()))?;

    if mapping.is_empty() {
        warn!("mapping is empty, every record in {} will fail", input_folder.display());
    }

    let mut report = ReconciliationReport::default();
    for entry in WalkDir::new(input_folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            // Dangling symlinks and unreadable entries inside the folder.
            Err(err) if err.depth() > 0 => {
                warn!("Skipping entry in {}: {err}", input_folder.display());
                if let Some(path) = err.path() {
                    report.skipped.push(path.to_path_buf());
                }
                continue;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", input_folder.display()));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(file_name) = entry.file_name().to_str() else {
            warn!("Skipping {} - file name is not UTF-8", path.display());
            report.skipped.push(path.to_path_buf());
            continue;
        };
        if !file_name.ends_with(".json") {
            info!("Skipping {} - Not a JSON file", path.display());
            report.skipped.push(path.to_path_buf());
            continue;
        }

        let record = match read_record(path) {
            Ok(record) => record,
            Err(error) => {
                warn!("Skipping {}: {error:#}", path.display());
                report.skipped.push(path.to_path_buf());
                continue;
            }
        };

        match reconcile_record(record, mapping) {
            RecordOutcome::Reconciled(record) => {
                write_json(&output_folder.join(file_name), &record)?;
                debug!(file = file_name, url = record.url.as_str(), "reconciled");
                report.succeeded.push(record.url);
            }
            RecordOutcome::Forwarded => {
                debug!(file = file_name, "dropped forward stub");
                report.forwarded += 1;
            }
            RecordOutcome::Unmatched(url) => {
                debug!(file = file_name, url = url.as_str(), "no matching page id");
                report.failed.push(url);
            }
        }
    }

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        forwarded = report.forwarded,
        "reconciled {}",
        input_folder.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::{RecordOutcome, ReconciliationReport, reconcile, reconcile_record};
    use crate::mapping::IdentifierMapping;
    use crate::record::ExportRecord;

    fn mapping() -> IdentifierMapping {
        [("https://kb/x/a", "123"), ("https://kb/x/b", "456")]
            .into_iter()
            .collect()
    }

    fn record(title: &str, url: &str) -> ExportRecord {
        ExportRecord {
            title: title.to_string(),
            internal_url: None,
            url: url.to_string(),
            paragraphs: Vec::new(),
        }
    }

    fn write(dir: &Path, name: &str, value: Value) {
        fs::write(dir.join(name), value.to_string()).expect("write input");
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).expect("read output")).expect("json")
    }

    #[test]
    fn matched_record_gets_canonical_url() {
        let outcome = reconcile_record(record("Page A", "https://old/path/123"), &mapping());
        let RecordOutcome::Reconciled(cleaned) = outcome else {
            panic!("expected reconciled record");
        };
        assert_eq!(cleaned.url, "https://kb/x/a");
        assert_eq!(cleaned.internal_url.as_deref(), Some("https://old/path/123"));
    }

    #[test]
    fn unmatched_record_reports_original_url() {
        let outcome = reconcile_record(record("Page Z", "https://old/path/999"), &mapping());
        assert_eq!(
            outcome,
            RecordOutcome::Unmatched("https://old/path/999".to_string())
        );
    }

    #[test]
    fn page_id_membership_is_exact_but_rewrite_uses_substring() {
        // "12" is contained in ".../123" and comes first, so it wins the rewrite
        // even though membership matched the later "123".
        let mapping: IdentifierMapping = [("https://kb/x/short", "12"), ("https://kb/x/long", "123")]
            .into_iter()
            .collect();
        let outcome = reconcile_record(record("Page", "https://old/path/123/"), &mapping);
        let RecordOutcome::Reconciled(cleaned) = outcome else {
            panic!("expected reconciled record");
        };
        assert_eq!(cleaned.url, "https://kb/x/short");
        assert_eq!(cleaned.internal_url.as_deref(), Some("https://old/path/123/"));

        let outcome = reconcile_record(record("Page", "https://old/path/1234"), &mapping);
        assert!(matches!(outcome, RecordOutcome::Unmatched(_)));
    }

    #[test]
    fn forward_stubs_are_dropped_even_when_matched() {
        let outcome = reconcile_record(record("Forward to page Home", "https://old/123"), &mapping());
        assert_eq!(outcome, RecordOutcome::Forwarded);

        let outcome = reconcile_record(record("Forward to page Gone", "https://old/999"), &mapping());
        assert!(matches!(outcome, RecordOutcome::Unmatched(_)));
    }

    #[test]
    fn already_clean_records_are_left_unchanged() {
        let mapping: IdentifierMapping = [("https://kb/x/123", "123")].into_iter().collect();
        let mut clean = record("Page", "https://kb/x/123");
        clean.internal_url = Some("https://old/path/123".to_string());

        let outcome = reconcile_record(clean.clone(), &mapping);
        assert_eq!(outcome, RecordOutcome::Reconciled(clean));
    }

    #[test]
    fn reconcile_writes_cleaned_records_and_report() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("export").join("KB");
        let output = temp.path().join("export_cleaned").join("KB");
        fs::create_dir_all(&input).expect("input dir");
        fs::create_dir_all(&output).expect("output dir");
        fs::write(output.join("stale.json"), "{}").expect("stale output");

        write(
            &input,
            "a.json",
            json!({"title": "Page A", "url": "https://old/path/123", "paragraphs": [], "extra": true}),
        );
        write(
            &input,
            "z.json",
            json!({"title": "Page Z", "url": "https://old/path/999", "paragraphs": []}),
        );
        write(
            &input,
            "fwd.json",
            json!({"title": "Forward to page B", "url": "https://old/path/456", "paragraphs": []}),
        );
        write(&input, "broken.json", json!({"title": "No url", "paragraphs": []}));
        fs::write(input.join("notes.txt"), "not json").expect("write txt");
        fs::create_dir_all(input.join("nested.json")).expect("nested dir");

        let report = reconcile(&input, &output, &mapping()).expect("reconcile");

        assert_eq!(report.succeeded, vec!["https://kb/x/a"]);
        assert_eq!(report.failed, vec!["https://old/path/999"]);
        assert_eq!(report.forwarded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.success_ratio(), Some(0.5));

        assert!(!output.join("stale.json").exists());
        assert!(!output.join("z.json").exists());
        assert!(!output.join("fwd.json").exists());
        assert!(!output.join("notes.txt").exists());
        assert!(!output.join("broken.json").exists());
        assert_eq!(
            read(&output.join("a.json")),
            json!({
                "title": "Page A",
                "internal_url": "https://old/path/123",
                "url": "https://kb/x/a",
                "paragraphs": []
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_records_are_followed() {
        let temp = tempdir().expect("tempdir");
        let shared = temp.path().join("shared");
        let input = temp.path().join("export");
        let output = temp.path().join("out");
        fs::create_dir_all(&shared).expect("shared dir");
        fs::create_dir_all(&input).expect("input dir");
        write(
            &shared,
            "a.json",
            json!({"title": "Page A", "url": "https://old/path/123", "paragraphs": []}),
        );
        std::os::unix::fs::symlink(shared.join("a.json"), input.join("a.json")).expect("link");
        std::os::unix::fs::symlink(shared.join("gone.json"), input.join("gone.json"))
            .expect("dangling link");

        let report = reconcile(&input, &output, &mapping()).expect("reconcile");
        assert_eq!(report.succeeded, vec!["https://kb/x/a"]);
        assert_eq!(report.skipped, vec![input.join("gone.json")]);
        assert!(output.join("a.json").is_file());
    }

    #[test]
    fn empty_input_reports_no_ratio() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("empty");
        fs::create_dir_all(&input).expect("input dir");
        fs::write(input.join("readme.md"), "# nothing").expect("write md");
        let output = temp.path().join("out");

        let report = reconcile(&input, &output, &mapping()).expect("reconcile");
        assert!(report.succeeded.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.success_ratio(), None);
        assert!(output.is_dir());
        assert_eq!(fs::read_dir(&output).expect("list").count(), 0);
    }

    #[test]
    fn missing_input_folder_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let error = reconcile(
            &temp.path().join("absent"),
            &temp.path().join("out"),
            &mapping(),
        )
        .expect_err("must fail");
        assert!(format!("{error:#}").contains("failed to list"));
    }

    #[test]
    fn samples_are_capped_at_five() {
        let report = ReconciliationReport {
            succeeded: (0..8).map(|index| format!("https://kb/{index}")).collect(),
            failed: vec!["https://old/1".to_string()],
            ..ReconciliationReport::default()
        };
        assert_eq!(report.sample_succeeded().len(), 5);
        assert_eq!(report.sample_succeeded()[0], "https://kb/0");
        assert_eq!(report.sample_failed(), ["https://old/1".to_string()]);
    }
}
