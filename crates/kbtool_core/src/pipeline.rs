use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{error, info};

use crate::config::{DEFAULT_CLEANED_DIR, DEFAULT_EXPORT_DIR, KbConfig, SpaceConfig};
use crate::http::Fetch;
use crate::links::{find_links_in_html, load_links};
use crate::mapping::save_mapping;
use crate::reconcile::{ReconciliationReport, reconcile};
use crate::resolver::resolve_page_ids;
use crate::runtime::ResolvedPaths;

/// Every file one space reads or writes, resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePlan {
    pub key: String,
    pub html_file: PathBuf,
    pub url_subdir: String,
    pub links_file: PathBuf,
    pub mapping_file: PathBuf,
    pub export_dir: PathBuf,
    pub cleaned_dir: PathBuf,
}

impl SpacePlan {
    pub fn new(paths: &ResolvedPaths, config: &KbConfig, space: &SpaceConfig) -> Self {
        let links_dir = match config.paths.links_dir.as_deref() {
            Some(dir) => paths.resolve(dir),
            None => paths.project_root.clone(),
        };
        let export_root = paths.resolve(
            config
                .paths
                .export_dir
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_EXPORT_DIR)),
        );
        let cleaned_root = paths.resolve(
            config
                .paths
                .cleaned_dir
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_CLEANED_DIR)),
        );
        let key = space.key.to_ascii_uppercase();
        Self {
            html_file: paths.resolve(&space.html_file),
            url_subdir: space.url_subdir.clone(),
            links_file: links_dir.join(format!("links_{key}.txt")),
            mapping_file: links_dir.join(format!("mapping_{key}.json")),
            export_dir: export_root.join(&key),
            cleaned_dir: cleaned_root.join(&key),
            key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpaceOutcome {
    pub key: String,
    pub links: usize,
    pub page_ids: usize,
    pub report: ReconciliationReport,
}

/// Links, then page ids, then reconciliation, for one space. The mapping is
/// complete and saved before any record is touched.
pub fn run_space<F: Fetch + ?Sized>(
    fetch: &F,
    base_url: &str,
    plan: &SpacePlan,
) -> Result<SpaceOutcome> {
    info!(space = plan.key.as_str(), "processing space");
    find_links_in_html(
        &plan.html_file,
        base_url,
        &plan.url_subdir,
        &plan.links_file,
    )?;
    let links = load_links(&plan.links_file)?;
    let mapping = resolve_page_ids(fetch, &links)?;
    save_mapping(&plan.mapping_file, &mapping)?;
    let report = reconcile(&plan.export_dir, &plan.cleaned_dir, &mapping)?;
    Ok(SpaceOutcome {
        key: plan.key.clone(),
        links: links.len(),
        page_ids: mapping.len(),
        report,
    })
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub outcomes: Vec<SpaceOutcome>,
    pub failed: Vec<String>,
}

/// Runs every plan in order. Without `keep_going` the first failing space
/// ends the run with its error. With it, failures are logged and listed in
/// `failed` next to the outcomes of the spaces that did finish.
pub fn run_spaces<F: Fetch + ?Sized>(
    fetch: &F,
    base_url: &str,
    plans: &[SpacePlan],
    keep_going: bool,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    for plan in plans {
        match run_space(fetch, base_url, plan) {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) if keep_going => {
                error!("space {} failed: {err:#}", plan.key);
                report.failed.push(plan.key.clone());
            }
            Err(err) => return Err(err.context(format!("space {} failed", plan.key))),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::{Result, bail};
    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::{SpacePlan, run_space, run_spaces};
    use crate::config::{KbConfig, PathsSection, SpaceConfig};
    use crate::error::KbError;
    use crate::http::Fetch;
    use crate::mapping::load_mapping;
    use crate::runtime::{ResolvedPaths, ValueSource};

    struct Pages(HashMap<String, String>);

    impl Fetch for Pages {
        fn get_text(&self, url: &str) -> Result<String> {
            match self.0.get(url) {
                Some(body) => Ok(body.clone()),
                None => bail!("no page at {url}"),
            }
        }

        fn get_json(&self, url: &str) -> Result<Value> {
            bail!("unexpected JSON request for {url}")
        }

        fn download(&self, url: &str, _path: &Path) -> Result<u64> {
            bail!("unexpected download of {url}")
        }
    }

    fn page(id: &str) -> String {
        format!(r#"<html class="no-js" data-vp-page-id="{id}"><body></body></html>"#)
    }

    fn resolved(root: &Path) -> ResolvedPaths {
        ResolvedPaths {
            project_root: root.to_path_buf(),
            state_dir: root.join(".kbtool"),
            config_path: root.join(".kbtool").join("config.toml"),
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    fn plan_for(root: &Path, key: &str) -> SpacePlan {
        let space = SpaceConfig::conventional(key, "zmp");
        SpacePlan::new(&resolved(root), &KbConfig::default(), &space)
    }

    #[test]
    fn plan_uses_conventional_locations() {
        let root = PathBuf::from("/work");
        let plan = plan_for(&root, "kb");
        assert_eq!(plan.key, "KB");
        assert_eq!(plan.html_file, root.join("data/raw_html/zmp.txt"));
        assert_eq!(plan.links_file, root.join("links_KB.txt"));
        assert_eq!(plan.mapping_file, root.join("mapping_KB.json"));
        assert_eq!(plan.export_dir, root.join("export").join("KB"));
        assert_eq!(plan.cleaned_dir, root.join("export_cleaned").join("KB"));
    }

    #[test]
    fn plan_honours_configured_directories() {
        let root = PathBuf::from("/work");
        let config = KbConfig {
            paths: PathsSection {
                export_dir: Some(PathBuf::from("/data/export")),
                cleaned_dir: Some(PathBuf::from("clean")),
                links_dir: Some(PathBuf::from("links")),
            },
            ..KbConfig::default()
        };
        let space = SpaceConfig::conventional("PUG", "programmatic-user-guide");
        let plan = SpacePlan::new(&resolved(&root), &config, &space);
        assert_eq!(plan.export_dir, PathBuf::from("/data/export/PUG"));
        assert_eq!(plan.cleaned_dir, root.join("clean").join("PUG"));
        assert_eq!(plan.links_file, root.join("links").join("links_PUG.txt"));
    }

    fn seed_space(root: &Path) {
        let raw = root.join("data").join("raw_html");
        fs::create_dir_all(&raw).expect("raw dir");
        fs::write(
            raw.join("zmp.txt"),
            r#"<a href="/zmp/a">A</a><a href="/other/x">X</a><a href="/zmp/b">B</a>"#,
        )
        .expect("raw html");

        let export = root.join("export").join("KB");
        fs::create_dir_all(&export).expect("export dir");
        fs::write(
            export.join("a.json"),
            json!({"title": "Page A", "url": "https://old/path/123", "paragraphs": []}).to_string(),
        )
        .expect("record a");
        fs::write(
            export.join("z.json"),
            json!({"title": "Page Z", "url": "https://old/path/999", "paragraphs": []}).to_string(),
        )
        .expect("record z");
    }

    #[test]
    fn run_space_links_resolves_and_reconciles() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        seed_space(root);

        let pages = Pages(HashMap::from([
            ("https://kb.example/zmp/a".to_string(), page("123")),
            ("https://kb.example/zmp/b".to_string(), page("456")),
        ]));
        let plan = plan_for(root, "KB");
        let outcome = run_space(&pages, "https://kb.example", &plan).expect("run");

        assert_eq!(outcome.links, 2);
        assert_eq!(outcome.page_ids, 2);
        assert_eq!(outcome.report.succeeded, vec!["https://kb.example/zmp/a"]);
        assert_eq!(outcome.report.failed, vec!["https://old/path/999"]);

        let mapping = load_mapping(&plan.mapping_file).expect("mapping");
        assert_eq!(
            mapping.iter().collect::<Vec<_>>(),
            vec![
                ("https://kb.example/zmp/a", "123"),
                ("https://kb.example/zmp/b", "456")
            ]
        );
        assert!(plan.cleaned_dir.join("a.json").exists());
    }

    #[test]
    fn resolution_failure_leaves_exports_untouched() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        seed_space(root);

        let pages = Pages(HashMap::from([(
            "https://kb.example/zmp/a".to_string(),
            page("123"),
        )]));
        let plan = plan_for(root, "KB");
        let error = run_space(&pages, "https://kb.example", &plan).expect_err("must fail");
        assert!(format!("{error:#}").contains("https://kb.example/zmp/b"));
        assert!(error.downcast_ref::<KbError>().is_none());
        assert!(!plan.mapping_file.exists());
        assert!(!plan.cleaned_dir.exists());
    }

    #[test]
    fn keep_going_runs_remaining_spaces() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        seed_space(root);

        let pages = Pages(HashMap::from([
            ("https://kb.example/zmp/a".to_string(), page("123")),
            ("https://kb.example/zmp/b".to_string(), page("456")),
        ]));
        let mut broken = plan_for(root, "PUG");
        broken.html_file = root.join("missing.txt");
        let plans = vec![broken, plan_for(root, "KB")];

        let error = run_spaces(&pages, "https://kb.example", &plans, false).expect_err("stops");
        assert!(format!("{error:#}").contains("space PUG failed"));
        assert!(!plans[1].cleaned_dir.exists());

        let report = run_spaces(&pages, "https://kb.example", &plans, true).expect("keeps going");
        assert_eq!(report.failed, vec!["PUG"]);
        assert_eq!(report.outcomes.len(), 1);
        let kb = &report.outcomes[0];
        assert_eq!(kb.key, "KB");
        assert_eq!(kb.report.succeeded, vec!["https://kb.example/zmp/a"]);
        assert_eq!(kb.report.failed, vec!["https://old/path/999"]);
        assert!(plans[1].cleaned_dir.join("a.json").exists());
    }
}
