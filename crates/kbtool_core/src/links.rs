use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

#[allow(clippy::expect_used)]
static HREF_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("HREF_ATTRIBUTE regex"));

pub fn href_values(text: &str) -> Vec<&str> {
    HREF_ATTRIBUTE
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|value| value.as_str())
        .collect()
}

/// Absolute URLs for every href under `/{url_subdir}/`, prefixed with `base_url`.
/// Duplicates and query strings are kept as found.
pub fn extract_href_urls(text: &str, base_url: &str, url_subdir: &str) -> Vec<String> {
    let prefix = format!("/{url_subdir}/");
    href_values(text)
        .into_iter()
        .filter(|href| href.starts_with(&prefix))
        .map(|href| format!("{base_url}{href}"))
        .collect()
}

pub fn find_links_in_html(
    input_file: &Path,
    base_url: &str,
    url_subdir: &str,
    output_file: &Path,
) -> Result<Vec<String>> {
    let text = fs::read_to_string(input_file)
        .with_context(|| format!("failed to read {}", input_file.display()))?;
    info!(found = href_values(&text).len(), "scanned {}", input_file.display());
    let urls = extract_href_urls(&text, base_url, url_subdir);
    info!(kept = urls.len(), prefix = url_subdir, "filtered links");
    save_links(output_file, &urls)?;
    Ok(urls)
}

pub fn save_links(path: &Path, urls: &[String]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut content = String::new();
    for url in urls {
        content.push_str(url);
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

pub fn load_links(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{extract_href_urls, find_links_in_html, href_values, load_links};

    const BASE: &str = "https://kb.example.com";

    #[test]
    fn only_hrefs_under_the_prefix_are_kept() {
        let html = r#"
            <a href="/zmp/page-one">One</a>
            <a href="/other/page">Other</a>
            <a href="https://elsewhere.com/zmp/x">Abs</a>
            <a href="/zmpx/nope">Near miss</a>
            <a href="/zmp/page-two?x=1">Two</a>
            <a href="/zmp/page-one">Again</a>
        "#;
        let urls = extract_href_urls(html, BASE, "zmp");
        assert_eq!(
            urls,
            vec![
                "https://kb.example.com/zmp/page-one",
                "https://kb.example.com/zmp/page-two?x=1",
                "https://kb.example.com/zmp/page-one",
            ]
        );
        let prefix = format!("{BASE}/zmp/");
        assert!(urls.iter().all(|url| url.starts_with(&prefix)));
    }

    #[test]
    fn malformed_markup_still_yields_links() {
        let html = r#"<div><a href="/gswz/a"<p>unclosed <a class=x href="/gswz/b">"#;
        assert_eq!(href_values(html), vec!["/gswz/a", "/gswz/b"]);
        assert_eq!(extract_href_urls(html, BASE, "gswz").len(), 2);
    }

    #[test]
    fn single_quoted_and_empty_hrefs_are_ignored() {
        let html = r#"<a href='/zmp/single'>x</a><a href="">y</a>"#;
        assert!(extract_href_urls(html, BASE, "zmp").is_empty());
    }

    #[test]
    fn link_file_round_trips_through_disk() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("zmp.txt");
        let output = temp.path().join("out").join("links_KB.txt");
        fs::write(&input, r#"<a href="/zmp/a">a</a><a href="/zmp/b">b</a>"#).expect("write");

        let urls = find_links_in_html(&input, BASE, "zmp", &output).expect("find links");
        let written = fs::read_to_string(&output).expect("read links");
        assert_eq!(
            written,
            "https://kb.example.com/zmp/a\nhttps://kb.example.com/zmp/b\n"
        );
        assert_eq!(load_links(&output).expect("load"), urls);
    }
}
