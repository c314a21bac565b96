use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http::{BasicAuth, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT, HttpOptions};

pub const DEFAULT_BASE_URL: &str = "https://knowledgebase.zetaglobal.com";
pub const DEFAULT_CONFLUENCE_URL: &str = "https://boomtrain.atlassian.net/wiki";
pub const DEFAULT_EXPORT_DIR: &str = "export";
pub const DEFAULT_CLEANED_DIR: &str = "export_cleaned";
pub const DEFAULT_RAW_HTML_DIR: &str = "data/raw_html";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KbConfig {
    #[serde(default)]
    pub kb: KbSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub confluence: ConfluenceSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub spaces: Vec<SpaceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KbSection {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: Option<bool>,
    pub proxy: Option<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfluenceSection {
    pub base_url: Option<String>,
    /// Browser-facing page url pattern; `{space}` and `{page_id}` are filled in.
    pub web_url: Option<String>,
    pub template: Option<PathBuf>,
    /// Space keys to dump. Empty means every space the API lists.
    #[serde(default)]
    pub spaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub export_dir: Option<PathBuf>,
    pub cleaned_dir: Option<PathBuf>,
    pub links_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SpaceConfig {
    pub key: String,
    pub html_file: PathBuf,
    pub url_subdir: String,
}

impl SpaceConfig {
    pub fn conventional(key: &str, url_subdir: &str) -> Self {
        Self {
            key: key.to_string(),
            html_file: Path::new(DEFAULT_RAW_HTML_DIR).join(format!("{url_subdir}.txt")),
            url_subdir: url_subdir.to_string(),
        }
    }
}

pub fn default_spaces() -> Vec<SpaceConfig> {
    vec![
        SpaceConfig::conventional("KB", "zmp"),
        SpaceConfig::conventional("PUG", "programmatic-user-guide"),
        SpaceConfig::conventional("GSWZ", "gswz"),
    ]
}

impl KbConfig {
    /// Resolve the knowledge-base origin: env KB_BASE_URL > config > DEFAULT_BASE_URL.
    /// Trailing slashes are dropped so hrefs can be appended directly.
    pub fn base_url(&self) -> String {
        self.base_url_with(|key| env::var(key).ok())
    }

    fn base_url_with<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        non_empty(lookup_env("KB_BASE_URL"))
            .or_else(|| self.kb.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Resolve the REST API origin: env CONFLUENCE_BASE_URL > config > DEFAULT_CONFLUENCE_URL.
    pub fn confluence_url(&self) -> String {
        non_empty(env::var("CONFLUENCE_BASE_URL").ok())
            .or_else(|| self.confluence.base_url.clone())
            .unwrap_or_else(|| DEFAULT_CONFLUENCE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn web_url_pattern(&self) -> String {
        self.confluence
            .web_url
            .clone()
            .unwrap_or_else(|| format!("{}/spaces/{{space}}/pages/{{page_id}}/", self.confluence_url()))
    }

    pub fn spaces(&self) -> Vec<SpaceConfig> {
        if self.spaces.is_empty() {
            default_spaces()
        } else {
            self.spaces.clone()
        }
    }

    /// Configured space by key (case-insensitive), else the conventional layout
    /// derived from the lowercased key.
    pub fn space(&self, key: &str) -> SpaceConfig {
        self.spaces()
            .into_iter()
            .find(|space| space.key.eq_ignore_ascii_case(key))
            .unwrap_or_else(|| SpaceConfig::conventional(key, &key.to_ascii_lowercase()))
    }

    pub fn http_options(&self) -> Result<HttpOptions> {
        self.http_options_with(|key| env::var(key).ok())
    }

    fn http_options_with<F>(&self, lookup_env: F) -> Result<HttpOptions>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_agent = non_empty(lookup_env("KB_USER_AGENT"))
            .or_else(|| self.kb.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let username = non_empty(lookup_env("KB_HTTP_USERNAME")).or_else(|| self.http.username.clone());
        let password = non_empty(lookup_env("KB_HTTP_PASSWORD")).or_else(|| self.http.password.clone());
        let proxy = non_empty(lookup_env("KB_HTTP_PROXY")).or_else(|| self.http.proxy.clone());
        let timeout_ms = match non_empty(lookup_env("KB_HTTP_TIMEOUT_MS")) {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("KB_HTTP_TIMEOUT_MS is not a number: {value}"))?,
            None => self.http.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        let verify_tls = match non_empty(lookup_env("KB_HTTP_VERIFY_TLS")) {
            Some(value) => parse_flag(&value)
                .with_context(|| format!("KB_HTTP_VERIFY_TLS is not a boolean: {value}"))?,
            None => self.http.verify_tls.unwrap_or(true),
        };

        Ok(HttpOptions {
            user_agent,
            timeout_ms,
            auth: username.map(|username| BasicAuth { username, password }),
            headers: self
                .http
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            verify_tls,
            proxy,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load and parse a KbConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<KbConfig> {
    if !config_path.exists() {
        return Ok(KbConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: KbConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        r#"# kbtool configuration. Every key is optional.

[kb]
base_url = "{DEFAULT_BASE_URL}"
# user_agent = "{DEFAULT_USER_AGENT}"

[http]
# username = ""
# password = ""
verify_tls = true
# proxy = "http://proxy.internal:3128"
timeout_ms = {DEFAULT_TIMEOUT_MS}

[http.headers]

[confluence]
base_url = "{DEFAULT_CONFLUENCE_URL}"
# template = "template.html"
spaces = []

[paths]
export_dir = "{DEFAULT_EXPORT_DIR}"
cleaned_dir = "{DEFAULT_CLEANED_DIR}"

[[spaces]]
key = "KB"
html_file = "{DEFAULT_RAW_HTML_DIR}/zmp.txt"
url_subdir = "zmp"

[[spaces]]
key = "PUG"
html_file = "{DEFAULT_RAW_HTML_DIR}/programmatic-user-guide.txt"
url_subdir = "programmatic-user-guide"

[[spaces]]
key = "GSWZ"
html_file = "{DEFAULT_RAW_HTML_DIR}/gswz.txt"
url_subdir = "gswz"
"#
    )
}
