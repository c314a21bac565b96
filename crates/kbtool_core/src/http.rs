use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Proxy, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::KbError;

pub const DEFAULT_USER_AGENT: &str = "kbtool/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// The three GET shapes the tool needs. `HttpClient` talks to the network;
/// tests substitute an in-memory implementation.
pub trait Fetch {
    fn get_text(&self, url: &str) -> Result<String>;
    fn get_json(&self, url: &str) -> Result<Value>;
    /// Streams the body to `path` and returns the number of bytes written.
    fn download(&self, url: &str, path: &Path) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub auth: Option<BasicAuth>,
    pub headers: Vec<(String, String)>,
    pub verify_tls: bool,
    pub proxy: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auth: None,
            headers: Vec::new(),
            verify_tls: true,
            proxy: None,
        }
    }
}

pub struct HttpClient {
    client: Client,
    auth: Option<BasicAuth>,
}

impl HttpClient {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .default_headers(build_headers(options)?)
            .danger_accept_invalid_certs(!options.verify_tls);
        if let Some(proxy) = options.proxy.as_deref() {
            let proxy = Proxy::all(proxy).with_context(|| format!("invalid proxy url {proxy}"))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self {
            client,
            auth: options.auth.clone(),
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, auth.password.as_deref()),
            None => request,
        }
    }

    fn send(&self, url: &str) -> Result<Response> {
        debug!(url, "GET");
        let response = self
            .request(url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        ensure_success(response.status(), url)?;
        Ok(response)
    }
}

impl Fetch for HttpClient {
    fn get_text(&self, url: &str) -> Result<String> {
        self.send(url)?
            .text()
            .with_context(|| format!("failed to read response body of {url}"))
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        self.send(url)?
            .json()
            .with_context(|| format!("failed to decode JSON response of {url}"))
    }

    fn download(&self, url: &str, path: &Path) -> Result<u64> {
        let mut response = self.send(url)?;
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let written = response
            .copy_to(&mut writer)
            .with_context(|| format!("failed to stream {url} to {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(written)
    }
}

pub fn ensure_success(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(KbError::HttpStatus {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        url: url.to_string(),
    }
    .into())
}

fn build_headers(options: &HttpOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&options.user_agent)
            .with_context(|| format!("invalid user agent {:?}", options.user_agent))?,
    );
    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
