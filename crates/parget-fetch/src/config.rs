use std::fmt::Write as _;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parget_fs::PayloadPaths;
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Url};

use crate::error::{FetchError, Result};
use crate::size::ByteSize;

const DEFAULT_BLOCK: u64 = 5 * 1024 * 1024;

/// Default `User-Agent`: `parget/<version>; <os>-<arch>`.
pub fn default_user_agent() -> String {
    format!(
        "parget/{}; {}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn parallelism() -> usize { std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) }

/// Hard ceiling for the worker pool.
pub fn max_workers() -> usize { parallelism() * 10 }

/// Validated settings for one download run.
#[derive(Debug)]
pub struct Configure {
    url:        Url,
    output:     PathBuf,
    proxy:      Option<Url>,
    user_agent: String,
    head:       bool,
    headers:    Vec<(HeaderName, HeaderValue)>,
    cookies:    Vec<String>,
    cursor:     AtomicUsize,
    insecure:   bool,
    workers:    usize,
    block:      u64,
    client:     reqwest::Client,
}

impl Configure {
    pub fn builder(url: impl Into<String>) -> ConfigureBuilder { ConfigureBuilder::new(url) }

    pub fn url(&self) -> &Url { &self.url }

    pub fn output(&self) -> &Path { &self.output }

    pub fn proxy(&self) -> Option<&Url> { self.proxy.as_ref() }

    pub fn user_agent(&self) -> &str { &self.user_agent }

    pub fn head(&self) -> bool { self.head }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] { &self.headers }

    pub fn cookies(&self) -> &[String] { &self.cookies }

    pub fn insecure(&self) -> bool { self.insecure }

    pub fn workers(&self) -> usize { self.workers }

    pub fn block(&self) -> u64 { self.block }

    pub fn client(&self) -> &reqwest::Client { &self.client }

    pub fn paths(&self) -> Result<PayloadPaths> { Ok(PayloadPaths::for_output(&self.output)?) }

    /// Next cookie in round-robin order.
    pub fn next_cookie(&self) -> Option<&str> {
        if self.cookies.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.cookies.len();
        Some(&self.cookies[i])
    }

    /// A request carrying the configured headers, agent and the next cookie.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        req = req.header(header::USER_AGENT, &self.user_agent);
        if let Some(cookie) = self.next_cookie() {
            req = req.header(header::COOKIE, cookie);
        }
        req
    }

    /// Whether the output already exists. A directory in its place is an error.
    pub fn exists(&self) -> Result<bool> {
        match std::fs::metadata(&self.output) {
            Ok(meta) if meta.is_dir() => Err(FetchError::OutputIsDirectory(self.output.clone())),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(FetchError::io(&self.output)(e)),
        }
    }

    /// Multi-line settings block shown before a run starts.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let proxy = self.proxy.as_ref().map(Url::as_str).unwrap_or_default();
        let _ = writeln!(s, "      URL: {}", self.url);
        let _ = writeln!(s, "   Output: {}", self.output.display());
        let _ = writeln!(
            s,
            "     Head: {}  Insecure: {}  Worker: {}  Block: {}",
            self.head,
            self.insecure,
            self.workers,
            ByteSize(self.block)
        );
        let _ = writeln!(s, "    Proxy: {proxy}");
        let _ = writeln!(s, "UserAgent: {}", self.user_agent);
        if !self.headers.is_empty() {
            let _ = writeln!(s, "   Header: [");
            for (name, value) in &self.headers {
                let _ = writeln!(s, "      {name} = {value:?}");
            }
            let _ = writeln!(s, "   ]");
        }
        if !self.cookies.is_empty() {
            let _ = writeln!(s, "   Cookie: [");
            for cookie in &self.cookies {
                let _ = writeln!(s, "      {cookie}");
            }
            let _ = writeln!(s, "   ]");
        }
        s
    }
}

/// Builder for [`Configure`]; all validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ConfigureBuilder {
    url:        String,
    output:     Option<PathBuf>,
    proxy:      Option<String>,
    user_agent: Option<String>,
    head:       bool,
    headers:    Vec<String>,
    cookies:    Vec<String>,
    insecure:   bool,
    workers:    usize,
    block:      u64,
}

impl ConfigureBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:        url.into(),
            output:     None,
            proxy:      None,
            user_agent: None,
            head:       false,
            headers:    Vec::new(),
            cookies:    Vec::new(),
            insecure:   false,
            workers:    parallelism(),
            block:      DEFAULT_BLOCK,
        }
    }

    #[must_use]
    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn head(mut self, head: bool) -> Self {
        self.head = head;
        self
    }

    /// A raw `Key: Value` header line.
    #[must_use]
    pub fn header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }

    #[must_use]
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    #[must_use]
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn block(mut self, block: impl Into<ByteSize>) -> Self {
        self.block = block.into().get();
        self
    }

    pub fn build(self) -> Result<Configure> {
        let url = parse_url(&self.url)?;
        let output = resolve_output(&url, self.output)?;
        let proxy = self.proxy.filter(|p| !p.is_empty()).map(|p| parse_proxy(&p)).transpose()?;

        let mut user_agent = self.user_agent.filter(|a| !a.is_empty());
        let mut cookies: Vec<String> = self.cookies.into_iter().filter(|c| !c.is_empty()).collect();
        let mut headers = Vec::new();
        for line in &self.headers {
            let (key, value) = split_header(line);
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(line.clone()))?;
            if name == header::USER_AGENT {
                if !value.is_empty() {
                    user_agent = Some(value.to_string());
                }
            } else if name == header::COOKIE {
                if !value.is_empty() {
                    cookies.push(value.to_string());
                }
            } else {
                let value = HeaderValue::from_str(value)
                    .map_err(|_| FetchError::InvalidHeader(line.clone()))?;
                headers.push((name, value));
            }
        }

        if self.workers < 1 {
            return Err(FetchError::InvalidWorkers(self.workers));
        }
        let workers = self.workers.min(max_workers());
        if self.block == 0 {
            return Err(FetchError::InvalidBlock);
        }

        let mut client = reqwest::Client::builder().danger_accept_invalid_certs(self.insecure);
        if let Some(proxy) = &proxy {
            client = client.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Configure {
            url,
            output,
            proxy,
            user_agent: user_agent.unwrap_or_else(default_user_agent),
            head: self.head,
            headers,
            cookies,
            cursor: AtomicUsize::new(0),
            insecure: self.insecure,
            workers,
            block: self.block,
            client: client.build()?,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

fn parse_proxy(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|_| FetchError::InvalidProxy(raw.to_string()))?;
    match url.scheme() {
        "socks5" | "http" | "https" => Ok(url),
        _ => Err(FetchError::InvalidProxy(raw.to_string())),
    }
}

fn resolve_output(url: &Url, output: Option<PathBuf>) -> Result<PathBuf> {
    let output = match output.filter(|o| !o.as_os_str().is_empty()) {
        Some(output) => output,
        None => {
            let last = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .unwrap_or_default();
            PathBuf::from(last)
        }
    };
    if matches!(output.to_str(), Some("" | "/" | "." | "..")) {
        return Err(FetchError::InvalidOutput(output));
    }
    std::path::absolute(&output).map_err(FetchError::io(&output))
}

fn split_header(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((key, value)) => (key.trim(), value.trim()),
        None => (line.trim(), ""),
    }
}
