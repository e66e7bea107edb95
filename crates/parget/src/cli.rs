use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use parget_fetch::{ByteSize, Configure, FetchError};

/// Environment variables consulted for a proxy, in order.
const PROXY_VARS: [&str; 4] = ["socket_proxy", "SOCKET_proxy", "http_proxy", "HTTP_PROXY"];

#[derive(Clone, Debug, Parser)]
#[command(
    name = "parget",
    version = env!("CARGO_PKG_VERSION"),
    about,
    long_about = None,
    propagate_version = true
)]
pub struct App {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Download a file with parallel range requests
    #[command(alias = "g", name = "get")]
    Get(GetArg),
}

#[derive(Clone, Debug, Args)]
pub struct GetArg {
    /// HTTP download address
    #[arg(short, long)]
    pub url: String,

    /// Target output file path (default: last segment of the URL path)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// socks5://host:port or http(s)://host:port
    #[arg(short, long)]
    pub proxy: Option<String>,

    /// Request header as `Key: Value`, repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// User-Agent header
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Request cookie, repeatable; requests rotate through them
    #[arg(short, long = "cookie")]
    pub cookies: Vec<String>,

    /// Number of workers performing downloads
    #[arg(short, long, default_value_t = default_workers())]
    pub worker: usize,

    /// Block size handed to each worker [g m k b]
    #[arg(short, long, default_value = "5m")]
    pub block: ByteSize,

    /// Answer yes to all questions
    #[arg(short, long)]
    pub yes: bool,

    /// Probe with HEAD instead of GET
    #[arg(long)]
    pub head: bool,

    /// Allow insecure server connections when using TLS
    #[arg(short = 'k', long)]
    pub insecure: bool,
}

impl GetArg {
    /// Build the run configuration, falling back to `var` for proxy discovery.
    pub fn configure(&self, var: impl Fn(&str) -> Option<String>) -> Result<Configure, FetchError> {
        let mut builder = Configure::builder(self.url.as_str())
            .head(self.head)
            .insecure(self.insecure)
            .workers(self.worker)
            .block(self.block);

        if let Some(output) = &self.output {
            builder = builder.output(output);
        }
        let proxy = self.proxy.clone().filter(|p| !p.is_empty()).or_else(|| discover_proxy(var));
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        if let Some(agent) = &self.agent {
            builder = builder.user_agent(agent.as_str());
        }
        for line in &self.headers {
            builder = builder.header(line.as_str());
        }
        for cookie in &self.cookies {
            builder = builder.cookie(cookie.as_str());
        }
        builder.build()
    }
}

fn default_workers() -> usize { std::thread::available_parallelism().map_or(1, NonZeroUsize::get) }

/// First proxy variable whose value carries the scheme its name implies.
pub fn discover_proxy(var: impl Fn(&str) -> Option<String>) -> Option<String> {
    PROXY_VARS.iter().find_map(|key| {
        let value = var(key).filter(|v| !v.is_empty())?;
        let accepted = if key.to_ascii_lowercase().starts_with("http") {
            value.starts_with("http://") || value.starts_with("https://")
        } else {
            value.starts_with("socks5://")
        };
        if !accepted {
            tracing::debug!(%key, %value, "ignoring proxy variable");
        }
        accepted.then_some(value)
    })
}
