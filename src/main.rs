use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use github_trending_mcp::config::{
    ServiceConfig, DEFAULT_BIND, DEFAULT_CACHE_TTL_SECS, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_HEARTBEAT_SECS,
};
use github_trending_mcp::http::{router, AppState};
use github_trending_mcp::trending::fetch::DEFAULT_UPSTREAM_URL;
use tracing_subscriber::EnvFilter;
use url::Url;

/// GitHub trending repositories as a cached JSON API and an MCP server over SSE
#[derive(Parser)]
#[command(name = "github-trending-mcp", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TRENDING_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Public origin used in advertised URLs (e.g. https://trending.example.com).
    /// Derived from the Host header when unset.
    #[arg(long, env = "TRENDING_PUBLIC_URL")]
    public_url: Option<Url>,

    /// Trending page to scrape
    #[arg(long, env = "TRENDING_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: Url,

    /// Seconds a scraped listing stays cached
    #[arg(long, env = "TRENDING_CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    cache_ttl_secs: u64,

    /// Disable the cache; every query scrapes upstream
    #[arg(long, env = "TRENDING_NO_CACHE")]
    no_cache: bool,

    /// Upstream request timeout in seconds
    #[arg(long, env = "TRENDING_FETCH_TIMEOUT_SECS", default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    fetch_timeout_secs: u64,

    /// Seconds between SSE keepalive comments
    #[arg(long, env = "TRENDING_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_SECS)]
    heartbeat_secs: u64,
}

impl Cli {
    fn into_config(self) -> ServiceConfig {
        ServiceConfig {
            bind: self.bind,
            public_url: self.public_url,
            upstream_url: self.upstream_url,
            cache_ttl: (!self.no_cache).then(|| Duration::from_secs(self.cache_ttl_secs)),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = cli.into_config();
    let state = AppState::from_config(&config).context("Failed to create upstream client")?;

    if config.cache_ttl.is_none() {
        tracing::warn!("Cache disabled, every query hits github.com");
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        upstream = %config.upstream_url,
        cache_ttl_secs = config.cache_ttl.map(|t| t.as_secs()),
        "Starting github-trending-mcp server"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
