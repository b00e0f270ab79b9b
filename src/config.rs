use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::trending::fetch::DEFAULT_UPSTREAM_URL;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Runtime settings, resolved by the binary from flags and environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    /// Origin used to build absolute URLs. When unset it is derived from
    /// each request's `Host` and `X-Forwarded-Proto` headers.
    pub public_url: Option<Url>,
    pub upstream_url: Url,
    /// `None` disables the cache store entirely.
    pub cache_ttl: Option<Duration>,
    pub fetch_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().expect("BUG: default bind address is invalid"),
            public_url: None,
            upstream_url: Url::parse(DEFAULT_UPSTREAM_URL).expect("BUG: default upstream URL is invalid"),
            cache_ttl: Some(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}
