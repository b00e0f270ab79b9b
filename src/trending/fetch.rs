use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, info};
use url::Url;

use super::{parse_trending_html, QueryKey, TrendingRecord};
use crate::error::FetchError;

pub const DEFAULT_UPSTREAM_URL: &str = "https://github.com/trending";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; GitHubTrendingBot/1.0)";

/// Something that can produce the trending listing for a key.
#[async_trait]
pub trait TrendingSource: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<TrendingRecord>, FetchError>;
}

/// Scrapes the rendered GitHub trending page.
#[derive(Debug, Clone)]
pub struct GithubTrendingFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl GithubTrendingFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// `<base>[/<language>]?since=<since>`; the language is percent-encoded as
    /// a single path segment.
    pub fn trending_url(&self, key: &QueryKey) -> Url {
        let mut url = self.base_url.clone();
        if let Some(language) = key.language() {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(language);
            }
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("since", key.since().as_str());
        url
    }
}

#[async_trait]
impl TrendingSource for GithubTrendingFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<TrendingRecord>, FetchError> {
        let url = self.trending_url(key);
        debug!(%url, "Fetching trending page");
        let started = Instant::now();

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response.text().await?;
        let records = parse_trending_html(&html);

        info!(
            %url,
            count = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched trending repositories"
        );
        Ok(records)
    }
}
