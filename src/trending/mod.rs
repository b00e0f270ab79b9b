//! Trending repository data model and the scrape pipeline that produces it.

pub mod extract;
pub mod fetch;

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::TrendingError;

pub use extract::parse_trending_html;
pub use fetch::{GithubTrendingFetcher, TrendingSource};

/// Sentinel used in cache keys and responses when no language filter is set.
pub const ALL_LANGUAGES: &str = "all";

/// One entry of the trending listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingRecord {
    /// 1-based position among successfully extracted entries.
    pub rank: u32,
    #[serde(rename = "username")]
    pub owner: String,
    #[serde(rename = "reponame")]
    pub repo: String,
    pub url: String,
    pub description: String,
    pub language: String,
    pub stars: u64,
    pub forks: u64,
    /// Stars gained during the requested timeframe.
    #[serde(rename = "starsToday")]
    pub stars_in_window: u64,
}

impl TrendingRecord {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Canonical repository URL for an owner/repo pair.
pub fn repo_url(owner: &str, repo: &str) -> String {
    format!("https://github.com/{}/{}", owner, repo)
}

/// Timeframe of the trending ranking.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[schemars(inline)]
pub enum Since {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Since {
    pub const ALLOWED: [&'static str; 3] = ["daily", "weekly", "monthly"];

    pub fn as_str(self) -> &'static str {
        match self {
            Since::Daily => "daily",
            Since::Weekly => "weekly",
            Since::Monthly => "monthly",
        }
    }

    /// Phrase the upstream page uses next to the window star count.
    pub fn window_phrase(self) -> &'static str {
        match self {
            Since::Daily => "today",
            Since::Weekly => "this week",
            Since::Monthly => "this month",
        }
    }
}

impl fmt::Display for Since {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Since {
    type Err = TrendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Since::Daily),
            "weekly" => Ok(Since::Weekly),
            "monthly" => Ok(Since::Monthly),
            other => Err(TrendingError::InvalidSince(other.to_string())),
        }
    }
}

/// Canonicalized (language, timeframe) pair. Doubles as cache key and
/// upstream request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    language: Option<String>,
    since: Since,
}

impl QueryKey {
    /// Empty or whitespace-only languages collapse to "no filter".
    pub fn new(language: Option<&str>, since: Since) -> Self {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from);
        Self { language, since }
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Language as shown to clients, `all` when unfiltered.
    pub fn language_label(&self) -> &str {
        self.language.as_deref().unwrap_or(ALL_LANGUAGES)
    }

    pub fn since(&self) -> Since {
        self.since
    }

    /// `trending:<language-or-all>:<since>`
    pub fn cache_key(&self) -> String {
        format!("trending:{}:{}", self.language_label(), self.since)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}
