//! HTML → [`TrendingRecord`] extraction for the GitHub trending page.
//!
//! The page renders one `article.Box-row` per repository. Each article is
//! processed on its own; an article that cannot be turned into a record is
//! logged and dropped without consuming a rank.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::{repo_url, TrendingRecord};

static ENTRY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("article.Box-row").expect("BUG: hardcoded CSS selector 'article.Box-row' is invalid")
});

static HEADING_LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h2 a[href]").expect("BUG: hardcoded CSS selector 'h2 a[href]' is invalid")
});

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("BUG: hardcoded CSS selector 'a[href]' is invalid")
});

static DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"p[class*="col-9"]"#)
        .expect("BUG: hardcoded CSS selector for description is invalid")
});

static LANGUAGE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[itemprop="programmingLanguage"]"#)
        .expect("BUG: hardcoded CSS selector for language is invalid")
});

static STARGAZERS_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[href$="/stargazers"]"#)
        .expect("BUG: hardcoded CSS selector for stargazers is invalid")
});

static FORKS_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[href$="/forks"]"#).expect("BUG: hardcoded CSS selector for forks is invalid")
});

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("BUG: hardcoded count regex is invalid"));

static WINDOW_STARS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s*stars?\s*(?:today|this week|this month)")
        .expect("BUG: hardcoded window stars regex is invalid")
});

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("repository path segment is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("repository path segment '{0}' is blank after decoding")]
    BlankSegment(String),
}

/// Parse a full trending page into ranked records, in document order.
///
/// Ranks are contiguous from 1 and only count entries that produced a
/// record.
pub fn parse_trending_html(html: &str) -> Vec<TrendingRecord> {
    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for (position, entry) in document.select(&ENTRY_SELECTOR).enumerate() {
        let rank = records.len() as u32 + 1;
        match extract_entry(entry, rank) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => debug!(position, "Skipping trending entry without a repository link"),
            Err(e) => warn!(position, error = %e, "Failed to parse trending entry"),
        }
    }

    records
}

fn extract_entry(entry: ElementRef<'_>, rank: u32) -> Result<Option<TrendingRecord>, ExtractError> {
    let Some((owner, repo)) = find_repo_link(entry)? else {
        return Ok(None);
    };

    let description = entry
        .select(&DESCRIPTION_SELECTOR)
        .next()
        .map(|p| collapse_whitespace(&element_text(p)))
        .unwrap_or_default();

    let language = entry
        .select(&LANGUAGE_SELECTOR)
        .next()
        .map(|l| element_text(l).trim().to_string())
        .unwrap_or_default();

    let stars = anchor_count(entry, &STARGAZERS_SELECTOR);
    let forks = anchor_count(entry, &FORKS_SELECTOR);

    // Matched per text node so digits never run across a tag boundary.
    let stars_in_window = entry
        .text()
        .find_map(|t| WINDOW_STARS_RE.captures(t))
        .and_then(|c| c.get(1))
        .map(|m| parse_count(m.as_str()))
        .unwrap_or(0);

    Ok(Some(TrendingRecord {
        rank,
        url: repo_url(&owner, &repo),
        owner,
        repo,
        description,
        language,
        stars,
        forks,
        stars_in_window,
    }))
}

/// The repository link is the heading link when present, otherwise the first
/// link whose path has at least two non-empty segments.
fn find_repo_link(entry: ElementRef<'_>) -> Result<Option<(String, String)>, ExtractError> {
    let candidates = entry
        .select(&HEADING_LINK_SELECTOR)
        .chain(entry.select(&LINK_SELECTOR));

    for link in candidates {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if let Some((owner, repo)) = split_repo_path(href) {
            return Ok(Some((decode_segment(owner)?, decode_segment(repo)?)));
        }
    }
    Ok(None)
}

/// `/owner/repo[/...][?query][#fragment]` → `("owner", "repo")`.
fn split_repo_path(href: &str) -> Option<(&str, &str)> {
    if !href.starts_with('/') || href.starts_with("//") {
        return None;
    }
    let path = href.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    Some((owner, repo))
}

fn decode_segment(segment: &str) -> Result<String, ExtractError> {
    let decoded = urlencoding::decode(segment)?;
    let decoded = decoded.trim();
    if decoded.is_empty() {
        return Err(ExtractError::BlankSegment(segment.to_string()));
    }
    Ok(decoded.to_string())
}

fn anchor_count(entry: ElementRef<'_>, selector: &Selector) -> u64 {
    entry
        .select(selector)
        .next()
        .and_then(|a| {
            let text = element_text(a);
            COUNT_RE.find(&text).map(|m| parse_count(m.as_str()))
        })
        .unwrap_or(0)
}

/// Strip thousands separators; unparsable input counts as zero.
fn parse_count(raw: &str) -> u64 {
    raw.replace(',', "").parse().unwrap_or(0)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
