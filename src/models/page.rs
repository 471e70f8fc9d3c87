//! Page lifecycle model: one row per HTTP-resolvable URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Lifecycle status of a page in the registry.
///
/// `Pending` and `Fetching` are the only non-terminal states; everything
/// else never transitions further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Discovered, waiting in the frontier.
    Pending,
    /// Claimed by a worker; reset to Pending on crash recovery.
    Fetching,
    /// Fetched and processed successfully.
    Ok,
    /// Server answered with a non-retryable client error.
    Broken,
    /// robots.txt disallows this URL.
    BlockedRobots,
    /// Filtered out by scope policy (excluded section or redirect out of scope).
    ExcludedPolicy,
    /// Network or server failure after retries, size cap, redirect loop.
    FetchError,
    /// Discovery depth exceeded the budget for its lineage.
    SkippedDepth,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Ok => "ok",
            Self::Broken => "broken",
            Self::BlockedRobots => "blocked_robots",
            Self::ExcludedPolicy => "excluded_policy",
            Self::FetchError => "fetch_error",
            Self::SkippedDepth => "skipped_depth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "ok" => Some(Self::Ok),
            "broken" => Some(Self::Broken),
            "blocked_robots" => Some(Self::BlockedRobots),
            "excluded_policy" => Some(Self::ExcludedPolicy),
            "fetch_error" => Some(Self::FetchError),
            "skipped_depth" => Some(Self::SkippedDepth),
            _ => None,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Fetching)
    }
}

/// Lineage tag selecting the depth budget for a URL.
///
/// FAQ dominates: once a page is reached through any FAQ-lineage edge it
/// stays FAQ for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    Faq,
    General,
}

impl Lineage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Faq => "faq",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "faq" => Some(Self::Faq),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Combine two lineage observations; FAQ is absorbing.
    pub fn promote(self, other: Lineage) -> Lineage {
        if self == Lineage::Faq || other == Lineage::Faq {
            Lineage::Faq
        } else {
            Lineage::General
        }
    }
}

/// One crawlable URL and everything recorded about it.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub host: String,
    pub path: String,
    pub depth: u32,
    pub lineage: Lineage,
    pub status: PageStatus,
    pub parent_url: Option<String>,
    pub claimed_by: Option<String>,
    pub title: Option<String>,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub final_url: Option<String>,
    pub raw_path: Option<String>,
    pub markdown_path: Option<String>,
    pub attempts: u32,
    pub postprocess_error: Option<String>,
    pub last_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Page {
    /// Create a new pending page from a normalized URL.
    pub fn new(url: &Url, parent_url: Option<&str>, depth: u32, lineage: Lineage) -> Self {
        Self {
            url: url.to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            path: url.path().to_string(),
            depth,
            lineage,
            status: PageStatus::Pending,
            parent_url: parent_url.map(|s| s.to_string()),
            claimed_by: None,
            title: None,
            http_status: None,
            content_type: None,
            content_hash: None,
            final_url: None,
            raw_path: None,
            markdown_path: None,
            attempts: 0,
            postprocess_error: None,
            last_error: None,
            discovered_at: Utc::now(),
            fetched_at: None,
        }
    }
}

/// Directed link between two pages, recorded after extraction.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEdge {
    pub from_url: String,
    pub to_url: String,
    pub anchor_text: String,
    pub is_external: bool,
    pub discovered_depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            PageStatus::Pending,
            PageStatus::Fetching,
            PageStatus::Ok,
            PageStatus::Broken,
            PageStatus::BlockedRobots,
            PageStatus::ExcludedPolicy,
            PageStatus::FetchError,
            PageStatus::SkippedDepth,
        ] {
            assert_eq!(PageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PageStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PageStatus::Pending.is_terminal());
        assert!(!PageStatus::Fetching.is_terminal());
        assert!(PageStatus::Ok.is_terminal());
        assert!(PageStatus::SkippedDepth.is_terminal());
        assert!(PageStatus::BlockedRobots.is_terminal());
    }

    #[test]
    fn faq_lineage_is_absorbing() {
        assert_eq!(Lineage::Faq.promote(Lineage::General), Lineage::Faq);
        assert_eq!(Lineage::General.promote(Lineage::Faq), Lineage::Faq);
        assert_eq!(Lineage::General.promote(Lineage::General), Lineage::General);
    }

    #[test]
    fn page_captures_host_and_path() {
        let url = Url::parse("https://example.com/help/faq").unwrap();
        let page = Page::new(&url, None, 2, Lineage::Faq);
        assert_eq!(page.host, "example.com");
        assert_eq!(page.path, "/help/faq");
        assert_eq!(page.status, PageStatus::Pending);
    }
}
