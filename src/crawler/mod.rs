//! The crawl core: scope policy, robots cache, sitemap expansion, fetching,
//! link extraction, pacing, and the engine that ties them together.

pub mod engine;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod rate_limit;
pub mod robots;
pub mod sitemap;
pub mod url_policy;

pub use engine::{CrawlEngine, EngineOutcome};
pub use error::FetchError;
pub use fetcher::{ContentClass, Fetched, Fetcher};
pub use rate_limit::HostLimiter;
pub use robots::{RobotsCache, RobotsRules, RobotsVerdict};
pub use sitemap::{SitemapEntry, SitemapExpander};
pub use url_policy::{RejectReason, Scope, UrlPolicy};
