//! siteharvest - site-scoped, sitemap-rooted document crawler.
//!
//! Discovers, fetches, classifies, and preserves documents belonging to a
//! single corporate domain, then extracts structured Question/Answer items
//! from accessible HTML pages. The registry (a single SQLite file) is the
//! authoritative state; the crawl can be interrupted at any point and
//! restarted without loss or duplication.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod export;
pub mod models;
pub mod postprocess;
pub mod repository;
pub mod storage;

pub use config::Config;
pub use crawler::{CrawlEngine, EngineOutcome};
pub use repository::Registry;
