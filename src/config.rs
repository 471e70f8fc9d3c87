//! Typed crawl configuration loaded from a TOML file.
//!
//! Every option the engine honors is enumerated here; unknown keys are a
//! hard error so `validate` catches typos before a crawl starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Configuration errors are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Output locations for the registry, artifacts, and exports.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Root of the artifacts tree (html/, md/, pdf/, ...).
    pub artifacts_dir: PathBuf,
    /// Path of the SQLite registry file.
    pub registry_path: PathBuf,
    /// Directory receiving JSONL/CSV exports.
    pub export_dir: PathBuf,
}

/// Crawl configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The single sitemap URL seeding the crawl.
    pub seed_sitemap_url: String,
    /// Hostnames considered in scope. Anything else is recorded as external.
    pub allowed_domains: Vec<String>,
    /// Case-insensitive substrings excluding URL paths from the crawl.
    #[serde(default)]
    pub excluded_sitemap_sections: Vec<String>,
    /// Exact URL prefixes excluded from the crawl.
    #[serde(default)]
    pub excluded_url_prefixes: Vec<String>,
    /// Substrings marking a URL or anchor as FAQ lineage.
    #[serde(default = "default_faq_indicators")]
    pub faq_indicators: Vec<String>,
    /// Depth budget for FAQ-lineage pages.
    #[serde(default = "default_max_depth_faq")]
    pub max_depth_faq: u32,
    /// Depth budget for general pages.
    #[serde(default = "default_max_depth_general")]
    pub max_depth_general: u32,
    /// Number of concurrent fetch workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Requests per second allowed against a single host.
    #[serde(default = "default_per_host_rps")]
    pub per_host_rps: f64,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry budget for transient network errors and 429/5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// User-Agent header, also used for robots.txt matching.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Query parameter names stripped during normalization (utm_* is always
    /// stripped).
    #[serde(default)]
    pub strip_query_params: Vec<String>,
    /// Honor robots.txt (fail-open when unreachable).
    #[serde(default = "default_true")]
    pub robots_enabled: bool,
    /// Hours a fetched robots.txt stays fresh.
    #[serde(default = "default_robots_ttl_hours")]
    pub robots_ttl_hours: u64,
    /// Size caps per content kind, in bytes.
    #[serde(default = "default_size_cap_html")]
    pub size_cap_html: u64,
    #[serde(default = "default_size_cap_pdf")]
    pub size_cap_pdf: u64,
    #[serde(default = "default_size_cap_media")]
    pub size_cap_media: u64,
    pub output: OutputConfig,
}

fn default_faq_indicators() -> Vec<String> {
    vec![
        "faq".to_string(),
        "frequently-asked".to_string(),
        "help-center".to_string(),
    ]
}

fn default_max_depth_faq() -> u32 {
    6
}

fn default_max_depth_general() -> u32 {
    3
}

fn default_worker_count() -> usize {
    4
}

fn default_per_host_rps() -> f64 {
    1.0
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    format!("siteharvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_robots_ttl_hours() -> u64 {
    24
}

fn default_size_cap_html() -> u64 {
    10 * 1024 * 1024
}

fn default_size_cap_pdf() -> u64 {
    50 * 1024 * 1024
}

fn default_size_cap_media() -> u64 {
    500 * 1024 * 1024
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        config.allowed_domains = config
            .allowed_domains
            .iter()
            .map(|d| d.trim().to_lowercase())
            .collect();
        config.validate()?;
        Ok(config)
    }

    /// Type- and range-check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seed = Url::parse(&self.seed_sitemap_url)
            .map_err(|e| ConfigError::Invalid(format!("seed_sitemap_url: {e}")))?;
        if !matches!(seed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "seed_sitemap_url must be http or https".to_string(),
            ));
        }
        if self.allowed_domains.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_domains must list at least one hostname".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.per_host_rps <= 0.0 {
            return Err(ConfigError::Invalid(
                "per_host_rps must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_hours * 3600)
    }

    /// Minimum spacing between requests to one host, from `per_host_rps`.
    pub fn per_host_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.per_host_rps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
seed_sitemap_url = "https://example.com/sitemap.xml"
allowed_domains = ["example.com", "WWW.Example.com"]

[output]
artifacts_dir = "data/artifacts"
registry_path = "data/registry.db"
export_dir = "data/export"
"#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        assert_eq!(config.max_depth_faq, 6);
        assert_eq!(config.max_depth_general, 3);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_retries, 3);
        assert!(config.robots_enabled);
        assert!(config.faq_indicators.contains(&"faq".to_string()));
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml_text = format!("{}\nnot_an_option = true\n", minimal_toml());
        assert!(toml::from_str::<Config>(&toml_text).is_err());
    }

    #[test]
    fn validates_seed_scheme() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.seed_sitemap_url = "ftp://example.com/sitemap.xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validates_worker_count() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn per_host_interval_from_rps() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.per_host_rps = 2.0;
        assert_eq!(config.per_host_interval(), Duration::from_millis(500));
    }
}
