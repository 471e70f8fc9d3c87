//! Fetch error taxonomy.
//!
//! Every failure mode maps deterministically to exactly one terminal page
//! status; no error is used for ordinary control flow.

use crate::models::PageStatus;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("redirect limit exceeded")]
    RedirectLoop,
    #[error("response body exceeded size cap of {0} bytes")]
    SizeCap(u64),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("artifact write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Classify a reqwest error. DNS failures are split out because they are
    /// terminal while other connection problems retry.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_redirect() {
            return Self::RedirectLoop;
        }
        let detail = source_chain(err);
        if err.is_connect() {
            let lower = detail.to_lowercase();
            if lower.contains("dns") || lower.contains("resolve") || lower.contains("name") {
                return Self::Dns(detail);
            }
            return Self::Connect(detail);
        }
        Self::Transport(detail)
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) | Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || (500..600).contains(code),
            Self::Dns(_) | Self::RedirectLoop | Self::SizeCap(_) | Self::Io(_) => false,
        }
    }

    /// Terminal page status once retries are exhausted.
    pub fn terminal_status(&self) -> PageStatus {
        match self {
            // Non-retryable client responses mean the link itself is broken.
            Self::Status(code) if (400..500).contains(code) && *code != 429 => PageStatus::Broken,
            _ => PageStatus::FetchError,
        }
    }
}

fn source_chain(err: &reqwest::Error) -> String {
    use std::error::Error;
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_broken_and_final() {
        let err = FetchError::Status(404);
        assert!(!err.is_transient());
        assert_eq!(err.terminal_status(), PageStatus::Broken);

        let gone = FetchError::Status(410);
        assert_eq!(gone.terminal_status(), PageStatus::Broken);
    }

    #[test]
    fn rate_limit_and_server_errors_retry() {
        assert!(FetchError::Status(429).is_transient());
        assert!(FetchError::Status(500).is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert_eq!(
            FetchError::Status(503).terminal_status(),
            PageStatus::FetchError
        );
    }

    #[test]
    fn dns_and_caps_are_terminal_fetch_errors() {
        assert!(!FetchError::Dns("no such host".into()).is_transient());
        assert!(!FetchError::SizeCap(1024).is_transient());
        assert!(!FetchError::RedirectLoop.is_transient());
        assert_eq!(
            FetchError::Dns("x".into()).terminal_status(),
            PageStatus::FetchError
        );
        assert_eq!(
            FetchError::SizeCap(1).terminal_status(),
            PageStatus::FetchError
        );
    }

    #[test]
    fn timeouts_retry_then_fail() {
        let err = FetchError::Timeout;
        assert!(err.is_transient());
        assert_eq!(err.terminal_status(), PageStatus::FetchError);
    }
}
