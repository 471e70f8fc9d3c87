//! Content-type-aware HTTP fetching with retry, backoff, and size caps.

use std::time::Duration;

use rand::Rng;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::error::FetchError;
use crate::config::Config;

const MAX_REDIRECTS: usize = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Broad content classification driving fetch handling and artifact layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    Pdf,
    Video,
    Audio,
    Other,
}

impl ContentClass {
    /// Classify by Content-Type, falling back to the path extension when the
    /// server is vague.
    pub fn detect(content_type: &str, path: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        match mime.as_str() {
            "text/html" | "application/xhtml+xml" => return Self::Html,
            "application/pdf" => return Self::Pdf,
            _ => {}
        }
        if mime.starts_with("video/") {
            return Self::Video;
        }
        if mime.starts_with("audio/") {
            return Self::Audio;
        }

        let lower = path.to_lowercase();
        if lower.ends_with(".pdf") {
            Self::Pdf
        } else if lower.ends_with(".mp4") || lower.ends_with(".webm") || lower.ends_with(".mov") {
            Self::Video
        } else if lower.ends_with(".mp3") || lower.ends_with(".wav") || lower.ends_with(".ogg") {
            Self::Audio
        } else if mime.is_empty() || mime.starts_with("text/") {
            Self::Html
        } else {
            Self::Other
        }
    }
}

/// A completed fetch: final URL after redirects, status, and a size-capped
/// body.
#[derive(Debug)]
pub struct Fetched {
    pub final_url: Url,
    pub http_status: u16,
    pub content_type: String,
    pub class: ContentClass,
    pub body: Vec<u8>,
    /// Total requests issued, including retries.
    pub attempts: u32,
}

/// HTTP fetcher shared by all workers. Owns the connection pool.
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    size_cap_html: u64,
    size_cap_pdf: u64,
    size_cap_media: u64,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            size_cap_html: config.size_cap_html,
            size_cap_pdf: config.size_cap_pdf,
            size_cap_media: config.size_cap_media,
        })
    }

    /// Plain HTTP client sharing this fetcher's configuration, for the
    /// sitemap expander and the robots cache.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn cap_for(&self, class: ContentClass) -> u64 {
        match class {
            ContentClass::Html => self.size_cap_html,
            ContentClass::Pdf => self.size_cap_pdf,
            ContentClass::Video | ContentClass::Audio => self.size_cap_media,
            ContentClass::Other => self.size_cap_html,
        }
    }

    /// GET a URL with retries on transient failures.
    ///
    /// Retryable: connect failures, timeouts, 429, and 5xx. Everything else
    /// fails immediately. The attempt counter in the result includes every
    /// request issued.
    pub async fn fetch(&self, url: &Url) -> Result<Fetched, (FetchError, u32)> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.fetch_once(url, attempts).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) => {
                    if err.is_transient() && attempts <= self.max_retries {
                        let delay = backoff_delay(attempts - 1);
                        debug!(
                            url = %url,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient fetch error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if attempts > 1 {
                        warn!(url = %url, attempts, error = %err, "fetch failed after retries");
                    }
                    return Err((err, attempts));
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url, attempt: u32) -> Result<Fetched, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let class = ContentClass::detect(&content_type, final_url.path());
        let cap = self.cap_for(class);

        if let Some(length) = response.content_length() {
            if length > cap {
                return Err(FetchError::SizeCap(cap));
            }
        }

        let body = read_capped(response, cap).await?;

        Ok(Fetched {
            final_url,
            http_status: status.as_u16(),
            content_type,
            class,
            body,
            attempts: attempt,
        })
    }
}

/// Read a response body, failing once it exceeds the cap. Content-Length is
/// advisory; this guards against servers that lie or stream.
async fn read_capped(mut response: reqwest::Response, cap: u64) -> Result<Vec<u8>, FetchError> {
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(&e))?
    {
        if body.len() as u64 + chunk.len() as u64 > cap {
            return Err(FetchError::SizeCap(cap));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Exponential backoff with +/-20% jitter.
fn backoff_delay(prior_attempts: u32) -> Duration {
    let base = BACKOFF_BASE.as_millis() as f64 * 2f64.powi(prior_attempts.min(8) as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base * jitter) as u64)
}

/// Treat a 304 like success for completeness checks (not used for caching,
/// but the status should not be mistaken for an error).
pub fn is_success_status(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s.is_success() || s == StatusCode::NOT_MODIFIED)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_content_type() {
        assert_eq!(
            ContentClass::detect("text/html; charset=utf-8", "/page"),
            ContentClass::Html
        );
        assert_eq!(
            ContentClass::detect("application/pdf", "/doc"),
            ContentClass::Pdf
        );
        assert_eq!(
            ContentClass::detect("video/mp4", "/clip"),
            ContentClass::Video
        );
        assert_eq!(
            ContentClass::detect("audio/mpeg", "/episode"),
            ContentClass::Audio
        );
        assert_eq!(
            ContentClass::detect("application/zip", "/bundle"),
            ContentClass::Other
        );
    }

    #[test]
    fn detect_falls_back_to_extension() {
        assert_eq!(
            ContentClass::detect("application/octet-stream", "/files/report.PDF"),
            ContentClass::Pdf
        );
        assert_eq!(
            ContentClass::detect("", "/media/intro.mp4"),
            ContentClass::Video
        );
        assert_eq!(ContentClass::detect("", "/about"), ContentClass::Html);
    }

    #[test]
    fn backoff_grows_and_stays_jittered() {
        for prior in 0..4 {
            let base = 500.0 * 2f64.powi(prior);
            for _ in 0..16 {
                let delay = backoff_delay(prior as u32).as_millis() as f64;
                assert!(delay >= base * 0.8 - 1.0, "delay {delay} below jitter floor");
                assert!(delay <= base * 1.2 + 1.0, "delay {delay} above jitter ceiling");
            }
        }
    }

    #[test]
    fn success_status_includes_not_modified() {
        assert!(is_success_status(200));
        assert!(is_success_status(304));
        assert!(!is_success_status(404));
        assert!(!is_success_status(500));
    }
}
