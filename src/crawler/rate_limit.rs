//! Per-host politeness pacing.
//!
//! Each host gets a minimum spacing between requests: the configured
//! `per_host_rps` interval, widened by a robots.txt `Crawl-delay` when one
//! exists (the larger of the two wins). Workers ask for a slot with
//! [`HostLimiter::try_acquire`] so they can yield a claimed URL instead of
//! parking on a slow host.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

/// Pacing state for a single host.
#[derive(Debug, Clone)]
struct HostPacing {
    interval: Duration,
    last_request: Option<Instant>,
}

impl HostPacing {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: None,
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed >= self.interval {
                    Duration::ZERO
                } else {
                    self.interval - elapsed
                }
            }
            None => Duration::ZERO,
        }
    }
}

/// Shared per-host limiter.
#[derive(Debug)]
pub struct HostLimiter {
    base_interval: Duration,
    hosts: RwLock<HashMap<String, HostPacing>>,
}

impl HostLimiter {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Widen a host's interval to honor a robots.txt Crawl-delay. The
    /// effective interval is the larger of the configured pace and the
    /// directive.
    pub async fn apply_crawl_delay(&self, host: &str, delay: Duration) {
        let mut hosts = self.hosts.write().await;
        let pacing = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostPacing::new(self.base_interval));
        let effective = self.base_interval.max(delay);
        if pacing.interval != effective {
            debug!(host, ?effective, "applying crawl-delay");
            pacing.interval = effective;
        }
    }

    /// Try to take the next request slot for a host. On success the slot is
    /// stamped; on failure the caller learns how long the host needs.
    pub async fn try_acquire(&self, host: &str) -> Result<(), Duration> {
        let mut hosts = self.hosts.write().await;
        let pacing = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostPacing::new(self.base_interval));
        let wait = pacing.time_until_ready();
        if wait > Duration::ZERO {
            return Err(wait);
        }
        pacing.last_request = Some(Instant::now());
        Ok(())
    }

    /// Wait for and take the next slot. Loops because another worker may win
    /// the slot while this one sleeps.
    pub async fn acquire(&self, host: &str) {
        loop {
            match self.try_acquire(host).await {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// How long until the host accepts another request.
    pub async fn time_until_ready(&self, host: &str) -> Duration {
        let hosts = self.hosts.read().await;
        hosts
            .get(host)
            .map(|p| p.time_until_ready())
            .unwrap_or(Duration::ZERO)
    }
}
