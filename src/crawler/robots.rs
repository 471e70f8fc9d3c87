//! robots.txt parsing and the per-host robots cache.
//!
//! The cache guarantees exactly one robots.txt fetch per host per TTL
//! window no matter how many workers ask concurrently, and fails open when
//! the file cannot be retrieved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::repository::Registry;

/// Parsed robots.txt rules for one host.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// Per-agent rules keyed by lowercase user-agent token.
    agents: HashMap<String, AgentRules>,
    /// Rules for `User-agent: *`.
    default_agent: AgentRules,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsRules {
    /// Parse the common robots.txt subset: User-agent, Allow, Disallow,
    /// Crawl-delay. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        fn flush(agents: &mut Vec<String>, block: &mut AgentRules, rules: &mut RobotsRules) {
            for agent in agents.drain(..) {
                if agent == "*" {
                    rules.default_agent = block.clone();
                } else {
                    rules.agents.insert(agent, block.clone());
                }
            }
            *block = AgentRules::default();
        }

        let mut rules = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current = AgentRules::default();
        let mut seen_directive = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if seen_directive {
                        flush(&mut current_agents, &mut current, &mut rules);
                        seen_directive = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    seen_directive = true;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    seen_directive = true;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    seen_directive = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current.crawl_delay = Some(delay);
                    }
                }
                _ => {}
            }
        }
        flush(&mut current_agents, &mut current, &mut rules);

        rules
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent_lower = user_agent.to_lowercase();
        self.agents
            .iter()
            .find(|(token, _)| agent_lower.contains(token.as_str()))
            .map(|(_, r)| r)
            .unwrap_or(&self.default_agent)
    }

    /// Longest-prefix check; Allow beats Disallow on a tie.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let rules = self.rules_for(user_agent);
        let allow = rules
            .allow
            .iter()
            .filter(|p| matches_prefix(path, p))
            .map(|p| p.len())
            .max();
        let disallow = rules
            .disallow
            .iter()
            .filter(|p| matches_prefix(path, p))
            .map(|p| p.len())
            .max();
        match (allow, disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    /// Crawl-delay for the agent, falling back to the wildcard group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .or(self.default_agent.crawl_delay)
            .map(Duration::from_secs_f64)
    }
}

/// Prefix match supporting a trailing `*` wildcard.
fn matches_prefix(path: &str, pattern: &str) -> bool {
    let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
    path.starts_with(prefix)
}

/// Resolved robots verdict for one URL.
#[derive(Debug, Clone)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

/// Per-host resolution state. UNFETCHED hosts have no entry at all; the TTL
/// returns a host to that state by expiring its entry.
#[derive(Debug, Clone)]
enum HostState {
    Ready(RobotsRules),
    Unreachable,
}

#[derive(Debug)]
struct HostEntry {
    state: HostState,
    fetched_at: Instant,
}

struct HostSlot {
    fetch_lock: Mutex<Option<HostEntry>>,
}

/// Per-host robots.txt cache shared by all workers.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    enabled: bool,
    ttl: Duration,
    registry: Arc<Mutex<Registry>>,
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl RobotsCache {
    pub fn new(
        client: reqwest::Client,
        user_agent: String,
        enabled: bool,
        ttl: Duration,
        registry: Arc<Mutex<Registry>>,
    ) -> Self {
        Self {
            client,
            user_agent,
            enabled,
            ttl,
            registry,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether the configured agent may fetch this URL, resolving the
    /// host's robots.txt if necessary. Concurrent callers for the same host
    /// coalesce into one fetch.
    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        if !self.enabled {
            return RobotsVerdict {
                allowed: true,
                crawl_delay: None,
            };
        }
        let Some(host) = url.host_str().map(|h| h.to_lowercase()) else {
            return RobotsVerdict {
                allowed: false,
                crawl_delay: None,
            };
        };

        let slot = {
            let mut hosts = self.hosts.lock().await;
            hosts
                .entry(host.clone())
                .or_insert_with(|| {
                    Arc::new(HostSlot {
                        fetch_lock: Mutex::new(None),
                    })
                })
                .clone()
        };

        // Holding the slot lock serializes resolution for this host; callers
        // arriving while a fetch is in flight wait here and reuse the result.
        let mut entry = slot.fetch_lock.lock().await;
        let expired = entry
            .as_ref()
            .map(|e| e.fetched_at.elapsed() >= self.ttl)
            .unwrap_or(true);
        if expired {
            *entry = Some(self.resolve_host(url.scheme(), &host).await);
        }

        let state = match entry.as_ref() {
            Some(e) => e.state.clone(),
            None => HostState::Unreachable,
        };

        match state {
            HostState::Ready(rules) => RobotsVerdict {
                allowed: rules.is_allowed(&self.user_agent, url.path()),
                crawl_delay: rules.crawl_delay(&self.user_agent),
            },
            // Fail-open: an unreachable robots.txt never blocks the crawl.
            HostState::Unreachable => RobotsVerdict {
                allowed: true,
                crawl_delay: None,
            },
        }
    }

    async fn resolve_host(&self, scheme: &str, host: &str) -> HostEntry {
        // A record persisted by an earlier run is still good within the TTL.
        if let Some(entry) = self.load_persisted(host).await {
            return entry;
        }

        let robots_url = format!("{}://{}/robots.txt", scheme, host);
        debug!(host, "fetching robots.txt");

        let fetched = self.client.get(&robots_url).send().await;
        let entry = match fetched {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    let rules = RobotsRules::parse(&body);
                    let delay = rules.crawl_delay(&self.user_agent);
                    self.persist(host, Some(&body), true, delay).await;
                    HostEntry {
                        state: HostState::Ready(rules),
                        fetched_at: Instant::now(),
                    }
                }
                Err(e) => {
                    warn!(host, error = %e, "failed to read robots.txt body");
                    self.persist(host, None, false, None).await;
                    HostEntry {
                        state: HostState::Unreachable,
                        fetched_at: Instant::now(),
                    }
                }
            },
            Ok(response) => {
                // 404 and friends: no rules, everything allowed.
                debug!(host, status = %response.status(), "no robots.txt");
                self.persist(host, Some(""), true, None).await;
                HostEntry {
                    state: HostState::Ready(RobotsRules::default()),
                    fetched_at: Instant::now(),
                }
            }
            Err(e) => {
                warn!(host, error = %e, "robots.txt unreachable, failing open");
                self.persist(host, None, false, None).await;
                HostEntry {
                    state: HostState::Unreachable,
                    fetched_at: Instant::now(),
                }
            }
        };
        entry
    }

    async fn load_persisted(&self, host: &str) -> Option<HostEntry> {
        let row = {
            let registry = self.registry.lock().await;
            registry.get_robots(host).ok()??
        };
        let age = (chrono::Utc::now() - row.fetched_at).to_std().ok()?;
        if age >= self.ttl {
            return None;
        }
        let state = if row.reachable {
            HostState::Ready(RobotsRules::parse(row.body.as_deref().unwrap_or("")))
        } else {
            HostState::Unreachable
        };
        // Age the in-memory entry so the persisted TTL window is honored.
        let fetched_at = Instant::now().checked_sub(age)?;
        Some(HostEntry {
            state,
            fetched_at,
        })
    }

    async fn persist(&self, host: &str, body: Option<&str>, reachable: bool, delay: Option<Duration>) {
        let registry = self.registry.lock().await;
        if let Err(e) = registry.put_robots(host, body, reachable, delay.map(|d| d.as_secs_f64())) {
            warn!(host, error = %e, "failed to persist robots record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_rules() {
        let rules = RobotsRules::parse(
            "User-agent: *\n\
             Disallow: /private/\n\
             Disallow: /admin/\n\
             Allow: /private/public/\n\
             Crawl-delay: 2\n",
        );

        assert!(rules.is_allowed("siteharvest/0.3", "/anything"));
        assert!(!rules.is_allowed("siteharvest/0.3", "/private/page"));
        assert!(!rules.is_allowed("siteharvest/0.3", "/admin/"));
        assert!(rules.is_allowed("siteharvest/0.3", "/private/public/faq"));
        assert_eq!(
            rules.crawl_delay("siteharvest/0.3"),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn specific_agent_overrides_wildcard() {
        let rules = RobotsRules::parse(
            "User-agent: *\n\
             Disallow: /\n\
             \n\
             User-agent: goodbot\n\
             Allow: /\n",
        );

        assert!(!rules.is_allowed("BadBot", "/page"));
        assert!(rules.is_allowed("GoodBot/1.0", "/page"));
    }

    #[test]
    fn grouped_agents_share_rules() {
        let rules = RobotsRules::parse(
            "User-agent: alpha\n\
             User-agent: beta\n\
             Disallow: /x\n",
        );
        assert!(!rules.is_allowed("alpha", "/x/1"));
        assert!(!rules.is_allowed("beta", "/x/1"));
        assert!(rules.is_allowed("gamma", "/x/1"));
    }

    #[test]
    fn trailing_wildcard_prefix() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private/*\n");
        assert!(!rules.is_allowed("bot", "/private/x"));
        assert!(rules.is_allowed("bot", "/public/x"));
    }

    #[test]
    fn disallow_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(!rules.is_allowed("bot", "/"));
        assert!(!rules.is_allowed("bot", "/any"));
    }

    #[test]
    fn empty_robots_allows_everything() {
        let rules = RobotsRules::parse("");
        assert!(rules.is_allowed("bot", "/any/path"));
        assert!(rules.crawl_delay("bot").is_none());
    }

    #[test]
    fn comments_are_ignored() {
        let rules = RobotsRules::parse(
            "# global rules\n\
             User-agent: * # everyone\n\
             Disallow: /tmp # scratch space\n",
        );
        assert!(!rules.is_allowed("bot", "/tmp/x"));
    }
}
