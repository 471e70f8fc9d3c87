//! The crawl engine: frontier loop, depth budgets, concurrency, and resume.
//!
//! Engine lifecycle: INIT -> EXPANDING_SITEMAP -> CRAWLING -> DRAINING ->
//! DONE, with ABORTED cutting across on SIGINT. Workers claim one URL at a
//! time; a single iteration touches the page row twice (claim, complete),
//! each atomically, so a crash at any point leaves at most one FETCHING
//! orphan that startup recovery resets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use super::error::FetchError;
use super::extract::{self, RawLink};
use super::fetcher::{ContentClass, Fetched, Fetcher};
use super::rate_limit::HostLimiter;
use super::robots::RobotsCache;
use super::sitemap::SitemapExpander;
use super::url_policy::{Scope, UrlPolicy};
use crate::config::Config;
use crate::models::{Asset, AssetKind, LinkEdge, Lineage, Page, PageStatus};
use crate::postprocess::{ContentMeta, PostProcessorSet, Produced};
use crate::repository::Registry;
use crate::storage::{extension_for_mime, ArtifactKind, ArtifactStore};

/// Hosts needing longer than this give their claim back to the frontier so
/// the worker can serve other hosts.
const YIELD_THRESHOLD: Duration = Duration::from_secs(2);
/// Idle poll interval while other workers still hold claims.
const IDLE_POLL: Duration = Duration::from_millis(150);

/// How a finished crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    Done,
    Aborted,
}

/// The crawl engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct CrawlEngine {
    config: Arc<Config>,
    policy: Arc<UrlPolicy>,
    registry: Arc<Mutex<Registry>>,
    fetcher: Arc<Fetcher>,
    robots: Arc<RobotsCache>,
    limiter: Arc<HostLimiter>,
    store: Arc<ArtifactStore>,
    post: Arc<PostProcessorSet>,
    shutdown: Arc<AtomicBool>,
    busy_workers: Arc<AtomicUsize>,
}

impl CrawlEngine {
    /// Build an engine and its collaborators from a validated config.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let registry = Arc::new(Mutex::new(Registry::open(&config.output.registry_path)?));
        let store = Arc::new(ArtifactStore::new(&config.output.artifacts_dir));
        store.ensure_layout()?;

        let fetcher = Arc::new(Fetcher::new(&config)?);
        let robots = Arc::new(RobotsCache::new(
            fetcher.client(),
            config.user_agent.clone(),
            config.robots_enabled,
            config.robots_ttl(),
            registry.clone(),
        ));
        let limiter = Arc::new(HostLimiter::new(config.per_host_interval()));
        let post = Arc::new(PostProcessorSet::standard(store.clone()));
        let policy = Arc::new(UrlPolicy::from_config(&config));

        Ok(Self {
            config: Arc::new(config),
            policy,
            registry,
            fetcher,
            robots,
            limiter,
            store,
            post,
            shutdown: Arc::new(AtomicBool::new(false)),
            busy_workers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Shared shutdown flag; flip it to abort gracefully.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Current page counts per status, for progress displays.
    pub async fn status_counts(
        &self,
    ) -> crate::repository::Result<std::collections::HashMap<String, i64>> {
        let registry = self.registry.lock().await;
        registry.status_counts()
    }

    /// Run the crawl to completion or abort. Resumable: everything the loop
    /// needs is reconstructed from the registry.
    pub async fn run(&self) -> anyhow::Result<EngineOutcome> {
        info!(state = "init", "starting crawl engine");
        let recovered = {
            let registry = self.registry.lock().await;
            registry.recover_orphans()?
        };
        if recovered > 0 {
            info!(recovered, "reset orphaned fetching rows to pending");
        }

        info!(state = "expanding_sitemap", seed = %self.config.seed_sitemap_url, "expanding sitemap");
        self.expand_sitemap().await?;

        info!(
            state = "crawling",
            workers = self.config.worker_count,
            "starting workers"
        );
        let mut handles = Vec::with_capacity(self.config.worker_count);
        for i in 0..self.config.worker_count {
            let engine = self.clone();
            let worker_id = format!("worker-{i}");
            handles.push(tokio::spawn(async move {
                engine.worker_loop(&worker_id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if self.shutdown.load(Ordering::SeqCst) {
            info!(state = "aborted", "crawl aborted; pending URLs remain for resume");
            Ok(EngineOutcome::Aborted)
        } else {
            info!(state = "done", "frontier drained, all workers quiesced");
            Ok(EngineOutcome::Done)
        }
    }

    /// Seed the frontier from the sitemap. Idempotent across restarts: known
    /// URLs come back SKIPPED from the frontier upsert.
    async fn expand_sitemap(&self) -> anyhow::Result<()> {
        let expander = SitemapExpander::new(
            self.fetcher.client(),
            (*self.policy).clone(),
            self.config.faq_indicators.clone(),
        );
        let entries = expander.expand(&self.config.seed_sitemap_url).await;

        let registry = self.registry.lock().await;
        registry.set_meta("seed_sitemap_url", &self.config.seed_sitemap_url)?;
        let mut seeded = 0usize;
        for entry in entries {
            let page = Page::new(&entry.url, None, 0, entry.lineage);
            if registry.upsert_frontier(&page)? == crate::repository::FrontierOutcome::New {
                seeded += 1;
            }
        }
        info!(seeded, "sitemap entries added to frontier");
        Ok(())
    }

    async fn worker_loop(&self, worker_id: &str) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(worker = worker_id, "shutdown requested, stopping claims");
                break;
            }

            self.busy_workers.fetch_add(1, Ordering::SeqCst);
            let claimed = {
                let registry = self.registry.lock().await;
                registry.claim_next(worker_id)
            };

            match claimed {
                Ok(Some(page)) => {
                    debug!(
                        url = %page.url,
                        from_status = "pending",
                        to_status = "fetching",
                        worker = worker_id,
                        "claimed"
                    );
                    self.process_page(page).await;
                    self.busy_workers.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(None) => {
                    self.busy_workers.fetch_sub(1, Ordering::SeqCst);
                    if self.busy_workers.load(Ordering::SeqCst) == 0 {
                        debug!(worker = worker_id, "frontier drained, worker exiting");
                        break;
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                }
                Err(e) => {
                    self.busy_workers.fetch_sub(1, Ordering::SeqCst);
                    error!(worker = worker_id, error = %e, "registry claim failed, worker exiting");
                    break;
                }
            }
        }
    }

    /// One full iteration for a claimed page. All errors are absorbed into a
    /// terminal status; nothing escapes to the worker loop.
    async fn process_page(&self, mut page: Page) {
        let url = match Url::parse(&page.url) {
            Ok(u) => u,
            Err(e) => {
                page.last_error = Some(format!("stored URL unparseable: {e}"));
                self.finish(page, PageStatus::FetchError, "unparseable url").await;
                return;
            }
        };

        // Robots gate: resolved per host, coalesced, fail-open.
        let verdict = self.robots.check(&url).await;
        if let Some(delay) = verdict.crawl_delay {
            self.limiter.apply_crawl_delay(&page.host, delay).await;
        }
        if !verdict.allowed {
            self.finish(page, PageStatus::BlockedRobots, "robots.txt disallows")
                .await;
            return;
        }

        // Per-host politeness. A long wait yields the claim back so this
        // worker is not parked on one slow host.
        match self.limiter.try_acquire(&page.host).await {
            Ok(()) => {}
            Err(wait) if wait > YIELD_THRESHOLD => {
                debug!(url = %page.url, wait_ms = wait.as_millis() as u64, "yielding claim, host busy");
                self.release(&page.url).await;
                tokio::time::sleep(wait.min(Duration::from_secs(1))).await;
                return;
            }
            Err(wait) => {
                tokio::time::sleep(wait).await;
                self.limiter.acquire(&page.host).await;
            }
        }

        if self.shutdown.load(Ordering::SeqCst) {
            // Signal arrived before the request went out; hand the URL back
            // so resume is lossless.
            self.release(&page.url).await;
            return;
        }

        match self.fetcher.fetch(&url).await {
            Err((err, attempts)) => {
                page.attempts = attempts;
                if let FetchError::Status(code) = err {
                    page.http_status = Some(code);
                }
                page.last_error = Some(err.to_string());
                let status = err.terminal_status();
                self.finish(page, status, "fetch failed").await;
            }
            Ok(fetched) => {
                page.attempts = fetched.attempts;
                page.http_status = Some(fetched.http_status);
                page.content_type = Some(
                    fetched
                        .content_type
                        .split(';')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string(),
                );
                self.handle_fetched(page, fetched).await;
            }
        }
    }

    async fn handle_fetched(&self, mut page: Page, fetched: Fetched) {
        // Redirects may leave the site or land in an excluded section; the
        // final URL is re-normalized and re-scoped before any processing.
        let final_url = match self.policy.normalize(fetched.final_url.as_str(), None) {
            Ok(u) => u,
            Err(_) => {
                page.last_error = Some("redirect target unparseable".to_string());
                self.finish(page, PageStatus::FetchError, "bad redirect target")
                    .await;
                return;
            }
        };
        if final_url.as_str() != page.url {
            page.final_url = Some(final_url.to_string());
            if !self.policy.is_in_scope(&final_url) {
                self.finish(page, PageStatus::ExcludedPolicy, "redirected out of scope")
                    .await;
                return;
            }
        }

        let result = match fetched.class {
            ContentClass::Html => self.handle_html(&mut page, &final_url, &fetched).await,
            ContentClass::Pdf => self.handle_pdf(&mut page, &fetched).await,
            ContentClass::Video | ContentClass::Audio => {
                self.handle_media(&mut page, &fetched).await
            }
            ContentClass::Other => {
                page.content_hash = Some(crate::storage::content_hash(&fetched.body));
                debug!(url = %page.url, content_type = %fetched.content_type, "unclassified content kept without artifact");
                Ok(())
            }
        };

        match result {
            Ok(()) => self.finish(page, PageStatus::Ok, "fetched").await,
            Err(e) => {
                page.last_error = Some(e.to_string());
                self.finish(page, PageStatus::FetchError, "artifact persistence failed")
                    .await;
            }
        }
    }

    async fn handle_html(
        &self,
        page: &mut Page,
        final_url: &Url,
        fetched: &Fetched,
    ) -> anyhow::Result<()> {
        let (raw_path, hash) = self.store.write(ArtifactKind::Html, &fetched.body)?;
        page.content_hash = Some(hash);
        page.raw_path = Some(raw_path.to_string_lossy().into_owned());

        // Post-processors: Markdown rendering and FAQ extraction. Failures
        // flag the page but the fetch stays OK.
        let meta = ContentMeta::new(&fetched.content_type);
        let (produced, postprocess_error) = self.post.run(&meta, &raw_path, page);
        page.postprocess_error = postprocess_error;
        for output in produced {
            match output {
                Produced::Markdown { path, title, text } => {
                    page.markdown_path = Some(path.to_string_lossy().into_owned());
                    page.title = title.clone();
                    let registry = self.registry.lock().await;
                    if let Err(e) =
                        registry.index_text(&page.url, title.as_deref().unwrap_or(""), &text)
                    {
                        warn!(url = %page.url, error = %e, "failed to index page text");
                    }
                }
                Produced::Faqs(items) => {
                    let registry = self.registry.lock().await;
                    if let Err(e) = registry.record_faqs(&page.url, &items) {
                        warn!(url = %page.url, error = %e, "failed to record faq items");
                    } else {
                        debug!(url = %page.url, count = items.len(), "recorded faq items");
                    }
                }
                Produced::ExtractedText { .. } | Produced::Transcript { .. } => {}
                Produced::Nothing => {}
            }
        }

        let html = String::from_utf8_lossy(&fetched.body);
        let links = extract::extract_links(&html);
        self.enqueue_links(page, final_url, links).await?;
        Ok(())
    }

    /// Normalize, scope, classify, and depth-gate every extracted link, then
    /// record the full edge set for the page.
    async fn enqueue_links(
        &self,
        page: &Page,
        base: &Url,
        links: Vec<RawLink>,
    ) -> anyhow::Result<()> {
        let child_depth = page.depth + 1;
        let mut edges = Vec::new();

        let registry = self.registry.lock().await;
        for link in links {
            let normalized = match self.policy.normalize(&link.href, Some(base)) {
                Ok(u) => u,
                Err(reason) => {
                    debug!(href = %link.href, ?reason, "dropping unusable link");
                    continue;
                }
            };
            if normalized.as_str() == page.url {
                continue;
            }

            let scope = self.policy.scope(&normalized);
            edges.push(LinkEdge {
                from_url: page.url.clone(),
                to_url: normalized.to_string(),
                anchor_text: link.anchor_text.clone(),
                is_external: scope == Scope::External,
                discovered_depth: child_depth,
            });

            match scope {
                Scope::External => {
                    let domain = normalized.host_str().unwrap_or("").to_lowercase();
                    registry.record_external(normalized.as_str(), &domain, &page.url)?;
                }
                Scope::Excluded => {
                    debug!(url = %normalized, "link excluded by policy");
                }
                Scope::InScope => {
                    let lineage = extract::classify_lineage(
                        page.lineage,
                        &normalized,
                        &link.anchor_text,
                        &self.config.faq_indicators,
                    );
                    let budget = match lineage {
                        Lineage::Faq => self.config.max_depth_faq,
                        Lineage::General => self.config.max_depth_general,
                    };
                    let child = Page::new(&normalized, Some(&page.url), child_depth, lineage);
                    if child_depth > budget {
                        if registry.insert_skipped_depth(&child)? {
                            debug!(
                                url = %child.url,
                                depth = child_depth,
                                lineage = lineage.as_str(),
                                "depth budget exceeded, recorded skip"
                            );
                        }
                    } else {
                        let outcome = registry.upsert_frontier(&child)?;
                        debug!(url = %child.url, ?outcome, depth = child_depth, "frontier offer");
                    }
                }
            }
        }

        registry.record_edges(&page.url, &edges)?;
        Ok(())
    }

    async fn handle_pdf(&self, page: &mut Page, fetched: &Fetched) -> anyhow::Result<()> {
        let (path, hash) = self.store.write(ArtifactKind::Pdf, &fetched.body)?;
        page.content_hash = Some(hash.clone());
        page.raw_path = Some(path.to_string_lossy().into_owned());

        let meta = ContentMeta::new(&fetched.content_type);
        let (produced, postprocess_error) = self.post.run(&meta, &path, page);
        page.postprocess_error = postprocess_error;
        let extracted_text_path = produced.into_iter().find_map(|p| match p {
            Produced::ExtractedText { path } => Some(path.to_string_lossy().into_owned()),
            _ => None,
        });

        let asset = Asset {
            url: page.url.clone(),
            kind: AssetKind::Pdf,
            local_path: path.to_string_lossy().into_owned(),
            content_hash: hash,
            size: fetched.body.len() as u64,
            owner_url: page.parent_url.clone().unwrap_or_else(|| page.url.clone()),
            extracted_text_path,
        };
        let registry = self.registry.lock().await;
        registry.record_asset(&asset)?;
        Ok(())
    }

    async fn handle_media(&self, page: &mut Page, fetched: &Fetched) -> anyhow::Result<()> {
        let (kind, artifact_kind) = match fetched.class {
            ContentClass::Audio => (AssetKind::Audio, ArtifactKind::Audio),
            _ => (AssetKind::Video, ArtifactKind::Video),
        };
        let mime = fetched
            .content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        let ext = extension_for_mime(&mime);
        let (path, hash) = self
            .store
            .write_with_extension(artifact_kind, &fetched.body, ext)?;
        page.content_hash = Some(hash.clone());
        page.raw_path = Some(path.to_string_lossy().into_owned());

        let meta = ContentMeta::new(&fetched.content_type);
        let (produced, postprocess_error) = self.post.run(&meta, &path, page);
        page.postprocess_error = postprocess_error;
        let transcript = produced.into_iter().find_map(|p| match p {
            Produced::Transcript { path } => Some(path.to_string_lossy().into_owned()),
            _ => None,
        });

        let asset = Asset {
            url: page.url.clone(),
            kind,
            local_path: path.to_string_lossy().into_owned(),
            content_hash: hash,
            size: fetched.body.len() as u64,
            owner_url: page.parent_url.clone().unwrap_or_else(|| page.url.clone()),
            extracted_text_path: transcript,
        };
        let registry = self.registry.lock().await;
        registry.record_asset(&asset)?;
        Ok(())
    }

    async fn release(&self, url: &str) {
        let registry = self.registry.lock().await;
        if let Err(e) = registry.release_claim(url) {
            warn!(url, error = %e, "failed to release claim");
        }
    }

    /// Transition a claimed page to its terminal status, with the one
    /// structured log line per transition.
    async fn finish(&self, mut page: Page, status: PageStatus, reason: &str) {
        page.status = status;
        page.fetched_at = Some(Utc::now());
        info!(
            url = %page.url,
            from_status = "fetching",
            to_status = status.as_str(),
            reason,
            attempt = page.attempts,
            "page transition"
        );
        let registry = self.registry.lock().await;
        if let Err(e) = registry.complete(&page) {
            error!(url = %page.url, error = %e, "failed to persist terminal status");
        }
    }
}
