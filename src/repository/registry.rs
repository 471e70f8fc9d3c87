//! The transactional registry: pages, frontier, edges, assets, FAQ items,
//! external URLs, robots records.
//!
//! Every public operation is a single transaction. `BEGIN IMMEDIATE` is used
//! wherever a read feeds a write so concurrent workers (or a second process)
//! cannot claim the same row twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde_json::{json, Value};

use super::{connect, parse_datetime, parse_datetime_opt, Result};
use crate::models::{Asset, FaqItem, LinkEdge, Lineage, Page, PageStatus};

/// Outcome of offering a URL to the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontierOutcome {
    /// Row inserted as PENDING.
    New,
    /// Existing PENDING row improved (lower depth and/or FAQ promotion).
    Promoted,
    /// Row already terminal, already claimed, or no better than what exists.
    Skipped,
}

/// A persisted robots.txt fetch result for one host.
#[derive(Debug, Clone)]
pub struct RobotsRow {
    pub host: String,
    pub body: Option<String>,
    pub reachable: bool,
    pub crawl_delay_secs: Option<f64>,
    pub fetched_at: chrono::DateTime<Utc>,
}

/// Tables available to the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTable {
    Pages,
    LinkEdges,
    Assets,
    FaqItems,
    ExternalUrls,
    ExternalDomains,
}

impl ExportTable {
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::LinkEdges => "link_edges",
            Self::Assets => "assets",
            Self::FaqItems => "faq_items",
            Self::ExternalUrls => "external_urls",
            Self::ExternalDomains => "external_domains",
        }
    }

    fn select_sql(&self) -> &'static str {
        match self {
            Self::Pages => {
                "SELECT url, host, path, depth, lineage, status, parent_url, title, \
                 http_status, content_type, content_hash, final_url, raw_path, \
                 markdown_path, attempts, postprocess_error, last_error, \
                 discovered_at, fetched_at FROM pages ORDER BY id"
            }
            Self::LinkEdges => {
                "SELECT from_url, to_url, anchor_text, is_external, discovered_depth \
                 FROM link_edges ORDER BY id"
            }
            Self::Assets => {
                "SELECT url, kind, local_path, content_hash, size, owner_url, \
                 extracted_text_path FROM assets ORDER BY url"
            }
            Self::FaqItems => {
                "SELECT document_url, question_text, answer_text, answer_raw_html, \
                 answer_mode FROM faq_items ORDER BY id"
            }
            Self::ExternalUrls => {
                "SELECT url, referrer, first_seen_at FROM external_urls ORDER BY url"
            }
            Self::ExternalDomains => {
                "SELECT domain, url_count, first_seen_at FROM external_domains ORDER BY domain"
            }
        }
    }
}

/// SQLite-backed registry. Connections are opened per operation; SQLite's
/// WAL mode plus the busy timeout make that safe and cheap.
pub struct Registry {
    db_path: PathBuf,
}

impl Registry {
    /// Open (creating if needed) the registry at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let registry = Self {
            db_path: db_path.to_path_buf(),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                host TEXT NOT NULL,
                path TEXT NOT NULL,
                depth INTEGER NOT NULL,
                lineage TEXT NOT NULL,
                status TEXT NOT NULL,
                parent_url TEXT,
                claimed_by TEXT,
                title TEXT,
                http_status INTEGER,
                content_type TEXT,
                content_hash TEXT,
                final_url TEXT,
                raw_path TEXT,
                markdown_path TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                postprocess_error TEXT,
                last_error TEXT,
                discovered_at TEXT NOT NULL,
                fetched_at TEXT
            );

            CREATE TABLE IF NOT EXISTS link_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_url TEXT NOT NULL,
                to_url TEXT NOT NULL,
                anchor_text TEXT NOT NULL DEFAULT '',
                is_external INTEGER NOT NULL DEFAULT 0,
                discovered_depth INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assets (
                url TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                local_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                owner_url TEXT NOT NULL,
                extracted_text_path TEXT
            );

            CREATE TABLE IF NOT EXISTS faq_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_url TEXT NOT NULL,
                question_text TEXT NOT NULL,
                answer_text TEXT NOT NULL,
                answer_raw_html TEXT NOT NULL DEFAULT '',
                answer_mode TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS external_urls (
                url TEXT PRIMARY KEY,
                referrer TEXT,
                first_seen_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS external_domains (
                domain TEXT PRIMARY KEY,
                url_count INTEGER NOT NULL DEFAULT 0,
                first_seen_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS robots (
                host TEXT PRIMARY KEY,
                body TEXT,
                reachable INTEGER NOT NULL,
                crawl_delay_secs REAL,
                fetched_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pages_status_depth
                ON pages(status, depth, id);
            CREATE INDEX IF NOT EXISTS idx_pages_host ON pages(host);
            CREATE INDEX IF NOT EXISTS idx_edges_from ON link_edges(from_url);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON link_edges(to_url);
            CREATE INDEX IF NOT EXISTS idx_faq_document ON faq_items(document_url);

            CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
                url UNINDEXED,
                title,
                content
            );
            "#,
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Frontier
    // -------------------------------------------------------------------------

    /// Offer a URL to the frontier.
    ///
    /// A PENDING row is improved in place when the new discovery path is
    /// shallower or upgrades lineage to FAQ; terminal and in-flight rows are
    /// never touched.
    pub fn upsert_frontier(&self, page: &Page) -> Result<FrontierOutcome> {
        let conn = self.connect()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<FrontierOutcome> {
            let existing = conn
                .query_row(
                    "SELECT status, depth, lineage FROM pages WHERE url = ?",
                    params![page.url],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            match existing {
                None => {
                    conn.execute(
                        r#"
                        INSERT INTO pages (
                            url, host, path, depth, lineage, status, parent_url,
                            attempts, discovered_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
                        "#,
                        params![
                            page.url,
                            page.host,
                            page.path,
                            page.depth,
                            page.lineage.as_str(),
                            PageStatus::Pending.as_str(),
                            page.parent_url,
                            page.discovered_at.to_rfc3339(),
                        ],
                    )?;
                    Ok(FrontierOutcome::New)
                }
                Some((status, depth, lineage)) => {
                    if status != PageStatus::Pending.as_str() {
                        return Ok(FrontierOutcome::Skipped);
                    }
                    let current_lineage =
                        Lineage::parse(&lineage).unwrap_or(Lineage::General);
                    let promoted_lineage = current_lineage.promote(page.lineage);
                    let lower_depth = (page.depth as i64) < depth;
                    let upgraded = promoted_lineage != current_lineage;

                    if !lower_depth && !upgraded {
                        return Ok(FrontierOutcome::Skipped);
                    }

                    let new_depth = depth.min(page.depth as i64);
                    if lower_depth {
                        conn.execute(
                            "UPDATE pages SET depth = ?1, lineage = ?2, parent_url = ?3 \
                             WHERE url = ?4",
                            params![
                                new_depth,
                                promoted_lineage.as_str(),
                                page.parent_url,
                                page.url
                            ],
                        )?;
                    } else {
                        conn.execute(
                            "UPDATE pages SET lineage = ?1 WHERE url = ?2",
                            params![promoted_lineage.as_str(), page.url],
                        )?;
                    }
                    Ok(FrontierOutcome::Promoted)
                }
            }
        })();

        finish_txn(&conn, result)
    }

    /// Record a durable depth-gate decision so it is not recomputed on resume.
    /// Returns false when the URL is already known under any status.
    pub fn insert_skipped_depth(&self, page: &Page) -> Result<bool> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO pages (
                url, host, path, depth, lineage, status, parent_url,
                attempts, discovered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
            params![
                page.url,
                page.host,
                page.path,
                page.depth,
                page.lineage.as_str(),
                PageStatus::SkippedDepth.as_str(),
                page.parent_url,
                page.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Atomically claim the next PENDING row for a worker.
    ///
    /// Ordering is ascending depth, then insertion id: FIFO within a depth,
    /// breadth-first across depths.
    pub fn claim_next(&self, worker_id: &str) -> Result<Option<Page>> {
        let conn = self.connect()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<Option<Page>> {
            let claimed = conn.query_row(
                "SELECT * FROM pages WHERE status = 'pending' \
                 ORDER BY depth ASC, id ASC LIMIT 1",
                [],
                row_to_page,
            );
            match claimed {
                Ok(mut page) => {
                    conn.execute(
                        "UPDATE pages SET status = 'fetching', claimed_by = ?1 \
                         WHERE url = ?2",
                        params![worker_id, page.url],
                    )?;
                    page.status = PageStatus::Fetching;
                    page.claimed_by = Some(worker_id.to_string());
                    Ok(Some(page))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })();

        finish_txn(&conn, result)
    }

    /// Return a claimed URL to the frontier with its discovery context intact
    /// (used when a worker yields instead of waiting on a slow host).
    pub fn release_claim(&self, url: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE pages SET status = 'pending', claimed_by = NULL \
             WHERE url = ? AND status = 'fetching'",
            params![url],
        )?;
        Ok(())
    }

    /// Transition a claimed page to a terminal status and persist everything
    /// learned during the fetch.
    pub fn complete(&self, page: &Page) -> Result<()> {
        debug_assert!(page.status.is_terminal());
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE pages SET
                status = ?1,
                claimed_by = NULL,
                title = ?2,
                http_status = ?3,
                content_type = ?4,
                content_hash = ?5,
                final_url = ?6,
                raw_path = ?7,
                markdown_path = ?8,
                attempts = ?9,
                postprocess_error = ?10,
                last_error = ?11,
                fetched_at = ?12
            WHERE url = ?13
            "#,
            params![
                page.status.as_str(),
                page.title,
                page.http_status.map(|s| s as i64),
                page.content_type,
                page.content_hash,
                page.final_url,
                page.raw_path,
                page.markdown_path,
                page.attempts,
                page.postprocess_error,
                page.last_error,
                page.fetched_at.map(|dt| dt.to_rfc3339()),
                page.url,
            ],
        )?;
        Ok(())
    }

    /// Reset every orphaned FETCHING row back to PENDING. Idempotent; run at
    /// every startup.
    pub fn recover_orphans(&self) -> Result<usize> {
        let conn = self.connect()?;
        let reset = conn.execute(
            "UPDATE pages SET status = 'pending', claimed_by = NULL \
             WHERE status = 'fetching'",
            [],
        )?;
        Ok(reset)
    }

    // -------------------------------------------------------------------------
    // Fetch results
    // -------------------------------------------------------------------------

    /// Record outbound edges for a fetched page. Replaces any edges from an
    /// earlier interrupted attempt so a crash-and-refetch never duplicates.
    pub fn record_edges(&self, from_url: &str, edges: &[LinkEdge]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM link_edges WHERE from_url = ?",
            params![from_url],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO link_edges (from_url, to_url, anchor_text, is_external, \
                 discovered_depth) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.from_url,
                    edge.to_url,
                    edge.anchor_text,
                    edge.is_external as i64,
                    edge.discovered_depth,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record a preserved asset. Re-downloads update the existing row.
    pub fn record_asset(&self, asset: &Asset) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO assets (url, kind, local_path, content_hash, size, owner_url,
                extracted_text_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(url) DO UPDATE SET
                kind = excluded.kind,
                local_path = excluded.local_path,
                content_hash = excluded.content_hash,
                size = excluded.size,
                owner_url = excluded.owner_url,
                extracted_text_path = excluded.extracted_text_path
            "#,
            params![
                asset.url,
                asset.kind.as_str(),
                asset.local_path,
                asset.content_hash,
                asset.size as i64,
                asset.owner_url,
                asset.extracted_text_path,
            ],
        )?;
        Ok(())
    }

    /// Record extracted FAQ items for a document, replacing any rows from an
    /// earlier interrupted attempt.
    pub fn record_faqs(&self, document_url: &str, items: &[FaqItem]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM faq_items WHERE document_url = ?",
            params![document_url],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO faq_items (document_url, question_text, answer_text, \
                 answer_raw_html, answer_mode) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.document_url,
                    item.question_text,
                    item.answer_text,
                    item.answer_raw_html,
                    item.answer_mode.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record an out-of-scope URL and roll it up into the per-domain
    /// aggregate.
    pub fn record_external(&self, url: &str, domain: &str, referrer: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO external_urls (url, referrer, first_seen_at) \
             VALUES (?1, ?2, ?3)",
            params![url, referrer, now],
        )?;
        if inserted > 0 {
            tx.execute(
                r#"
                INSERT INTO external_domains (domain, url_count, first_seen_at)
                VALUES (?1, 1, ?2)
                ON CONFLICT(domain) DO UPDATE SET url_count = url_count + 1
                "#,
                params![domain, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Index extracted page text for full-text search.
    pub fn index_text(&self, url: &str, title: &str, content: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pages_fts WHERE url = ?", params![url])?;
        tx.execute(
            "INSERT INTO pages_fts (url, title, content) VALUES (?1, ?2, ?3)",
            params![url, title, content],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Robots cache persistence
    // -------------------------------------------------------------------------

    /// Most recent robots.txt record for a host, if any.
    pub fn get_robots(&self, host: &str) -> Result<Option<RobotsRow>> {
        let conn = self.connect()?;
        let row = conn.query_row(
            "SELECT host, body, reachable, crawl_delay_secs, fetched_at \
             FROM robots WHERE host = ?",
            params![host],
            |row| {
                Ok(RobotsRow {
                    host: row.get(0)?,
                    body: row.get(1)?,
                    reachable: row.get::<_, i64>(2)? != 0,
                    crawl_delay_secs: row.get(3)?,
                    fetched_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        );
        match row {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store (or refresh) a robots.txt record for a host.
    pub fn put_robots(
        &self,
        host: &str,
        body: Option<&str>,
        reachable: bool,
        crawl_delay_secs: Option<f64>,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO robots (host, body, reachable, crawl_delay_secs, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(host) DO UPDATE SET
                body = excluded.body,
                reachable = excluded.reachable,
                crawl_delay_secs = excluded.crawl_delay_secs,
                fetched_at = excluded.fetched_at
            "#,
            params![host, body, reachable as i64, crawl_delay_secs, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Meta & inspection
    // -------------------------------------------------------------------------

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let value = conn.query_row(
            "SELECT value FROM meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        );
        match value {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_page(&self, url: &str) -> Result<Option<Page>> {
        let conn = self.connect()?;
        let page = conn.query_row(
            "SELECT * FROM pages WHERE url = ?",
            params![url],
            row_to_page,
        );
        match page {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn pending_count(&self) -> Result<i64> {
        let conn = self.connect()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?)
    }

    /// Page counts grouped by status, for operator-facing summaries.
    pub fn status_counts(&self) -> Result<HashMap<String, i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM pages GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    /// Stream one table's rows as JSON objects, in a stable order.
    pub fn for_each_export_row(
        &self,
        table: ExportTable,
        mut f: impl FnMut(Value) -> Result<()>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(table.select_sql())?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                object.insert(name.clone(), column_value(row, i)?);
            }
            f(Value::Object(object))?;
        }
        Ok(())
    }
}

fn column_value(row: &Row<'_>, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;
    let value = match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(hex::encode(b)),
    };
    Ok(value)
}

fn finish_txn<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    if result.is_ok() {
        conn.execute("COMMIT", [])?;
    } else {
        let _ = conn.execute("ROLLBACK", []);
    }
    result
}

fn row_to_page(row: &Row<'_>) -> rusqlite::Result<Page> {
    let status: String = row.get("status")?;
    let lineage: String = row.get("lineage")?;
    Ok(Page {
        url: row.get("url")?,
        host: row.get("host")?,
        path: row.get("path")?,
        depth: row.get::<_, i64>("depth")? as u32,
        lineage: Lineage::parse(&lineage).unwrap_or(Lineage::General),
        status: PageStatus::parse(&status).unwrap_or(PageStatus::Pending),
        parent_url: row.get("parent_url")?,
        claimed_by: row.get("claimed_by")?,
        title: row.get("title")?,
        http_status: row.get::<_, Option<i64>>("http_status")?.map(|s| s as u16),
        content_type: row.get("content_type")?,
        content_hash: row.get("content_hash")?,
        final_url: row.get("final_url")?,
        raw_path: row.get("raw_path")?,
        markdown_path: row.get("markdown_path")?,
        attempts: row.get::<_, i64>("attempts")? as u32,
        postprocess_error: row.get("postprocess_error")?,
        last_error: row.get("last_error")?,
        discovered_at: parse_datetime(&row.get::<_, String>("discovered_at")?),
        fetched_at: parse_datetime_opt(row.get("fetched_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn temp_registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).unwrap();
        (dir, registry)
    }

    fn page(url: &str, depth: u32, lineage: Lineage) -> Page {
        Page::new(&Url::parse(url).unwrap(), None, depth, lineage)
    }

    #[test]
    fn upsert_inserts_then_skips_duplicates() {
        let (_dir, registry) = temp_registry();
        let p = page("https://example.com/a", 1, Lineage::General);

        assert_eq!(registry.upsert_frontier(&p).unwrap(), FrontierOutcome::New);
        assert_eq!(
            registry.upsert_frontier(&p).unwrap(),
            FrontierOutcome::Skipped
        );
    }

    #[test]
    fn upsert_promotes_lower_depth() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 4, Lineage::General))
            .unwrap();

        let outcome = registry
            .upsert_frontier(&page("https://example.com/a", 2, Lineage::General))
            .unwrap();
        assert_eq!(outcome, FrontierOutcome::Promoted);

        let stored = registry.get_page("https://example.com/a").unwrap().unwrap();
        assert_eq!(stored.depth, 2);
    }

    #[test]
    fn upsert_promotes_lineage_and_never_demotes() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 2, Lineage::General))
            .unwrap();

        assert_eq!(
            registry
                .upsert_frontier(&page("https://example.com/a", 2, Lineage::Faq))
                .unwrap(),
            FrontierOutcome::Promoted
        );
        // A later general-lineage sighting at the same depth changes nothing.
        assert_eq!(
            registry
                .upsert_frontier(&page("https://example.com/a", 2, Lineage::General))
                .unwrap(),
            FrontierOutcome::Skipped
        );

        let stored = registry.get_page("https://example.com/a").unwrap().unwrap();
        assert_eq!(stored.lineage, Lineage::Faq);
    }

    #[test]
    fn upsert_never_touches_terminal_rows() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 1, Lineage::General))
            .unwrap();

        let mut claimed = registry.claim_next("w0").unwrap().unwrap();
        claimed.status = PageStatus::Ok;
        claimed.fetched_at = Some(Utc::now());
        registry.complete(&claimed).unwrap();

        assert_eq!(
            registry
                .upsert_frontier(&page("https://example.com/a", 0, Lineage::Faq))
                .unwrap(),
            FrontierOutcome::Skipped
        );
    }

    #[test]
    fn claim_orders_by_depth_then_insertion() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/deep", 3, Lineage::General))
            .unwrap();
        registry
            .upsert_frontier(&page("https://example.com/first", 1, Lineage::General))
            .unwrap();
        registry
            .upsert_frontier(&page("https://example.com/second", 1, Lineage::General))
            .unwrap();

        let a = registry.claim_next("w0").unwrap().unwrap();
        let b = registry.claim_next("w1").unwrap().unwrap();
        let c = registry.claim_next("w0").unwrap().unwrap();
        assert_eq!(a.url, "https://example.com/first");
        assert_eq!(b.url, "https://example.com/second");
        assert_eq!(c.url, "https://example.com/deep");
        assert!(registry.claim_next("w1").unwrap().is_none());
    }

    #[test]
    fn claimed_rows_are_marked_fetching() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 0, Lineage::General))
            .unwrap();

        let claimed = registry.claim_next("w7").unwrap().unwrap();
        assert_eq!(claimed.status, PageStatus::Fetching);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w7"));

        let stored = registry.get_page(&claimed.url).unwrap().unwrap();
        assert_eq!(stored.status, PageStatus::Fetching);
    }

    #[test]
    fn release_claim_preserves_depth_and_lineage() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 2, Lineage::Faq))
            .unwrap();

        let claimed = registry.claim_next("w0").unwrap().unwrap();
        registry.release_claim(&claimed.url).unwrap();

        let reclaimed = registry.claim_next("w1").unwrap().unwrap();
        assert_eq!(reclaimed.depth, 2);
        assert_eq!(reclaimed.lineage, Lineage::Faq);
    }

    #[test]
    fn recover_orphans_resets_fetching_rows() {
        let (_dir, registry) = temp_registry();
        for i in 0..3 {
            registry
                .upsert_frontier(&page(
                    &format!("https://example.com/p{i}"),
                    0,
                    Lineage::General,
                ))
                .unwrap();
        }
        registry.claim_next("w0").unwrap().unwrap();
        registry.claim_next("w1").unwrap().unwrap();

        assert_eq!(registry.pending_count().unwrap(), 1);
        assert_eq!(registry.recover_orphans().unwrap(), 2);
        assert_eq!(registry.pending_count().unwrap(), 3);

        let recovered = registry.get_page("https://example.com/p0").unwrap().unwrap();
        assert!(recovered.claimed_by.is_none());
    }

    #[test]
    fn skipped_depth_is_durable_but_never_clobbers() {
        let (_dir, registry) = temp_registry();
        assert!(registry
            .insert_skipped_depth(&page("https://example.com/deep", 7, Lineage::Faq))
            .unwrap());
        let stored = registry.get_page("https://example.com/deep").unwrap().unwrap();
        assert_eq!(stored.status, PageStatus::SkippedDepth);

        // Existing pending rows win over a later skip decision.
        registry
            .upsert_frontier(&page("https://example.com/a", 1, Lineage::General))
            .unwrap();
        assert!(!registry
            .insert_skipped_depth(&page("https://example.com/a", 9, Lineage::General))
            .unwrap());
        let a = registry.get_page("https://example.com/a").unwrap().unwrap();
        assert_eq!(a.status, PageStatus::Pending);
    }

    #[test]
    fn external_urls_roll_up_per_domain() {
        let (_dir, registry) = temp_registry();
        registry
            .record_external("https://other.com/x", "other.com", "https://example.com/")
            .unwrap();
        registry
            .record_external("https://other.com/y", "other.com", "https://example.com/")
            .unwrap();
        // Duplicate URL does not bump the aggregate.
        registry
            .record_external("https://other.com/x", "other.com", "https://example.com/a")
            .unwrap();

        let mut domains = Vec::new();
        registry
            .for_each_export_row(ExportTable::ExternalDomains, |v| {
                domains.push(v);
                Ok(())
            })
            .unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0]["domain"], "other.com");
        assert_eq!(domains[0]["url_count"], 2);
    }

    #[test]
    fn robots_rows_roundtrip() {
        let (_dir, registry) = temp_registry();
        registry
            .put_robots("example.com", Some("User-agent: *\nDisallow: /x"), true, Some(2.0))
            .unwrap();

        let row = registry.get_robots("example.com").unwrap().unwrap();
        assert!(row.reachable);
        assert_eq!(row.crawl_delay_secs, Some(2.0));
        assert!(row.body.unwrap().contains("Disallow"));
        assert!(registry.get_robots("other.com").unwrap().is_none());
    }

    #[test]
    fn status_counts_by_group() {
        let (_dir, registry) = temp_registry();
        registry
            .upsert_frontier(&page("https://example.com/a", 0, Lineage::General))
            .unwrap();
        registry
            .upsert_frontier(&page("https://example.com/b", 0, Lineage::General))
            .unwrap();
        registry.claim_next("w0").unwrap();

        let counts = registry.status_counts().unwrap();
        assert_eq!(counts.get("pending"), Some(&1));
        assert_eq!(counts.get("fetching"), Some(&1));
    }
}
