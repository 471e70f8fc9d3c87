//! Sitemap expansion: one seed sitemap URL becomes the depth-0 frontier.
//!
//! Sitemap indexes are resolved iteratively with a visited set, so an index
//! that lists itself (or a cycle of indexes) terminates. Sitemaps use XML
//! namespaces that make selector-based parsing awkward, so `<loc>` values
//! are pulled out with a plain scan.

use std::collections::HashSet;

use tracing::{debug, info, warn};
use url::Url;

use super::extract::matches_indicator;
use super::url_policy::{Scope, UrlPolicy};
use crate::models::Lineage;

/// Safety valve against runaway index graphs.
const MAX_SITEMAPS: usize = 100;

/// A seed URL ready for the frontier.
#[derive(Debug, Clone)]
pub struct SitemapEntry {
    pub url: Url,
    pub lineage: Lineage,
}

/// Expands a sitemap (or sitemap index) into frontier entries.
pub struct SitemapExpander {
    client: reqwest::Client,
    policy: UrlPolicy,
    faq_indicators: Vec<String>,
}

impl SitemapExpander {
    pub fn new(client: reqwest::Client, policy: UrlPolicy, faq_indicators: Vec<String>) -> Self {
        Self {
            client,
            policy,
            faq_indicators,
        }
    }

    /// Fetch and expand the seed sitemap, returning normalized, in-scope
    /// entries tagged with their lineage. Excluded sections are dropped here,
    /// before they ever reach the frontier.
    pub async fn expand(&self, seed: &str) -> Vec<SitemapEntry> {
        let mut entries: Vec<SitemapEntry> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut pending = vec![seed.to_string()];
        let mut visited_sitemaps: HashSet<String> = HashSet::new();

        while let Some(sitemap_url) = pending.pop() {
            if !visited_sitemaps.insert(sitemap_url.clone())
                || visited_sitemaps.len() > MAX_SITEMAPS
            {
                continue;
            }

            debug!(url = %sitemap_url, "fetching sitemap");
            let body = match self.fetch_text(&sitemap_url).await {
                Some(body) => body,
                None => continue,
            };

            if is_sitemap_index(&body) {
                for loc in extract_locs(&body) {
                    if !visited_sitemaps.contains(&loc) {
                        pending.push(loc);
                    }
                }
                continue;
            }

            let locs = extract_locs(&body);
            if locs.is_empty() {
                warn!(url = %sitemap_url, "sitemap yielded no URLs (malformed or empty)");
                continue;
            }

            for loc in locs {
                let normalized = match self.policy.normalize(&loc, None) {
                    Ok(url) => url,
                    Err(reason) => {
                        debug!(url = %loc, ?reason, "dropping unusable sitemap entry");
                        continue;
                    }
                };
                match self.policy.scope(&normalized) {
                    Scope::InScope => {}
                    Scope::External => {
                        debug!(url = %normalized, "sitemap entry outside allowed domains");
                        continue;
                    }
                    Scope::Excluded => {
                        debug!(url = %normalized, "sitemap entry in excluded section");
                        continue;
                    }
                }
                if !seen_urls.insert(normalized.to_string()) {
                    continue;
                }

                let lineage = if matches_indicator(normalized.path(), &self.faq_indicators)
                    || matches_indicator(&sitemap_url, &self.faq_indicators)
                {
                    Lineage::Faq
                } else {
                    Lineage::General
                };
                entries.push(SitemapEntry {
                    url: normalized,
                    lineage,
                });
            }
        }

        info!(
            entries = entries.len(),
            sitemaps = visited_sitemaps.len(),
            "sitemap expansion complete"
        );
        entries
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "failed to fetch sitemap");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "sitemap fetch returned error");
            return None;
        }
        match response.text().await {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(url, error = %e, "failed to read sitemap body");
                None
            }
        }
    }
}

/// Whether the document is a `<sitemapindex>` rather than a `<urlset>`.
pub fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

/// Extract every `<loc>` value, unescaping XML entities.
pub fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<loc>") {
        rest = &rest[start + 5..];
        let Some(end) = rest.find("</loc>") else {
            break;
        };
        let value = unescape_xml(rest[..end].trim());
        if !value.is_empty() {
            locs.push(value);
        }
        rest = &rest[end + 6..];
    }
    locs
}

fn unescape_xml(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_locs_from_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/a</loc>
    <lastmod>2024-01-01</lastmod>
  </url>
  <url><loc>https://example.com/faq/b</loc></url>
</urlset>"#;

        let locs = extract_locs(xml);
        assert_eq!(
            locs,
            vec!["https://example.com/a", "https://example.com/faq/b"]
        );
        assert!(!is_sitemap_index(xml));
    }

    #[test]
    fn extracts_locs_spanning_lines() {
        let xml = "<urlset><url><loc>\n  https://example.com/a\n</loc></url></urlset>";
        assert_eq!(extract_locs(xml), vec!["https://example.com/a"]);
    }

    #[test]
    fn unescapes_xml_entities() {
        let xml = "<urlset><url><loc>https://example.com/search?q=test&amp;page=1</loc></url></urlset>";
        assert_eq!(
            extract_locs(xml),
            vec!["https://example.com/search?q=test&page=1"]
        );
    }

    #[test]
    fn detects_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemap-b.xml</loc></sitemap>
</sitemapindex>"#;
        assert!(is_sitemap_index(xml));
        assert_eq!(extract_locs(xml).len(), 2);
    }

    #[test]
    fn malformed_xml_yields_nothing() {
        assert!(extract_locs("not xml at all").is_empty());
        assert!(extract_locs("<urlset><url><loc>unterminated").is_empty());
    }
}
