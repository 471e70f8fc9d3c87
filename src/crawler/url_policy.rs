//! URL canonicalization and admission control.
//!
//! Every URL stored anywhere in the registry has passed through
//! [`UrlPolicy::normalize`] first; the normalized string is the natural key
//! for a page. Normalization is idempotent.

use url::Url;

use crate::config::Config;

/// Why a raw URL was rejected before normalization finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Not parseable as a URL, even against the base.
    Unparseable,
    /// Scheme outside http/https (mailto:, javascript:, tel:, ftp:, ...).
    Scheme,
}

/// Where a normalized URL stands with respect to the crawl scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Crawlable: allowed host, scheme, and not policy-excluded.
    InScope,
    /// Host outside the allowed domains; recorded, never queued.
    External,
    /// Allowed host but excluded by section keyword or URL prefix.
    Excluded,
}

/// Canonicalization rules plus allow/deny policy for one crawl.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allowed_domains: Vec<String>,
    excluded_sections: Vec<String>,
    excluded_prefixes: Vec<String>,
    strip_params: Vec<String>,
}

impl UrlPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            excluded_sections: config
                .excluded_sitemap_sections
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            excluded_prefixes: config.excluded_url_prefixes.clone(),
            strip_params: config
                .strip_query_params
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Resolve `raw` (possibly relative) against `base` and canonicalize.
    ///
    /// Rules, in order: resolve; lowercase scheme/host and strip default
    /// ports (the `url` crate guarantees both); drop the fragment; strip
    /// deny-listed query parameters; sort the remaining parameters; collapse
    /// duplicate slashes in the path; drop the trailing slash on non-root
    /// paths.
    pub fn normalize(&self, raw: &str, base: Option<&Url>) -> Result<Url, RejectReason> {
        let trimmed = raw.trim();
        let mut url = match base {
            Some(base) => base.join(trimmed).map_err(|_| RejectReason::Unparseable)?,
            None => Url::parse(trimmed).map_err(|_| RejectReason::Unparseable)?,
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RejectReason::Scheme);
        }

        url.set_fragment(None);

        let kept: Vec<(String, String)> = {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(name, _)| !self.is_stripped_param(name))
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();
            pairs.sort();
            pairs
        };
        if kept.is_empty() {
            url.set_query(None);
        } else {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in &kept {
                serializer.append_pair(name, value);
            }
            let query = serializer.finish();
            url.set_query(Some(&query));
        }

        let path = normalize_path(url.path());
        url.set_path(&path);

        Ok(url)
    }

    fn is_stripped_param(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.starts_with("utm_") || self.strip_params.contains(&lower)
    }

    /// Classify a normalized URL against the crawl scope.
    pub fn scope(&self, url: &Url) -> Scope {
        let host = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return Scope::External,
        };
        if !self.allowed_domains.contains(&host) {
            return Scope::External;
        }

        let path = url.path().to_lowercase();
        if self
            .excluded_sections
            .iter()
            .any(|section| path.contains(section.as_str()))
        {
            return Scope::Excluded;
        }

        let as_str = url.as_str();
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| as_str.starts_with(prefix.as_str()))
        {
            return Scope::Excluded;
        }

        Scope::InScope
    }

    pub fn is_in_scope(&self, url: &Url) -> bool {
        self.scope(url) == Scope::InScope
    }
}

/// Collapse duplicate slashes and drop the trailing slash on non-root paths.
fn normalize_path(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                collapsed.push(c);
            }
            last_was_slash = true;
        } else {
            collapsed.push(c);
            last_was_slash = false;
        }
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UrlPolicy {
        UrlPolicy {
            allowed_domains: vec!["example.com".to_string(), "www.example.com".to_string()],
            excluded_sections: vec!["accounts".to_string(), "investor-relations".to_string()],
            excluded_prefixes: vec!["https://example.com/legacy".to_string()],
            strip_params: vec!["sessionid".to_string()],
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let p = policy();
        let urls = [
            "HTTPS://Example.COM:443/Path//to///page/?b=2&utm_source=mail&a=1#frag",
            "https://example.com/a/",
            "https://example.com/?z=9&a=1",
            "https://example.com",
        ];
        for raw in urls {
            let once = p.normalize(raw, None).unwrap();
            let twice = p.normalize(once.as_str(), None).unwrap();
            assert_eq!(once, twice, "normalize must be idempotent for {raw}");
        }
    }

    #[test]
    fn normalization_canonicalizes() {
        let p = policy();
        let url = p
            .normalize(
                "HTTPS://Example.COM:443/Path//to/page/?b=2&utm_source=x&sessionid=9&a=1#frag",
                None,
            )
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/Path/to/page?a=1&b=2");
    }

    #[test]
    fn relative_urls_resolve_against_base() {
        let p = policy();
        let base = Url::parse("https://example.com/help/topics/").unwrap();
        let url = p.normalize("../faq/", Some(&base)).unwrap();
        assert_eq!(url.as_str(), "https://example.com/help/faq");
    }

    #[test]
    fn rejects_non_http_schemes() {
        let p = policy();
        assert_eq!(
            p.normalize("mailto:help@example.com", None),
            Err(RejectReason::Scheme)
        );
        assert_eq!(
            p.normalize("javascript:void(0)", None),
            Err(RejectReason::Scheme)
        );
        assert_eq!(p.normalize("::!::", None), Err(RejectReason::Unparseable));
    }

    #[test]
    fn root_path_keeps_slash() {
        let p = policy();
        let url = p.normalize("https://example.com", None).unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn scope_classification() {
        let p = policy();
        let in_scope = Url::parse("https://example.com/help").unwrap();
        let external = Url::parse("https://other.com/help").unwrap();
        let section = Url::parse("https://example.com/us/accounts/login").unwrap();
        let prefix = Url::parse("https://example.com/legacy/page").unwrap();

        assert_eq!(p.scope(&in_scope), Scope::InScope);
        assert_eq!(p.scope(&external), Scope::External);
        assert_eq!(p.scope(&section), Scope::Excluded);
        assert_eq!(p.scope(&prefix), Scope::Excluded);
    }

    #[test]
    fn section_match_is_case_insensitive() {
        let p = policy();
        let url = Url::parse("https://example.com/US/Investor-Relations/report").unwrap();
        assert_eq!(p.scope(&url), Scope::Excluded);
    }

    #[test]
    fn empty_query_values_survive() {
        let p = policy();
        let url = p.normalize("https://example.com/p?flag&x=1", None).unwrap();
        assert_eq!(url.as_str(), "https://example.com/p?flag=&x=1");
        let again = p.normalize(url.as_str(), None).unwrap();
        assert_eq!(again, url);
    }
}
