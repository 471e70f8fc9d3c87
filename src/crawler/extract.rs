//! Outbound link extraction and lineage classification for fetched HTML.

use scraper::{Html, Selector};
use url::Url;

use crate::models::Lineage;

/// A link as it appears in the document, before normalization.
#[derive(Debug, Clone)]
pub struct RawLink {
    pub href: String,
    pub anchor_text: String,
}

/// Enumerate candidate links: `<a href>`, `<link href>`, and `<iframe src>`
/// (embedded media players). javascript:, mailto:, tel:, and fragment-only
/// hrefs are dropped here.
pub fn extract_links(html: &str) -> Vec<RawLink> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("static selector");
    let link = Selector::parse("link[href]").expect("static selector");
    let iframe = Selector::parse("iframe[src]").expect("static selector");

    let mut links = Vec::new();

    for element in document.select(&anchor) {
        if let Some(href) = element.value().attr("href") {
            if let Some(href) = usable_href(href) {
                let text = element.text().collect::<Vec<_>>().join(" ");
                links.push(RawLink {
                    href,
                    anchor_text: squash_whitespace(&text),
                });
            }
        }
    }

    for element in document.select(&link) {
        // Only alternate/canonical document relations matter; stylesheets and
        // icons are noise.
        let rel = element.value().attr("rel").unwrap_or("").to_lowercase();
        if rel != "canonical" && rel != "alternate" {
            continue;
        }
        if let Some(href) = element.value().attr("href").and_then(usable_href) {
            links.push(RawLink {
                href,
                anchor_text: String::new(),
            });
        }
    }

    for element in document.select(&iframe) {
        if let Some(src) = element.value().attr("src").and_then(usable_href) {
            links.push(RawLink {
                href: src,
                anchor_text: String::new(),
            });
        }
    }

    links
}

fn usable_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    Some(href.to_string())
}

fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive substring match against the configured FAQ indicators.
pub fn matches_indicator(candidate: &str, indicators: &[String]) -> bool {
    let lower = candidate.to_lowercase();
    indicators
        .iter()
        .any(|indicator| lower.contains(&indicator.to_lowercase()))
}

/// Decide the lineage of an out-link.
///
/// Links inherit FAQ from an FAQ-lineage page; from general pages a link is
/// FAQ only when its URL or anchor text matches an indicator.
pub fn classify_lineage(
    parent: Lineage,
    url: &Url,
    anchor_text: &str,
    indicators: &[String],
) -> Lineage {
    if parent == Lineage::Faq {
        return Lineage::Faq;
    }
    if matches_indicator(url.as_str(), indicators) || matches_indicator(anchor_text, indicators) {
        Lineage::Faq
    } else {
        Lineage::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators() -> Vec<String> {
        vec!["faq".to_string(), "frequently-asked".to_string()]
    }

    #[test]
    fn extracts_anchors_with_text() {
        let html = r#"
            <html><body>
                <a href="/help/faq">Frequently   asked
                questions</a>
                <a href="https://other.com/page">Elsewhere</a>
            </body></html>
        "#;
        let links = extract_links(html);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].href, "/help/faq");
        assert_eq!(links[0].anchor_text, "Frequently asked questions");
    }

    #[test]
    fn skips_pseudo_links() {
        let html = r##"
            <a href="javascript:void(0)">x</a>
            <a href="mailto:a@b.c">mail</a>
            <a href="tel:+15551234567">call</a>
            <a href="#section">jump</a>
            <a href="">empty</a>
            <a href="/real">real</a>
        "##;
        let links = extract_links(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/real");
    }

    #[test]
    fn includes_canonical_links_and_iframes() {
        let html = r#"
            <html><head>
                <link rel="canonical" href="https://example.com/page">
                <link rel="stylesheet" href="/style.css">
            </head><body>
                <iframe src="https://example.com/video/embed/42"></iframe>
            </body></html>
        "#;
        let links = extract_links(html);
        let hrefs: Vec<&str> = links.iter().map(|l| l.href.as_str()).collect();
        assert!(hrefs.contains(&"https://example.com/page"));
        assert!(hrefs.contains(&"https://example.com/video/embed/42"));
        assert!(!hrefs.iter().any(|h| h.ends_with(".css")));
    }

    #[test]
    fn faq_pages_taint_all_out_links() {
        let url = Url::parse("https://example.com/pricing").unwrap();
        assert_eq!(
            classify_lineage(Lineage::Faq, &url, "Pricing", &indicators()),
            Lineage::Faq
        );
    }

    #[test]
    fn general_pages_classify_by_indicator() {
        let by_url = Url::parse("https://example.com/help/faq/billing").unwrap();
        let by_anchor = Url::parse("https://example.com/support").unwrap();
        let neither = Url::parse("https://example.com/about").unwrap();

        assert_eq!(
            classify_lineage(Lineage::General, &by_url, "Billing", &indicators()),
            Lineage::Faq
        );
        assert_eq!(
            classify_lineage(
                Lineage::General,
                &by_anchor,
                "Frequently-Asked Questions",
                &indicators()
            ),
            Lineage::Faq
        );
        assert_eq!(
            classify_lineage(Lineage::General, &neither, "About us", &indicators()),
            Lineage::General
        );
    }
}
