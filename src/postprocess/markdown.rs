//! HTML to Markdown rendering with main-content selection.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use scraper::{Html, Selector};

use super::{ContentMeta, PostProcessor, Produced, PostprocessError};
use crate::models::Page;
use crate::storage::{ArtifactKind, ArtifactStore};

/// Selectors tried in order to find the content region; falls back to
/// `<body>` when none match.
const MAIN_CONTENT_SELECTORS: &[&str] = &["main", "#main-content", "article"];

/// Renders fetched HTML to Markdown and extracts the page title and text.
pub struct MarkdownConverter {
    store: Arc<ArtifactStore>,
    selectors: Vec<Selector>,
    title_selector: Selector,
    h1_selector: Selector,
    body_selector: Selector,
}

impl MarkdownConverter {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            store,
            selectors: MAIN_CONTENT_SELECTORS
                .iter()
                .map(|s| Selector::parse(s).expect("static selector"))
                .collect(),
            title_selector: Selector::parse("title").expect("static selector"),
            h1_selector: Selector::parse("h1").expect("static selector"),
            body_selector: Selector::parse("body").expect("static selector"),
        }
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        if let Some(title) = document.select(&self.title_selector).next() {
            let text = collect_text(&title);
            if !text.is_empty() {
                return Some(text);
            }
        }
        document
            .select(&self.h1_selector)
            .next()
            .map(|h1| collect_text(&h1))
            .filter(|t| !t.is_empty())
    }

    /// Inner HTML of the main content region, or the whole body.
    fn main_content(&self, document: &Html) -> (String, String) {
        for selector in &self.selectors {
            if let Some(region) = document.select(selector).next() {
                return (region.inner_html(), collect_text(&region));
            }
        }
        if let Some(body) = document.select(&self.body_selector).next() {
            return (body.inner_html(), collect_text(&body));
        }
        (document.html(), String::new())
    }
}

fn collect_text(element: &scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl PostProcessor for MarkdownConverter {
    fn kind(&self) -> &'static str {
        "markdown"
    }

    fn accept(&self, meta: &ContentMeta) -> bool {
        meta.content_type == "text/html" || meta.content_type == "application/xhtml+xml"
    }

    fn process(&self, input: &Path, page: &Page) -> Result<Produced, PostprocessError> {
        let html = fs::read_to_string(input)?;
        let document = Html::parse_document(&html);
        let title = self.extract_title(&document);
        let (region_html, text) = self.main_content(&document);

        let markdown = html2md::parse_html(&region_html);

        let source_hash = page
            .content_hash
            .clone()
            .unwrap_or_else(|| crate::storage::content_hash(html.as_bytes()));
        let path = self
            .store
            .write_derived(ArtifactKind::Markdown, &source_hash, markdown.as_bytes())?;

        Ok(Produced::Markdown { path, title, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(dir: &Path) -> MarkdownConverter {
        MarkdownConverter::new(Arc::new(ArtifactStore::new(dir)))
    }

    #[test]
    fn title_prefers_title_tag_then_h1() {
        let dir = tempfile::tempdir().unwrap();
        let c = converter(dir.path());

        let with_title = Html::parse_document("<title> Billing help </title><h1>Other</h1>");
        assert_eq!(c.extract_title(&with_title).as_deref(), Some("Billing help"));

        let h1_only = Html::parse_document("<body><h1>Support</h1></body>");
        assert_eq!(c.extract_title(&h1_only).as_deref(), Some("Support"));

        let neither = Html::parse_document("<body><p>text</p></body>");
        assert_eq!(c.extract_title(&neither), None);
    }

    #[test]
    fn main_region_beats_body() {
        let dir = tempfile::tempdir().unwrap();
        let c = converter(dir.path());
        let document = Html::parse_document(
            "<body><nav>menu</nav><main><p>the content</p></main></body>",
        );
        let (html, text) = c.main_content(&document);
        assert!(html.contains("the content"));
        assert!(!html.contains("menu"));
        assert_eq!(text, "the content");
    }

    #[test]
    fn process_writes_markdown_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        let c = MarkdownConverter::new(store.clone());

        let html = b"<html><head><title>FAQ</title></head>\
                     <body><main><h2>Question</h2><p>Answer</p></main></body></html>";
        let (raw_path, hash) = store.write(ArtifactKind::Html, html).unwrap();

        let url = url::Url::parse("https://example.com/faq").unwrap();
        let mut page = Page::new(&url, None, 0, crate::models::Lineage::Faq);
        page.content_hash = Some(hash.clone());

        let produced = c.process(&raw_path, &page).unwrap();
        match produced {
            Produced::Markdown { path, title, text } => {
                assert_eq!(path, store.path_for(ArtifactKind::Markdown, &hash));
                assert_eq!(title.as_deref(), Some("FAQ"));
                assert!(text.contains("Answer"));
                let markdown = fs::read_to_string(path).unwrap();
                assert!(markdown.contains("Question"));
            }
            other => panic!("expected markdown, got {other:?}"),
        }
    }
}
