//! Post-processors run synchronously by the fetch path before a page
//! completes. A post-processor failure flags the page but never demotes a
//! successful fetch.

mod faq;
mod markdown;

pub use faq::FaqExtractor;
pub use markdown::MarkdownConverter;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::models::{FaqItem, Page};
use crate::storage::ArtifactStore;

#[derive(Debug, thiserror::Error)]
pub enum PostprocessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} processing failed: {message}")]
    Failed { kind: &'static str, message: String },
}

/// Content metadata a post-processor uses to decide whether it applies.
#[derive(Debug, Clone)]
pub struct ContentMeta {
    pub content_type: String,
}

impl ContentMeta {
    pub fn new(content_type: &str) -> Self {
        Self {
            content_type: content_type
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_lowercase(),
        }
    }
}

/// Records produced by a post-processor.
#[derive(Debug)]
pub enum Produced {
    /// Rendered Markdown plus the page title and extracted text.
    Markdown {
        path: PathBuf,
        title: Option<String>,
        text: String,
    },
    /// Question/answer pairs found in the document.
    Faqs(Vec<FaqItem>),
    /// Plain text extracted from a binary document.
    ExtractedText { path: PathBuf },
    /// Transcript for a media file.
    Transcript { path: PathBuf },
    /// The processor ran but produced nothing.
    Nothing,
}

/// A synchronous content post-processor.
pub trait PostProcessor: Send + Sync {
    /// Stable identifier used in logs and error flags.
    fn kind(&self) -> &'static str;
    /// Whether this processor applies to the fetched content.
    fn accept(&self, meta: &ContentMeta) -> bool;
    /// Process the stored artifact and emit records.
    fn process(&self, input: &Path, page: &Page) -> Result<Produced, PostprocessError>;
}

/// Hook for the external PDF text extractor. The default implementation
/// accepts PDFs but extracts nothing; a real extractor drops its output
/// under `pdf_text/`.
pub struct PdfTextExtractor {
    _store: Arc<ArtifactStore>,
}

impl PdfTextExtractor {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { _store: store }
    }
}

impl PostProcessor for PdfTextExtractor {
    fn kind(&self) -> &'static str {
        "pdf_text"
    }

    fn accept(&self, meta: &ContentMeta) -> bool {
        meta.content_type == "application/pdf"
    }

    fn process(&self, _input: &Path, _page: &Page) -> Result<Produced, PostprocessError> {
        Ok(Produced::Nothing)
    }
}

/// Hook for the external transcript downloader; same shape as the PDF hook.
pub struct TranscriptFetcher {
    _store: Arc<ArtifactStore>,
}

impl TranscriptFetcher {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { _store: store }
    }
}

impl PostProcessor for TranscriptFetcher {
    fn kind(&self) -> &'static str {
        "transcript"
    }

    fn accept(&self, meta: &ContentMeta) -> bool {
        meta.content_type.starts_with("video/") || meta.content_type.starts_with("audio/")
    }

    fn process(&self, _input: &Path, _page: &Page) -> Result<Produced, PostprocessError> {
        Ok(Produced::Nothing)
    }
}

/// The processors wired into the fetch path, run in registration order.
pub struct PostProcessorSet {
    processors: Vec<Box<dyn PostProcessor>>,
}

impl PostProcessorSet {
    /// The standard pipeline: Markdown rendering, FAQ extraction, and the
    /// external-collaborator hooks.
    pub fn standard(store: Arc<ArtifactStore>) -> Self {
        Self {
            processors: vec![
                Box::new(MarkdownConverter::new(store.clone())),
                Box::new(FaqExtractor::new()),
                Box::new(PdfTextExtractor::new(store.clone())),
                Box::new(TranscriptFetcher::new(store)),
            ],
        }
    }

    /// Run every applicable processor. Failures are isolated: processing
    /// continues and the first error message is returned for the page's
    /// `postprocess_error` flag.
    pub fn run(&self, meta: &ContentMeta, input: &Path, page: &Page) -> (Vec<Produced>, Option<String>) {
        let mut produced = Vec::new();
        let mut first_error = None;
        for processor in &self.processors {
            if !processor.accept(meta) {
                continue;
            }
            match processor.process(input, page) {
                Ok(Produced::Nothing) => {}
                Ok(output) => produced.push(output),
                Err(e) => {
                    warn!(
                        url = %page.url,
                        kind = processor.kind(),
                        error = %e,
                        "post-processor failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(format!("{}: {}", processor.kind(), e));
                    }
                }
            }
        }
        (produced, first_error)
    }
}
