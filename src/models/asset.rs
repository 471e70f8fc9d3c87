//! Non-HTML resources preserved on disk.

use serde::Serialize;

/// Kind of a downloaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Pdf,
    Video,
    Audio,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A non-HTML resource persisted to the artifacts tree.
#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    pub url: String,
    pub kind: AssetKind,
    pub local_path: String,
    pub content_hash: String,
    pub size: u64,
    /// URL of the page this asset was discovered from (the asset's own URL
    /// when it was reached directly from the sitemap).
    pub owner_url: String,
    pub extracted_text_path: Option<String>,
}
