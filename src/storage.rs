//! Content-addressed artifact storage on disk.
//!
//! Every artifact is named by the SHA-256 of its content, which makes
//! writes idempotent and crash-safe: a re-fetch of identical bytes lands on
//! the same path, and a partially written temp file never shadows a
//! finished artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Fixed artifact subdirectories under the artifacts root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Html,
    Markdown,
    Pdf,
    PdfText,
    Video,
    Audio,
    Transcript,
}

impl ArtifactKind {
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Pdf => "pdf",
            Self::PdfText => "pdf_text",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Transcript => "transcripts",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Pdf => "pdf",
            Self::PdfText => "txt",
            Self::Video => "mp4",
            Self::Audio => "mp3",
            Self::Transcript => "txt",
        }
    }
}

/// Compute the hex-encoded SHA-256 of a byte slice.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Map a MIME type to the file extension used for media artifacts.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "text/html" => "html",
        "application/pdf" => "pdf",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

/// Writes artifacts under a fixed directory layout.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Create every artifact subdirectory up front.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for kind in [
            ArtifactKind::Html,
            ArtifactKind::Markdown,
            ArtifactKind::Pdf,
            ArtifactKind::PdfText,
            ArtifactKind::Video,
            ArtifactKind::Audio,
            ArtifactKind::Transcript,
        ] {
            fs::create_dir_all(self.root.join(kind.subdir()))?;
        }
        Ok(())
    }

    /// Path of an artifact with the kind's default extension.
    pub fn path_for(&self, kind: ArtifactKind, hash: &str) -> PathBuf {
        self.path_with_extension(kind, hash, kind.extension())
    }

    /// Path of an artifact with an explicit extension (media types vary).
    pub fn path_with_extension(&self, kind: ArtifactKind, hash: &str, ext: &str) -> PathBuf {
        self.root
            .join(kind.subdir())
            .join(format!("{}.{}", hash, ext))
    }

    /// Write content under its own hash; returns (path, hash).
    pub fn write(&self, kind: ArtifactKind, content: &[u8]) -> std::io::Result<(PathBuf, String)> {
        let hash = content_hash(content);
        let path = self.path_for(kind, &hash);
        self.write_at(&path, content)?;
        Ok((path, hash))
    }

    /// Write content under its own hash with an explicit extension.
    pub fn write_with_extension(
        &self,
        kind: ArtifactKind,
        content: &[u8],
        ext: &str,
    ) -> std::io::Result<(PathBuf, String)> {
        let hash = content_hash(content);
        let path = self.path_with_extension(kind, &hash, ext);
        self.write_at(&path, content)?;
        Ok((path, hash))
    }

    /// Write a derived artifact (markdown, extracted text) keyed by the hash
    /// of the source it was produced from.
    pub fn write_derived(
        &self,
        kind: ArtifactKind,
        source_hash: &str,
        content: &[u8],
    ) -> std::io::Result<PathBuf> {
        let path = self.path_for(kind, source_hash);
        self.write_at(&path, content)?;
        Ok(path)
    }

    // Temp file in the same directory, fsync, then rename into place. An
    // existing artifact with the same name already has identical content.
    fn write_at(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp{:08x}", rand::random::<u32>()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn path_layout_uses_kind_subdir() {
        let store = ArtifactStore::new(Path::new("/artifacts"));
        let path = store.path_for(ArtifactKind::Pdf, "deadbeef");
        assert_eq!(path, PathBuf::from("/artifacts/pdf/deadbeef.pdf"));
    }

    #[test]
    fn write_is_content_addressed_and_idempotent() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let (path, hash) = store.write(ArtifactKind::Html, b"<html></html>").unwrap();
        assert!(path.exists());
        assert_eq!(path, store.path_for(ArtifactKind::Html, &hash));

        // Second write of the same content is a no-op on the same path.
        let (path2, hash2) = store.write(ArtifactKind::Html, b"<html></html>").unwrap();
        assert_eq!(path, path2);
        assert_eq!(hash, hash2);
        assert_eq!(fs::read(&path).unwrap(), b"<html></html>");
    }

    #[test]
    fn derived_artifact_shares_source_hash() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let (_, hash) = store.write(ArtifactKind::Html, b"<p>hi</p>").unwrap();
        let md = store
            .write_derived(ArtifactKind::Markdown, &hash, b"hi")
            .unwrap();
        assert_eq!(md, store.path_for(ArtifactKind::Markdown, &hash));
        assert!(md.exists());
    }

    #[test]
    fn media_extension_from_mime() {
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("audio/mpeg"), "mp3");
        assert_eq!(extension_for_mime("application/x-unknown"), "bin");
    }
}
