//! Preview data, placeholders and content fingerprints.

use std::path::Path;

use bytes::Bytes;
use mediagate_common::MediaType;
use mediagate_db::models::MediaItem;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Number of hex characters kept from the content digest.
const FINGERPRINT_LEN: usize = 16;

/// Ready-to-display preview bytes.
#[derive(Debug, Clone)]
pub struct Preview {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Icon shown while a preview is loading or when none can be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    Image,
    Video,
    Audio,
    Unknown,
}

impl Placeholder {
    pub fn for_media_type(media_type: Option<MediaType>) -> Self {
        match media_type {
            Some(MediaType::Image) => Self::Image,
            Some(MediaType::Video) => Self::Video,
            Some(MediaType::Audio) => Self::Audio,
            None => Self::Unknown,
        }
    }
}

/// Storage path a preview for `item` is read from, if there is one yet.
///
/// A produced thumbnail wins. Images fall back to the processed output and
/// then the original; video and audio have nothing to show until the
/// processing service produces a thumbnail.
pub fn preview_source(item: &MediaItem) -> Option<&str> {
    if let Some(path) = item.thumbnail_path.as_deref() {
        return Some(path);
    }
    match item.media_type {
        MediaType::Image => item
            .processed_path
            .as_deref()
            .or(Some(item.source_path.as_str())),
        MediaType::Video | MediaType::Audio => None,
    }
}

/// Content type for a stored object, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = mediagate_common::paths::extension_of(path);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("opus") => "audio/opus",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Read a stored file into a preview.
pub async fn load_preview(file: &Path) -> Result<Preview, String> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| format!("{}: {}", file.display(), e))?;
    Ok(Preview {
        content_type: content_type_for(&file.to_string_lossy()).to_string(),
        bytes: Bytes::from(bytes),
    })
}

/// Content fingerprint of a file: leading hex of its SHA-256 digest.
///
/// Keyed on content rather than name so renamed files keep their previews.
pub async fn fingerprint_file(file: &Path) -> std::io::Result<String> {
    let mut reader = tokio::fs::File::open(file).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(fingerprint_digest(hasher))
}

fn fingerprint_digest(hasher: Sha256) -> String {
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fingerprint_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("renamed.png");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let fa = fingerprint_file(&a).await.unwrap();
        let fb = fingerprint_file(&b).await.unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 16);

        let c = dir.path().join("c.png");
        std::fs::write(&c, b"other bytes").unwrap();
        assert_ne!(fa, fingerprint_file(&c).await.unwrap());
    }

    #[test]
    fn test_placeholder_per_type() {
        assert_eq!(Placeholder::for_media_type(Some(MediaType::Audio)), Placeholder::Audio);
        assert_eq!(Placeholder::for_media_type(None), Placeholder::Unknown);
        assert_eq!(serde_json::to_value(Placeholder::Video).unwrap(), "video");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b/photo.WEBP"), "image/webp");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
