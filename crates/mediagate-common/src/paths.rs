//! Extension tables for the media kinds accepted at intake.
//!
//! Lookups are case-insensitive. Documents are recognised so that intake can
//! accept them, but they never map to a [`MediaType`] and never enter the
//! conversion pipeline.

use std::path::Path;

use crate::MediaType;

/// Accepted image file extensions.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "heic", "heif",
];

/// Accepted video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];

/// Accepted audio file extensions.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "ogg", "flac", "opus"];

/// Accepted document file extensions.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "txt", "csv", "rtf", "doc", "docx", "odt", "xls", "xlsx", "ppt", "pptx",
];

/// Lowercased extension of a file name, if it has one.
///
/// # Examples
///
/// ```
/// use mediagate_common::paths::extension_of;
///
/// assert_eq!(extension_of("IMG_0001.HEIC").as_deref(), Some("heic"));
/// assert_eq!(extension_of("README"), None);
/// ```
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Extensions accepted for a media kind.
#[must_use]
pub fn accepted_extensions(media_type: MediaType) -> &'static [&'static str] {
    match media_type {
        MediaType::Image => IMAGE_EXTENSIONS,
        MediaType::Video => VIDEO_EXTENSIONS,
        MediaType::Audio => AUDIO_EXTENSIONS,
    }
}

/// Extensions accepted for documents.
#[must_use]
pub fn document_extensions() -> &'static [&'static str] {
    DOCUMENT_EXTENSIONS
}

/// Whether an extension denotes a JPEG image.
pub fn is_jpeg_extension(ext: &str) -> bool {
    matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg")
}

/// Whether an extension denotes a vector (non-raster) image.
pub fn is_vector_extension(ext: &str) -> bool {
    ext.eq_ignore_ascii_case("svg")
}
