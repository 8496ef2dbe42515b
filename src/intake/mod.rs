//! Intake validation for candidate uploads.
//!
//! Validation is a pure function of the candidate, the declared kind, the
//! reported client environment and the configured limits. Checks run in a
//! fixed order and stop at the first failure, so every rejection carries
//! exactly one reason.

use mediagate_common::paths::{accepted_extensions, document_extensions, extension_of};
use mediagate_common::MediaType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::IntakeConfig;

/// Kind of file the uploader says they are submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredKind {
    Image,
    Video,
    Audio,
    Document,
}

impl DeclaredKind {
    fn media_type(self) -> Option<MediaType> {
        match self {
            Self::Image => Some(MediaType::Image),
            Self::Video => Some(MediaType::Video),
            Self::Audio => Some(MediaType::Audio),
            Self::Document => None,
        }
    }
}

/// Descriptor of a file offered for intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFile {
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Measured frame width (video only).
    #[serde(default)]
    pub width: Option<u32>,
    /// Measured frame height (video only).
    #[serde(default)]
    pub height: Option<u32>,
}

/// Capabilities reported by the uploading environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Binary buffers can be shared with decoder workers.
    pub shared_buffers: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            shared_buffers: true,
        }
    }
}

/// Fixed limits applied at intake.
#[derive(Debug, Clone, Copy)]
pub struct IntakeLimits {
    pub max_batch_files: usize,
    pub max_file_size_bytes: u64,
    pub max_video_width: u32,
    pub max_video_height: u32,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self::from(&IntakeConfig::default())
    }
}

impl From<&IntakeConfig> for IntakeLimits {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            max_batch_files: config.max_batch_files,
            max_file_size_bytes: config.max_file_size_bytes,
            max_video_width: config.max_video_width,
            max_video_height: config.max_video_height,
        }
    }
}

/// Machine-readable rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    UnsupportedFormat,
    FileTooLarge,
    ResolutionTooHigh,
    ResolutionUnknown,
    EnvironmentUnsupported,
    /// The uploaded object could not be found in storage.
    ObjectNotFound,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat => write!(f, "unsupported_format"),
            Self::FileTooLarge => write!(f, "file_too_large"),
            Self::ResolutionTooHigh => write!(f, "resolution_too_high"),
            Self::ResolutionUnknown => write!(f, "resolution_unknown"),
            Self::EnvironmentUnsupported => write!(f, "environment_unsupported"),
            Self::ObjectNotFound => write!(f, "object_not_found"),
        }
    }
}

/// Structured rejection of a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{file_name}: {human_message}")]
pub struct ValidationError {
    pub file_name: String,
    pub file_size_bytes: u64,
    pub reason_code: ReasonCode,
    pub human_message: String,
}

impl ValidationError {
    pub fn new(file: &CandidateFile, reason_code: ReasonCode, human_message: String) -> Self {
        Self {
            file_name: file.file_name.clone(),
            file_size_bytes: file.size_bytes,
            reason_code,
            human_message,
        }
    }
}

/// Rejection of a whole batch, raised before any file is looked at.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("Too many files: {count} submitted, at most {max} per batch")]
    TooManyFiles { count: usize, max: usize },
}

/// What an accepted file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptedKind {
    Media(MediaType),
    /// Stored as-is, never converted.
    Document,
}

/// A file that passed every check.
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    pub file: CandidateFile,
    /// Lowercased extension.
    pub extension: String,
    pub kind: AcceptedKind,
}

impl AcceptedFile {
    pub fn media_type(&self) -> Option<MediaType> {
        match self.kind {
            AcceptedKind::Media(media_type) => Some(media_type),
            AcceptedKind::Document => None,
        }
    }
}

/// Per-file outcome of a batch; rejections never discard siblings.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub accepted: Vec<T>,
    pub rejected: Vec<ValidationError>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            accepted: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Validate one file against the declared kind.
pub fn validate(
    file: &CandidateFile,
    declared: DeclaredKind,
    env: &Environment,
    limits: &IntakeLimits,
) -> Result<AcceptedFile, ValidationError> {
    let extension = check_format(file, declared)?;

    if file.size_bytes > limits.max_file_size_bytes {
        return Err(ValidationError::new(
            file,
            ReasonCode::FileTooLarge,
            format!(
                "File is {} MB, the limit is {} MB",
                file.size_bytes.div_ceil(1024 * 1024),
                limits.max_file_size_bytes / (1024 * 1024)
            ),
        ));
    }

    if declared == DeclaredKind::Video {
        check_resolution(file, limits)?;

        if !env.shared_buffers {
            return Err(ValidationError::new(
                file,
                ReasonCode::EnvironmentUnsupported,
                "This browser cannot decode video for upload; try a different browser".to_string(),
            ));
        }
    }

    let kind = match declared.media_type() {
        Some(media_type) => AcceptedKind::Media(media_type),
        None => AcceptedKind::Document,
    };

    Ok(AcceptedFile {
        file: file.clone(),
        extension,
        kind,
    })
}

/// Reject a batch that holds more files than allowed.
pub fn check_batch_size(count: usize, limits: &IntakeLimits) -> Result<(), BatchError> {
    if count > limits.max_batch_files {
        return Err(BatchError::TooManyFiles {
            count,
            max: limits.max_batch_files,
        });
    }
    Ok(())
}

/// Validate a batch, checking the batch size before any file.
///
/// Each file travels with a tag of the caller's choosing (a storage
/// location, an index) that comes back alongside its accepted descriptor.
pub fn validate_batch<T>(
    files: Vec<(T, CandidateFile, DeclaredKind)>,
    env: &Environment,
    limits: &IntakeLimits,
) -> Result<BatchOutcome<(T, AcceptedFile)>, BatchError> {
    check_batch_size(files.len(), limits)?;

    let mut outcome = BatchOutcome::default();
    for (tag, file, declared) in files {
        match validate(&file, declared, env, limits) {
            Ok(accepted) => outcome.accepted.push((tag, accepted)),
            Err(rejection) => {
                tracing::debug!(
                    file = %rejection.file_name,
                    reason = %rejection.reason_code,
                    "Intake rejected file"
                );
                outcome.rejected.push(rejection);
            }
        }
    }

    Ok(outcome)
}

fn check_format(file: &CandidateFile, declared: DeclaredKind) -> Result<String, ValidationError> {
    let unsupported = |message: String| {
        ValidationError::new(file, ReasonCode::UnsupportedFormat, message)
    };

    let extension = extension_of(&file.file_name)
        .ok_or_else(|| unsupported("File has no extension".to_string()))?;

    let accepted = match declared.media_type() {
        Some(media_type) => accepted_extensions(media_type),
        None => document_extensions(),
    };
    if !accepted.contains(&extension.as_str()) {
        return Err(unsupported(format!(
            ".{} files are not accepted as {}; accepted: {}",
            extension,
            declared_label(declared),
            accepted.join(", ")
        )));
    }

    // A declared MIME type must agree with the kind; generic types are ignored.
    if let (Some(media_type), Some(mime)) = (declared.media_type(), file.mime_type.as_deref()) {
        let mime = mime.trim().to_ascii_lowercase();
        let generic = mime.is_empty() || mime == "application/octet-stream";
        if !generic && !mime.starts_with(media_type.mime_prefix()) {
            return Err(unsupported(format!(
                "MIME type {} does not match {}",
                mime,
                declared_label(declared)
            )));
        }
    }

    Ok(extension)
}

fn check_resolution(file: &CandidateFile, limits: &IntakeLimits) -> Result<(), ValidationError> {
    let (width, height) = match (file.width, file.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(ValidationError::new(
                file,
                ReasonCode::ResolutionUnknown,
                "Video resolution could not be determined".to_string(),
            ))
        }
    };

    // Portrait clips are held to the same bounds as landscape ones.
    let (long, short) = (width.max(height), width.min(height));
    let max_long = limits.max_video_width.max(limits.max_video_height);
    let max_short = limits.max_video_width.min(limits.max_video_height);

    if long > max_long || short > max_short {
        return Err(ValidationError::new(
            file,
            ReasonCode::ResolutionTooHigh,
            format!(
                "Video is {}x{}, the limit is {}x{}",
                width, height, limits.max_video_width, limits.max_video_height
            ),
        ));
    }

    Ok(())
}

fn declared_label(declared: DeclaredKind) -> &'static str {
    match declared {
        DeclaredKind::Image => "image",
        DeclaredKind::Video => "video",
        DeclaredKind::Audio => "audio",
        DeclaredKind::Document => "document",
    }
}
