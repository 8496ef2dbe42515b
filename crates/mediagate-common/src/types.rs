//! Core type definitions for media items and their processing lifecycle.
//!
//! All enums serialize in snake_case, which is also the representation stored
//! in the database and exposed over the HTTP API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of media carried by an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio recording.
    Audio,
}

impl MediaType {
    /// Prefix of MIME types belonging to this kind (e.g. `image/`).
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            Self::Image => "image/",
            Self::Video => "video/",
            Self::Audio => "audio/",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            _ => Err(format!("Invalid media type: {}", s)),
        }
    }
}

/// Processing state of a media item.
///
/// ```text
/// pending ──► processing ────────┬──► processed
///    │                           │
///    ├──────► server_processing ─┴──► failed
///    │
///    └──────► processed   (passthrough fast-path)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Created at intake, no plan applied yet.
    Pending,
    /// Being transcoded by a local capability.
    Processing,
    /// Delegated to the remote processing service.
    ServerProcessing,
    /// Finished successfully. Terminal.
    Processed,
    /// Finished with an error. Terminal.
    Failed,
}

impl ProcessingStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Whether work is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::ServerProcessing)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, ServerProcessing)
                | (Pending, Processed)
                | (Processing, Processed)
                | (Processing, Failed)
                | (ServerProcessing, Processed)
                | (ServerProcessing, Failed)
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::ServerProcessing => write!(f, "server_processing"),
            Self::Processed => write!(f, "processed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "server_processing" => Ok(Self::ServerProcessing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

/// Conversion route taken for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
    /// Used as-is, no transcode.
    JpegPassthrough,
    /// Transcoded to WebP in-process.
    WebpLocal,
    /// Transcoded to WebP by the remote service.
    WebpServer,
    /// Local WebP failed, re-encoded as JPEG.
    JpegFallback,
    /// No image route applies (video and audio).
    None,
}

impl fmt::Display for ProcessingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JpegPassthrough => write!(f, "jpeg_passthrough"),
            Self::WebpLocal => write!(f, "webp_local"),
            Self::WebpServer => write!(f, "webp_server"),
            Self::JpegFallback => write!(f, "jpeg_fallback"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for ProcessingPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg_passthrough" => Ok(Self::JpegPassthrough),
            "webp_local" => Ok(Self::WebpLocal),
            "webp_server" => Ok(Self::WebpServer),
            "jpeg_fallback" => Ok(Self::JpegFallback),
            "none" => Ok(Self::None),
            _ => Err(format!("Invalid processing path: {}", s)),
        }
    }
}

/// Output format requested by a conversion plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    /// Keep the source format untouched.
    Original,
    /// WebP still image.
    Webp,
    /// JPEG still image.
    Jpeg,
    /// WebM audio.
    Webm,
    /// Same container and codec as the source, downscaled renditions only.
    SourceContainer,
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Webp => write!(f, "webp"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Webm => write!(f, "webm"),
            Self::SourceContainer => write!(f, "source_container"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "webp" => Ok(Self::Webp),
            "jpeg" => Ok(Self::Jpeg),
            "webm" => Ok(Self::Webm),
            "source_container" => Ok(Self::SourceContainer),
            _ => Err(format!("Invalid target format: {}", s)),
        }
    }
}

/// Where the work of a plan is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSite {
    /// In-process, result returned synchronously.
    Local,
    /// Remote service, result delivered by callback.
    Remote,
}

impl fmt::Display for ExecutionSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for ExecutionSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(format!("Invalid execution site: {}", s)),
        }
    }
}

/// Label of a produced video rendition.
///
/// Ordered from lowest to highest resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLabel {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl QualityLabel {
    /// All labels, lowest first.
    pub const ALL: [QualityLabel; 3] = [Self::P480, Self::P720, Self::P1080];

    /// Nominal line count of the rendition.
    pub fn lines(&self) -> u32 {
        match self {
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.lines())
    }
}

impl FromStr for QualityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "480p" => Ok(Self::P480),
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            _ => Err(format!("Invalid quality label: {}", s)),
        }
    }
}

/// Measurements recorded when an item reaches `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    /// Size reduction relative to the original, in percent.
    pub compression_ratio_percent: f64,
    /// Wall-clock processing time.
    pub processing_time_ms: u64,
}

impl ProcessingMetrics {
    /// Metrics for an item that was used as-is.
    pub fn passthrough() -> Self {
        Self {
            compression_ratio_percent: 0.0,
            processing_time_ms: 0,
        }
    }

    /// Compute metrics from original and output sizes.
    pub fn from_sizes(original_bytes: u64, output_bytes: u64, processing_time_ms: u64) -> Self {
        let compression_ratio_percent = if original_bytes == 0 {
            0.0
        } else {
            (1.0 - output_bytes as f64 / original_bytes as f64) * 100.0
        };
        Self {
            compression_ratio_percent,
            processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_follow_state_machine() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(ServerProcessing));
        assert!(Pending.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(ServerProcessing.can_transition_to(Processed));

        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(ServerProcessing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        for terminal in [ProcessingStatus::Processed, ProcessingStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                ProcessingStatus::Pending,
                ProcessingStatus::Processing,
                ProcessingStatus::ServerProcessing,
                ProcessingStatus::Processed,
                ProcessingStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(ProcessingStatus::ServerProcessing.to_string(), "server_processing");
        assert_eq!(
            "server_processing".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::ServerProcessing
        );
        assert_eq!(
            serde_json::to_string(&ProcessingStatus::ServerProcessing).unwrap(),
            "\"server_processing\""
        );
    }

    #[test]
    fn test_processing_path_string_forms() {
        assert_eq!(ProcessingPath::WebpLocal.to_string(), "webp_local");
        assert_eq!(
            "jpeg_fallback".parse::<ProcessingPath>().unwrap(),
            ProcessingPath::JpegFallback
        );
        assert!("webp".parse::<ProcessingPath>().is_err());
    }

    #[test]
    fn test_quality_labels_order_and_format() {
        let mut labels = vec![QualityLabel::P1080, QualityLabel::P480, QualityLabel::P720];
        labels.sort();
        assert_eq!(labels, QualityLabel::ALL.to_vec());
        assert_eq!(QualityLabel::P720.to_string(), "720p");
        assert_eq!(serde_json::to_string(&QualityLabel::P1080).unwrap(), "\"1080p\"");
        assert_eq!("480p".parse::<QualityLabel>().unwrap(), QualityLabel::P480);
    }

    #[test]
    fn test_metrics_from_sizes() {
        let metrics = ProcessingMetrics::from_sizes(1000, 250, 12);
        assert!((metrics.compression_ratio_percent - 75.0).abs() < f64::EPSILON);
        assert_eq!(metrics.processing_time_ms, 12);
        assert_eq!(ProcessingMetrics::from_sizes(0, 10, 1).compression_ratio_percent, 0.0);
    }
}
