//! Database models for mediagate.
//!
//! These structs mirror the SQLite schema. `MediaItem` is also the JSON
//! representation returned by the HTTP API, so it serializes in camelCase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mediagate_common::{
    CallerId, ExecutionSite, MediaItemId, MediaType, PlanId, ProcessingMetrics, ProcessingPath,
    ProcessingStatus, QualityLabel, TargetFormat,
};
use serde::{Deserialize, Serialize};

/// One user-uploaded asset and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: MediaItemId,
    pub owner_id: CallerId,
    pub media_type: MediaType,
    pub original_filename: String,
    pub mime_type: String,
    pub original_size_bytes: u64,
    /// Storage path of the uploaded original.
    pub source_path: String,
    /// Content fingerprint used as the thumbnail cache key.
    pub fingerprint: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub processing_status: ProcessingStatus,
    /// Route actually taken; set on entering `processed`.
    pub processing_path: Option<ProcessingPath>,
    pub metrics: Option<ProcessingMetrics>,
    pub quality_variants: BTreeMap<QualityLabel, String>,
    pub processed_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub failure_reason: Option<String>,
    pub current_plan_id: Option<PlanId>,
    /// Deadline for a remote callback while `server_processing`.
    pub deadline_at: Option<DateTime<Utc>>,
    /// Incremented on every state change.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied at intake when creating a media item.
#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub id: MediaItemId,
    pub owner_id: CallerId,
    pub media_type: MediaType,
    pub original_filename: String,
    pub mime_type: String,
    pub original_size_bytes: u64,
    pub source_path: String,
    pub fingerprint: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Conversion plan issued for one media item. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPlan {
    pub id: PlanId,
    pub item_id: MediaItemId,
    pub target_format: TargetFormat,
    /// Labels the plan asks to produce; empty for non-video media.
    pub requested_variants: Vec<QualityLabel>,
    /// Route the plan starts on.
    pub route: ProcessingPath,
    pub execution_site: ExecutionSite,
    pub issued_at: DateTime<Utc>,
}

impl ConversionPlan {
    /// Whether the plan asks for a given quality label.
    pub fn requests(&self, label: QualityLabel) -> bool {
        self.requested_variants.contains(&label)
    }

    /// Whether the plan completes at issue time without any processing.
    pub fn is_passthrough(&self) -> bool {
        self.route == ProcessingPath::JpegPassthrough
    }

    /// Status the item enters when this plan is applied.
    pub fn entry_status(&self) -> ProcessingStatus {
        if self.is_passthrough() {
            ProcessingStatus::Processed
        } else {
            match self.execution_site {
                ExecutionSite::Local => ProcessingStatus::Processing,
                ExecutionSite::Remote => ProcessingStatus::ServerProcessing,
            }
        }
    }
}
