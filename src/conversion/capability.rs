//! Interface to the external processing capabilities that do the actual
//! transcoding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mediagate_common::{
    ExecutionSite, MediaItemId, MediaType, PlanId, ProcessingMetrics, ProcessingPath,
    ProcessingStatus, QualityLabel, TargetFormat,
};
use mediagate_db::models::{ConversionPlan, MediaItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job handed to a processing capability, derived from an issued plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    pub item_id: MediaItemId,
    pub plan_id: PlanId,
    pub media_type: MediaType,
    /// Storage path of the original.
    pub source_path: String,
    pub original_size_bytes: u64,
    pub target_format: TargetFormat,
    pub route: ProcessingPath,
    pub execution_site: ExecutionSite,
    pub requested_variants: Vec<QualityLabel>,
}

impl JobDescription {
    pub fn new(item: &MediaItem, plan: &ConversionPlan) -> Self {
        Self {
            item_id: item.id,
            plan_id: plan.id,
            media_type: item.media_type,
            source_path: item.source_path.clone(),
            original_size_bytes: item.original_size_bytes,
            target_format: plan.target_format,
            route: plan.route,
            execution_site: plan.execution_site,
            requested_variants: plan.requested_variants.clone(),
        }
    }

    /// The same job re-routed to the JPEG fallback.
    pub fn as_jpeg_fallback(&self) -> Self {
        Self {
            target_format: TargetFormat::Jpeg,
            route: ProcessingPath::JpegFallback,
            ..self.clone()
        }
    }
}

/// Result of a successful processing run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessReport {
    /// Route actually taken; defaults to the plan's route.
    pub route: Option<ProcessingPath>,
    pub processed_path: String,
    pub thumbnail_path: Option<String>,
    pub quality_variants: BTreeMap<QualityLabel, String>,
    pub metrics: Option<ProcessingMetrics>,
}

/// Final outcome of one processing job.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Success(SuccessReport),
    Failure { cause: String },
}

impl ProcessingOutcome {
    /// Failure reason recorded when no outcome arrives in time.
    pub const TIMEOUT: &'static str = "Timeout";

    pub fn failure(cause: impl Into<String>) -> Self {
        Self::Failure {
            cause: cause.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::failure(Self::TIMEOUT)
    }

    /// Status an item ends in when this outcome is recorded.
    pub fn status(&self) -> ProcessingStatus {
        match self {
            Self::Success(_) => ProcessingStatus::Processed,
            Self::Failure { .. } => ProcessingStatus::Failed,
        }
    }
}

/// What a capability did with a submitted job.
#[derive(Debug)]
pub enum Submission {
    /// Finished synchronously.
    Completed(ProcessingOutcome),
    /// Accepted for later completion through the outcome callback.
    Accepted,
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The input cannot be decoded; retrying on another route will not help.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Processing failed: {0}")]
    Failed(String),

    #[error("Processing service unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_))
    }
}

/// A place jobs can be executed.
#[async_trait]
pub trait ProcessingCapability: Send + Sync {
    fn name(&self) -> &str;

    /// Run or hand off a job.
    async fn submit(&self, job: &JobDescription) -> Result<Submission, CapabilityError>;
}
