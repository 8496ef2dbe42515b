use crate::conversion::{ProcessingOutcome, Reported, SuccessReport, TrackerError};
use crate::server::auth::verify_webhook_signature;
use crate::server::AppContext;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use mediagate_common::{MediaItemId, PlanId, ProcessingMetrics, ProcessingPath, QualityLabel};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const SIGNATURE_HEADER: &str = "x-mediagate-signature";

pub fn webhook_routes() -> Router<AppContext> {
    Router::new().route("/processing/:item_id", post(processing_callback))
}

/// Outcome posted by the remote processing service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub plan_id: PlanId,
    pub success: bool,
    #[serde(default)]
    pub processed_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub quality_variants: BTreeMap<QualityLabel, String>,
    #[serde(default)]
    pub metrics: Option<ProcessingMetrics>,
    #[serde(default)]
    pub route: Option<ProcessingPath>,
    #[serde(default)]
    pub cause: Option<String>,
}

impl CallbackPayload {
    fn into_outcome(self) -> Result<ProcessingOutcome, String> {
        if !self.success {
            let cause = self.cause.unwrap_or_else(|| "unknown error".to_string());
            return Ok(ProcessingOutcome::failure(format!(
                "RemoteProcessingFailed: {}",
                cause
            )));
        }

        let processed_path = self
            .processed_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "processedPath is required on success".to_string())?;

        Ok(ProcessingOutcome::Success(SuccessReport {
            route: self.route,
            processed_path,
            thumbnail_path: self.thumbnail_path,
            quality_variants: self.quality_variants,
            metrics: self.metrics,
        }))
    }
}

async fn processing_callback(
    State(ctx): State<AppContext>,
    Path(item_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(ref secret) = ctx.config.processing.remote.callback_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    format!("Missing {} header", SIGNATURE_HEADER),
                )
            })?;

        if !verify_webhook_signature(secret, &body, signature) {
            tracing::warn!("Callback signature verification failed for {}", item_id);
            return Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string()));
        }
    }

    let item_id: MediaItemId = item_id
        .parse()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("Media item not found: {}", item_id)))?;

    let payload: CallbackPayload = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid callback payload: {}", e),
        )
    })?;
    let plan_id = payload.plan_id;
    let outcome = payload
        .into_outcome()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    tracing::info!(item_id = %item_id, plan_id = %plan_id, "Received processing callback");

    let reported = ctx
        .tracker
        .report_outcome(item_id, plan_id, outcome)
        .map_err(|e| match e {
            TrackerError::NotFound(_) | TrackerError::UnknownPlan { .. } => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            TrackerError::InvalidTransition { .. } => (StatusCode::CONFLICT, e.to_string()),
            TrackerError::Database(e) => {
                tracing::error!(item_id = %item_id, error = %e, "Failed to record callback");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        })?;

    let status = match reported {
        Reported::Applied(_) => "applied",
        Reported::Ignored(_) => "ignored",
    };

    Ok(Json(serde_json::json!({
        "status": status,
        "processingStatus": reported.item().processing_status,
    })))
}
