use crate::conversion::{plan, JobDescription, PlanApplied, PlanError, ProcessingOutcome};
use crate::delivery::StoragePath;
use crate::events::MediaEvent;
use crate::intake::{
    check_batch_size, validate_batch, AcceptedFile, CandidateFile, DeclaredKind, Environment,
    IntakeLimits, ReasonCode, ValidationError,
};
use crate::server::auth::Caller;
use crate::server::AppContext;
use crate::thumbnails::{fingerprint_file, load_preview, preview_source, Placeholder, PreviewKey};
use crate::variants::{SelectionPreference, VariantSelector};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mediagate_common::{MediaItemId, QualityLabel};
use mediagate_db::models::{MediaItem, NewMediaItem};
use mediagate_db::pool::get_conn;
use mediagate_db::queries::media_items;
use serde::{Deserialize, Serialize};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub fn media_routes() -> Router<AppContext> {
    Router::new()
        .route("/media", get(list_media))
        .route("/media/intake", post(intake))
        .route("/media/:id", get(get_media).delete(delete_media))
        .route("/media/:id/variants", get(get_variants))
        .route("/media/:id/thumbnail", get(get_thumbnail))
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntakeRequest {
    #[serde(default)]
    environment: Environment,
    files: Vec<IntakeFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntakeFile {
    #[serde(flatten)]
    file: CandidateFile,
    kind: DeclaredKind,
    /// Where the uploader put the object, relative to the storage root.
    storage_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    file_name: String,
    storage_path: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct IntakeResponse {
    accepted: Vec<MediaItem>,
    documents: Vec<StoredDocument>,
    rejected: Vec<ValidationError>,
}

async fn intake(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Json(request): Json<IntakeRequest>,
) -> Result<Json<IntakeResponse>, ApiError> {
    let limits = IntakeLimits::from(&ctx.config.intake);
    // The batch limit applies before any stored object is touched.
    check_batch_size(request.files.len(), &limits)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut response = IntakeResponse::default();

    let mut located = Vec::with_capacity(request.files.len());
    for entry in request.files {
        match locate_upload(&ctx, &caller, &entry).await {
            Ok((path, size_bytes)) => {
                // Limits apply to what was stored, not to what the client reported.
                let mut file = entry.file;
                file.size_bytes = size_bytes;
                located.push((path, file, entry.kind));
            }
            Err(rejection) => response.rejected.push(rejection),
        }
    }

    let outcome = validate_batch(located, &request.environment, &limits)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    response.rejected.extend(outcome.rejected);

    for (path, accepted) in outcome.accepted {
        if accepted.media_type().is_none() {
            response.documents.push(StoredDocument {
                file_name: accepted.file.file_name.clone(),
                storage_path: path.to_string(),
            });
            continue;
        }

        let fingerprint = match fingerprint_file(&ctx.storage.resolve(&path)).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Uploaded object unreadable");
                response.rejected.push(object_not_found(&accepted.file));
                continue;
            }
        };

        match admit(&ctx, &caller, &accepted, &path, fingerprint).await {
            Ok(item) => response.accepted.push(item),
            Err(Admission::Rejected(rejection)) => response.rejected.push(rejection),
            Err(Admission::Failed(e)) => return Err(e),
        }
    }

    tracing::info!(
        caller = %caller,
        accepted = response.accepted.len(),
        documents = response.documents.len(),
        rejected = response.rejected.len(),
        "Processed intake batch"
    );

    Ok(Json(response))
}

fn object_not_found(file: &CandidateFile) -> ValidationError {
    ValidationError::new(
        file,
        ReasonCode::ObjectNotFound,
        "The uploaded file could not be found in your storage area".to_string(),
    )
}

/// Resolve an upload inside the caller's storage area and measure it.
async fn locate_upload(
    ctx: &AppContext,
    caller: &mediagate_common::CallerId,
    entry: &IntakeFile,
) -> Result<(StoragePath, u64), ValidationError> {
    let path = match StoragePath::parse(&entry.storage_path) {
        Ok(path) if path.top_level() == caller.as_str() => path,
        _ => return Err(object_not_found(&entry.file)),
    };

    match tokio::fs::metadata(ctx.storage.resolve(&path)).await {
        Ok(meta) if meta.is_file() => Ok((path, meta.len())),
        Ok(_) => Err(object_not_found(&entry.file)),
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Uploaded object missing");
            Err(object_not_found(&entry.file))
        }
    }
}

enum Admission {
    Rejected(ValidationError),
    Failed(ApiError),
}

/// Create the item for an accepted media file, plan it and start processing.
async fn admit(
    ctx: &AppContext,
    caller: &mediagate_common::CallerId,
    accepted: &AcceptedFile,
    path: &StoragePath,
    fingerprint: String,
) -> Result<MediaItem, Admission> {
    let media_type = accepted
        .media_type()
        .ok_or_else(|| Admission::Failed(internal("document reached planning")))?;
    let item_id = MediaItemId::new();

    let conversion = plan(item_id, accepted, ctx.planner).map_err(|e| {
        let code = match e {
            PlanError::UnsupportedFormat(_) => ReasonCode::UnsupportedFormat,
            PlanError::EnvironmentUnsupported(_) => ReasonCode::EnvironmentUnsupported,
        };
        Admission::Rejected(ValidationError::new(&accepted.file, code, e.to_string()))
    })?;

    {
        let conn = get_conn(&ctx.db_pool).map_err(|e| Admission::Failed(internal(e)))?;
        media_items::create_media_item(
            &conn,
            &NewMediaItem {
                id: item_id,
                owner_id: caller.clone(),
                media_type,
                original_filename: accepted.file.file_name.clone(),
                mime_type: accepted
                    .file
                    .mime_type
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                original_size_bytes: accepted.file.size_bytes,
                source_path: path.to_string(),
                fingerprint,
                width: accepted.file.width,
                height: accepted.file.height,
            },
        )
        .map_err(|e| Admission::Failed(internal(e)))?;
    }

    let applied = ctx
        .tracker
        .apply_plan(&conversion)
        .map_err(|e| Admission::Failed(internal(e)))?;

    ctx.tracker.events().publish(MediaEvent::ItemCreated {
        item: applied.item().clone(),
    });

    match applied {
        PlanApplied::Started(item) => {
            let job = JobDescription::new(&item, &conversion);
            if let Err(e) = ctx.queue.submit(job).await {
                tracing::error!(item_id = %item.id, error = %e, "Failed to queue processing job");
                let reported = ctx
                    .tracker
                    .report_outcome(
                        item.id,
                        conversion.id,
                        ProcessingOutcome::failure(format!("Processing queue unavailable: {}", e)),
                    )
                    .map_err(|e| Admission::Failed(internal(e)))?;
                return Ok(reported.item().clone());
            }
            Ok(item)
        }
        PlanApplied::Completed(item) | PlanApplied::Ignored(item) => Ok(item),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_media(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<MediaItem>>, ApiError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let conn = get_conn(&ctx.db_pool).map_err(internal)?;
    let items = media_items::list_media_items_for_owner(&conn, &caller, limit).map_err(internal)?;
    Ok(Json(items))
}

/// Load an item the caller owns; anything else is indistinguishable from missing.
fn owned_item(
    ctx: &AppContext,
    caller: &mediagate_common::CallerId,
    id: &str,
) -> Result<MediaItem, ApiError> {
    let not_found = || (StatusCode::NOT_FOUND, format!("Media item not found: {}", id));
    let item_id: MediaItemId = id.parse().map_err(|_| not_found())?;

    let conn = get_conn(&ctx.db_pool).map_err(internal)?;
    media_items::get_media_item(&conn, item_id)
        .map_err(internal)?
        .filter(|item| &item.owner_id == caller)
        .ok_or_else(not_found)
}

async fn get_media(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<MediaItem>, ApiError> {
    owned_item(&ctx, &caller, &id).map(Json)
}

/// Remove an item from the caller's working set and evict its preview.
async fn delete_media(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let item = owned_item(&ctx, &caller, &id)?;

    let conn = get_conn(&ctx.db_pool).map_err(internal)?;
    media_items::delete_media_item(&conn, item.id).map_err(internal)?;
    ctx.thumbnails.remove(&PreviewKey::new(item.id, item.fingerprint.as_str()));

    tracing::info!(item_id = %item.id, "Removed media item");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct VariantQuery {
    #[serde(default)]
    low_bandwidth: bool,
    select: Option<QualityLabel>,
}

#[derive(Serialize)]
struct VariantsResponse {
    variants: Vec<QualityLabel>,
    current: Option<QualityLabel>,
    selectable: bool,
}

async fn get_variants(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Query(params): Query<VariantQuery>,
) -> Result<Json<VariantsResponse>, ApiError> {
    let item = owned_item(&ctx, &caller, &id)?;
    let pref = SelectionPreference {
        low_bandwidth: params.low_bandwidth,
    };

    let Some(mut selector) = VariantSelector::for_item(&item, pref) else {
        if params.select.is_some() {
            return Err((
                StatusCode::CONFLICT,
                "Item has no quality variants to choose from".to_string(),
            ));
        }
        let variants: Vec<_> = item.quality_variants.keys().copied().collect();
        return Ok(Json(VariantsResponse {
            current: variants.first().copied(),
            variants,
            selectable: false,
        }));
    };

    if let Some(label) = params.select {
        selector
            .select(label)
            .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    }

    Ok(Json(VariantsResponse {
        variants: selector.available().to_vec(),
        current: Some(selector.current()),
        selectable: true,
    }))
}

async fn get_thumbnail(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let item = owned_item(&ctx, &caller, &id)?;
    let placeholder = Placeholder::for_media_type(Some(item.media_type));

    let Some(file) = preview_source(&item)
        .and_then(|source| StoragePath::parse(source).ok())
        .map(|source| ctx.storage.resolve(&source))
    else {
        return Ok(missing_preview(placeholder));
    };

    let key = PreviewKey::new(item.id, item.fingerprint.as_str());
    let (preview, is_loading) = ctx
        .thumbnails
        .get_or_compute(&key, item.revision, move || async move {
            load_preview(&file).await
        })
        .into_parts();

    Ok(match preview {
        Some(preview) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, preview.content_type.clone()),
                (header::CACHE_CONTROL, "private, max-age=60".to_string()),
            ],
            preview.bytes.clone(),
        )
            .into_response(),
        None if is_loading => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "loading": true, "placeholder": placeholder })),
        )
            .into_response(),
        None => missing_preview(placeholder),
    })
}

fn missing_preview(placeholder: Placeholder) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "loading": false, "placeholder": placeholder })),
    )
        .into_response()
}
