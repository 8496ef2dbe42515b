use crate::delivery::{LinkError, StoragePath, TransformOptions};
use crate::server::AppContext;
use crate::thumbnails::content_type_for;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

pub fn object_routes() -> Router<AppContext> {
    Router::new().route("/objects/*path", get(serve_object))
}

#[derive(Deserialize)]
struct SignedQuery {
    expires: i64,
    token: String,
    width: Option<String>,
    height: Option<String>,
    quality: Option<String>,
}

/// Serve a stored object behind a signed link.
///
/// Transform parameters are part of the signature; the bytes are served
/// untransformed for an image CDN in front of this service to act on.
async fn serve_object(
    State(ctx): State<AppContext>,
    Path(raw_path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, (StatusCode, String)> {
    let forbidden = |e: LinkError| (StatusCode::FORBIDDEN, e.to_string());

    let path = StoragePath::parse(&raw_path)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let transform = TransformOptions::from_query(
        query.width.as_deref(),
        query.height.as_deref(),
        query.quality.as_deref(),
        ctx.config.delivery.default_quality,
    )
    .map_err(|_| forbidden(LinkError::BadSignature))?;
    let canonical = transform
        .as_ref()
        .map(TransformOptions::canonical)
        .unwrap_or_default();

    ctx.storage
        .verify(&path, query.expires, &canonical, &query.token, Utc::now())
        .map_err(|e| {
            tracing::debug!(path = %path, error = %e, "Rejected object link");
            forbidden(e)
        })?;

    let file = tokio::fs::File::open(ctx.storage.resolve(&path))
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, format!("Object not found: {}", path)))?;

    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type_for(path.as_str()))],
        body,
    )
        .into_response())
}
