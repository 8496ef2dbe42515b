use crate::delivery::{DeliveryError, DeliveryRequest};
use crate::server::auth::Caller;
use crate::server::AppContext;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const ALLOW_METHODS: &str = "GET, OPTIONS";

pub fn delivery_routes() -> Router<AppContext> {
    Router::new().route("/api/delivery", get(issue_delivery_url).options(preflight))
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS)),
            (header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS)),
        ],
    )
}

async fn issue_delivery_url(
    State(ctx): State<AppContext>,
    caller: Option<Caller>,
    Query(request): Query<DeliveryRequest>,
) -> Result<Response, DeliveryError> {
    // Input problems are reported before authentication ones.
    if request.path.as_deref().map_or(true, str::is_empty) {
        return Err(DeliveryError::MissingPath);
    }
    let Caller(caller) = caller.ok_or(DeliveryError::Unauthenticated)?;

    let issued = ctx.gateway.issue(&request, &caller).await?;

    let cache_control =
        HeaderValue::from_str(&ctx.gateway.cache_control()).map_err(|_| DeliveryError::Internal)?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, cache_control),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        ],
        Json(issued),
    )
        .into_response())
}
