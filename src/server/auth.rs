//! Caller authentication and webhook signatures.

use crate::server::AppContext;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use hmac::{Hmac, Mac};
use mediagate_common::CallerId;
use sha2::Sha256;
use std::collections::HashMap;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Map configured bearer tokens to caller identities.
pub fn token_map(auth: &AuthConfig) -> HashMap<String, CallerId> {
    auth.tokens
        .iter()
        .map(|t| (t.token.clone(), CallerId::new(t.user_id.clone())))
        .collect()
}

/// The authenticated caller of a request.
///
/// With authentication disabled every request is the anonymous caller.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerId);

/// Rejection for requests without a valid bearer token.
#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Authentication required" })),
        )
            .into_response()
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for Caller {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        if !ctx.config.server.auth.enabled {
            return Ok(Caller(CallerId::anonymous()));
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, ctx)
                .await
                .map_err(|_| AuthRejection)?;

        match ctx.tokens.get(bearer.token()) {
            Some(caller) => Ok(Caller(caller.clone())),
            None => {
                tracing::debug!("Rejected unknown bearer token");
                Err(AuthRejection)
            }
        }
    }
}

/// Generate a random signing secret
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Signature header value for a webhook body: `sha256=<hex>`.
pub fn sign_webhook_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify webhook signature
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(body);

    // Signature format: sha256=<hex>
    let expected_sig = signature.strip_prefix("sha256=").unwrap_or(signature);

    let expected_bytes = match hex::decode(expected_sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    mac.verify_slice(&expected_bytes).is_ok()
}
