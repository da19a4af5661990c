// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Extracts and validates a Bearer token from the `Authorization` header
// against the admin token held by `AppState` (loaded from `EXO_ADMIN_TOKEN`
// at startup). Comparison is performed in constant time.
//
// Usage:
//
//   async fn handler(_auth: AuthBearer, State(state): State<Arc<AppState>>) { ... }
//
// A missing or wrong token short-circuits the request with 403 Forbidden
// before the handler body executes. With no token configured every
// authenticated request is refused.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices without an early exit on the first mismatch.
/// A length mismatch returns immediately; the token length is not secret.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validate `token` against the configured admin token.
///
/// Used where the extractor does not fit, such as the WebSocket upgrade
/// that carries its token in the query string.
pub fn validate_token(expected: Option<&str>, token: &str) -> bool {
    match expected {
        Some(expected) if !expected.is_empty() => {
            constant_time_eq(token.as_bytes(), expected.as_bytes())
        }
        _ => false,
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// The configured admin token, pulled out of the router state.
#[derive(Clone)]
pub struct AdminToken(pub Option<String>);

impl FromRef<Arc<AppState>> for AdminToken {
    fn from_ref(state: &Arc<AppState>) -> Self {
        AdminToken(state.admin_token.clone())
    }
}

/// Proof that the request carried the admin token.
pub struct AuthBearer;

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
    AdminToken: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AdminToken(expected) = AdminToken::from_ref(state);

        if expected.as_deref().map_or(true, str::is_empty) {
            warn!("EXO_ADMIN_TOKEN is not set; rejecting authenticated request");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Server authentication not configured",
            });
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!(path = %parts.uri.path(), "missing or malformed Authorization header");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Missing or invalid authorization token",
            });
        };

        if !validate_token(expected.as_deref(), token) {
            warn!(path = %parts.uri.path(), "invalid admin token presented");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Invalid authorization token",
            });
        }

        Ok(AuthBearer)
    }
}
