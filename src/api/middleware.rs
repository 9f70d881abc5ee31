//! Access-control gate shared by operator route handlers. Mirrors the
//! teacher's `admission_handler` style of doing the gating inline at the
//! top of each handler rather than introducing a generic tower layer — the
//! policy table here is small and fully enumerated in `auth::access`.

use crate::api::{AppState, ACCESS_DENIALS};
use crate::auth::access::{AccessRequest, AccessResult, DenialReason, Method};
use axum::http::{HeaderMap, StatusCode};

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.to_string())
}

pub async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    resource: &str,
    method: Method,
) -> Result<AccessResult, StatusCode> {
    let result = state
        .access
        .validate(AccessRequest {
            token: bearer_token(headers),
            resource: resource.to_string(),
            method,
            client_ip: None,
        })
        .await;

    if result.granted {
        return Ok(result);
    }

    match result.denial_reason {
        Some(DenialReason::Unauthorized) => {
            ACCESS_DENIALS.with_label_values(&["unauthorized"]).inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        _ => {
            ACCESS_DENIALS.with_label_values(&["forbidden"]).inc();
            Err(StatusCode::FORBIDDEN)
        }
    }
}
