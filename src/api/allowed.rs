//! Authorization endpoint for downstream services

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::models::{Decision, DecisionResponse, DenialReason};
use crate::AppState;

const REQUESTED_SERVICE_HEADER: &str = "requested-service";

/// Decide whether the presented key may reach the requested service
///
/// Business denials answer 200 with `is_allowed: false`; only malformed
/// requests (400) and internal faults (500) use error statuses.
pub async fn allowed(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<DecisionResponse>) {
    let credential = header_value(&headers, axum::http::header::AUTHORIZATION.as_str());
    let credential = credential.strip_prefix("Bearer ").unwrap_or(credential);
    let requested = header_value(&headers, REQUESTED_SERVICE_HEADER);

    let decision = state.authorizer.authorize(credential.trim(), requested.trim()).await;

    (status_for(decision), Json(DecisionResponse::from(decision)))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn status_for(decision: Decision) -> StatusCode {
    match decision.denial() {
        Some(reason) if reason.is_request_error() => StatusCode::BAD_REQUEST,
        Some(DenialReason::InternalError) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}
