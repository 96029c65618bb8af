//! Service endpoints

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use validator::Validate;

use crate::models::{CreateServiceRequest, Service};
use crate::utils::AppResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create_service))
}

async fn create_service(
    State(state): State<AppState>,
    Json(payload): Json<CreateServiceRequest>,
) -> AppResult<(StatusCode, Json<Service>)> {
    payload.validate()?;
    let service = state.directory.create_service(payload).await?;
    Ok((StatusCode::CREATED, Json(service)))
}
