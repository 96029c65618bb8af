//! User endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use super::parse_id;
use crate::models::{CreateUserRequest, ServiceKeys, User, UserKeys, UserRoleResponse};
use crate::utils::AppResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route("/{id}/keys", get(get_user_keys))
        .route("/{id}/role", get(get_user_role))
        .route("/{id}/privileged", get(get_privileged_data))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    payload.validate()?;
    let user = state.directory.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user_keys(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserKeys>> {
    let id = parse_id(&id, "user")?;
    Ok(Json(state.keys.user_keys(id).await?))
}

async fn get_user_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserRoleResponse>> {
    let user_id = parse_id(&id, "user")?;
    let role = state.keys.user_role(user_id).await?;
    Ok(Json(UserRoleResponse { user_id, role }))
}

/// Services, keys and owners the user may oversee as an Admin or Lead
async fn get_privileged_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<ServiceKeys>>> {
    let user_id = parse_id(&id, "user")?;
    Ok(Json(state.keys.privileged_data(user_id).await?))
}
