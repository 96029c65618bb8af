//! Key management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use validator::Validate;

use super::parse_id;
use crate::models::{
    ChangeOwnerRequest, ChangeServiceRequest, CreateAdvancedKeyRequest, CreateBasicKeyRequest,
    FencedKeyRequest, Key, KeyWithSecret, RenameKeyRequest, SetQuotaRequest,
};
use crate::utils::AppResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/basic", post(create_basic_key))
        .route("/advanced", post(create_advanced_key))
        .route("/{id}", delete(delete_key))
        .route("/{id}/enable", post(enable_key))
        .route("/{id}/disable", post(disable_key))
        .route("/{id}/regenerate", post(regenerate_key))
        .route("/{id}/rename", post(rename_key))
        .route("/{id}/quota", post(set_quota))
        .route("/{id}/restore-quota", post(restore_quota))
        .route("/{id}/owner", post(change_owner))
        .route("/{id}/service", post(change_service))
}

async fn create_basic_key(
    State(state): State<AppState>,
    Json(payload): Json<CreateBasicKeyRequest>,
) -> AppResult<(StatusCode, Json<KeyWithSecret>)> {
    payload.validate()?;
    let key = state.keys.create_basic_key(payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(key.into())))
}

async fn create_advanced_key(
    State(state): State<AppState>,
    Json(payload): Json<CreateAdvancedKeyRequest>,
) -> AppResult<(StatusCode, Json<KeyWithSecret>)> {
    payload.validate()?;
    let key = state
        .keys
        .create_advanced_key(
            payload.creator_user_id,
            payload.recipient_user_id,
            payload.service_id,
            payload.name,
            payload.quota,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(key.into())))
}

async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FencedKeyRequest>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id, "key")?;
    state
        .keys
        .delete(payload.user_id, id, payload.updated_at)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FencedKeyRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .enable(payload.user_id, id, payload.updated_at)
        .await?;
    Ok(Json(key))
}

async fn disable_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FencedKeyRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .disable(payload.user_id, id, payload.updated_at)
        .await?;
    Ok(Json(key))
}

/// The only mutation whose response carries the secret
async fn regenerate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FencedKeyRequest>,
) -> AppResult<Json<KeyWithSecret>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .regenerate(payload.user_id, id, payload.updated_at)
        .await?;
    Ok(Json(key.into()))
}

async fn rename_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RenameKeyRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    payload.validate()?;
    let key = state
        .keys
        .rename(payload.user_id, id, payload.updated_at, &payload.name)
        .await?;
    Ok(Json(key))
}

async fn set_quota(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SetQuotaRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    payload.validate()?;
    let key = state
        .keys
        .set_quota(
            payload.user_id,
            id,
            payload.updated_at,
            payload.quota,
            payload.quota_period_days,
        )
        .await?;
    Ok(Json(key))
}

async fn restore_quota(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FencedKeyRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .restore_quota(payload.user_id, id, payload.updated_at)
        .await?;
    Ok(Json(key))
}

async fn change_owner(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ChangeOwnerRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .change_owner(payload.user_id, id, payload.updated_at, payload.new_owner_id)
        .await?;
    Ok(Json(key))
}

async fn change_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ChangeServiceRequest>,
) -> AppResult<Json<Key>> {
    let id = parse_id(&id, "key")?;
    let key = state
        .keys
        .change_service(payload.user_id, id, payload.updated_at, payload.service_id)
        .await?;
    Ok(Json(key))
}
