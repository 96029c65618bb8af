//! API integration tests
//!
//! Drives the HTTP endpoints through the full router.

use axum::http::StatusCode;
use chrono::TimeDelta;
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health").await;

    response.assert_ok();

    let json: serde_json::Value = response.json();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_liveness_endpoint() {
    let app = TestApp::new().await;
    app.get("/api/v1/health/live").await.assert_ok();
}

#[tokio::test]
async fn test_readiness_endpoint() {
    let app = TestApp::new().await;
    app.get("/api/v1/health/ready").await.assert_ok();
}

#[tokio::test]
async fn test_create_user_and_read_role() {
    let app = TestApp::new().await;

    let response = app
        .post_json("/api/v1/users", json!({ "platform_id": "auth0|alice" }))
        .await;
    response.assert_created();
    let user: serde_json::Value = response.json();
    let user_id = user["id"].as_str().unwrap().to_string();

    let response = app.get(&format!("/api/v1/users/{}/role", user_id)).await;
    response.assert_ok();
    let role: serde_json::Value = response.json();
    assert_eq!(role["role"], "developer");

    // Platform identifiers are unique
    app.post_json("/api/v1/users", json!({ "platform_id": "auth0|alice" }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_only_admins_assign_roles() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;

    // Self-registration cannot claim a role
    app.post_json(
        "/api/v1/users",
        json!({ "platform_id": "auth0|mallory", "role": "admin" }),
    )
    .await
    .assert_forbidden();

    for creator in [&seed.lead_a, &seed.developer] {
        app.post_json(
            "/api/v1/users",
            json!({
                "platform_id": format!("auth0|{}", uuid::Uuid::new_v4()),
                "creator_user_id": creator.id,
                "role": "lead",
                "led_service_ids": [seed.service_a.id]
            }),
        )
        .await
        .assert_forbidden();
    }

    // Led services alone are a privilege too
    app.post_json(
        "/api/v1/users",
        json!({
            "platform_id": "auth0|sneaky",
            "led_service_ids": [seed.service_a.id]
        }),
    )
    .await
    .assert_forbidden();

    app.post_json(
        "/api/v1/users",
        json!({
            "platform_id": "auth0|ghost",
            "creator_user_id": uuid::Uuid::new_v4(),
            "role": "admin"
        }),
    )
    .await
    .assert_not_found();

    let response = app
        .post_json(
            "/api/v1/users",
            json!({
                "platform_id": "auth0|carol",
                "creator_user_id": seed.admin.id,
                "role": "lead",
                "led_service_ids": [seed.service_b.id]
            }),
        )
        .await;
    response.assert_created();
    let lead: serde_json::Value = response.json();
    assert_eq!(lead["role"], "lead");
    assert_eq!(lead["led_service_ids"][0], seed.service_b.id.to_string());

    // Nothing was registered by the rejected requests
    app.post_json("/api/v1/users", json!({ "platform_id": "auth0|mallory" }))
        .await
        .assert_created();
}

#[tokio::test]
async fn test_bootstrap_admin_is_idempotent() {
    let app = TestApp::new().await;

    let admin = app
        .state
        .directory
        .bootstrap_admin("auth0|root")
        .await
        .unwrap()
        .expect("admin should be created");
    assert_eq!(admin.role, kms::models::UserRole::Admin);

    let again = app.state.directory.bootstrap_admin("auth0|root").await.unwrap();
    assert!(again.is_none());

    let response = app.get(&format!("/api/v1/users/{}/role", admin.id)).await;
    let role: serde_json::Value = response.json();
    assert_eq!(role["role"], "admin");
}

#[tokio::test]
async fn test_invalid_and_unknown_ids() {
    let app = TestApp::new().await;

    app.get("/api/v1/users/not-a-uuid/keys")
        .await
        .assert_bad_request();
    app.get(&format!("/api/v1/users/{}/keys", uuid::Uuid::new_v4()))
        .await
        .assert_not_found();
}

#[tokio::test]
async fn test_create_service_generates_name() {
    let app = TestApp::new().await;

    let response = app
        .post_json(
            "/api/v1/services",
            json!({
                "kind": "private_production",
                "source_identifiers": ["inventory.example.com"]
            }),
        )
        .await;
    response.assert_created();
    let service: serde_json::Value = response.json();
    assert!(service["name"].as_str().unwrap().starts_with("service_"));
    assert_eq!(service["kind"], "private_production");
}

#[tokio::test]
async fn test_basic_key_lifecycle_over_http() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;

    let response = app
        .post_json("/api/v1/keys/basic", json!({ "user_id": seed.developer.id }))
        .await;
    response.assert_created();
    let created: serde_json::Value = response.json();
    let key_id = created["id"].as_str().unwrap().to_string();
    let secret = created["secret"].as_str().unwrap().to_string();
    assert_eq!(created["kind"]["type"], "basic");

    // The secret is only returned on creation and regeneration
    let response = app
        .get(&format!("/api/v1/users/{}/keys", seed.developer.id))
        .await;
    response.assert_ok();
    let keys: serde_json::Value = response.json();
    assert_eq!(keys["basic_key"]["id"], key_id.as_str());
    assert!(keys["basic_key"].get("secret").is_none());

    app.allowed(Some(&format!("Bearer {}", secret)), Some(BASIC_IDENTIFIER))
        .await
        .assert_ok();

    let key = app.reload(key_id.parse().unwrap()).await;
    let response = app
        .post_json(
            &format!("/api/v1/keys/{}/disable", key_id),
            fenced(&seed.developer, &key),
        )
        .await;
    response.assert_ok();
    let disabled: serde_json::Value = response.json();
    assert_eq!(disabled["is_active"], false);
    assert!(disabled.get("secret").is_none());

    // Reusing the old token is a conflict
    app.post_json(
        &format!("/api/v1/keys/{}/enable", key_id),
        fenced(&seed.developer, &key),
    )
    .await
    .assert_conflict();

    let key = app.reload(key.id).await;
    let response = app
        .post_json(
            &format!("/api/v1/keys/{}/regenerate", key_id),
            fenced(&seed.developer, &key),
        )
        .await;
    response.assert_ok();
    let regenerated: serde_json::Value = response.json();
    assert_ne!(regenerated["secret"], secret.as_str());
    assert_eq!(regenerated["is_active"], true);
}

#[tokio::test]
async fn test_advanced_key_management_over_http() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;

    let response = app
        .post_json(
            "/api/v1/keys/advanced",
            json!({
                "creator_user_id": seed.lead_a.id,
                "recipient_user_id": seed.developer.id,
                "service_id": seed.service_a.id,
                "name": "billing",
                "quota": 25
            }),
        )
        .await;
    response.assert_created();
    let created: serde_json::Value = response.json();
    let key_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["kind"]["service_id"], seed.service_a.id.to_string());
    assert_eq!(created["usage_remaining"], 25);

    let key = app.reload(key_id.parse().unwrap()).await;
    let response = app
        .post_json(
            &format!("/api/v1/keys/{}/quota", key_id),
            json!({
                "user_id": seed.lead_a.id,
                "updated_at": key.updated_at,
                "quota": 40,
                "quota_period_days": 2
            }),
        )
        .await;
    response.assert_ok();
    let updated: serde_json::Value = response.json();
    assert_eq!(updated["quota"], 40);
    assert_eq!(updated["quota_period_days"], 2);

    let key = app.reload(key.id).await;
    app.post_json(
        &format!("/api/v1/keys/{}/rename", key_id),
        json!({
            "user_id": seed.developer.id,
            "updated_at": key.updated_at,
            "name": ""
        }),
    )
    .await
    .assert_bad_request();

    app.post_json(
        &format!("/api/v1/keys/{}/owner", key_id),
        json!({
            "user_id": seed.developer.id,
            "updated_at": key.updated_at,
            "new_owner_id": seed.other_developer.id
        }),
    )
    .await
    .assert_forbidden();

    app.delete_json(
        &format!("/api/v1/keys/{}", key_id),
        fenced(&seed.admin, &key),
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);

    let response = app
        .get(&format!("/api/v1/users/{}/keys", seed.developer.id))
        .await;
    let keys: serde_json::Value = response.json();
    assert!(keys["advanced_keys"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_set_quota_period_out_of_range_over_http() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;

    app.post_json(
        &format!("/api/v1/keys/{}/quota", key.id),
        json!({
            "user_id": seed.admin.id,
            "updated_at": key.updated_at,
            "quota": 10,
            "quota_period_days": 1_000_000_000i64
        }),
    )
    .await
    .assert_bad_request();

    assert_eq!(app.reload(key.id).await.updated_at, key.updated_at);
}

#[tokio::test]
async fn test_privileged_data_over_http() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;

    let response = app
        .get(&format!("/api/v1/users/{}/privileged", seed.lead_a.id))
        .await;
    response.assert_ok();
    let services: serde_json::Value = response.json();
    let services = services.as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], seed.service_a.id.to_string());
    let keys = services[0]["keys"].as_array().unwrap();
    assert_eq!(keys[0]["id"], key.id.to_string());
    assert_eq!(keys[0]["owner"]["id"], seed.developer.id.to_string());
    assert!(keys[0].get("secret").is_none());

    let response = app
        .get(&format!("/api/v1/users/{}/privileged", seed.admin.id))
        .await;
    response.assert_ok();
    let services: serde_json::Value = response.json();
    assert_eq!(services.as_array().unwrap().len(), 3);
    assert!(!response.text().contains(&key.secret));

    app.get(&format!("/api/v1/users/{}/privileged", seed.developer.id))
        .await
        .assert_forbidden();
    app.get("/api/v1/users/not-a-uuid/privileged")
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_stale_token_over_http() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    let stale = json!({
        "user_id": seed.admin.id,
        "updated_at": key.updated_at - TimeDelta::seconds(1),
    });

    app.post_json(&format!("/api/v1/keys/{}/restore-quota", key.id), stale)
        .await
        .assert_conflict();
}
