//! Decide-and-debit behavior of the authorization engine

use std::sync::Arc;

use kms::models::{Decision, DenialReason};

use crate::common::*;

#[tokio::test]
async fn test_basic_key_granted_and_debited() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, BASIC_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Granted);

    let stored = app.reload(key.id).await;
    assert_eq!(stored.usage_remaining, key.usage_remaining - 1);
    assert!(stored.last_used_at.is_some());
    // Debits do not move the fencing token
    assert_eq!(stored.updated_at, key.updated_at);
}

#[tokio::test]
async fn test_basic_key_covers_every_basic_service() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    create_service(&app, kms::models::ServiceKind::Basic, &["maps.basic.example.com"]).await;
    let key = basic_key(&app, &seed.developer).await;

    for identifier in [BASIC_IDENTIFIER, "maps.basic.example.com"] {
        let decision = app.state.authorizer.authorize(&key.secret, identifier).await;
        assert!(decision.is_granted(), "{} should be granted", identifier);
    }

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::ServiceMismatch));
}

#[tokio::test]
async fn test_last_unit_then_exhausted() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    set_usage(&app, key.id, 1).await;

    let first = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;
    let second = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;

    assert_eq!(first, Decision::Granted);
    assert_eq!(second, Decision::Denied(DenialReason::QuotaExhausted));
    assert_eq!(app.reload(key.id).await.usage_remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_grant_exactly_once() {
    let app = TestApp::with_config(concurrent_test_config()).await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    set_usage(&app, key.id, 1).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let authorizer = Arc::clone(&app.state.authorizer);
            let secret = key.secret.clone();
            tokio::spawn(async move { authorizer.authorize(&secret, SERVICE_A_IDENTIFIER).await })
        })
        .collect();

    let decisions: Vec<Decision> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let granted = decisions.iter().filter(|d| d.is_granted()).count();
    assert_eq!(granted, 1, "decisions: {:?}", decisions);
    assert!(decisions
        .iter()
        .filter(|d| !d.is_granted())
        .all(|d| *d == Decision::Denied(DenialReason::QuotaExhausted)));
    assert_eq!(app.reload(key.id).await.usage_remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_overdraw() {
    let app = TestApp::with_config(concurrent_test_config()).await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    set_usage(&app, key.id, 3).await;

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let authorizer = Arc::clone(&app.state.authorizer);
            let secret = key.secret.clone();
            tokio::spawn(async move { authorizer.authorize(&secret, SERVICE_A_IDENTIFIER).await })
        })
        .collect();

    let granted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Decision::Granted)))
        .count() as i64;

    assert!(granted <= 3);
    assert_eq!(app.reload(key.id).await.usage_remaining, 3 - granted);
}

#[tokio::test]
async fn test_service_mismatch_leaves_key_unchanged() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_B_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::ServiceMismatch));

    let stored = app.reload(key.id).await;
    assert_eq!(stored.usage_remaining, key.usage_remaining);
    assert_eq!(stored.updated_at, key.updated_at);
    assert!(stored.last_used_at.is_none());
}

#[tokio::test]
async fn test_exhausted_key_checked_before_disabled() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    let disabled = app
        .state
        .keys
        .disable(seed.developer.id, key.id, key.updated_at)
        .await
        .unwrap();

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::Disabled));

    set_usage(&app, key.id, 0).await;
    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::QuotaExhausted));
    assert_eq!(app.reload(key.id).await.updated_at, disabled.updated_at);
}

#[tokio::test]
async fn test_unknown_and_missing_inputs() {
    let app = TestApp::new().await;
    seed(&app).await;
    let authorizer = &app.state.authorizer;

    assert_eq!(
        authorizer.authorize("not-a-key", BASIC_IDENTIFIER).await,
        Decision::Denied(DenialReason::UnknownCredential)
    );
    assert_eq!(
        authorizer.authorize("", BASIC_IDENTIFIER).await,
        Decision::Denied(DenialReason::MissingCredential)
    );
    assert_eq!(
        authorizer.authorize("not-a-key", "").await,
        Decision::Denied(DenialReason::MissingServiceIdentifier)
    );
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let (app, store) = faulty_app(test_config()).await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;

    store.set_error_mode(MockError::Unavailable);
    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, BASIC_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::InternalError));

    store.clear_error_mode();
    assert_eq!(app.reload(key.id).await.usage_remaining, key.usage_remaining);
}

#[tokio::test]
async fn test_key_bound_to_missing_service_is_internal_error() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;

    sqlx::query("UPDATE keys SET service_id = ? WHERE id = ?")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.id.to_string())
        .execute(&app.state.db)
        .await
        .unwrap();

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, SERVICE_A_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::InternalError));
    assert_eq!(app.reload(key.id).await.usage_remaining, key.usage_remaining);

    let response = app
        .allowed(Some(&format!("Bearer {}", key.secret)), Some(SERVICE_A_IDENTIFIER))
        .await;
    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_basic_key_ignores_identifiers_of_other_classes() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;
    // The same identifier on a non-basic service does not widen basic access
    create_service(
        &app,
        kms::models::ServiceKind::Staging,
        &["staging.example.com"],
    )
    .await;

    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, "staging.example.com")
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::ServiceMismatch));
    assert_eq!(app.reload(key.id).await.usage_remaining, key.usage_remaining);
}

#[tokio::test]
async fn test_store_deadline_fails_closed() {
    let mut config = test_config();
    config.quota.store_timeout_secs = 1;
    let (app, store) = faulty_app(config).await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;

    store.set_error_mode(MockError::Hang);
    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, BASIC_IDENTIFIER)
        .await;
    assert_eq!(decision, Decision::Denied(DenialReason::InternalError));
}

#[tokio::test]
async fn test_repeated_contention_denies_after_bounded_retry() {
    let (app, store) = faulty_app(test_config()).await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;

    store.set_error_mode(MockError::LostRace);
    let decision = app
        .state
        .authorizer
        .authorize(&key.secret, BASIC_IDENTIFIER)
        .await;

    assert_eq!(decision, Decision::Denied(DenialReason::QuotaExhausted));
    assert_eq!(store.debit_calls(), 2);
    store.clear_error_mode();
    assert_eq!(app.reload(key.id).await.usage_remaining, key.usage_remaining);
}

#[tokio::test]
async fn test_allowed_endpoint_statuses() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;
    let bearer = format!("Bearer {}", key.secret);

    let response = app.allowed(Some(&bearer), Some(BASIC_IDENTIFIER)).await;
    response.assert_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_allowed"], true);
    assert_eq!(body["status"], "granted");

    let response = app.allowed(Some(&bearer), Some(SERVICE_B_IDENTIFIER)).await;
    response.assert_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_allowed"], false);
    assert_eq!(body["status"], "service_mismatch");

    // Bare secret without the Bearer scheme is accepted too
    app.allowed(Some(&key.secret), Some(BASIC_IDENTIFIER))
        .await
        .assert_ok();

    let response = app.allowed(None, Some(BASIC_IDENTIFIER)).await;
    response.assert_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "missing_credential");

    let response = app.allowed(Some(&bearer), None).await;
    response.assert_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "missing_service_identifier");
}

#[tokio::test]
async fn test_allowed_endpoint_internal_error() {
    let (app, store) = faulty_app(test_config()).await;
    let seed = seed(&app).await;
    let key = basic_key(&app, &seed.developer).await;

    store.set_error_mode(MockError::Unavailable);
    let response = app
        .allowed(Some(&format!("Bearer {}", key.secret)), Some(BASIC_IDENTIFIER))
        .await;
    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_allowed"], false);
    assert_eq!(body["status"], "internal_error");
}
