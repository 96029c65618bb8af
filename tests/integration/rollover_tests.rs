//! Quota rollover against a real store

use std::time::Duration;

use chrono::TimeDelta;

use kms::services::{run_rollover, start_rollover_scheduler};
use kms::utils::{time, AppError};

use crate::common::*;

const DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_rollover_resets_elapsed_keys_only() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let elapsed = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    let pending = advanced_key(&app, &seed, &seed.developer, &seed.service_b).await;

    let now = time::now();
    let boundary = now - TimeDelta::hours(1);
    set_rollover_at(&app, elapsed.id, boundary).await;
    set_usage(&app, elapsed.id, 0).await;
    set_usage(&app, pending.id, 7).await;

    let count = run_rollover(app.state.key_store.as_ref(), DEADLINE, now)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let rolled = app.reload(elapsed.id).await;
    assert_eq!(rolled.usage_remaining, rolled.quota);
    assert_eq!(rolled.quota_rollover_at, boundary + TimeDelta::days(1));
    assert!(rolled.updated_at > elapsed.updated_at);

    let untouched = app.reload(pending.id).await;
    assert_eq!(untouched.usage_remaining, 7);
    assert_eq!(untouched.quota_rollover_at, pending.quota_rollover_at);
    assert_eq!(untouched.updated_at, pending.updated_at);
}

#[tokio::test]
async fn test_rollover_catches_up_missed_periods() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;

    let now = time::now();
    let boundary = now - TimeDelta::days(3) - TimeDelta::hours(1);
    set_rollover_at(&app, key.id, boundary).await;

    run_rollover(app.state.key_store.as_ref(), DEADLINE, now)
        .await
        .unwrap();

    let rolled = app.reload(key.id).await;
    assert_eq!(rolled.quota_rollover_at, boundary + TimeDelta::days(4));
    assert!(rolled.quota_rollover_at > now);
}

#[tokio::test]
async fn test_rollover_uses_key_period() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    let weekly = app
        .state
        .keys
        .set_quota(seed.admin.id, key.id, key.updated_at, 20, Some(7))
        .await
        .unwrap();

    let now = time::now();
    let boundary = now - TimeDelta::minutes(1);
    set_rollover_at(&app, key.id, boundary).await;
    set_usage(&app, key.id, 2).await;

    run_rollover(app.state.key_store.as_ref(), DEADLINE, now)
        .await
        .unwrap();

    let rolled = app.reload(key.id).await;
    assert_eq!(rolled.usage_remaining, 20);
    assert_eq!(rolled.quota_rollover_at, boundary + TimeDelta::days(7));

    // The reset moved the fencing token, so the pre-rollover token is stale
    let result = app
        .state
        .keys
        .rename(seed.developer.id, key.id, weekly.updated_at, "weekly")
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_rollover_store_failure_is_an_error() {
    let (app, store) = faulty_app(test_config()).await;
    seed(&app).await;

    store.set_error_mode(MockError::Unavailable);
    let result = run_rollover(app.state.key_store.as_ref(), DEADLINE, time::now()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_scheduler_fires_at_startup_and_stops() {
    let app = TestApp::new().await;
    let seed = seed(&app).await;
    let key = advanced_key(&app, &seed, &seed.developer, &seed.service_a).await;
    set_rollover_at(&app, key.id, time::now() - TimeDelta::hours(2)).await;
    set_usage(&app, key.id, 0).await;

    let scheduler = start_rollover_scheduler(app.state.key_store.clone(), DEADLINE);
    assert!(scheduler.is_running().await);

    let mut restored = false;
    for _ in 0..100 {
        if app.reload(key.id).await.usage_remaining == key.quota {
            restored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(restored, "startup rollover did not run");

    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
}
