//! Business logic services

pub mod authorizer;
pub mod directory;
pub mod key_controller;
pub mod rollover_scheduler;
pub mod tokens;

pub use authorizer::Authorizer;
pub use directory::DirectoryService;
pub use key_controller::{KeyController, KeyOperation};
pub use rollover_scheduler::{run_rollover, start_rollover_scheduler, RolloverSchedulerState};
pub use tokens::{AlphanumericTokenGenerator, TokenGenerator};

use std::future::Future;
use std::time::Duration;

use crate::utils::{AppError, AppResult};

/// Run a store or directory call under a deadline
///
/// Store faults become [`AppError::Database`] and an expired deadline becomes
/// [`AppError::Timeout`]. Nothing is retried here.
pub(crate) async fn bounded<T, F>(deadline: Duration, what: &str, call: F) -> AppResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::Database(format!("{}: {:#}", what, e))),
        Err(_) => Err(AppError::Timeout(format!(
            "{} did not complete within {}ms",
            what,
            deadline.as_millis()
        ))),
    }
}
