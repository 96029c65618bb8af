//! Authorization engine
//!
//! Decides whether a presented key may reach a downstream service and, when
//! it may, debits one unit of quota. The debit is a conditional write that
//! re-checks `usage_remaining > 0` in the store, so concurrent requests on one
//! key serialize there and the counter never goes negative.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::bounded;
use crate::db::{Directory, KeyStore};
use crate::models::{Decision, DenialReason, Key, KeyKind};
use crate::utils::{time, AppError, AppResult};

/// Read-decide-write cycles before a contended debit gives up
const DEBIT_ATTEMPTS: u32 = 2;

enum Verdict {
    Debit(Key),
    Deny(DenialReason),
}

pub struct Authorizer {
    keys: Arc<dyn KeyStore>,
    directory: Arc<dyn Directory>,
    deadline: Duration,
}

impl Authorizer {
    pub fn new(keys: Arc<dyn KeyStore>, directory: Arc<dyn Directory>, deadline: Duration) -> Self {
        Self {
            keys,
            directory,
            deadline,
        }
    }

    /// Evaluate a credential against a requested source identifier
    ///
    /// Store faults, expired deadlines and keys bound to a missing service
    /// deny with [`DenialReason::InternalError`]. A denial never writes.
    pub async fn authorize(&self, credential: &str, requested_service: &str) -> Decision {
        if credential.is_empty() {
            return Decision::Denied(DenialReason::MissingCredential);
        }
        if requested_service.is_empty() {
            return Decision::Denied(DenialReason::MissingServiceIdentifier);
        }

        let decision = match self.decide_and_debit(credential, requested_service).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, service = requested_service, "Authorization failed closed");
                Decision::Denied(DenialReason::InternalError)
            }
        };

        debug!(decision = %decision, service = requested_service, "Authorization decided");
        decision
    }

    async fn decide_and_debit(&self, credential: &str, requested_service: &str) -> AppResult<Decision> {
        for attempt in 1..=DEBIT_ATTEMPTS {
            let key = match self.evaluate(credential, requested_service).await? {
                Verdict::Deny(reason) => return Ok(Decision::Denied(reason)),
                Verdict::Debit(key) => key,
            };

            let debited = bounded(
                self.deadline,
                "debit key usage",
                self.keys.debit_usage(key.id, &key.secret, time::now()),
            )
            .await?;

            if debited {
                return Ok(Decision::Granted);
            }

            debug!(key_id = %key.id, attempt, "Usage debit lost a race");
        }

        Ok(Decision::Denied(DenialReason::QuotaExhausted))
    }

    async fn evaluate(&self, credential: &str, requested_service: &str) -> AppResult<Verdict> {
        let key = bounded(
            self.deadline,
            "find key by secret",
            self.keys.find_by_secret(credential),
        )
        .await?;

        let Some(key) = key else {
            return Ok(Verdict::Deny(DenialReason::UnknownCredential));
        };

        if key.usage_remaining <= 0 {
            return Ok(Verdict::Deny(DenialReason::QuotaExhausted));
        }
        if !key.is_active {
            return Ok(Verdict::Deny(DenialReason::Disabled));
        }

        let covered = match key.kind {
            KeyKind::Basic => {
                bounded(
                    self.deadline,
                    "check basic services",
                    self.directory.basic_class_covers(requested_service),
                )
                .await?
            }
            KeyKind::Advanced { service_id } => {
                let service = bounded(
                    self.deadline,
                    "find bound service",
                    self.directory.find_service(service_id),
                )
                .await?
                .ok_or_else(|| {
                    AppError::internal(format!(
                        "Key {} is bound to missing service {}",
                        key.id, service_id
                    ))
                })?;
                service.covers(requested_service)
            }
        };

        if covered {
            Ok(Verdict::Debit(key))
        } else {
            Ok(Verdict::Deny(DenialReason::ServiceMismatch))
        }
    }
}
