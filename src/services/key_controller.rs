//! Quota mutation controller
//!
//! Every mutation is fenced by the `updated_at` value the caller last saw.
//! Checks run in one fixed order for all operations:
//!
//! 1. input validation (`BadRequest`), before any store access
//! 2. key lookup (`NotFound`)
//! 3. fencing token comparison (`Conflict`)
//! 4. preconditions on the key's own fields (`ValidationError`)
//! 5. actor permission (`Forbidden`)
//! 6. lookups of other referenced records (`NotFound`)
//! 7. compare-and-swap write on `updated_at` (`Conflict` if it lost)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bounded;
use super::tokens::{random_label, TokenGenerator};
use crate::config::QuotaConfig;
use crate::db::{Directory, KeyStore};
use crate::models::{
    Key, KeyKind, KeyOwner, KeyPatch, OwnedKey, Service, ServiceKeys, User, UserKeys, UserRole,
};
use crate::utils::validation::validate_display_name;
use crate::utils::{time, AppError, AppResult};

/// Mutations that go through the permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOperation {
    Enable,
    Disable,
    Regenerate,
    Rename,
    SetQuota,
    RestoreQuota,
    ChangeOwner,
    ChangeService,
    Delete,
}

impl KeyOperation {
    /// Operations a key's owner may perform without any role
    pub fn is_self_service(&self) -> bool {
        matches!(
            self,
            KeyOperation::Enable
                | KeyOperation::Disable
                | KeyOperation::Regenerate
                | KeyOperation::Rename
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyOperation::Enable => "enable",
            KeyOperation::Disable => "disable",
            KeyOperation::Regenerate => "regenerate",
            KeyOperation::Rename => "rename",
            KeyOperation::SetQuota => "set_quota",
            KeyOperation::RestoreQuota => "restore_quota",
            KeyOperation::ChangeOwner => "change_owner",
            KeyOperation::ChangeService => "change_service",
            KeyOperation::Delete => "delete",
        }
    }
}

/// Role-based permission for `actor` to mutate `key`
///
/// `destination` is the service a change-service moves the key to; a Lead
/// must lead it as well as the key's current service. Owner self-service is
/// decided separately, without loading the actor.
pub fn permits(actor: &User, key: &Key, destination: Option<Uuid>) -> bool {
    match actor.role {
        UserRole::Admin => true,
        UserRole::Lead => match key.kind {
            KeyKind::Advanced { service_id } => {
                actor.leads(service_id) && destination.map_or(true, |d| actor.leads(d))
            }
            KeyKind::Basic => false,
        },
        UserRole::Developer => false,
    }
}

pub struct KeyController {
    keys: Arc<dyn KeyStore>,
    directory: Arc<dyn Directory>,
    tokens: Arc<dyn TokenGenerator>,
    deadline: Duration,
    default_quota: i64,
    default_period_days: i64,
}

impl KeyController {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        directory: Arc<dyn Directory>,
        tokens: Arc<dyn TokenGenerator>,
        config: &QuotaConfig,
    ) -> Self {
        Self {
            keys,
            directory,
            tokens,
            deadline: config.store_timeout(),
            default_quota: config.default_quota,
            default_period_days: config.default_period_days,
        }
    }

    // ---- creation ----

    /// Issue the user's single Basic key
    pub async fn create_basic_key(&self, user_id: Uuid) -> AppResult<Key> {
        let user = self.load_user(user_id).await?;

        let key = self.new_key(
            user.id,
            KeyKind::Basic,
            random_label("key"),
            self.default_quota,
        )?;

        let inserted = bounded(self.deadline, "insert key", self.keys.insert(&key)).await?;
        if !inserted {
            return Err(AppError::validation("User already has a basic key"));
        }

        if let Err(e) = bounded(
            self.deadline,
            "set basic key reference",
            self.directory.set_basic_key(user.id, Some(key.id)),
        )
        .await
        {
            warn!(key_id = %key.id, user_id = %user.id, error = %e, "Basic key created but user reference not updated");
        }

        info!(key_id = %key.id, user_id = %user.id, "Basic key created");
        Ok(key)
    }

    /// Issue an Advanced key bound to `service_id` for `recipient_id`
    pub async fn create_advanced_key(
        &self,
        creator_id: Uuid,
        recipient_id: Uuid,
        service_id: Uuid,
        name: Option<String>,
        quota: Option<i64>,
    ) -> AppResult<Key> {
        if let Some(ref name) = name {
            check_name(name)?;
        }
        let quota = quota.unwrap_or(self.default_quota);
        if quota < 0 {
            return Err(AppError::bad_request("Quota cannot be negative"));
        }

        let creator = self.load_user(creator_id).await?;
        if !(creator.is_admin() || creator.leads(service_id)) {
            return Err(AppError::forbidden(
                "Only admins and leads of the service can create advanced keys",
            ));
        }
        let service = self.load_service(service_id).await?;
        let recipient = self.load_user(recipient_id).await?;

        let key = self.new_key(
            recipient.id,
            KeyKind::Advanced {
                service_id: service.id,
            },
            name.unwrap_or_else(|| random_label("key")),
            quota,
        )?;

        let inserted = bounded(self.deadline, "insert key", self.keys.insert(&key)).await?;
        if !inserted {
            return Err(AppError::internal("Generated key collided with an existing key"));
        }

        self.attach(recipient.id, key.id).await;

        info!(key_id = %key.id, user_id = %recipient.id, service_id = %service.id, "Advanced key created");
        Ok(key)
    }

    // ---- fenced mutations ----

    pub async fn enable(&self, actor_id: Uuid, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        if key.is_active {
            return Err(AppError::validation("Key is already enabled"));
        }
        self.check_permission(actor_id, &key, KeyOperation::Enable, None)
            .await?;

        let patch = KeyPatch::new(fence_after(&key)).active(true);
        self.write(key, patch, KeyOperation::Enable).await
    }

    pub async fn disable(&self, actor_id: Uuid, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        if !key.is_active {
            return Err(AppError::validation("Key is already disabled"));
        }
        self.check_permission(actor_id, &key, KeyOperation::Disable, None)
            .await?;

        let patch = KeyPatch::new(fence_after(&key)).active(false);
        self.write(key, patch, KeyOperation::Disable).await
    }

    /// Replace the secret and re-enable the key. The returned key carries the
    /// new secret.
    pub async fn regenerate(&self, actor_id: Uuid, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        self.check_permission(actor_id, &key, KeyOperation::Regenerate, None)
            .await?;

        let patch = KeyPatch::new(fence_after(&key))
            .secret(self.tokens.new_secret())
            .active(true);
        self.write(key, patch, KeyOperation::Regenerate)
            .await
    }

    pub async fn rename(
        &self,
        actor_id: Uuid,
        key_id: Uuid,
        expected: DateTime<Utc>,
        name: &str,
    ) -> AppResult<Key> {
        check_name(name)?;

        let key = self.fenced_key(key_id, expected).await?;
        self.check_permission(actor_id, &key, KeyOperation::Rename, None)
            .await?;

        let patch = KeyPatch::new(fence_after(&key)).name(name.trim());
        self.write(key, patch, KeyOperation::Rename).await
    }

    /// Set a new allotment, reset usage to it and restart the period from the
    /// current UTC day
    pub async fn set_quota(
        &self,
        actor_id: Uuid,
        key_id: Uuid,
        expected: DateTime<Utc>,
        quota: i64,
        period_days: Option<i64>,
    ) -> AppResult<Key> {
        if quota < 0 {
            return Err(AppError::bad_request("Quota cannot be negative"));
        }
        if period_days.is_some_and(|d| !(1..=time::MAX_PERIOD_DAYS).contains(&d)) {
            return Err(AppError::bad_request(format!(
                "Quota period must be between 1 and {} days",
                time::MAX_PERIOD_DAYS
            )));
        }

        let key = self.fenced_key(key_id, expected).await?;
        self.check_permission(actor_id, &key, KeyOperation::SetQuota, None)
            .await?;

        let days = period_days.unwrap_or(key.quota_period_days);
        let rollover_at = time::days_after_start_of_day(time::now(), days)
            .ok_or_else(|| AppError::bad_request("Quota period is out of range"))?;
        let patch = KeyPatch::new(fence_after(&key)).quota(quota, days, rollover_at);
        self.write(key, patch, KeyOperation::SetQuota)
            .await
    }

    /// Reset usage to the current quota without moving the rollover boundary
    pub async fn restore_quota(&self, actor_id: Uuid, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        self.check_permission(actor_id, &key, KeyOperation::RestoreQuota, None)
            .await?;

        let patch = KeyPatch::new(fence_after(&key)).usage_remaining(key.quota);
        self.write(key, patch, KeyOperation::RestoreQuota)
            .await
    }

    /// Transfer an Advanced key to another user
    ///
    /// The user back-references are a second write. If it fails the key still
    /// moves; [`KeyController::user_keys`] repairs the references later.
    pub async fn change_owner(
        &self,
        actor_id: Uuid,
        key_id: Uuid,
        expected: DateTime<Utc>,
        new_owner_id: Uuid,
    ) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        if !key.kind.is_advanced() {
            return Err(AppError::validation("Basic keys cannot be reassigned"));
        }
        if key.owner_id == new_owner_id {
            return Err(AppError::validation("Key already belongs to this user"));
        }
        self.check_permission(actor_id, &key, KeyOperation::ChangeOwner, None)
            .await?;
        let new_owner = self.load_user(new_owner_id).await?;

        let previous_owner = key.owner_id;
        let patch = KeyPatch::new(fence_after(&key)).owner(new_owner.id);
        let key = self
            .write(key, patch, KeyOperation::ChangeOwner)
            .await?;

        self.detach(previous_owner, key.id).await;
        self.attach(new_owner.id, key.id).await;

        Ok(key)
    }

    /// Rebind an Advanced key to another service
    pub async fn change_service(
        &self,
        actor_id: Uuid,
        key_id: Uuid,
        expected: DateTime<Utc>,
        service_id: Uuid,
    ) -> AppResult<Key> {
        let key = self.fenced_key(key_id, expected).await?;
        match key.kind {
            KeyKind::Basic => {
                return Err(AppError::validation("Basic keys cannot be reassigned"))
            }
            KeyKind::Advanced { service_id: current } if current == service_id => {
                return Err(AppError::validation("Key is already bound to this service"))
            }
            KeyKind::Advanced { .. } => {}
        }
        self.check_permission(actor_id, &key, KeyOperation::ChangeService, Some(service_id))
            .await?;
        let service = self.load_service(service_id).await?;

        let patch = KeyPatch::new(fence_after(&key)).service(service.id);
        self.write(key, patch, KeyOperation::ChangeService)
            .await
    }

    /// Delete an Advanced key. Basic keys are disabled, never deleted.
    pub async fn delete(&self, actor_id: Uuid, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<()> {
        let key = self.fenced_key(key_id, expected).await?;
        if !key.kind.is_advanced() {
            return Err(AppError::validation("Basic keys cannot be deleted"));
        }
        self.check_permission(actor_id, &key, KeyOperation::Delete, None)
            .await?;

        let deleted = bounded(
            self.deadline,
            "delete key",
            self.keys.delete_if_unchanged(key.id, key.updated_at),
        )
        .await?;
        if !deleted {
            return Err(stale(expected));
        }

        self.detach(key.owner_id, key.id).await;

        info!(key_id = %key.id, operation = KeyOperation::Delete.as_str(), "Key deleted");
        Ok(())
    }

    // ---- reads ----

    /// A user's keys, derived from key ownership
    ///
    /// When the user's back-references disagree with ownership they are
    /// rewritten to match.
    pub async fn user_keys(&self, user_id: Uuid) -> AppResult<UserKeys> {
        let user = self.load_user(user_id).await?;
        let owned = bounded(
            self.deadline,
            "find keys by owner",
            self.keys.find_by_owner(user.id),
        )
        .await?;

        let (basic, advanced): (Vec<Key>, Vec<Key>) =
            owned.into_iter().partition(|k| k.kind == KeyKind::Basic);
        let basic_key = basic.into_iter().next();

        let basic_id = basic_key.as_ref().map(|k| k.id);
        let mut advanced_ids: Vec<Uuid> = advanced.iter().map(|k| k.id).collect();
        advanced_ids.sort();
        let mut indexed = user.advanced_key_ids.clone();
        indexed.sort();

        if user.basic_key_id != basic_id || indexed != advanced_ids {
            warn!(
                user_id = %user.id,
                indexed = indexed.len(),
                owned = advanced_ids.len(),
                "User key references out of date, repairing"
            );
            if let Err(e) = bounded(
                self.deadline,
                "repair key references",
                self.directory.replace_key_refs(user.id, basic_id, &advanced_ids),
            )
            .await
            {
                warn!(user_id = %user.id, error = %e, "Failed to repair key references");
            }
        }

        Ok(UserKeys {
            basic_key,
            advanced_keys: advanced,
        })
    }

    pub async fn user_role(&self, user_id: Uuid) -> AppResult<UserRole> {
        Ok(self.load_user(user_id).await?.role)
    }

    /// Services visible to an Admin or Lead, each with its bound keys and
    /// their owners
    ///
    /// Admins see every service, Leads the services they lead. Secrets are
    /// never part of the view.
    pub async fn privileged_data(&self, user_id: Uuid) -> AppResult<Vec<ServiceKeys>> {
        let user = self.load_user(user_id).await?;

        let services = match user.role {
            UserRole::Admin => {
                bounded(self.deadline, "list services", self.directory.list_services()).await?
            }
            UserRole::Lead => {
                let mut led = Vec::with_capacity(user.led_service_ids.len());
                for service_id in &user.led_service_ids {
                    match bounded(
                        self.deadline,
                        "find led service",
                        self.directory.find_service(*service_id),
                    )
                    .await?
                    {
                        Some(service) => led.push(service),
                        None => {
                            warn!(user_id = %user.id, service_id = %service_id, "Lead references a missing service")
                        }
                    }
                }
                led
            }
            UserRole::Developer => {
                return Err(AppError::forbidden(
                    "Only admins and leads can view privileged data",
                ))
            }
        };

        let mut owners: HashMap<Uuid, Option<KeyOwner>> = HashMap::new();
        let mut view = Vec::with_capacity(services.len());
        for service in services {
            let keys = bounded(
                self.deadline,
                "find keys by service",
                self.keys.find_by_service(service.id),
            )
            .await?;

            let mut owned = Vec::with_capacity(keys.len());
            for key in keys {
                let owner = match owners.get(&key.owner_id) {
                    Some(owner) => owner.clone(),
                    None => {
                        let owner = bounded(
                            self.deadline,
                            "find key owner",
                            self.directory.find_user(key.owner_id),
                        )
                        .await?
                        .as_ref()
                        .map(KeyOwner::from);
                        owners.insert(key.owner_id, owner.clone());
                        owner
                    }
                };
                owned.push(OwnedKey { key, owner });
            }

            view.push(ServiceKeys {
                service,
                keys: owned,
            });
        }

        debug!(user_id = %user.id, role = %user.role, services = view.len(), "Privileged data read");
        Ok(view)
    }

    // ---- helpers ----

    fn new_key(&self, owner_id: Uuid, kind: KeyKind, name: String, quota: i64) -> AppResult<Key> {
        let now = time::now();
        let period = self.default_period_days;
        let rollover_at = time::days_after_start_of_day(now, period)
            .ok_or_else(|| AppError::internal("Default quota period is out of range"))?;
        Ok(Key {
            id: Uuid::new_v4(),
            secret: self.tokens.new_secret(),
            name,
            kind,
            owner_id,
            quota,
            quota_period_days: period,
            usage_remaining: quota,
            quota_rollover_at: rollover_at,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        })
    }

    /// Load the key and compare its fencing token
    async fn fenced_key(&self, key_id: Uuid, expected: DateTime<Utc>) -> AppResult<Key> {
        let key = bounded(self.deadline, "find key", self.keys.find_by_id(key_id))
            .await?
            .ok_or_else(|| AppError::not_found("Key not found"))?;

        if key.updated_at != time::truncate_to_millis(expected) {
            return Err(stale(expected));
        }
        Ok(key)
    }

    async fn check_permission(
        &self,
        actor_id: Uuid,
        key: &Key,
        op: KeyOperation,
        destination: Option<Uuid>,
    ) -> AppResult<()> {
        if op.is_self_service() && key.owner_id == actor_id {
            return Ok(());
        }

        let actor = self.load_user(actor_id).await?;
        if permits(&actor, key, destination) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "User is not allowed to {} this key",
                op.as_str().replace('_', " ")
            )))
        }
    }

    /// Compare-and-swap `patch` onto the key as it was loaded
    async fn write(&self, mut key: Key, patch: KeyPatch, op: KeyOperation) -> AppResult<Key> {
        let expected = key.updated_at;
        let applied = bounded(
            self.deadline,
            "update key",
            self.keys.update_if_unchanged(key.id, expected, &patch),
        )
        .await?;
        if !applied {
            return Err(stale(expected));
        }

        patch.apply(&mut key);
        info!(key_id = %key.id, operation = op.as_str(), "Key updated");
        Ok(key)
    }

    async fn load_user(&self, user_id: Uuid) -> AppResult<User> {
        bounded(self.deadline, "find user", self.directory.find_user(user_id))
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn load_service(&self, service_id: Uuid) -> AppResult<Service> {
        bounded(
            self.deadline,
            "find service",
            self.directory.find_service(service_id),
        )
        .await?
        .ok_or_else(|| AppError::not_found("Service not found"))
    }

    async fn attach(&self, user_id: Uuid, key_id: Uuid) {
        if let Err(e) = bounded(
            self.deadline,
            "attach key reference",
            self.directory.attach_advanced_key(user_id, key_id),
        )
        .await
        {
            warn!(key_id = %key_id, user_id = %user_id, error = %e, "Failed to attach key reference");
        }
    }

    async fn detach(&self, user_id: Uuid, key_id: Uuid) {
        if let Err(e) = bounded(
            self.deadline,
            "detach key reference",
            self.directory.detach_advanced_key(user_id, key_id),
        )
        .await
        {
            warn!(key_id = %key_id, user_id = %user_id, error = %e, "Failed to detach key reference");
        }
    }
}

fn fence_after(key: &Key) -> DateTime<Utc> {
    time::next_fence(key.updated_at, time::now())
}

fn stale(expected: DateTime<Utc>) -> AppError {
    AppError::conflict(format!(
        "Key has been modified since {}; re-read and retry",
        expected.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    ))
}

fn check_name(name: &str) -> AppResult<()> {
    if validate_display_name(name) {
        Ok(())
    } else {
        Err(AppError::bad_request(
            "Name must be 1 to 100 printable characters",
        ))
    }
}
