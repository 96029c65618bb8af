//! Storage seams
//!
//! The authorizer, key controller and rollover scheduler only see these
//! traits. Every write that can race another writer is conditional: it
//! re-checks its own precondition inside the statement and reports whether
//! it was applied.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Key, KeyPatch, Service, User};

/// Durable key records
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Key>>;

    async fn find_by_secret(&self, secret: &str) -> Result<Option<Key>>;

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Key>>;

    /// Advanced keys bound to `service_id`
    async fn find_by_service(&self, service_id: Uuid) -> Result<Vec<Key>>;

    /// Returns `false` when a uniqueness constraint rejected the row
    async fn insert(&self, key: &Key) -> Result<bool>;

    /// Deletes the key only if `updated_at` still equals `expected`
    async fn delete_if_unchanged(&self, id: Uuid, expected: DateTime<Utc>) -> Result<bool>;

    /// Takes one unit of quota and stamps `last_used_at`.
    ///
    /// Applied only while the key still has the same secret, is active and
    /// has usage left.
    async fn debit_usage(&self, id: Uuid, secret: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Writes the fields present in `patch` only if `updated_at` still equals
    /// `expected`
    async fn update_if_unchanged(
        &self,
        id: Uuid,
        expected: DateTime<Utc>,
        patch: &KeyPatch,
    ) -> Result<bool>;

    /// Resets usage and advances the boundary of every key whose
    /// `quota_rollover_at` is at or before `now`. Returns the number of keys
    /// reset.
    async fn rollover_elapsed(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Users and services
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>>;

    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Whether any service of the Basic class lists `identifier`
    async fn basic_class_covers(&self, identifier: &str) -> Result<bool>;

    async fn set_basic_key(&self, user_id: Uuid, key_id: Option<Uuid>) -> Result<()>;

    async fn attach_advanced_key(&self, user_id: Uuid, key_id: Uuid) -> Result<()>;

    async fn detach_advanced_key(&self, user_id: Uuid, key_id: Uuid) -> Result<()>;

    /// Overwrites a user's key back-references in one step
    async fn replace_key_refs(
        &self,
        user_id: Uuid,
        basic_key_id: Option<Uuid>,
        advanced_key_ids: &[Uuid],
    ) -> Result<()>;

    /// Returns `false` when the platform id is already taken
    async fn create_user(&self, user: &User) -> Result<bool>;

    async fn create_service(&self, service: &Service) -> Result<()>;
}
