//! Key models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{Service, User, UserRole};

/// What a key authorizes
///
/// The bound service lives inside the `Advanced` variant, so a Basic key can
/// never carry a service and an Advanced key can never lack one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyKind {
    /// Valid for every service of the Basic class; one per user
    Basic,
    /// Bound to exactly one service; many per user
    Advanced { service_id: Uuid },
}

impl KeyKind {
    pub fn service_id(&self) -> Option<Uuid> {
        match self {
            KeyKind::Basic => None,
            KeyKind::Advanced { service_id } => Some(*service_id),
        }
    }

    pub fn is_advanced(&self) -> bool {
        matches!(self, KeyKind::Advanced { .. })
    }

    /// Stored form of the variant tag
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Basic => "basic",
            KeyKind::Advanced { .. } => "advanced",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization credential and quota ledger entry
#[derive(Debug, Clone, Serialize)]
pub struct Key {
    pub id: Uuid,
    /// Presented credential; only ever returned on creation or regeneration
    #[serde(skip_serializing)]
    pub secret: String,
    pub name: String,
    pub kind: KeyKind,
    pub owner_id: Uuid,
    pub quota: i64,
    pub quota_period_days: i64,
    pub usage_remaining: i64,
    pub quota_rollover_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Fencing token for optimistic concurrency control
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Field-scoped changes written by a conditional key update
///
/// Only the fields set here are written, so a patch never overwrites a
/// counter another writer owns (for example an in-flight usage debit).
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPatch {
    pub updated_at: DateTime<Utc>,
    pub secret: Option<String>,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub quota: Option<i64>,
    pub quota_period_days: Option<i64>,
    pub usage_remaining: Option<i64>,
    pub quota_rollover_at: Option<DateTime<Utc>>,
    pub owner_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
}

impl KeyPatch {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            secret: None,
            name: None,
            is_active: None,
            quota: None,
            quota_period_days: None,
            usage_remaining: None,
            quota_rollover_at: None,
            owner_id: None,
            service_id: None,
        }
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn quota(mut self, quota: i64, period_days: i64, rollover_at: DateTime<Utc>) -> Self {
        self.quota = Some(quota);
        self.quota_period_days = Some(period_days);
        self.quota_rollover_at = Some(rollover_at);
        self.usage_remaining = Some(quota);
        self
    }

    pub fn usage_remaining(mut self, usage_remaining: i64) -> Self {
        self.usage_remaining = Some(usage_remaining);
        self
    }

    pub fn owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn service(mut self, service_id: Uuid) -> Self {
        self.service_id = Some(service_id);
        self
    }

    /// Mirror a successfully written patch onto the in-memory record
    pub fn apply(&self, key: &mut Key) {
        key.updated_at = self.updated_at;
        if let Some(ref secret) = self.secret {
            key.secret = secret.clone();
        }
        if let Some(ref name) = self.name {
            key.name = name.clone();
        }
        if let Some(is_active) = self.is_active {
            key.is_active = is_active;
        }
        if let Some(quota) = self.quota {
            key.quota = quota;
        }
        if let Some(days) = self.quota_period_days {
            key.quota_period_days = days;
        }
        if let Some(usage) = self.usage_remaining {
            key.usage_remaining = usage;
        }
        if let Some(at) = self.quota_rollover_at {
            key.quota_rollover_at = at;
        }
        if let Some(owner_id) = self.owner_id {
            key.owner_id = owner_id;
        }
        if let Some(service_id) = self.service_id {
            key.kind = KeyKind::Advanced { service_id };
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBasicKeyRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAdvancedKeyRequest {
    /// Admin, or Lead of `service_id`
    pub creator_user_id: Uuid,
    pub recipient_user_id: Uuid,
    pub service_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    /// Defaults to the configured quota
    #[validate(range(min = 0))]
    pub quota: Option<i64>,
}

/// Body of mutations that carry nothing beyond the acting user and fencing token
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FencedKeyRequest {
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RenameKeyRequest {
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetQuotaRequest {
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[validate(range(min = 0))]
    pub quota: i64,
    /// Keeps the key's current period when omitted
    #[validate(range(min = 1, max = crate::utils::time::MAX_PERIOD_DAYS))]
    pub quota_period_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangeOwnerRequest {
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub new_owner_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangeServiceRequest {
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub service_id: Uuid,
}

/// A key together with its plaintext secret
#[derive(Debug, Clone, Serialize)]
pub struct KeyWithSecret {
    #[serde(flatten)]
    pub key: Key,
    /// Plaintext credential (only returned on creation and regeneration)
    pub secret: String,
}

impl From<Key> for KeyWithSecret {
    fn from(key: Key) -> Self {
        let secret = key.secret.clone();
        Self { key, secret }
    }
}

/// A user's keys as derived from key ownership
#[derive(Debug, Clone, Serialize)]
pub struct UserKeys {
    pub basic_key: Option<Key>,
    pub advanced_keys: Vec<Key>,
}

/// Identity of a key's owner as shown to admins and leads
#[derive(Debug, Clone, Serialize)]
pub struct KeyOwner {
    pub id: Uuid,
    pub platform_id: String,
    pub role: UserRole,
}

impl From<&User> for KeyOwner {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            platform_id: user.platform_id.clone(),
            role: user.role,
        }
    }
}

/// A key with its owner; `owner` is `None` when the user record is missing
#[derive(Debug, Clone, Serialize)]
pub struct OwnedKey {
    #[serde(flatten)]
    pub key: Key,
    pub owner: Option<KeyOwner>,
}

/// A service with the Advanced keys bound to it
#[derive(Debug, Clone, Serialize)]
pub struct ServiceKeys {
    #[serde(flatten)]
    pub service: Service,
    pub keys: Vec<OwnedKey>,
}
