//! Key repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::{DbPool, KeyStore};
use crate::models::{Key, KeyKind, KeyPatch};
use crate::utils::time::{from_millis, to_millis, MILLIS_PER_DAY};

const KEY_COLUMNS: &str = "id, secret, name, kind, owner_id, service_id, quota, \
     quota_period_days, usage_remaining, quota_rollover_at, is_active, created_at, \
     updated_at, last_used_at";

#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    id: String,
    secret: String,
    name: String,
    kind: String,
    owner_id: String,
    service_id: Option<String>,
    quota: i64,
    quota_period_days: i64,
    usage_remaining: i64,
    quota_rollover_at: i64,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
    last_used_at: Option<i64>,
}

impl TryFrom<KeyRow> for Key {
    type Error = anyhow::Error;

    fn try_from(row: KeyRow) -> Result<Self> {
        let kind = match (row.kind.as_str(), row.service_id) {
            ("basic", None) => KeyKind::Basic,
            ("advanced", Some(service_id)) => KeyKind::Advanced {
                service_id: Uuid::parse_str(&service_id).context("Invalid service id")?,
            },
            (kind, _) => anyhow::bail!("Inconsistent key kind '{}' for key {}", kind, row.id),
        };

        Ok(Key {
            id: Uuid::parse_str(&row.id).context("Invalid key id")?,
            secret: row.secret,
            name: row.name,
            kind,
            owner_id: Uuid::parse_str(&row.owner_id).context("Invalid owner id")?,
            quota: row.quota,
            quota_period_days: row.quota_period_days,
            usage_remaining: row.usage_remaining,
            quota_rollover_at: from_millis(row.quota_rollover_at)?,
            is_active: row.is_active,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            last_used_at: row.last_used_at.map(from_millis).transpose()?,
        })
    }
}

/// SQLite-backed [`KeyStore`]
#[derive(Clone)]
pub struct SqliteKeyStore {
    pool: DbPool,
}

impl SqliteKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: String) -> Result<Option<Key>> {
        let sql = format!("SELECT {} FROM keys WHERE {} = ?", KEY_COLUMNS, column);
        let row = sqlx::query_as::<_, KeyRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get key by {}", column))?;

        row.map(Key::try_from).transpose()
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Key>> {
        self.find_one("id", id.to_string()).await
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<Key>> {
        self.find_one("secret", secret.to_string()).await
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<Key>> {
        let sql = format!(
            "SELECT {} FROM keys WHERE owner_id = ? ORDER BY created_at, id",
            KEY_COLUMNS
        );
        let rows = sqlx::query_as::<_, KeyRow>(&sql)
            .bind(owner_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list keys for owner")?;

        rows.into_iter().map(Key::try_from).collect()
    }

    async fn find_by_service(&self, service_id: Uuid) -> Result<Vec<Key>> {
        let sql = format!(
            "SELECT {} FROM keys WHERE service_id = ? ORDER BY created_at, id",
            KEY_COLUMNS
        );
        let rows = sqlx::query_as::<_, KeyRow>(&sql)
            .bind(service_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list keys for service")?;

        rows.into_iter().map(Key::try_from).collect()
    }

    async fn insert(&self, key: &Key) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO keys (id, secret, name, kind, owner_id, service_id, quota,
                              quota_period_days, usage_remaining, quota_rollover_at,
                              is_active, created_at, updated_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.id.to_string())
        .bind(&key.secret)
        .bind(&key.name)
        .bind(key.kind.as_str())
        .bind(key.owner_id.to_string())
        .bind(key.kind.service_id().map(|id| id.to_string()))
        .bind(key.quota)
        .bind(key.quota_period_days)
        .bind(key.usage_remaining)
        .bind(to_millis(key.quota_rollover_at))
        .bind(key.is_active)
        .bind(to_millis(key.created_at))
        .bind(to_millis(key.updated_at))
        .bind(key.last_used_at.map(to_millis))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e).context("Failed to create key"),
        }
    }

    async fn delete_if_unchanged(&self, id: Uuid, expected: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("DELETE FROM keys WHERE id = ? AND updated_at = ?")
            .bind(id.to_string())
            .bind(to_millis(expected))
            .execute(&self.pool)
            .await
            .context("Failed to delete key")?;

        Ok(result.rows_affected() > 0)
    }

    async fn debit_usage(&self, id: Uuid, secret: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE keys
            SET usage_remaining = usage_remaining - 1, last_used_at = ?
            WHERE id = ? AND secret = ? AND is_active = 1 AND usage_remaining > 0
            "#,
        )
        .bind(to_millis(at))
        .bind(id.to_string())
        .bind(secret)
        .execute(&self.pool)
        .await
        .context("Failed to debit key usage")?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_if_unchanged(
        &self,
        id: Uuid,
        expected: DateTime<Utc>,
        patch: &KeyPatch,
    ) -> Result<bool> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE keys SET updated_at = ");
        query.push_bind(to_millis(patch.updated_at));

        if let Some(ref secret) = patch.secret {
            query.push(", secret = ").push_bind(secret.clone());
        }
        if let Some(ref name) = patch.name {
            query.push(", name = ").push_bind(name.clone());
        }
        if let Some(is_active) = patch.is_active {
            query.push(", is_active = ").push_bind(is_active);
        }
        if let Some(quota) = patch.quota {
            query.push(", quota = ").push_bind(quota);
        }
        if let Some(days) = patch.quota_period_days {
            query.push(", quota_period_days = ").push_bind(days);
        }
        if let Some(usage) = patch.usage_remaining {
            query.push(", usage_remaining = ").push_bind(usage);
        }
        if let Some(at) = patch.quota_rollover_at {
            query.push(", quota_rollover_at = ").push_bind(to_millis(at));
        }
        if let Some(owner_id) = patch.owner_id {
            query.push(", owner_id = ").push_bind(owner_id.to_string());
        }
        if let Some(service_id) = patch.service_id {
            query
                .push(", kind = 'advanced', service_id = ")
                .push_bind(service_id.to_string());
        }

        query
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND updated_at = ")
            .push_bind(to_millis(expected));

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to update key")?;

        Ok(result.rows_affected() > 0)
    }

    async fn rollover_elapsed(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = to_millis(now);

        // The new boundary is the first whole period after the prior one that
        // lies in the future, so keys missed during downtime catch up in one pass.
        let result = sqlx::query(
            r#"
            UPDATE keys
            SET usage_remaining = quota,
                quota_rollover_at = quota_rollover_at
                    + ((? - quota_rollover_at) / (quota_period_days * ?) + 1)
                    * quota_period_days * ?,
                updated_at = MAX(?, updated_at + 1)
            WHERE quota_rollover_at <= ?
            "#,
        )
        .bind(now)
        .bind(MILLIS_PER_DAY)
        .bind(MILLIS_PER_DAY)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to roll over key quotas")?;

        Ok(result.rows_affected())
    }
}
