//! User and service repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::{DbPool, Directory};
use crate::models::{Service, ServiceKind, User, UserRole};
use crate::utils::time::{self, from_millis, to_millis};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    platform_id: String,
    role: String,
    basic_key_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: String,
    name: String,
    kind: String,
    created_at: i64,
    updated_at: i64,
}

/// SQLite-backed [`Directory`]
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: DbPool,
}

impl SqliteDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn id_list(&self, sql: &str, owner: Uuid, what: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(sql)
            .bind(owner.to_string())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to get {}", what))?;

        rows.iter()
            .map(|row| {
                let id: String = row.get(0);
                Uuid::parse_str(&id).with_context(|| format!("Invalid id in {}", what))
            })
            .collect()
    }

    async fn row_to_user(&self, row: UserRow) -> Result<User> {
        let id = Uuid::parse_str(&row.id).context("Invalid user id")?;
        let advanced_key_ids = self
            .id_list(
                "SELECT key_id FROM user_advanced_keys WHERE user_id = ? ORDER BY key_id",
                id,
                "user advanced keys",
            )
            .await?;
        let led_service_ids = self
            .id_list(
                "SELECT service_id FROM user_led_services WHERE user_id = ? ORDER BY service_id",
                id,
                "user led services",
            )
            .await?;

        Ok(User {
            id,
            platform_id: row.platform_id,
            role: row.role.parse::<UserRole>().map_err(anyhow::Error::msg)?,
            basic_key_id: row
                .basic_key_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .context("Invalid basic key id")?,
            advanced_key_ids,
            led_service_ids,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }

    async fn row_to_service(&self, row: ServiceRow) -> Result<Service> {
        let source_identifiers: Vec<String> = sqlx::query_scalar(
            "SELECT identifier FROM service_source_identifiers WHERE service_id = ? ORDER BY identifier",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to get service source identifiers")?;

        Ok(Service {
            id: Uuid::parse_str(&row.id).context("Invalid service id")?,
            name: row.name,
            kind: row.kind.parse::<ServiceKind>().map_err(anyhow::Error::msg)?,
            source_identifiers,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }

    async fn touch_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
            .bind(to_millis(time::now()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update user")?;
        Ok(())
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, platform_id, role, basic_key_id, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get user")?;

        match row {
            Some(row) => Ok(Some(self.row_to_user(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, kind, created_at, updated_at FROM services WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get service")?;

        match row {
            Some(row) => Ok(Some(self.row_to_service(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, kind, created_at, updated_at FROM services ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list services")?;

        let mut services = Vec::with_capacity(rows.len());
        for row in rows {
            services.push(self.row_to_service(row).await?);
        }
        Ok(services)
    }

    async fn basic_class_covers(&self, identifier: &str) -> Result<bool> {
        let (covered,): (i64,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM service_source_identifiers si
                JOIN services s ON s.id = si.service_id
                WHERE si.identifier = ? AND s.kind = ?
            )
            "#,
        )
        .bind(identifier)
        .bind(ServiceKind::Basic.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to check basic service identifiers")?;
        Ok(covered != 0)
    }

    async fn set_basic_key(&self, user_id: Uuid, key_id: Option<Uuid>) -> Result<()> {
        sqlx::query("UPDATE users SET basic_key_id = ?, updated_at = ? WHERE id = ?")
            .bind(key_id.map(|id| id.to_string()))
            .bind(to_millis(time::now()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to set user basic key")?;
        Ok(())
    }

    async fn attach_advanced_key(&self, user_id: Uuid, key_id: Uuid) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_advanced_keys (user_id, key_id) VALUES (?, ?)")
            .bind(user_id.to_string())
            .bind(key_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to attach advanced key")?;
        self.touch_user(user_id).await
    }

    async fn detach_advanced_key(&self, user_id: Uuid, key_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM user_advanced_keys WHERE user_id = ? AND key_id = ?")
            .bind(user_id.to_string())
            .bind(key_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to detach advanced key")?;
        self.touch_user(user_id).await
    }

    async fn replace_key_refs(
        &self,
        user_id: Uuid,
        basic_key_id: Option<Uuid>,
        advanced_key_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("UPDATE users SET basic_key_id = ?, updated_at = ? WHERE id = ?")
            .bind(basic_key_id.map(|id| id.to_string()))
            .bind(to_millis(time::now()))
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to set user basic key")?;

        sqlx::query("DELETE FROM user_advanced_keys WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to clear advanced keys")?;

        for key_id in advanced_key_ids {
            sqlx::query("INSERT INTO user_advanced_keys (user_id, key_id) VALUES (?, ?)")
                .bind(user_id.to_string())
                .bind(key_id.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to attach advanced key")?;
        }

        tx.commit().await.context("Failed to commit key references")?;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, platform_id, role, basic_key_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.platform_id)
        .bind(user.role.to_string())
        .bind(user.basic_key_id.map(|id| id.to_string()))
        .bind(to_millis(user.created_at))
        .bind(to_millis(user.updated_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(false),
            Err(e) => return Err(e).context("Failed to create user"),
        }

        for service_id in &user.led_service_ids {
            sqlx::query("INSERT INTO user_led_services (user_id, service_id) VALUES (?, ?)")
                .bind(user.id.to_string())
                .bind(service_id.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to assign led service")?;
        }

        tx.commit().await.context("Failed to commit user")?;
        Ok(true)
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO services (id, name, kind, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(service.id.to_string())
        .bind(&service.name)
        .bind(service.kind.to_string())
        .bind(to_millis(service.created_at))
        .bind(to_millis(service.updated_at))
        .execute(&mut *tx)
        .await
        .context("Failed to create service")?;

        for identifier in &service.source_identifiers {
            sqlx::query(
                "INSERT OR IGNORE INTO service_source_identifiers (service_id, identifier) VALUES (?, ?)",
            )
            .bind(service.id.to_string())
            .bind(identifier)
            .execute(&mut *tx)
            .await
            .context("Failed to add source identifier")?;
        }

        tx.commit().await.context("Failed to commit service")?;
        Ok(())
    }
}
