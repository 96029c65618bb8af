//! User and service records

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::bounded;
use super::tokens::random_label;
use crate::db::Directory;
use crate::models::{CreateServiceRequest, CreateUserRequest, Service, User, UserRole};
use crate::utils::validation::{validate_display_name, validate_source_identifier};
use crate::utils::{time, AppError, AppResult};

pub struct DirectoryService {
    directory: Arc<dyn Directory>,
    deadline: Duration,
}

impl DirectoryService {
    pub fn new(directory: Arc<dyn Directory>, deadline: Duration) -> Self {
        Self {
            directory,
            deadline,
        }
    }

    /// Register a user
    ///
    /// Anyone may register a plain Developer. Assigning another role or led
    /// services requires `creator_user_id` to name an Admin.
    pub async fn create_user(&self, req: CreateUserRequest) -> AppResult<User> {
        let platform_id = req.platform_id.trim();
        if platform_id.is_empty() {
            return Err(AppError::bad_request("Platform id cannot be empty"));
        }

        if req.assigns_privileges() {
            let creator_id = req.creator_user_id.ok_or_else(|| {
                AppError::forbidden("Only admins can assign roles or led services")
            })?;
            let creator = self.find_user(creator_id).await?;
            if !creator.is_admin() {
                return Err(AppError::forbidden(
                    "Only admins can assign roles or led services",
                ));
            }
        }

        for service_id in &req.led_service_ids {
            self.find_service(*service_id).await?;
        }

        let user = new_user(platform_id, req.role, req.led_service_ids);
        let created = bounded(self.deadline, "create user", self.directory.create_user(&user)).await?;
        if !created {
            return Err(AppError::validation("A user with this platform id already exists"));
        }

        info!(user_id = %user.id, role = %user.role, "User created");
        Ok(user)
    }

    /// Register `platform_id` as an Admin unless it is already known
    ///
    /// Returns `None` when the platform id is taken; an existing user's role is
    /// left as it is.
    pub async fn bootstrap_admin(&self, platform_id: &str) -> AppResult<Option<User>> {
        let platform_id = platform_id.trim();
        if platform_id.is_empty() {
            return Err(AppError::bad_request("Platform id cannot be empty"));
        }

        let user = new_user(platform_id, UserRole::Admin, vec![]);
        let created = bounded(
            self.deadline,
            "create bootstrap admin",
            self.directory.create_user(&user),
        )
        .await?;
        if !created {
            debug!(platform_id, "Bootstrap admin already registered");
            return Ok(None);
        }

        info!(user_id = %user.id, "Bootstrap admin created");
        Ok(Some(user))
    }

    pub async fn create_service(&self, req: CreateServiceRequest) -> AppResult<Service> {
        let name = match req.name {
            Some(name) if validate_display_name(&name) => name.trim().to_string(),
            Some(_) => return Err(AppError::bad_request("Invalid service name")),
            None => random_label("service"),
        };

        let mut source_identifiers = Vec::with_capacity(req.source_identifiers.len());
        for identifier in req.source_identifiers {
            if !validate_source_identifier(&identifier) {
                return Err(AppError::bad_request(format!(
                    "Invalid source identifier: {}",
                    identifier
                )));
            }
            if !source_identifiers.contains(&identifier) {
                source_identifiers.push(identifier);
            }
        }

        let now = time::now();
        let service = Service {
            id: Uuid::new_v4(),
            name,
            kind: req.kind,
            source_identifiers,
            created_at: now,
            updated_at: now,
        };

        bounded(
            self.deadline,
            "create service",
            self.directory.create_service(&service),
        )
        .await?;

        info!(service_id = %service.id, kind = %service.kind, "Service created");
        Ok(service)
    }

    async fn find_user(&self, user_id: Uuid) -> AppResult<User> {
        bounded(self.deadline, "find user", self.directory.find_user(user_id))
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn find_service(&self, service_id: Uuid) -> AppResult<Service> {
        bounded(
            self.deadline,
            "find service",
            self.directory.find_service(service_id),
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("Service {} not found", service_id)))
    }
}

fn new_user(platform_id: &str, role: UserRole, led_service_ids: Vec<Uuid>) -> User {
    let now = time::now();
    User {
        id: Uuid::new_v4(),
        platform_id: platform_id.to_string(),
        role,
        basic_key_id: None,
        advanced_key_ids: vec![],
        led_service_ids,
        created_at: now,
        updated_at: now,
    }
}
