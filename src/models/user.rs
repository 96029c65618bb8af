//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Role of a principal managing keys
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// May only manage their own keys
    #[default]
    Developer,
    /// Administers the services listed in `led_service_ids`
    Lead,
    /// May perform any operation on any key
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Developer => write!(f, "developer"),
            UserRole::Lead => write!(f, "lead"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "developer" => Ok(UserRole::Developer),
            "lead" => Ok(UserRole::Lead),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

/// User entity
///
/// `basic_key_id` and `advanced_key_ids` are a denormalized index of key
/// ownership. `Key::owner_id` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// External identity, unique
    pub platform_id: String,
    pub role: UserRole,
    pub basic_key_id: Option<Uuid>,
    #[serde(default)]
    pub advanced_key_ids: Vec<Uuid>,
    #[serde(default)]
    pub led_service_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether this user administers the given service
    pub fn leads(&self, service_id: Uuid) -> bool {
        self.role == UserRole::Lead && self.led_service_ids.contains(&service_id)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub platform_id: String,
    /// Admin assigning a role other than Developer; not needed otherwise
    #[serde(default)]
    pub creator_user_id: Option<Uuid>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub led_service_ids: Vec<Uuid>,
}

impl CreateUserRequest {
    /// Whether the request grants anything beyond a plain Developer
    pub fn assigns_privileges(&self) -> bool {
        self.role != UserRole::Developer || !self.led_service_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRoleResponse {
    pub user_id: Uuid,
    pub role: UserRole,
}
