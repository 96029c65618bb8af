//! Service model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Class of a downstream service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Reachable with any user's Basic key
    Basic,
    PublicProduction,
    PrivateProduction,
    Staging,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Basic => write!(f, "basic"),
            ServiceKind::PublicProduction => write!(f, "public_production"),
            ServiceKind::PrivateProduction => write!(f, "private_production"),
            ServiceKind::Staging => write!(f, "staging"),
        }
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(ServiceKind::Basic),
            "public_production" => Ok(ServiceKind::PublicProduction),
            "private_production" => Ok(ServiceKind::PrivateProduction),
            "staging" => Ok(ServiceKind::Staging),
            _ => Err(format!("Invalid service kind: {}", s)),
        }
    }
}

/// A downstream resource group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub kind: ServiceKind,
    /// Concrete endpoints this service covers
    pub source_identifiers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn covers(&self, identifier: &str) -> bool {
        self.source_identifiers.iter().any(|s| s == identifier)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateServiceRequest {
    /// Generated when omitted
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub kind: ServiceKind,
    #[serde(default)]
    pub source_identifiers: Vec<String>,
}
