//! Authorization decisions

use serde::Serialize;

/// Why an authorization was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MissingCredential,
    MissingServiceIdentifier,
    /// Also covers keys issued by another system; the two are not distinguished
    UnknownCredential,
    QuotaExhausted,
    Disabled,
    ServiceMismatch,
    /// Store fault or deadline expiry; access fails closed
    InternalError,
}

impl DenialReason {
    /// Human-readable explanation returned to callers
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::MissingCredential => "Missing API key",
            DenialReason::MissingServiceIdentifier => "Missing requested service",
            DenialReason::UnknownCredential => "Key is not allowed",
            DenialReason::QuotaExhausted => "Quota exhausted",
            DenialReason::Disabled => "Key is disabled",
            DenialReason::ServiceMismatch => "Key is not allowed for the requested service",
            DenialReason::InternalError => "Internal error",
        }
    }

    /// Malformed request rather than a business outcome
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            DenialReason::MissingCredential | DenialReason::MissingServiceIdentifier
        )
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::MissingCredential => write!(f, "missing_credential"),
            DenialReason::MissingServiceIdentifier => write!(f, "missing_service_identifier"),
            DenialReason::UnknownCredential => write!(f, "unknown_credential"),
            DenialReason::QuotaExhausted => write!(f, "quota_exhausted"),
            DenialReason::Disabled => write!(f, "disabled"),
            DenialReason::ServiceMismatch => write!(f, "service_mismatch"),
            DenialReason::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Outcome of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Access granted and one unit of quota debited
    Granted,
    Denied(DenialReason),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted)
    }

    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            Decision::Granted => None,
            Decision::Denied(reason) => Some(*reason),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Granted => write!(f, "granted"),
            Decision::Denied(reason) => write!(f, "denied:{}", reason),
        }
    }
}

/// Response body of the authorization endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResponse {
    pub status: String,
    pub message: String,
    pub is_allowed: bool,
}

impl From<Decision> for DecisionResponse {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Granted => Self {
                status: "granted".to_string(),
                message: "Key is allowed".to_string(),
                is_allowed: true,
            },
            Decision::Denied(reason) => Self {
                status: reason.to_string(),
                message: reason.message().to_string(),
                is_allowed: false,
            },
        }
    }
}
