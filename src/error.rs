//! Error types for business onboarding.

use std::time::Duration;

/// Top-level error type for the onboarding workflow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

impl Error {
    /// Whether the error is worth retrying on the next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Missing or malformed onboarding data. Surfaced per field at the
/// originating step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Malformed value for {field}: {message}")]
    Malformed { field: String, message: String },

    #[error("Unknown plan: {plan_id}")]
    UnknownPlan { plan_id: String },

    #[error("Tier {tier} is outside 1..=6")]
    InvalidTier { tier: u8 },

    #[error("Unknown step: {step}")]
    UnknownStep { step: String },

    #[error("Unknown section: {section}")]
    UnknownSection { section: String },

    #[error("Step {step} is blocked: {reason}")]
    StepBlocked { step: String, reason: String },

    #[error("Rejected by server: {message}")]
    Rejected {
        fields: Vec<String>,
        message: String,
    },
}

impl ValidationError {
    /// Field names this error refers to, if any.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::MissingFields { fields } | Self::Rejected { fields, .. } => fields.clone(),
            Self::Malformed { field, .. } => vec![field.clone()],
            _ => Vec::new(),
        }
    }
}

/// Session errors. Any of these forces re-authentication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No active session")]
    NoSession,

    #[error("Session token rejected")]
    Unauthorized,

    #[error("Session refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("Session check timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Transport and decoding failures. Transient by definition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    #[error("Request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Attachment upload failures. The dependent section stays incomplete.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    #[error("Upload of {attachment_type} failed: {reason}")]
    Failed {
        attachment_type: String,
        reason: String,
    },

    #[error("Upload of {attachment_type} rejected: {reason}")]
    Rejected {
        attachment_type: String,
        reason: String,
    },

    #[error("Upload of {attachment_type} is empty")]
    EmptyFile { attachment_type: String },
}

/// Result type alias for the onboarding workflow.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_message_lists_fields() {
        let err = ValidationError::MissingFields {
            fields: vec!["email".to_string(), "phone".to_string()],
        };
        assert_eq!(err.to_string(), "Missing required fields: email, phone");
        assert_eq!(err.fields(), vec!["email", "phone"]);
    }

    #[test]
    fn only_network_errors_are_transient() {
        let net: Error = NetworkError::Request {
            endpoint: "/auth/me".to_string(),
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(net.is_transient());

        let auth: Error = AuthError::Unauthorized.into();
        assert!(!auth.is_transient());

        let validation: Error = ValidationError::UnknownPlan {
            plan_id: "gold".to_string(),
        }
        .into();
        assert!(!validation.is_transient());
    }
}
