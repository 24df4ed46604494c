//! Error taxonomy for storage, reconciliation and sync

use std::fmt::Display;
use thiserror::Error;

/// Result alias used throughout the crate
pub type OuroborosResult<T> = Result<T, OuroborosError>;

/// All failures surfaced by the core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OuroborosError {
    /// Authorization is no longer valid; re-authenticate before retrying
    #[error("session expired during {operation}")]
    SessionExpired {
        /// Operation that observed the expiry
        operation: String,
    },

    /// Transient object-store failure
    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable {
        /// Operation that failed
        operation: String,
        /// Underlying error text
        message: String,
    },

    /// Explicit get-by-id found nothing
    #[error("object not found: {id}")]
    NotFound {
        /// Requested object id
        id: String,
    },

    /// A persisted envelope failed structural decoding
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong
        reason: String,
    },

    /// A proposed transition would lose tracked state
    #[error("integrity violation: {reason}")]
    IntegrityViolation {
        /// Why the proposal was rejected
        reason: String,
        /// Project count before the proposal
        previous_projects: usize,
        /// Project count in the proposal, if present at all
        proposed_projects: Option<usize>,
    },

    /// Backend refused the call because a quota or rate limit was hit
    #[error("reasoning backend quota exceeded: {message}")]
    BackendQuotaExceeded {
        /// Provider message
        message: String,
    },

    /// Backend refused the call until billing is enabled
    #[error("reasoning backend requires billing: {message}")]
    BackendBillingRequired {
        /// Provider message
        message: String,
    },

    /// Backend produced no output
    #[error("reasoning backend returned an empty response")]
    BackendEmptyResponse,

    /// Backend output did not match the required response shape
    #[error("reasoning backend returned a malformed response: {message}")]
    BackendMalformedResponse {
        /// Parser or shape error
        message: String,
    },

    /// Any other backend failure
    #[error("reasoning backend failed: {message}")]
    Backend {
        /// Provider message
        message: String,
    },

    /// A single embedded tool request failed
    #[error("tool '{tool}' failed: {message}")]
    ToolEffect {
        /// Tool name as written in the request
        tool: String,
        /// Failure text
        message: String,
    },

    /// The external authorization handshake failed
    #[error("authorization failed: {message}")]
    Authorization {
        /// Failure text
        message: String,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Failure text
        message: String,
    },

    /// Serialization or deserialization failure
    #[error("serialization failed during {operation}: {message}")]
    Serialization {
        /// Operation that failed
        operation: String,
        /// Underlying error text
        message: String,
    },

    /// Input validation failure
    #[error("validation failed for {field}: {constraint} (got {actual})")]
    Validation {
        /// Field name
        field: String,
        /// Violated constraint
        constraint: String,
        /// Observed value
        actual: String,
    },
}

impl OuroborosError {
    /// Create a session-expired error
    pub fn session_expired(operation: impl Into<String>) -> Self {
        Self::SessionExpired {
            operation: operation.into(),
        }
    }

    /// Create a storage-unavailable error
    pub fn storage(operation: impl Into<String>, err: impl Display) -> Self {
        Self::StorageUnavailable {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Create a not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a malformed-envelope error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    /// Create an integrity violation
    pub fn integrity(
        reason: impl Into<String>,
        previous_projects: usize,
        proposed_projects: Option<usize>,
    ) -> Self {
        Self::IntegrityViolation {
            reason: reason.into(),
            previous_projects,
            proposed_projects,
        }
    }

    /// Create a tool-effect failure
    pub fn tool(tool: impl Into<String>, err: impl Display) -> Self {
        Self::ToolEffect {
            tool: tool.into(),
            message: err.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(operation: impl Into<String>, err: impl Display) -> Self {
        Self::Serialization {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify a raw backend error message into a typed error
    ///
    /// Matching is case-insensitive: `quota`/`429` means quota exhaustion,
    /// `billing`/`402` means billing must be enabled.
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();

        if lowered.contains("quota") || lowered.contains("429") {
            Self::BackendQuotaExceeded { message }
        } else if lowered.contains("billing") || lowered.contains("402") {
            Self::BackendBillingRequired { message }
        } else {
            Self::Backend { message }
        }
    }

    /// Whether this error requires re-authentication
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Short machine-friendly category, used as a log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::SessionExpired { .. } => "session_expired",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::NotFound { .. } => "not_found",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::BackendQuotaExceeded { .. } => "backend_quota",
            Self::BackendBillingRequired { .. } => "backend_billing",
            Self::BackendEmptyResponse => "backend_empty",
            Self::BackendMalformedResponse { .. } => "backend_malformed",
            Self::Backend { .. } => "backend",
            Self::ToolEffect { .. } => "tool_effect",
            Self::Authorization { .. } => "authorization",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
            Self::Validation { .. } => "validation",
        }
    }

    /// Actionable text for the user, never a raw provider dump
    pub fn user_message(&self) -> String {
        match self {
            Self::SessionExpired { .. } => {
                "Session expired. Reconnect to storage to continue; your input has been kept."
                    .to_string()
            }
            Self::StorageUnavailable { message, .. } => format!(
                "Storage is unavailable ({}). Sync did not complete; retry when the connection recovers.",
                message
            ),
            Self::NotFound { id } => format!("Requested object {} does not exist.", id),
            Self::MalformedEnvelope { reason } => format!(
                "No usable state found in storage ({}). Continuing with defaults.",
                reason
            ),
            Self::IntegrityViolation { reason, .. } => format!(
                "Update rejected to prevent memory loss: {}. Your previous state is unchanged.",
                reason
            ),
            Self::BackendQuotaExceeded { .. } => {
                "The reasoning backend quota is exhausted. Wait for the quota window to reset or raise the limit for this API key."
                    .to_string()
            }
            Self::BackendBillingRequired { .. } => {
                "The reasoning backend requires billing for this API key. Enable billing on the provider account and retry."
                    .to_string()
            }
            Self::BackendEmptyResponse => {
                "The reasoning backend returned nothing. Try rephrasing the instruction.".to_string()
            }
            Self::BackendMalformedResponse { .. } => {
                "The reasoning backend returned an unreadable update. Nothing was changed; try again."
                    .to_string()
            }
            Self::Backend { message } => format!("Reasoning backend error: {}", message),
            Self::ToolEffect { tool, message } => format!("Tool {} failed: {}", tool, message),
            Self::Authorization { message } => format!("Storage integration failed: {}", message),
            Self::Configuration { message } => format!("Configuration required: {}", message),
            Self::Serialization { message, .. } => format!("State could not be encoded: {}", message),
            Self::Validation {
                field, constraint, ..
            } => format!("Invalid {}: {}", field, constraint),
        }
    }
}

impl From<config::ConfigError> for OuroborosError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<ouroboros_llm::LlmError> for OuroborosError {
    fn from(err: ouroboros_llm::LlmError) -> Self {
        use ouroboros_llm::LlmError;

        match err {
            LlmError::Api { status: 429, message } => Self::BackendQuotaExceeded { message },
            LlmError::Api { status: 402, message } => Self::BackendBillingRequired { message },
            LlmError::EmptyResponse => Self::BackendEmptyResponse,
            LlmError::MalformedJson { message } => Self::BackendMalformedResponse { message },
            LlmError::Configuration { message } => Self::Configuration { message },
            other => Self::from_backend_message(other.to_string()),
        }
    }
}
