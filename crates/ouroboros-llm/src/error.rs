//! Error types for the reasoning backend client

use thiserror::Error;

/// Result alias used throughout the crate
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors produced while talking to the hosted reasoning backend
#[derive(Debug, Error)]
pub enum LlmError {
    /// Client configuration is incomplete or invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// Transport-level failure (connect, timeout, TLS)
    #[error("request to reasoning backend failed: {message}")]
    Request {
        /// Transport error text
        message: String,
    },

    /// Backend answered with a non-success HTTP status
    #[error("reasoning backend returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Provider-specific error message
        message: String,
    },

    /// Backend answered successfully but produced no text
    #[error("reasoning backend returned an empty response")]
    EmptyResponse,

    /// Backend text could not be parsed as JSON
    #[error("reasoning backend returned malformed JSON: {message}")]
    MalformedJson {
        /// Parser error text
        message: String,
    },

    /// The provider response envelope itself could not be decoded
    #[error("failed to decode reasoning backend envelope: {message}")]
    Decode {
        /// Decoder error text
        message: String,
    },
}

impl LlmError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Api {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Self::Request {
            message: err.to_string(),
        }
    }
}
