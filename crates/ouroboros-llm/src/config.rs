//! Client configuration

use crate::error::{LlmError, LlmResult};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default public endpoint of the hosted model API
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for [`crate::Client`]
#[derive(Clone)]
pub struct ClientConfig {
    /// API key sent in the `x-goog-api-key` header
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Base URL (always ends with `/`)
    pub base_url: Url,

    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the key
    pub fn new(api_key: impl Into<String>) -> LlmResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::configuration(
                "API Key is missing. Set GEMINI_API_KEY (or API_KEY) in the environment.",
            ));
        }

        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: &str) -> LlmResult<Self> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from the process environment (and `.env`)
    ///
    /// Recognised variables: `GEMINI_API_KEY` (falls back to `API_KEY`),
    /// `OUROBOROS_MODEL`, `OUROBOROS_LLM_BASE_URL`.
    pub fn from_env() -> LlmResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> LlmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup("API_KEY"))
            .unwrap_or_default();

        let mut config = Self::new(api_key)?;

        if let Some(model) = lookup("OUROBOROS_MODEL").filter(|m| !m.trim().is_empty()) {
            config = config.with_model(model);
        }
        if let Some(base_url) = lookup("OUROBOROS_LLM_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config = config.with_base_url(&base_url)?;
        }

        Ok(config)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_base_url(raw: &str) -> LlmResult<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized)
        .map_err(|e| LlmError::configuration(format!("invalid base URL '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, LlmError::Configuration { .. }));
        assert!(err.to_string().contains("API Key is missing"));
    }

    #[test]
    fn test_api_key_fallback_and_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", ""),
            ("API_KEY", "secret"),
            ("OUROBOROS_MODEL", "gemini-test"),
            ("OUROBOROS_LLM_BASE_URL", "http://localhost:9999"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.model, "gemini-test");
        assert_eq!(config.base_url.as_str(), "http://localhost:9999/");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new("super-secret").unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
