//! Configuration for storage naming, context budgeting and local slots

use crate::error::{OuroborosError, OuroborosResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OuroborosConfig {
    /// Name of the storage container (folder) holding all objects
    pub container_name: String,

    /// Object naming for the envelope and its snapshots
    pub naming: EnvelopeNaming,

    /// Context budget for reasoning calls
    pub context: ContextBudget,

    /// Object-store HTTP endpoints
    pub endpoints: StoreEndpoints,

    /// Local slot keys for the volatile cache
    pub slots: SlotKeys,
}

impl Default for OuroborosConfig {
    fn default() -> Self {
        Self {
            container_name: "Ouroboros".to_string(),
            naming: EnvelopeNaming::default(),
            context: ContextBudget::default(),
            endpoints: StoreEndpoints::default(),
            slots: SlotKeys::default(),
        }
    }
}

impl OuroborosConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container name
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Set envelope naming
    pub fn with_naming(mut self, naming: EnvelopeNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Set the context budget
    pub fn with_context_budget(mut self, context: ContextBudget) -> Self {
        self.context = context;
        self
    }

    /// Set object-store endpoints
    pub fn with_endpoints(mut self, endpoints: StoreEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Load defaults, then `ouroboros.toml` (optional), then `OUROBOROS__*` variables
    ///
    /// Nested keys use `__`, e.g. `OUROBOROS__CONTEXT__MAX_CHARS=1000000`.
    pub fn from_env() -> OuroborosResult<Self> {
        dotenv::dotenv().ok();

        let loaded: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name("ouroboros").required(false))
            .add_source(
                config::Environment::with_prefix("OUROBOROS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check internal consistency
    pub fn validate(&self) -> OuroborosResult<()> {
        if self.container_name.trim().is_empty() {
            return Err(OuroborosError::validation(
                "container_name",
                "must not be empty",
                "\"\"",
            ));
        }
        self.naming.validate()?;
        self.context.validate()
    }
}

/// Names of the primary envelope and its snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeNaming {
    /// Primary envelope object name
    pub primary: String,

    /// Prefix of automatic pre-write backups
    pub backup_prefix: String,

    /// Prefix of user-requested snapshots
    pub manual_prefix: String,
}

impl Default for EnvelopeNaming {
    fn default() -> Self {
        Self {
            primary: "app-data.json".to_string(),
            backup_prefix: "app-data.backup-".to_string(),
            manual_prefix: "app-data.manual-".to_string(),
        }
    }
}

const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

impl EnvelopeNaming {
    /// Name for an automatic backup taken at `at`
    pub fn backup_name(&self, at: DateTime<Utc>) -> String {
        format!("{}{}.json", self.backup_prefix, at.format(SNAPSHOT_TIME_FORMAT))
    }

    /// Name for a manual snapshot taken at `at`
    pub fn manual_name(&self, at: DateTime<Utc>) -> String {
        format!("{}{}.json", self.manual_prefix, at.format(SNAPSHOT_TIME_FORMAT))
    }

    /// Whether `name` is an automatic backup or manual snapshot
    pub fn is_restore_point(&self, name: &str) -> bool {
        name.starts_with(&self.backup_prefix) || name.starts_with(&self.manual_prefix)
    }

    /// Whether `name` is the primary envelope or one of its snapshots
    pub fn is_envelope_object(&self, name: &str) -> bool {
        name == self.primary || self.is_restore_point(name)
    }

    fn validate(&self) -> OuroborosResult<()> {
        if self.primary.is_empty() || self.backup_prefix.is_empty() || self.manual_prefix.is_empty()
        {
            return Err(OuroborosError::validation(
                "naming",
                "primary name and snapshot prefixes must not be empty",
                format!("{:?}", self),
            ));
        }
        if self.backup_prefix == self.manual_prefix
            || self.primary.starts_with(&self.backup_prefix)
            || self.primary.starts_with(&self.manual_prefix)
        {
            return Err(OuroborosError::validation(
                "naming",
                "automatic backups, manual snapshots and the primary must be distinguishable",
                format!("{:?}", self),
            ));
        }
        Ok(())
    }
}

/// Character budget for material sent to the reasoning backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudget {
    /// Hard cap on the combined prompt, in characters
    pub max_chars: usize,

    /// Share of the cap kept when truncating
    pub keep_ratio: f64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chars: 4_000_000,
            keep_ratio: 0.8,
        }
    }
}

impl ContextBudget {
    /// Create a budget with the default keep ratio
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            ..Self::default()
        }
    }

    fn validate(&self) -> OuroborosResult<()> {
        if self.max_chars == 0 {
            return Err(OuroborosError::validation(
                "context.max_chars",
                "must be positive",
                "0",
            ));
        }
        if !(self.keep_ratio > 0.0 && self.keep_ratio <= 1.0) {
            return Err(OuroborosError::validation(
                "context.keep_ratio",
                "must be in (0, 1]",
                self.keep_ratio.to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP endpoints of the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreEndpoints {
    /// Metadata API base
    pub api_base: String,

    /// Upload API base
    pub upload_base: String,
}

impl Default for StoreEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3/".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3/".to_string(),
        }
    }
}

impl StoreEndpoints {
    /// Both APIs served from one base (used against local mock servers)
    pub fn single_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: format!("{}/drive/v3/", base),
            upload_base: format!("{}/upload/drive/v3/", base),
        }
    }
}

/// Keys of the local slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotKeys {
    /// Draft input + focus crash-recovery slot
    pub volatile: String,

    /// Display history slot
    pub chat_history: String,
}

impl Default for SlotKeys {
    fn default() -> Self {
        Self {
            volatile: "ouroboros_volatile_memory".to_string(),
            chat_history: "ouroboros_chat_history".to_string(),
        }
    }
}
