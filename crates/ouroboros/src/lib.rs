//! # Ouroboros - Conversational Agent with Externalized Memory
//!
//! **Ouroboros** keeps an agent's memory outside the process:
//!
//! - **Ouroboros Core**: storage gateway, state codec, reconciliation engine,
//!   sync controller and local crash recovery
//! - **Ouroboros LLM**: client for the hosted reasoning backend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ouroboros::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OuroborosConfig::from_env()?;
//!     let store = Arc::new(DriveObjectStore::new(&config.endpoints)?);
//!     let backend = Arc::new(Client::from_env()?);
//!     let authorizer = Arc::new(StaticTokenAuthorizer::from_env());
//!
//!     let mut controller = SyncController::new(store, backend, authorizer, &config);
//!     println!("{}", controller.connect().await.message());
//!
//!     let report = controller.submit_turn("What am I working on?").await;
//!     println!("{}", report.message());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - A proposal that tracks fewer projects than the current memory is
//!   rejected whole; the previous state stays in place
//! - Every overwrite of the primary envelope is preceded by a backup attempt
//! - Session expiry stops syncing until the user reconnects; typed input is kept

#![doc(html_root_url = "https://docs.rs/ouroboros-agent/0.1.0")]
#![warn(missing_docs)]

// Re-export sub-crates
#[cfg(feature = "core")]
pub use ouroboros_core as memory;

#[cfg(feature = "llm")]
pub use ouroboros_llm as llm;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "llm")]
    pub use crate::llm::{Client, ClientConfig, LlmError, LlmResult};

    #[cfg(feature = "core")]
    pub use crate::memory::prelude::*;

    #[cfg(feature = "core")]
    pub use crate::memory::{
        BackupOutcome, ConnectOutcome, ImportOutcome, RelinkAssignment, RelinkPlan, RestorePoint,
        UploadReport,
    };
}
