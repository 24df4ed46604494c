//! # Ouroboros Core
//!
//! Externalized agent memory. The working state (long-term memory plus a
//! focus log) lives in a remote object store, is advanced one turn at a time
//! by a reasoning backend, and is re-persisted with a backup of the previous
//! version before every overwrite.
//!
//! ## Components
//!
//! - **Storage gateway** ([`storage`]): container setup, lookup, envelope
//!   writes and artifact uploads over an [`ObjectStore`]
//! - **State codec** ([`codec`]): envelope encode/decode with legacy migration
//!   and the snapshot-before-write step
//! - **Reconciliation engine** ([`engine`]): context assembly, budgeting,
//!   proposal, the non-loss gate and inline tool effects
//! - **Sync controller** ([`session`]): connection lifecycle, pull/push,
//!   restore points, import/export and smart relink
//! - **Volatile cache** ([`volatile`]): local crash recovery for the draft
//!   and focus
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ouroboros_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> OuroborosResult<()> {
//! let config = OuroborosConfig::from_env()?;
//! let store = Arc::new(DriveObjectStore::new(&config.endpoints)?);
//! let backend = Arc::new(ouroboros_llm::Client::from_env()?);
//! let authorizer = Arc::new(StaticTokenAuthorizer::from_env());
//!
//! let mut controller = SyncController::new(store, backend, authorizer, &config);
//! println!("{}", controller.connect().await.message());
//! println!("{}", controller.submit_turn("Start a security audit project").await.message());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod reasoning;
pub mod relink;
pub mod session;
pub mod state;
pub mod storage;
pub mod tools;
pub mod validate;
pub mod volatile;

pub use codec::BackupOutcome;
pub use config::{ContextBudget, EnvelopeNaming, OuroborosConfig, SlotKeys, StoreEndpoints};
pub use engine::{EnginePhase, ReconciliationEngine, TurnOutcome};
pub use error::{OuroborosError, OuroborosResult};
pub use reasoning::{ProposalRequest, ReasoningBackend, ScriptedBackend};
pub use relink::{RelinkAssignment, RelinkCandidate, RelinkPlan, UnlinkedFile};
pub use session::{
    ConnectOutcome, ExportedSnapshot, ImportOutcome, PullOutcome, PushOutcome, RestorePoint,
    SessionStatus, SyncController, TurnReport, UploadReport,
};
pub use state::{
    AgentState, FocusState, GraphEdge, GraphNode, KnowledgeGraph, MemoryState, PersistedState,
    Project, ProjectStatus,
};
pub use storage::{
    AccessToken, Artifact, Authorizer, InMemoryObjectStore, ObjectInfo, ObjectStore,
    SessionHandle, StaticTokenAuthorizer, StorageGateway,
};
pub use volatile::{ChatEntry, ChatRole, FileSlotStore, InMemorySlotStore, SlotStore, VolatileCache};

#[cfg(feature = "http")]
pub use storage::DriveObjectStore;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::config::{ContextBudget, OuroborosConfig};
    pub use crate::error::{OuroborosError, OuroborosResult};
    pub use crate::reasoning::ReasoningBackend;
    pub use crate::session::{PullOutcome, PushOutcome, SessionStatus, SyncController, TurnReport};
    pub use crate::state::{initial_state, AgentState, FocusState, MemoryState, Project, ProjectStatus};
    pub use crate::storage::{Artifact, Authorizer, ObjectStore, StaticTokenAuthorizer};
    pub use crate::volatile::{FileSlotStore, VolatileCache};

    #[cfg(feature = "http")]
    pub use crate::storage::DriveObjectStore;
}
