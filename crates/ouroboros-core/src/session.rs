//! Session/sync controller
//!
//! Owns the connection lifecycle and the working state, and orchestrates
//! `connect → pull → (turn → push)*`. Storage and backend failures stop here:
//! every public operation reports a typed outcome, and a
//! [`OuroborosError::SessionExpired`] anywhere moves the controller to
//! [`SessionStatus::Expired`] until the next [`SyncController::connect`].
//! Nothing is retried automatically.

use crate::codec::{decode, encode, precheck, snapshot_before_write, BackupOutcome};
use crate::config::OuroborosConfig;
use crate::engine::ReconciliationEngine;
use crate::error::{OuroborosError, OuroborosResult};
use crate::reasoning::ReasoningBackend;
use crate::relink::{maintenance_instruction, plan_relink, RelinkAssignment, RelinkPlan};
use crate::state::migration::{migrate_focus, migrate_memory};
use crate::state::{initial_state, now_millis, AgentState, FocusState, MemoryState, PersistedState};
use crate::storage::{
    Artifact, Authorizer, EnvelopeWrite, MatchMode, ObjectFilter, ObjectStore, SessionHandle,
    StorageGateway,
};
use crate::tools::ToolReport;
use crate::volatile::{VolatileCache, VolatileSnapshot};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session
    Offline,
    /// Session open, idle
    Connected,
    /// A pull or push is running
    Syncing,
    /// Authorization lapsed; only `connect` leaves this state
    Expired,
}

impl SessionStatus {
    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, next),
            (Offline, Connected)
                | (Offline, Expired)
                | (Connected, Syncing)
                | (Connected, Expired)
                | (Syncing, Connected)
                | (Syncing, Expired)
                | (Expired, Connected)
                | (_, Offline)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offline => "offline",
            Self::Connected => "connected",
            Self::Syncing => "syncing",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Result of [`SyncController::connect`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// Session open; the initial pull ran
    Connected(PullOutcome),
    /// Storage rejected the new token
    Expired,
    /// Authorization or container setup failed
    Failed {
        /// User-facing text
        message: String,
    },
}

impl ConnectOutcome {
    /// Text for the user
    pub fn message(&self) -> String {
        match self {
            Self::Connected(pull) => format!("Connected to storage. {}", pull.message()),
            Self::Expired => OuroborosError::session_expired("connect").user_message(),
            Self::Failed { message } => message.clone(),
        }
    }
}

/// Result of a pull or restore
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// State replaced from the envelope
    Loaded {
        /// Object the state came from
        object_id: String,
        /// Write time recorded in the envelope
        synced_at: DateTime<Utc>,
    },
    /// Nothing stored yet; the current state was kept
    NoRemoteState,
    /// The envelope could not be decoded
    ///
    /// An unusable primary resets the working state to the built-in defaults;
    /// an unusable restore point keeps the current state.
    Unusable {
        /// Decode failure
        reason: String,
    },
    /// No open session
    NotConnected,
    /// Authorization lapsed
    Expired,
    /// Storage failed
    Failed {
        /// User-facing text
        message: String,
    },
}

impl PullOutcome {
    /// Text for the user
    pub fn message(&self) -> String {
        match self {
            Self::Loaded { synced_at, .. } => format!(
                "Memory restored (last synced {}).",
                synced_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Self::NoRemoteState => "No existing state found. Starting fresh.".to_string(),
            Self::Unusable { reason } => OuroborosError::malformed(reason.clone()).user_message(),
            Self::NotConnected => "Not connected to storage.".to_string(),
            Self::Expired => OuroborosError::session_expired("pull").user_message(),
            Self::Failed { message } => message.clone(),
        }
    }
}

/// Result of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Primary envelope written
    Synced {
        /// Primary object id
        object_id: String,
        /// What the pre-write backup did
        backup: BackupOutcome,
    },
    /// Manual snapshot written; the primary was not touched
    Snapshot {
        /// Snapshot object id
        object_id: String,
        /// Snapshot object name
        name: String,
    },
    /// Not connected; the state stays local
    Skipped,
    /// Envelope failed the structural pre-check; nothing was written
    Rejected {
        /// Pre-check failure
        reason: String,
    },
    /// Authorization lapsed
    Expired,
    /// Storage failed
    Failed {
        /// User-facing text
        message: String,
        /// Backup result, when the failure came after the backup step
        backup: Option<BackupOutcome>,
    },
}

impl PushOutcome {
    /// Whether the state reached storage
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. } | Self::Snapshot { .. })
    }

    /// Text for the user
    pub fn message(&self) -> String {
        match self {
            Self::Synced { backup, .. } => match backup.warning() {
                Some(warning) => format!("Memory synced. {}", warning),
                None => "Memory synced.".to_string(),
            },
            Self::Snapshot { name, .. } => format!("Snapshot saved as {}.", name),
            Self::Skipped => "Not connected; changes are kept locally only.".to_string(),
            Self::Rejected { reason } => format!("Sync refused, state is malformed: {}", reason),
            Self::Expired => OuroborosError::session_expired("push").user_message(),
            Self::Failed { message, .. } => message.clone(),
        }
    }
}

/// Result of [`SyncController::submit_turn`]
#[derive(Debug, Clone, PartialEq)]
pub enum TurnReport {
    /// State advanced; the push result is attached
    Completed {
        /// Response with tool markers
        response: String,
        /// Tool effects of the turn
        tools: ToolReport,
        /// Whether the proposal omitted focus
        focus_carried_over: bool,
        /// The automatic push
        sync: PushOutcome,
    },
    /// Proposal refused by the non-loss gate; state unchanged
    Rejected {
        /// User-facing text
        message: String,
    },
    /// Authorization lapsed; the instruction was kept as draft
    Expired,
    /// Backend or storage failure; the instruction was kept as draft
    Failed {
        /// Error category
        category: &'static str,
        /// User-facing text
        message: String,
    },
    /// Nothing was submitted
    Ignored {
        /// Why
        reason: String,
    },
}

impl TurnReport {
    /// Text for the user
    pub fn message(&self) -> String {
        match self {
            Self::Completed { response, sync, .. } if !sync.is_synced() => {
                format!("{}\n\n[{}]", response, sync.message())
            }
            Self::Completed { response, .. } => response.clone(),
            Self::Rejected { message } | Self::Failed { message, .. } => message.clone(),
            Self::Expired => OuroborosError::session_expired("turn").user_message(),
            Self::Ignored { reason } => reason.clone(),
        }
    }
}

/// Result of [`SyncController::import_state`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// State replaced; the push result is attached
    Imported {
        /// The push
        sync: PushOutcome,
    },
    /// The document is not a usable state
    Invalid {
        /// Why
        reason: String,
    },
}

impl ImportOutcome {
    /// Text for the user
    pub fn message(&self) -> String {
        match self {
            Self::Imported { sync } => format!("State imported. {}", sync.message()),
            Self::Invalid { reason } => format!("Import failed: {}", reason),
        }
    }
}

/// Result of [`SyncController::upload_artifacts`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// `(name, id)` of each stored file
    pub uploaded: Vec<(String, String)>,

    /// `(name, reason)` of each failed file
    pub failed: Vec<(String, String)>,
}

impl UploadReport {
    /// Text for the user
    pub fn message(&self) -> String {
        let total = self.uploaded.len() + self.failed.len();
        let mut message = format!("Uploaded {} of {} files.", self.uploaded.len(), total);
        for (name, reason) in &self.failed {
            message.push_str(&format!("\n- {}: {}", name, reason));
        }
        message
    }
}

/// Backup or manual snapshot available for restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePoint {
    /// Object id
    pub id: String,

    /// Object name
    pub name: String,

    /// Whether the user asked for it
    pub manual: bool,

    /// Last modification, if the store reports it
    pub modified_at: Option<DateTime<Utc>>,
}

/// Downloadable copy of the working state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSnapshot {
    /// Suggested file name
    pub file_name: String,

    /// Pretty-printed `{memory, focus}`
    pub contents: String,
}

/// Orchestrates connection, sync and turns over one working state
pub struct SyncController {
    gateway: StorageGateway,
    engine: ReconciliationEngine,
    authorizer: Arc<dyn Authorizer>,
    volatile: Option<VolatileCache>,
    session: Option<SessionHandle>,
    status: SessionStatus,
    state: AgentState,
    draft: String,
    last_synced_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncController")
            .field("status", &self.status)
            .field("session", &self.session)
            .field("engine", &self.engine)
            .field("last_synced_at", &self.last_synced_at)
            .finish_non_exhaustive()
    }
}

impl SyncController {
    /// Create an offline controller holding the built-in default state
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn ReasoningBackend>,
        authorizer: Arc<dyn Authorizer>,
        config: &OuroborosConfig,
    ) -> Self {
        let gateway = StorageGateway::new(store, config);
        let engine = ReconciliationEngine::new(gateway.clone(), backend, config.context);
        Self {
            gateway,
            engine,
            authorizer,
            volatile: None,
            session: None,
            status: SessionStatus::Offline,
            state: initial_state(),
            draft: String::new(),
            last_synced_at: None,
        }
    }

    /// Mirror draft and focus changes into a local cache
    pub fn with_volatile_cache(mut self, cache: VolatileCache) -> Self {
        self.volatile = Some(cache);
        self
    }

    /// Lifecycle status
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Working state
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Unsent input
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Write time of the last envelope pulled or pushed
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Open session, if any
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Replace the unsent input
    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
        self.record_volatile();
    }

    fn transition(&mut self, next: SessionStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            warn!(from = %self.status, to = %next, "illegal session transition ignored");
            return;
        }
        info!(from = %self.status, to = %next, "session status");
        self.status = next;
    }

    fn record_volatile(&self) {
        if let Some(cache) = &self.volatile {
            if let Err(e) = cache.record(&self.draft, &self.state.focus) {
                warn!(error = %e, "volatile slot not written");
            }
        }
    }

    /// Session to use for an operation, if the controller is idle and connected
    fn active_session(&self) -> Option<SessionHandle> {
        match self.status {
            SessionStatus::Connected => self.session.clone(),
            _ => None,
        }
    }

    fn not_connected(&self, operation: &str) -> OuroborosError {
        OuroborosError::storage(operation, format!("not connected ({})", self.status))
    }

    /// Note an error's effect on the lifecycle and hand it back
    fn absorb(&mut self, err: OuroborosError) -> OuroborosError {
        if err.is_session_expired() {
            self.transition(SessionStatus::Expired);
        }
        err
    }

    /// Authorize, open the working container and pull the primary envelope
    #[instrument(skip(self), fields(status = %self.status))]
    pub async fn connect(&mut self) -> ConnectOutcome {
        let token = match self.authorizer.authorize().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "authorization failed");
                return ConnectOutcome::Failed {
                    message: e.user_message(),
                };
            }
        };

        match self.gateway.open_session(token).await {
            Ok(session) => {
                self.session = Some(session);
                self.transition(SessionStatus::Connected);
                ConnectOutcome::Connected(self.pull_state(None).await)
            }
            Err(e) if e.is_session_expired() => {
                self.session = None;
                self.transition(SessionStatus::Expired);
                ConnectOutcome::Expired
            }
            Err(e) => {
                warn!(error = %e, "storage session could not be opened");
                ConnectOutcome::Failed {
                    message: e.user_message(),
                }
            }
        }
    }

    /// Drop the session
    pub fn disconnect(&mut self) {
        self.session = None;
        self.transition(SessionStatus::Offline);
    }

    /// Replace the working state from the primary envelope or from `object_id`
    ///
    /// A missing envelope leaves the current state untouched. An undecodable
    /// primary counts as no usable state and falls back to the defaults; an
    /// undecodable restore point is refused and the current state is kept.
    pub async fn pull_state(&mut self, object_id: Option<&str>) -> PullOutcome {
        let Some(session) = self.active_session() else {
            return PullOutcome::NotConnected;
        };

        self.transition(SessionStatus::Syncing);
        let fetched = self.fetch_envelope(&session, object_id).await;
        let outcome = match fetched {
            Ok(None) => {
                info!("no remote state found, keeping current state");
                PullOutcome::NoRemoteState
            }
            Ok(Some((id, raw))) => match decode(&raw) {
                Ok(envelope) => {
                    let dangling = envelope.memory.graph.dangling_edges().len();
                    if dangling > 0 {
                        warn!(dangling, "knowledge graph has edges to unknown nodes");
                    }
                    let synced_at = envelope.last_synced_at;
                    self.state = envelope.into_state();
                    self.last_synced_at = Some(synced_at);
                    self.record_volatile();
                    info!(object_id = %id, "state pulled");
                    PullOutcome::Loaded {
                        object_id: id,
                        synced_at,
                    }
                }
                Err(e) => {
                    warn!(object_id = %id, error = %e, "stored envelope unusable");
                    if object_id.is_none() {
                        self.state = initial_state();
                        self.last_synced_at = None;
                        self.record_volatile();
                    }
                    PullOutcome::Unusable {
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) if e.is_session_expired() => PullOutcome::Expired,
            Err(e) => {
                warn!(error = %e, "pull failed");
                PullOutcome::Failed {
                    message: e.user_message(),
                }
            }
        };

        self.finish_sync(matches!(outcome, PullOutcome::Expired));
        outcome
    }

    async fn fetch_envelope(
        &self,
        session: &SessionHandle,
        object_id: Option<&str>,
    ) -> OuroborosResult<Option<(String, String)>> {
        let id = match object_id {
            Some(id) => id.to_string(),
            None => {
                let primary = &self.gateway.naming().primary;
                match self
                    .gateway
                    .find_object(session, primary, session.container_id(), MatchMode::Exact)
                    .await?
                {
                    Some(id) => id,
                    None => return Ok(None),
                }
            }
        };
        let raw = self.gateway.read_object(session, &id).await?;
        Ok(Some((id, raw)))
    }

    fn finish_sync(&mut self, expired: bool) {
        if expired {
            self.transition(SessionStatus::Expired);
        } else {
            self.transition(SessionStatus::Connected);
        }
    }

    /// Persist `memory` and `focus`
    ///
    /// An automatic push backs up the current primary, then overwrites it. A
    /// manual push writes a separately named snapshot and leaves the primary
    /// alone.
    pub async fn push_state(
        &mut self,
        memory: &MemoryState,
        focus: &FocusState,
        manual: bool,
    ) -> PushOutcome {
        let Some(session) = self.active_session() else {
            debug!(status = %self.status, "push skipped, not connected");
            return PushOutcome::Skipped;
        };

        let envelope = PersistedState::new(memory.clone(), focus.clone());
        let encoded = match serde_json::to_value(&envelope)
            .map_err(|e| OuroborosError::serialization("push_state", e))
            .and_then(|value| precheck(&value))
            .and_then(|()| encode(&envelope))
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "envelope failed pre-check, nothing written");
                return PushOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        self.transition(SessionStatus::Syncing);
        let outcome = if manual {
            self.write_manual(&session, &encoded).await
        } else {
            self.write_primary(&session, &encoded).await
        };

        if outcome.is_synced() {
            self.last_synced_at = Some(envelope.last_synced_at);
        }
        self.finish_sync(matches!(outcome, PushOutcome::Expired));
        outcome
    }

    async fn write_primary(&self, session: &SessionHandle, encoded: &str) -> PushOutcome {
        let container = session.container_id();

        let backup = match snapshot_before_write(&self.gateway, session, container).await {
            Ok(backup) => backup,
            Err(e) if e.is_session_expired() => return PushOutcome::Expired,
            Err(e) => {
                return PushOutcome::Failed {
                    message: e.user_message(),
                    backup: None,
                }
            }
        };

        match self
            .gateway
            .write_envelope(session, container, encoded, EnvelopeWrite::Primary)
            .await
        {
            Ok(object_id) => {
                info!(object_id = %object_id, "state pushed");
                PushOutcome::Synced { object_id, backup }
            }
            Err(e) if e.is_session_expired() => PushOutcome::Expired,
            Err(e) => {
                warn!(error = %e, "primary write failed");
                PushOutcome::Failed {
                    message: e.user_message(),
                    backup: Some(backup),
                }
            }
        }
    }

    async fn write_manual(&self, session: &SessionHandle, encoded: &str) -> PushOutcome {
        let name = self.gateway.naming().manual_name(now_millis());
        match self
            .gateway
            .write_envelope(
                session,
                session.container_id(),
                encoded,
                EnvelopeWrite::Backup { name: name.clone() },
            )
            .await
        {
            Ok(object_id) => {
                info!(object_id = %object_id, name = %name, "manual snapshot written");
                PushOutcome::Snapshot { object_id, name }
            }
            Err(e) if e.is_session_expired() => PushOutcome::Expired,
            Err(e) => {
                warn!(error = %e, "manual snapshot failed");
                PushOutcome::Failed {
                    message: e.user_message(),
                    backup: None,
                }
            }
        }
    }

    async fn push_current(&mut self, manual: bool) -> PushOutcome {
        let AgentState { memory, focus } = self.state.clone();
        self.push_state(&memory, &focus, manual).await
    }

    /// Write a manual snapshot of the working state
    pub async fn backup_now(&mut self) -> PushOutcome {
        self.push_current(true).await
    }

    /// Automatic backups and manual snapshots, most recent first
    pub async fn list_restore_points(&mut self) -> OuroborosResult<Vec<RestorePoint>> {
        let session = self
            .active_session()
            .ok_or_else(|| self.not_connected("list_restore_points"))?;

        let listed = self
            .gateway
            .list_objects(&session, session.container_id(), &ObjectFilter::all())
            .await
            .map_err(|e| self.absorb(e))?;

        let naming = self.gateway.naming();
        Ok(listed
            .into_iter()
            .filter(|o| naming.is_restore_point(&o.name))
            .map(|o| RestorePoint {
                manual: o.name.starts_with(&naming.manual_prefix),
                id: o.id,
                name: o.name,
                modified_at: o.modified_at,
            })
            .collect())
    }

    /// Replace the working state from a restore point
    pub async fn restore(&mut self, object_id: &str) -> PullOutcome {
        self.pull_state(Some(object_id)).await
    }

    /// Run one reconciliation turn and push the result
    ///
    /// On any failure the instruction is kept as the draft so it can be
    /// resubmitted.
    pub async fn submit_turn(&mut self, instruction: &str) -> TurnReport {
        self.run_turn(instruction, true).await
    }

    async fn run_turn(&mut self, instruction: &str, keep_as_draft: bool) -> TurnReport {
        if instruction.trim().is_empty() {
            return TurnReport::Ignored {
                reason: "Nothing to send.".to_string(),
            };
        }
        let Some(session) = self.active_session() else {
            return TurnReport::Ignored {
                reason: format!("Cannot send while {}.", self.status),
            };
        };

        if keep_as_draft {
            self.draft.clear();
            self.record_volatile();
        }

        let result = self.engine.reconcile(&session, instruction, &self.state).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if keep_as_draft {
                    self.draft = instruction.to_string();
                    self.record_volatile();
                }
                let e = self.absorb(e);
                return match e {
                    OuroborosError::SessionExpired { .. } => TurnReport::Expired,
                    OuroborosError::IntegrityViolation { .. } => TurnReport::Rejected {
                        message: e.user_message(),
                    },
                    other => TurnReport::Failed {
                        category: other.category(),
                        message: other.user_message(),
                    },
                };
            }
        };

        self.state = outcome.next_state;
        self.record_volatile();
        let sync = self.push_current(false).await;

        TurnReport::Completed {
            response: outcome.response,
            tools: outcome.tools,
            focus_carried_over: outcome.focus_carried_over,
            sync,
        }
    }

    /// Replace the working state from an exported `{memory, focus}` document and push it
    pub async fn import_state(&mut self, raw: &str) -> ImportOutcome {
        let (memory, focus) = match parse_import(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "import rejected");
                return ImportOutcome::Invalid {
                    reason: e.to_string(),
                };
            }
        };

        self.state = AgentState { memory, focus };
        self.record_volatile();
        info!(projects = self.state.memory.projects.len(), "state imported");
        ImportOutcome::Imported {
            sync: self.push_current(false).await,
        }
    }

    /// Pretty `{memory, focus}` with a dated file name
    pub fn export_snapshot(&self) -> OuroborosResult<ExportedSnapshot> {
        let contents = serde_json::to_string_pretty(&json!({
            "memory": self.state.memory,
            "focus": self.state.focus,
        }))
        .map_err(|e| OuroborosError::serialization("export_snapshot", e))?;

        Ok(ExportedSnapshot {
            file_name: format!("ouroboros_backup_{}.json", Utc::now().format("%Y-%m-%d")),
            contents,
        })
    }

    /// Restore the built-in state and wipe local slots
    ///
    /// Remote objects are untouched; the next push overwrites the primary
    /// after backing it up.
    pub fn reset(&mut self) -> OuroborosResult<()> {
        self.state = initial_state();
        self.draft.clear();
        if let Some(cache) = &self.volatile {
            cache.dismiss()?;
            cache.clear_history()?;
        }
        info!("working state reset to defaults");
        Ok(())
    }

    /// Recovery slot content, if it is worth offering
    pub fn pending_recovery(&self) -> Option<VolatileSnapshot> {
        let cache = self.volatile.as_ref()?;
        cache.pending_recovery(&initial_state().focus)
    }

    /// Restore draft and focus from the recovery slot
    pub fn recover_volatile(&mut self) -> OuroborosResult<bool> {
        let Some(cache) = self.volatile.clone() else {
            return Ok(false);
        };
        match cache.recover()? {
            Some(snapshot) => {
                self.draft = snapshot.draft_input;
                self.state.focus = snapshot.focus;
                info!("draft and focus recovered from local slot");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decline the recovery offer
    pub fn dismiss_recovery(&self) -> OuroborosResult<()> {
        match &self.volatile {
            Some(cache) => cache.dismiss(),
            None => Ok(()),
        }
    }

    /// Upload files into the working container, one at a time
    ///
    /// Stops at the first expiry; files not attempted are reported as failed.
    pub async fn upload_artifacts(&mut self, artifacts: Vec<Artifact>) -> UploadReport {
        let mut report = UploadReport::default();
        let session = self.active_session();
        let mut halted: Option<String> = match &session {
            Some(_) => None,
            None => Some(format!("not uploaded while {}", self.status)),
        };

        for artifact in artifacts {
            let name = artifact.name.clone();
            if let Some(reason) = &halted {
                report.failed.push((name, reason.clone()));
                continue;
            }
            let Some(session) = &session else {
                continue;
            };

            match self
                .gateway
                .upload_raw_artifact(session, session.container_id(), artifact)
                .await
            {
                Ok(id) => report.uploaded.push((name, id)),
                Err(e) => {
                    warn!(name = %name, error = %e, "artifact upload failed");
                    if e.is_session_expired() {
                        halted = Some("session expired".to_string());
                    }
                    report.failed.push((name, e.user_message()));
                    self.absorb(e);
                }
            }
        }

        info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            "artifact upload finished"
        );
        report
    }

    /// Propose document links for every project
    pub async fn scan_relink(&mut self) -> OuroborosResult<RelinkPlan> {
        let session = self
            .active_session()
            .ok_or_else(|| self.not_connected("scan_relink"))?;
        let files = self
            .gateway
            .list_all_objects(&session, session.container_id())
            .await
            .map_err(|e| self.absorb(e))?;
        Ok(plan_relink(&self.state.memory, &files, self.gateway.naming()))
    }

    /// Submit confirmed links as a maintenance turn
    ///
    /// The draft is left alone whatever the outcome.
    pub async fn apply_relink(&mut self, assignments: &[RelinkAssignment]) -> TurnReport {
        match maintenance_instruction(assignments) {
            Some(instruction) => self.run_turn(&instruction, false).await,
            None => TurnReport::Ignored {
                reason: "No links to update.".to_string(),
            },
        }
    }
}

fn parse_import(raw: &str) -> OuroborosResult<(MemoryState, FocusState)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| OuroborosError::malformed(format!("not valid JSON: {}", e)))?;

    let (Some(memory), Some(focus)) = (value.get("memory"), value.get("focus")) else {
        return Err(OuroborosError::malformed(
            "document must contain memory and focus",
        ));
    };

    let memory = migrate_memory(memory.clone());
    precheck(&json!({ "memory": memory }))?;
    let memory: MemoryState =
        serde_json::from_value(memory).map_err(|e| OuroborosError::malformed(e.to_string()))?;
    let focus: FocusState = serde_json::from_value(migrate_focus(focus.clone()))
        .map_err(|e| OuroborosError::malformed(e.to_string()))?;
    Ok((memory, focus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ScriptedBackend;
    use crate::state::{Project, ProjectStatus};
    use crate::storage::{Fault, InMemoryObjectStore, StaticTokenAuthorizer, StoreOp, StoreOpKind};
    use crate::config::SlotKeys;
    use crate::volatile::{ChatEntry, ChatRole, InMemorySlotStore};

    struct RefusingAuthorizer;

    #[async_trait::async_trait]
    impl Authorizer for RefusingAuthorizer {
        async fn authorize(&self) -> OuroborosResult<crate::storage::AccessToken> {
            Err(OuroborosError::Authorization {
                message: "consent declined".to_string(),
            })
        }
    }

    struct Harness {
        store: Arc<InMemoryObjectStore>,
        backend: Arc<ScriptedBackend>,
        controller: SyncController,
    }

    fn harness() -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(InMemoryObjectStore::new());
        let backend = Arc::new(ScriptedBackend::new());
        let controller = SyncController::new(
            store.clone(),
            backend.clone(),
            Arc::new(StaticTokenAuthorizer::new("token")),
            &OuroborosConfig::default(),
        );
        Harness {
            store,
            backend,
            controller,
        }
    }

    async fn connected() -> Harness {
        let mut h = harness();
        let outcome = h.controller.connect().await;
        assert_eq!(outcome, ConnectOutcome::Connected(PullOutcome::NoRemoteState));
        h
    }

    fn primary_id(h: &Harness) -> String {
        h.store.objects_named("app-data.json")[0].id.clone()
    }

    fn proposal(state: &AgentState, response: &str, extra: usize) -> Value {
        let mut projects = serde_json::to_value(&state.memory.projects).unwrap();
        for i in 0..extra {
            projects
                .as_array_mut()
                .unwrap()
                .push(json!({ "id": format!("new{}", i), "name": format!("New {}", i), "status": "pending", "description": "" }));
        }
        json!({
            "response": response,
            "memory": {
                "directives": state.memory.directives,
                "facts": state.memory.facts,
                "projects": projects
            },
            "focus": { "updatedAt": "2026-10-18T00:00:00Z", "objective": "next step", "reasoningTrace": [], "pendingTasks": [] }
        })
    }

    #[tokio::test]
    async fn test_connect_without_remote_state_keeps_defaults() {
        let h = connected().await;
        assert_eq!(h.controller.status(), SessionStatus::Connected);
        assert_eq!(h.controller.state(), &initial_state());
        assert!(h.controller.last_synced_at().is_none());
    }

    #[tokio::test]
    async fn test_connect_without_token_stays_offline() {
        let mut controller = SyncController::new(
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(ScriptedBackend::new()),
            Arc::new(RefusingAuthorizer),
            &OuroborosConfig::default(),
        );
        let outcome = controller.connect().await;
        assert!(matches!(outcome, ConnectOutcome::Failed { .. }));
        assert_eq!(controller.status(), SessionStatus::Offline);
    }

    #[tokio::test]
    async fn test_expired_pull_keeps_state_and_requires_reconnect() {
        let mut h = connected().await;
        h.controller.push_current(false).await;
        let before = h.controller.state().clone();

        h.store.expire_sessions();
        let outcome = h.controller.pull_state(None).await;

        assert_eq!(outcome, PullOutcome::Expired);
        assert_eq!(h.controller.status(), SessionStatus::Expired);
        assert_eq!(h.controller.state(), &before);
        assert_eq!(h.controller.pull_state(None).await, PullOutcome::NotConnected);
        assert_eq!(h.controller.backup_now().await, PushOutcome::Skipped);

        h.store.renew_sessions();
        let outcome = h.controller.connect().await;
        assert!(matches!(outcome, ConnectOutcome::Connected(PullOutcome::Loaded { .. })));
        assert_eq!(h.controller.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_backup_precedes_primary_overwrite() {
        let mut h = connected().await;
        let first = h.controller.backup_now().await;
        assert!(matches!(first, PushOutcome::Snapshot { .. }));

        let AgentState { memory, focus } = h.controller.state().clone();
        let created = h.controller.push_state(&memory, &focus, false).await;
        assert!(matches!(
            created,
            PushOutcome::Synced { backup: BackupOutcome::Skipped, .. }
        ));
        let original = h.store.content_of(&primary_id(&h)).unwrap();

        h.store.clear_journal();
        let mut focus = focus.clone();
        focus.objective = "changed".to_string();
        let updated = h.controller.push_state(&memory, &focus, false).await;

        let PushOutcome::Synced { backup: BackupOutcome::Created { id: backup_id, .. }, .. } = &updated
        else {
            panic!("expected a backup, got {updated:?}");
        };
        assert_eq!(h.store.content_of(backup_id).unwrap(), original);

        let journal = h.store.journal();
        let backup_at = journal
            .iter()
            .position(|op| matches!(op, StoreOp::Create { id, .. } if id == backup_id))
            .unwrap();
        let primary_at = journal
            .iter()
            .position(|op| matches!(op, StoreOp::Update { .. }))
            .unwrap();
        assert!(backup_at < primary_at);
    }

    #[tokio::test]
    async fn test_failed_backup_still_writes_primary() {
        let mut h = connected().await;
        let AgentState { memory, mut focus } = h.controller.state().clone();
        h.controller.push_state(&memory, &focus, false).await;

        h.store.fail_next(StoreOpKind::Create, Fault::Unavailable);
        focus.objective = "after failure".to_string();
        let outcome = h.controller.push_state(&memory, &focus, false).await;

        let PushOutcome::Synced { backup, .. } = &outcome else {
            panic!("expected sync, got {outcome:?}");
        };
        assert!(matches!(backup, BackupOutcome::Failed { .. }));
        assert!(outcome.message().contains("Backup before write failed"));
        assert!(h
            .store
            .content_of(&primary_id(&h))
            .unwrap()
            .contains("after failure"));
        assert_eq!(h.controller.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_manual_snapshot_never_touches_primary() {
        let mut h = connected().await;
        h.controller.push_current(false).await;
        let before = h.store.content_of(&primary_id(&h)).unwrap();
        h.store.clear_journal();

        let PushOutcome::Snapshot { name, .. } = h.controller.backup_now().await else {
            panic!("expected a snapshot");
        };

        assert!(name.starts_with("app-data.manual-"));
        assert_eq!(h.store.written_names(), vec![name]);
        assert_eq!(h.store.content_of(&primary_id(&h)).unwrap(), before);
    }

    #[tokio::test]
    async fn test_restore_points_and_restore() {
        let mut h = connected().await;
        let mut state = h.controller.state().clone();
        state.focus.objective = "old objective".to_string();
        h.controller.push_state(&state.memory, &state.focus, false).await;
        state.focus.objective = "new objective".to_string();
        h.controller.push_state(&state.memory, &state.focus, false).await;
        h.controller.backup_now().await;
        h.store.insert(Some(h.controller.session().unwrap().container_id()), "notes.md", "text/markdown", "n");

        let points = h.controller.list_restore_points().await.unwrap();
        assert_eq!(points.len(), 2);
        assert!(points[0].manual);
        assert!(!points[1].manual);

        let outcome = h.controller.restore(&points[1].id).await;
        assert!(matches!(outcome, PullOutcome::Loaded { .. }));
        assert_eq!(h.controller.state().focus.objective, "old objective");
    }

    #[tokio::test]
    async fn test_corrupt_primary_is_unusable_not_fatal() {
        let mut h = harness();
        let container = h.store.insert_container("Ouroboros");
        h.store.insert(Some(&container), "app-data.json", "application/json", "{\"memory\":{}}");

        let outcome = h.controller.connect().await;
        assert!(matches!(
            outcome,
            ConnectOutcome::Connected(PullOutcome::Unusable { .. })
        ));
        assert_eq!(h.controller.state(), &initial_state());
        assert_eq!(h.controller.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_corrupt_primary_on_reconnect_falls_back_to_defaults() {
        let mut h = connected().await;
        h.backend.push_proposal(proposal(h.controller.state(), "Added.", 1));
        assert!(matches!(
            h.controller.submit_turn("track a new project").await,
            TurnReport::Completed { .. }
        ));
        assert_ne!(h.controller.state(), &initial_state());

        let container = h.controller.session().unwrap().container_id().to_string();
        h.store.insert(Some(&container), "app-data.json", "application/json", "not json");
        h.controller.disconnect();

        let outcome = h.controller.connect().await;
        assert!(matches!(
            outcome,
            ConnectOutcome::Connected(PullOutcome::Unusable { .. })
        ));
        assert_eq!(h.controller.state(), &initial_state());
        assert!(h.controller.last_synced_at().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_restore_point_keeps_current_state() {
        let mut h = connected().await;
        h.backend.push_proposal(proposal(h.controller.state(), "Added.", 1));
        h.controller.submit_turn("track a new project").await;
        let before = h.controller.state().clone();

        let container = h.controller.session().unwrap().container_id().to_string();
        let broken = h.store.insert(
            Some(&container),
            "app-data.backup-20260101T000000.000Z.json",
            "application/json",
            "{\"memory\":{}}",
        );

        let outcome = h.controller.restore(&broken).await;
        assert!(matches!(outcome, PullOutcome::Unusable { .. }));
        assert_eq!(h.controller.state(), &before);
    }

    #[tokio::test]
    async fn test_turn_replaces_state_and_pushes_once() {
        let mut h = connected().await;
        let proposal = proposal(h.controller.state(), "Added a project.", 1);
        h.backend.push_proposal(proposal);
        h.store.clear_journal();

        let report = h.controller.submit_turn("track a new project").await;

        let TurnReport::Completed { sync, .. } = &report else {
            panic!("expected completion, got {report:?}");
        };
        assert!(sync.is_synced());
        assert_eq!(report.message(), "Added a project.");
        assert_eq!(
            h.controller.state().memory.projects.len(),
            initial_state().memory.projects.len() + 1
        );
        let primary_writes = h
            .store
            .written_names()
            .into_iter()
            .filter(|name| name == "app-data.json")
            .count();
        assert_eq!(primary_writes, 1);
        assert!(h.controller.draft().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_turn_keeps_state_and_draft() {
        let mut h = connected().await;
        let before = h.controller.state().clone();
        let mut shrunk = proposal(&before, "forgot everything", 0);
        shrunk["memory"]["projects"] = json!([]);
        h.backend.push_proposal(shrunk);
        h.store.clear_journal();

        let report = h.controller.submit_turn("summarize").await;

        assert!(matches!(report, TurnReport::Rejected { .. }));
        assert_eq!(h.controller.state(), &before);
        assert_eq!(h.controller.draft(), "summarize");
        assert!(h.store.written_names().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_during_push_marks_session_expired() {
        let mut h = connected().await;
        h.backend
            .push_proposal(proposal(h.controller.state(), "ok", 0));
        h.store.expire_sessions();

        let report = h.controller.submit_turn("continue").await;

        let TurnReport::Completed { sync, .. } = &report else {
            panic!("expected completion, got {report:?}");
        };
        assert_eq!(sync, &PushOutcome::Expired);
        assert!(report.message().contains("Session expired"));
        assert_eq!(h.controller.status(), SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_draft() {
        let mut h = connected().await;
        h.backend
            .push_error(OuroborosError::from_backend_message("quota exceeded"));

        let report = h.controller.submit_turn("hello").await;

        assert!(matches!(
            report,
            TurnReport::Failed { category: "backend_quota", .. }
        ));
        assert_eq!(h.controller.draft(), "hello");
        assert_eq!(h.controller.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_turn_ignored_when_offline_or_empty() {
        let mut h = harness();
        assert!(matches!(
            h.controller.submit_turn("hi").await,
            TurnReport::Ignored { .. }
        ));
        let mut h = connected().await;
        assert!(matches!(
            h.controller.submit_turn("   ").await,
            TurnReport::Ignored { .. }
        ));
        assert_eq!(h.backend.requests().len(), 0);
    }

    #[tokio::test]
    async fn test_find_file_tool_matches_partial_name() {
        let mut h = connected().await;
        let container = h.controller.session().unwrap().container_id().to_string();
        let spec_id = h
            .store
            .insert(Some(&container), "project_spec_v2.md", "text/markdown", "spec");
        let mut reply = proposal(h.controller.state(), "", 0);
        reply["response"] =
            json!(r#"Looking. :::TOOL_REQUEST {"tool":"findFile","args":{"query":"spec"}} :::"#);
        h.backend.push_proposal(reply);

        let report = h.controller.submit_turn("where are the audit notes?").await;

        let TurnReport::Completed { response, .. } = report else {
            panic!("expected completion");
        };
        assert!(response.ends_with(&format!("[SYSTEM: File found matching 'spec'. ID: {}]", spec_id)));
    }

    #[tokio::test]
    async fn test_import_requires_memory_and_focus() {
        let mut h = connected().await;

        let outcome = h.controller.import_state(r#"{"memory": {"directives": [], "projects": []}}"#).await;
        assert!(matches!(outcome, ImportOutcome::Invalid { .. }));

        let outcome = h.controller.import_state("[1, 2]").await;
        assert!(matches!(outcome, ImportOutcome::Invalid { .. }));

        let doc = json!({
            "memory": { "directives": ["imported"], "projects": [{ "id": "i", "name": "Imported", "status": "active", "description": "" }] },
            "focus": { "objective": "from import" }
        });
        let outcome = h.controller.import_state(&doc.to_string()).await;
        assert!(matches!(outcome, ImportOutcome::Imported { ref sync } if sync.is_synced()));
        assert_eq!(h.controller.state().focus.objective, "from import");
        assert!(h
            .store
            .content_of(&primary_id(&h))
            .unwrap()
            .contains("Imported"));
    }

    #[tokio::test]
    async fn test_export_round_trips_through_import() {
        let mut h = connected().await;
        let exported = h.controller.export_snapshot().unwrap();
        assert!(exported.file_name.starts_with("ouroboros_backup_"));
        assert!(exported.file_name.ends_with(".json"));

        h.controller.reset().unwrap();
        let outcome = h.controller.import_state(&exported.contents).await;
        assert!(matches!(outcome, ImportOutcome::Imported { .. }));
        assert_eq!(h.controller.state(), &initial_state());
    }

    #[tokio::test]
    async fn test_reset_and_volatile_recovery() {
        let slots = Arc::new(InMemorySlotStore::new());
        let cache = VolatileCache::new(slots.clone(), SlotKeys::default());
        let mut h = connected().await;
        h.controller = SyncController::new(
            h.store.clone(),
            h.backend.clone(),
            Arc::new(StaticTokenAuthorizer::new("token")),
            &OuroborosConfig::default(),
        )
        .with_volatile_cache(cache.clone());

        h.controller.set_draft("half a thought");
        assert!(h.controller.pending_recovery().is_some());

        let mut restarted = SyncController::new(
            h.store.clone(),
            h.backend.clone(),
            Arc::new(StaticTokenAuthorizer::new("token")),
            &OuroborosConfig::default(),
        )
        .with_volatile_cache(cache.clone());
        assert!(restarted.recover_volatile().unwrap());
        assert_eq!(restarted.draft(), "half a thought");
        assert!(restarted.pending_recovery().is_none());

        restarted.set_draft("again");
        cache
            .append_history(ChatEntry::new(ChatRole::User, "hi"))
            .unwrap();
        restarted.reset().unwrap();
        assert!(restarted.draft().is_empty());
        assert!(cache.snapshot().is_none());
        assert!(cache.load_history().is_empty());
    }

    #[tokio::test]
    async fn test_upload_counts_successes_and_failures() {
        let mut h = connected().await;
        h.store.fail_next(StoreOpKind::Create, Fault::Unavailable);

        let report = h
            .controller
            .upload_artifacts(vec![
                Artifact::text("a.md", "text/markdown", "a"),
                Artifact::text("b.md", "text/markdown", "b"),
            ])
            .await;

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a.md");
        assert!(report.message().starts_with("Uploaded 1 of 2 files."));
    }

    #[tokio::test]
    async fn test_relink_runs_as_maintenance_turn() {
        let mut h = connected().await;
        let container = h.controller.session().unwrap().container_id().to_string();
        let mut state = h.controller.state().clone();
        state.memory.projects = vec![Project::new("atlas", "Atlas", ProjectStatus::Active)];
        h.controller
            .import_state(&serde_json::to_string(&state).unwrap())
            .await;
        let doc = h
            .store
            .insert(Some(&container), "atlas_design.md", "text/markdown", "design");

        let plan = h.controller.scan_relink().await.unwrap();
        let assignments = plan.proposed_assignments();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].file_id, doc);

        let mut reply = proposal(h.controller.state(), "Linked.", 0);
        reply["memory"]["projects"][0]["externalDocumentRef"] = json!(doc);
        h.backend.push_proposal(reply);
        h.controller.set_draft("unrelated draft");

        let report = h.controller.apply_relink(&assignments).await;

        assert!(matches!(report, TurnReport::Completed { .. }));
        assert!(h.backend.requests()[0]
            .instruction
            .starts_with("SYSTEM MAINTENANCE"));
        assert_eq!(
            h.controller.state().memory.projects[0]
                .external_document_ref
                .as_deref(),
            Some(doc.as_str())
        );
        assert_eq!(h.controller.draft(), "unrelated draft");
        assert!(matches!(
            h.controller.apply_relink(&[]).await,
            TurnReport::Ignored { .. }
        ));
    }
}
