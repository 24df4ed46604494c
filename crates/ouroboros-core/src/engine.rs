//! Reconciliation engine
//!
//! One turn runs assemble → budget → propose → validate → apply effects.
//! `reconcile` takes `&mut self`, so a second turn cannot start while one is
//! in flight.

use crate::config::ContextBudget;
use crate::context::{assemble_context, enforce_budget};
use crate::error::{OuroborosError, OuroborosResult};
use crate::reasoning::{build_system_context, response_shape, ProposalRequest, ReasoningBackend};
use crate::state::AgentState;
use crate::storage::{SessionHandle, StorageGateway};
use crate::tools::{parse_tool_requests, ToolReport, ToolRunner};
use crate::validate::validate_proposal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the engine is in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No turn has run yet
    Idle,
    /// Waiting on the reasoning backend
    AwaitingProposal,
    /// Checking the proposal against the non-loss rules
    Validating,
    /// Running embedded tool requests
    ApplyingToolEffects,
    /// Last turn produced a new state
    Committed,
    /// Last turn was rejected; the caller's state is untouched
    Rejected,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingProposal => "awaiting_proposal",
            Self::Validating => "validating",
            Self::ApplyingToolEffects => "applying_tool_effects",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Result of a committed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Response text with tool markers appended
    pub response: String,

    /// Accepted next state; persisting it is the caller's job
    pub next_state: AgentState,

    /// What the embedded tool requests did
    pub tools: ToolReport,

    /// Whether the proposal omitted focus
    pub focus_carried_over: bool,
}

/// Drives one reconciliation turn at a time
pub struct ReconciliationEngine {
    gateway: StorageGateway,
    backend: Arc<dyn ReasoningBackend>,
    budget: ContextBudget,
    phase: EnginePhase,
}

impl fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("backend", &self.backend.name())
            .field("budget", &self.budget)
            .field("phase", &self.phase)
            .finish()
    }
}

impl ReconciliationEngine {
    /// Create an engine
    pub fn new(
        gateway: StorageGateway,
        backend: Arc<dyn ReasoningBackend>,
        budget: ContextBudget,
    ) -> Self {
        Self {
            gateway,
            backend,
            budget,
            phase: EnginePhase::Idle,
        }
    }

    /// Current phase
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    fn enter(&mut self, phase: EnginePhase) {
        debug!(from = %self.phase, to = %phase, "engine phase");
        self.phase = phase;
    }

    /// Run one turn against `current`
    ///
    /// `current` is only read. On any error the engine ends in
    /// [`EnginePhase::Rejected`] and no state is produced.
    pub async fn reconcile(
        &mut self,
        session: &SessionHandle,
        instruction: &str,
        current: &AgentState,
    ) -> OuroborosResult<TurnOutcome> {
        self.enter(EnginePhase::AwaitingProposal);

        match self.run(session, instruction, current).await {
            Ok(outcome) => {
                self.enter(EnginePhase::Committed);
                info!(
                    projects = outcome.next_state.memory.projects.len(),
                    tool_effects = outcome.tools.markers.len(),
                    "turn committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.enter(EnginePhase::Rejected);
                match &e {
                    OuroborosError::IntegrityViolation { reason, .. } => {
                        warn!(reason = %reason, "proposal rejected by non-loss gate")
                    }
                    other => warn!(category = other.category(), error = %other, "turn failed"),
                }
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        session: &SessionHandle,
        instruction: &str,
        current: &AgentState,
    ) -> OuroborosResult<TurnOutcome> {
        let request = self.prepare(session, instruction, current).await?;
        let raw = self.backend.propose(&request).await?;

        self.enter(EnginePhase::Validating);
        let validated = validate_proposal(current, raw)?;

        self.enter(EnginePhase::ApplyingToolEffects);
        let blocks = parse_tool_requests(&validated.response);
        let tools = if blocks.is_empty() {
            ToolReport::default()
        } else {
            ToolRunner::new(&self.gateway, session).execute(&blocks).await
        };

        let mut next_state = validated.state;
        next_state.focus.reasoning_trace.extend(tools.trace.iter().cloned());

        Ok(TurnOutcome {
            response: tools.annotate(&validated.response),
            next_state,
            tools,
            focus_carried_over: validated.focus_carried_over,
        })
    }

    /// Build the backend request: capsules, state, budget
    pub async fn prepare(
        &self,
        session: &SessionHandle,
        instruction: &str,
        current: &AgentState,
    ) -> OuroborosResult<ProposalRequest> {
        let auxiliary = assemble_context(&self.gateway, session, &current.memory, instruction).await;
        let context = build_system_context(current, &auxiliary)?;

        let remaining = ContextBudget {
            max_chars: self
                .budget
                .max_chars
                .saturating_sub(instruction.chars().count()),
            ..self.budget
        };
        let system_context = enforce_budget(&context, &remaining);

        Ok(ProposalRequest {
            instruction: instruction.to_string(),
            system_context,
            response_shape: response_shape(),
        })
    }
}
