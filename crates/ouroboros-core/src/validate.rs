//! Non-loss gate for model proposals
//!
//! A proposal is accepted or rejected as a whole. The gate compares project
//! counts only: a proposal that swaps one project for another of equal count
//! passes.

use crate::error::{OuroborosError, OuroborosResult};
use crate::state::migration::{migrate_focus, migrate_memory};
use crate::state::{AgentState, FocusState, MemoryState};
use serde_json::Value;
use tracing::warn;

/// A proposal that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProposal {
    /// Text reply, tool blocks still embedded
    pub response: String,

    /// Accepted next state
    pub state: AgentState,

    /// Whether the proposal omitted focus and the current one was kept
    pub focus_carried_over: bool,
}

fn field<'a>(proposal: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| proposal.get(*name))
        .filter(|v| !v.is_null())
}

/// Reject memory that lacks `projects`/`directives` or tracks fewer projects
pub fn check_non_loss(current: &MemoryState, proposed: &Value) -> OuroborosResult<()> {
    let previous = current.projects.len();

    let projects = match proposed.get("projects") {
        Some(Value::Array(projects)) => projects,
        Some(Value::Null) | None => {
            return Err(OuroborosError::integrity(
                "proposal is missing the projects list",
                previous,
                None,
            ))
        }
        Some(_) => {
            return Err(OuroborosError::integrity(
                "proposal projects is not a list",
                previous,
                None,
            ))
        }
    };

    if !matches!(proposed.get("directives"), Some(Value::Array(_))) {
        return Err(OuroborosError::integrity(
            "proposal is missing the directives list",
            previous,
            Some(projects.len()),
        ));
    }

    if projects.len() < previous {
        return Err(OuroborosError::integrity(
            format!(
                "proposal tracks {} projects, fewer than the current {}",
                projects.len(),
                previous
            ),
            previous,
            Some(projects.len()),
        ));
    }

    Ok(())
}

/// Turn a raw backend proposal into a validated next state
///
/// Accepts the current field names (`response`, `memory`, `focus`) and the
/// older `text_response`, `updated_memory`, `updated_focus`. Memory and focus
/// run through the legacy-key migrations before typing.
pub fn validate_proposal(current: &AgentState, proposal: Value) -> OuroborosResult<ValidatedProposal> {
    if !proposal.is_object() {
        return Err(OuroborosError::BackendMalformedResponse {
            message: "proposal is not a JSON object".to_string(),
        });
    }
    let previous = current.memory.projects.len();

    let memory = field(&proposal, &["memory", "updated_memory"])
        .cloned()
        .map(migrate_memory)
        .ok_or_else(|| OuroborosError::integrity("proposal is missing memory", previous, None))?;
    check_non_loss(&current.memory, &memory)?;

    let memory: MemoryState = serde_json::from_value(memory).map_err(|e| {
        OuroborosError::BackendMalformedResponse {
            message: format!("memory: {}", e),
        }
    })?;

    let duplicates = memory.duplicate_project_ids();
    if !duplicates.is_empty() {
        return Err(OuroborosError::integrity(
            format!("proposal repeats project ids: {}", duplicates.join(", ")),
            previous,
            Some(memory.projects.len()),
        ));
    }

    let (focus, focus_carried_over) = match field(&proposal, &["focus", "updated_focus"]) {
        Some(focus) => {
            let focus: FocusState = serde_json::from_value(migrate_focus(focus.clone())).map_err(
                |e| OuroborosError::BackendMalformedResponse {
                    message: format!("focus: {}", e),
                },
            )?;
            (focus, false)
        }
        None => {
            warn!("proposal omitted focus, keeping the current focus");
            (current.focus.clone(), true)
        }
    };

    let response = field(&proposal, &["response", "text_response"])
        .and_then(Value::as_str)
        .ok_or_else(|| OuroborosError::BackendMalformedResponse {
            message: "proposal has no response text".to_string(),
        })?
        .to_string();

    Ok(ValidatedProposal {
        response,
        state: AgentState { memory, focus },
        focus_carried_over,
    })
}
