//! Reasoning backend seam
//!
//! The engine hands a [`ProposalRequest`] to a [`ReasoningBackend`] and gets
//! back an untyped JSON proposal. Typing and validation happen afterwards in
//! [`crate::validate`], so a backend never has to be trusted with the shape.

use crate::error::{OuroborosError, OuroborosResult};
use crate::state::{AgentState, ProjectStatus};
use async_trait::async_trait;
use ouroboros_llm::schema;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

/// Input of one reasoning call
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRequest {
    /// The user's instruction, never truncated
    pub instruction: String,

    /// Budgeted system context: protocol, current state and capsules
    pub system_context: String,

    /// Shape the proposal must satisfy
    pub response_shape: Value,
}

/// A hosted model (or a stand-in) that proposes the next state
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Produce a raw proposal `{response, memory, focus}`
    async fn propose(&self, request: &ProposalRequest) -> OuroborosResult<Value>;

    /// Short name for logs
    fn name(&self) -> &str {
        "reasoning-backend"
    }
}

/// Schema requiring a response string plus complete replacement memory and focus
pub fn response_shape() -> Value {
    let statuses: Vec<&str> = ProjectStatus::ALL.iter().map(|s| s.as_str()).collect();

    let project = schema::object(
        vec![
            ("id", schema::string()),
            ("name", schema::string()),
            ("status", schema::enumeration(&statuses)),
            ("description", schema::string()),
            (
                "externalDocumentRef",
                schema::described_string("Object id of the project's context capsule document"),
            ),
        ],
        &["id", "name", "status", "description"],
    );

    let graph = schema::object(
        vec![
            (
                "nodes",
                schema::array(schema::object(
                    vec![
                        ("id", schema::string()),
                        ("label", schema::string()),
                        ("type", schema::string()),
                    ],
                    &["id", "label", "type"],
                )),
            ),
            (
                "edges",
                schema::array(schema::object(
                    vec![
                        ("source", schema::string()),
                        ("target", schema::string()),
                        ("relation", schema::string()),
                    ],
                    &["source", "target", "relation"],
                )),
            ),
        ],
        &["nodes", "edges"],
    );

    // Free-form maps are not expressible, so metrics travel as a list.
    let metrics = schema::array(schema::object(
        vec![("label", schema::string()), ("score", schema::number())],
        &["label", "score"],
    ));

    let memory = schema::object(
        vec![
            ("schemaVersion", schema::string()),
            ("directives", schema::array(schema::string())),
            ("projects", schema::array(project)),
            ("facts", schema::array(schema::string())),
            ("graph", graph),
            ("metrics", metrics),
        ],
        &["directives", "projects", "facts", "graph", "metrics"],
    );

    let focus = schema::object(
        vec![
            ("updatedAt", schema::described_string("ISO-8601 timestamp")),
            ("objective", schema::string()),
            ("reasoningTrace", schema::array(schema::string())),
            ("pendingTasks", schema::array(schema::string())),
        ],
        &["updatedAt", "objective", "reasoningTrace", "pendingTasks"],
    );

    schema::object(
        vec![
            (
                "response",
                schema::described_string("Reply to the user, optionally with :::TOOL_REQUEST blocks"),
            ),
            ("memory", schema::with_description(memory, "The COMPLETE updated memory")),
            ("focus", schema::with_description(focus, "The COMPLETE updated focus")),
        ],
        &["response", "memory", "focus"],
    )
}

/// System context: operating protocol, current state, then auxiliary capsules
///
/// Capsules go last so budget truncation drops them before the state.
pub fn build_system_context(state: &AgentState, auxiliary: &str) -> OuroborosResult<String> {
    let memory = serde_json::to_string(&state.memory)
        .map_err(|e| OuroborosError::serialization("build_system_context", e))?;
    let focus = serde_json::to_string(&state.focus)
        .map_err(|e| OuroborosError::serialization("build_system_context", e))?;

    let mut context = String::with_capacity(memory.len() + focus.len() + auxiliary.len() + 2048);
    context.push_str(SYSTEM_PROTOCOL);
    context.push_str("\n--- LONG_TERM_MEMORY ---\n");
    context.push_str(&memory);
    context.push_str("\n\n--- CURRENT_FOCUS ---\n");
    context.push_str(&focus);
    if !auxiliary.is_empty() {
        context.push_str("\n\n--- AUXILIARY CONTEXT ---\n");
        context.push_str(auxiliary);
    }
    Ok(context)
}

const SYSTEM_PROTOCOL: &str = "\
You are an autonomous agent with no internal state between sessions. Your entire self is two documents:
LONG_TERM_MEMORY (knowledge, directives, projects) and CURRENT_FOCUS (objective, reasoning trace, tasks).

For every instruction:
1. Read the current memory and focus.
2. Answer the user in `response`.
3. Return the COMPLETE updated `memory` and `focus`. Never drop directives or projects.
   - Add graph nodes for new concepts.
   - Update project statuses as work starts or finishes.
   - Append your reasoning to focus.reasoningTrace.
4. To act on storage, embed blocks in `response`:
   :::TOOL_REQUEST {\"tool\": \"createFile\", \"args\": {\"name\": \"file.md\", \"content\": \"...\"}} :::
   :::TOOL_REQUEST {\"tool\": \"findFile\", \"args\": {\"query\": \"partial name\"}} :::
";

#[async_trait]
impl ReasoningBackend for ouroboros_llm::Client {
    async fn propose(&self, request: &ProposalRequest) -> OuroborosResult<Value> {
        let structured = ouroboros_llm::StructuredRequest::new(
            request.instruction.clone(),
            request.system_context.clone(),
            request.response_shape.clone(),
        );
        Ok(self.generate_json(&structured).await?)
    }

    fn name(&self) -> &str {
        &self.config().model
    }
}

/// Backend that replays queued replies, for tests and offline demos
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<OuroborosResult<Value>>>,
    requests: Mutex<Vec<ProposalRequest>>,
}

impl ScriptedBackend {
    /// Create a backend with no replies queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a proposal
    pub fn push_proposal(&self, proposal: Value) {
        self.replies.lock().push_back(Ok(proposal));
    }

    /// Queue a failure
    pub fn push_error(&self, error: OuroborosError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ProposalRequest> {
        self.requests.lock().clone()
    }

    /// Replies still queued
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn propose(&self, request: &ProposalRequest) -> OuroborosResult<Value> {
        self.requests.lock().push(request.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or(Err(OuroborosError::BackendEmptyResponse))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
