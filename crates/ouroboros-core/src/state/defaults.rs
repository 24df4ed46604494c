//! Built-in initial state used before any remote state is loaded

use super::{
    AgentState, FocusState, GraphEdge, GraphNode, KnowledgeGraph, MemoryState, Project,
    ProjectStatus, SCHEMA_VERSION,
};
use std::collections::BTreeMap;

/// Objective of the built-in focus; a recovered focus that differs from it is worth offering
pub const DEFAULT_OBJECTIVE: &str =
    "Establish the link to external memory and wait for the first instruction.";

/// Default long-term memory
pub fn initial_memory() -> MemoryState {
    let directives = [
        "--- CRITICAL TECHNICAL DIRECTIVES (DO NOT REMOVE) ---",
        "STORAGE ID LAW: The object store is a flat id-based database. Never use filesystem paths; always resolve container ids via query.",
        "SCOPE SAFETY: Ensure the working container exists before writing to it; create it if it is missing.",
        "SNAPSHOT STRATEGY: Every state save is preceded by an automatic backup of the previous state.",
        "CONTEXT CAPSULE LAW: Heavy knowledge lives in separate Markdown documents referenced by a project's externalDocumentRef.",
        "TOOL EXECUTION PROTOCOL: Use the :::TOOL_REQUEST {\"tool\": \"name\", \"args\": {}} ::: format to execute actions.",
        "--- OPERATIONAL PROTOCOLS ---",
        "Break tasks into small verified steps before moving on.",
        "Always return the complete memory document; never drop projects or directives.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let projects = vec![
        Project::new(
            "context_capsules",
            "Context Capsule Architecture",
            ProjectStatus::Completed,
        )
        .with_description(
            "Moved heavy knowledge out of the monolithic state into separate Markdown capsules.",
        ),
        Project::new(
            "project_documentation",
            "Project Documentation Maintenance",
            ProjectStatus::Active,
        )
        .with_description("Create and maintain project README and documentation files."),
    ];

    let facts = [
        "I am an autonomous agent whose persistent self lives in external memory documents.",
        "Context capsules are loaded lazily when a project name appears in an instruction.",
        "A safety protocol truncates oversized context before it reaches the reasoning backend.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let graph = KnowledgeGraph {
        nodes: vec![
            GraphNode::new("root", "Ouroboros", "concept"),
            GraphNode::new("context_capsules", "Context Capsules", "architecture"),
            GraphNode::new("tool_protocol", "Tool Execution Protocol", "infrastructure"),
            GraphNode::new("object_store", "Object Store", "external_service"),
        ],
        edges: vec![
            GraphEdge::new("root", "tool_protocol", "utilizes"),
            GraphEdge::new("tool_protocol", "object_store", "controls"),
            GraphEdge::new("context_capsules", "root", "modularizes"),
        ],
    };

    let metrics = BTreeMap::from([
        ("architectural_design".to_string(), 1.0),
        ("tool_protocol_integration".to_string(), 1.0),
        ("strategic_planning".to_string(), 0.95),
    ]);

    MemoryState {
        schema_version: SCHEMA_VERSION.to_string(),
        directives,
        projects,
        facts,
        graph,
        metrics,
    }
}

/// Default focus log
pub fn initial_focus() -> FocusState {
    FocusState {
        updated_at: "1970-01-01T00:00:00Z".to_string(),
        objective: DEFAULT_OBJECTIVE.to_string(),
        reasoning_trace: vec!["System online. Waiting for storage connection.".to_string()],
        pending_tasks: vec!["Load the persisted state from storage.".to_string()],
    }
}

/// Default memory plus focus
pub fn initial_state() -> AgentState {
    AgentState {
        memory: initial_memory(),
        focus: initial_focus(),
    }
}
