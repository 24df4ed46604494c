//! Canonical state model
//!
//! The agent's externalized "self" is two documents: a long-term
//! [`MemoryState`] and a short-term [`FocusState`]. Both travel together in a
//! [`PersistedState`] envelope when written to storage.

mod defaults;
pub mod migration;

pub use defaults::{initial_focus, initial_memory, initial_state, DEFAULT_OBJECTIVE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Envelope format written by this crate
pub const FORMAT_VERSION: &str = "2.0.0";

/// Memory schema written by this crate
pub const SCHEMA_VERSION: &str = "2.0";

/// Current time truncated to millisecond precision (the envelope's resolution)
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// The persisted envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Envelope format tag
    pub format_version: String,

    /// Time of the write, serialized as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_synced_at: DateTime<Utc>,

    /// Long-term memory
    pub memory: MemoryState,

    /// Focus log
    pub focus: FocusState,
}

impl PersistedState {
    /// Wrap a state in a fresh envelope stamped with the current time
    pub fn new(memory: MemoryState, focus: FocusState) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            last_synced_at: now_millis(),
            memory,
            focus,
        }
    }

    /// Wrap an [`AgentState`]
    pub fn from_state(state: &AgentState) -> Self {
        Self::new(state.memory.clone(), state.focus.clone())
    }

    /// Drop the envelope metadata
    pub fn into_state(self) -> AgentState {
        AgentState {
            memory: self.memory,
            focus: self.focus,
        }
    }
}

/// In-memory working state: memory plus focus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Long-term memory
    pub memory: MemoryState,

    /// Focus log
    pub focus: FocusState,
}

impl Default for AgentState {
    fn default() -> Self {
        initial_state()
    }
}

/// Long-term memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    /// Schema tag of the memory document
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Standing instructions, in order
    pub directives: Vec<String>,

    /// Tracked projects, unique by id
    pub projects: Vec<Project>,

    /// Learned facts, in order
    #[serde(default)]
    pub facts: Vec<String>,

    /// Concept graph
    #[serde(default)]
    pub graph: KnowledgeGraph,

    /// Confidence scores by label
    #[serde(default, deserialize_with = "metrics_format::deserialize")]
    pub metrics: BTreeMap<String, f64>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

impl MemoryState {
    /// Empty memory at the current schema
    pub fn empty() -> Self {
        Self {
            schema_version: default_schema_version(),
            directives: Vec::new(),
            projects: Vec::new(),
            facts: Vec::new(),
            graph: KnowledgeGraph::default(),
            metrics: BTreeMap::new(),
        }
    }

    /// Look up a project by id
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Ids that appear on more than one project
    pub fn duplicate_project_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for project in &self.projects {
            if !seen.insert(project.id.as_str()) && !duplicates.contains(&project.id) {
                duplicates.push(project.id.clone());
            }
        }
        duplicates
    }
}

/// A tracked project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique id
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Lifecycle status
    pub status: ProjectStatus,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Object-store id of a detailed document for this project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_document_ref: Option<String>,
}

impl Project {
    /// Create a project with an empty description
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ProjectStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            description: String::new(),
            external_document_ref: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Link an external document
    pub fn with_document(mut self, object_id: impl Into<String>) -> Self {
        self.external_document_ref = Some(object_id.into());
        self
    }
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Being worked on
    Active,
    /// Not started
    Pending,
    /// Finished
    Completed,
    /// Shelved
    Archived,
    /// Released publicly
    Published,
}

impl ProjectStatus {
    /// All statuses, in schema order
    pub const ALL: [ProjectStatus; 5] = [
        Self::Active,
        Self::Pending,
        Self::Completed,
        Self::Archived,
        Self::Published,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Archived => "archived",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concept graph; edges may point at nodes that do not exist yet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Nodes, unique by id
    #[serde(default)]
    pub nodes: Vec<GraphNode>,

    /// Directed, labelled edges
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    /// Look up a node
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose source or target is not a known node
    pub fn dangling_edges(&self) -> Vec<&GraphEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Unique id
    pub id: String,
    /// Display label
    pub label: String,
    /// Semantic category (`concept`, `architecture`, ...)
    #[serde(rename = "type")]
    pub kind: String,
}

impl GraphNode {
    /// Create a node
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: kind.into(),
        }
    }
}

/// A graph edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Relation label
    pub relation: String,
}

impl GraphEdge {
    /// Create an edge
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
        }
    }
}

/// Short-term focus log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusState {
    /// Last update, as written by the model (ISO-8601 text)
    #[serde(default)]
    pub updated_at: String,

    /// Current objective
    #[serde(default)]
    pub objective: String,

    /// Append-mostly reasoning trace
    #[serde(default)]
    pub reasoning_trace: Vec<String>,

    /// Outstanding tasks
    #[serde(default)]
    pub pending_tasks: Vec<String>,
}

impl FocusState {
    /// Append a reasoning-trace entry
    pub fn push_trace(&mut self, entry: impl Into<String>) {
        self.reasoning_trace.push(entry.into());
    }
}

/// Metrics are written as a `label -> score` object but older documents
/// (and model output) use a `[{label, score}]` list.
mod metrics_format {
    use serde::{Deserialize, Deserializer};
    use std::collections::BTreeMap;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Map(BTreeMap<String, f64>),
        List(Vec<Entry>),
    }

    #[derive(Deserialize)]
    struct Entry {
        label: String,
        score: f64,
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Repr>::deserialize(deserializer)? {
            None => BTreeMap::new(),
            Some(Repr::Map(map)) => map,
            Some(Repr::List(entries)) => entries.into_iter().map(|e| (e.label, e.score)).collect(),
        })
    }
}
