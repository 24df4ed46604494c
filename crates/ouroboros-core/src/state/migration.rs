//! Versioned migrations of persisted documents
//!
//! Version 1 documents used snake_case keys (`app_version`, `core_instructions`,
//! `active_projects`, ...) and a list of `{label, score}` confidence metrics.
//! Version 2 is the camelCase layout defined in [`crate::state`]. Migrations work
//! on raw JSON so they run before typed decoding.

use serde_json::{Map, Value};

/// Detected layout of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentVersion {
    /// snake_case layout
    V1,
    /// camelCase layout
    V2,
}

const ENVELOPE_RENAMES: &[(&str, &str)] = &[
    ("app_version", "formatVersion"),
    ("last_sync_timestamp", "lastSyncedAt"),
];

const MEMORY_RENAMES: &[(&str, &str)] = &[
    ("schema_version", "schemaVersion"),
    ("core_instructions", "directives"),
    ("active_projects", "projects"),
    ("learned_truths", "facts"),
    ("knowledge_graph", "graph"),
    ("confidence_metrics", "metrics"),
];

const PROJECT_RENAMES: &[(&str, &str)] = &[("detailed_spec_file_id", "externalDocumentRef")];

const FOCUS_RENAMES: &[(&str, &str)] = &[
    ("last_updated", "updatedAt"),
    ("current_objective", "objective"),
    ("chain_of_thought", "reasoningTrace"),
    ("pending_tasks", "pendingTasks"),
];

/// Detect the layout of an envelope
pub fn detect_version(envelope: &Value) -> DocumentVersion {
    let has_legacy_envelope = ENVELOPE_RENAMES
        .iter()
        .any(|(legacy, _)| envelope.get(legacy).is_some());
    let has_legacy_memory = envelope
        .get("memory")
        .map(|m| memory_version(m) == DocumentVersion::V1)
        .unwrap_or(false);

    if has_legacy_envelope || has_legacy_memory {
        DocumentVersion::V1
    } else {
        DocumentVersion::V2
    }
}

fn memory_version(memory: &Value) -> DocumentVersion {
    if MEMORY_RENAMES
        .iter()
        .any(|(legacy, _)| memory.get(legacy).is_some())
    {
        DocumentVersion::V1
    } else {
        DocumentVersion::V2
    }
}

/// Bring an envelope to the current layout; current documents pass through
pub fn migrate_envelope(envelope: Value) -> Value {
    match detect_version(&envelope) {
        DocumentVersion::V2 => envelope,
        DocumentVersion::V1 => migrate_envelope_v1_to_v2(envelope),
    }
}

/// v1 -> v2 for a whole envelope
pub fn migrate_envelope_v1_to_v2(envelope: Value) -> Value {
    let mut map = match envelope {
        Value::Object(map) => map,
        other => return other,
    };

    rename_keys(&mut map, ENVELOPE_RENAMES);

    if let Some(memory) = map.remove("memory") {
        map.insert("memory".to_string(), migrate_memory(memory));
    }
    if let Some(focus) = map.remove("focus") {
        map.insert("focus".to_string(), migrate_focus(focus));
    }

    Value::Object(map)
}

/// Bring a memory document to the current layout
pub fn migrate_memory(memory: Value) -> Value {
    let mut map = match memory {
        Value::Object(map) => map,
        other => return other,
    };

    rename_keys(&mut map, MEMORY_RENAMES);

    if let Some(Value::Array(projects)) = map.get_mut("projects") {
        for project in projects.iter_mut() {
            if let Value::Object(project) = project {
                rename_keys(project, PROJECT_RENAMES);
            }
        }
    }

    let listed_metrics = match map.get("metrics") {
        Some(Value::Array(entries)) => Some(metrics_list_to_map(entries)),
        _ => None,
    };
    if let Some(metrics) = listed_metrics {
        map.insert("metrics".to_string(), Value::Object(metrics));
    }

    Value::Object(map)
}

/// Bring a focus document to the current layout
pub fn migrate_focus(focus: Value) -> Value {
    let mut map = match focus {
        Value::Object(map) => map,
        other => return other,
    };
    rename_keys(&mut map, FOCUS_RENAMES);
    Value::Object(map)
}

fn metrics_list_to_map(entries: &[Value]) -> Map<String, Value> {
    let mut metrics = Map::new();
    for entry in entries {
        if let (Some(label), Some(score)) = (
            entry.get("label").and_then(Value::as_str),
            entry.get("score").filter(|s| s.is_number()),
        ) {
            metrics.insert(label.to_string(), score.clone());
        }
    }
    metrics
}

fn rename_keys(map: &mut Map<String, Value>, renames: &[(&str, &str)]) {
    for (legacy, current) in renames {
        if map.contains_key(*current) {
            map.remove(*legacy);
            continue;
        }
        if let Some(value) = map.remove(*legacy) {
            map.insert(current.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_envelope() -> Value {
        json!({
            "app_version": "1.3.1",
            "last_sync_timestamp": 1_700_000_000_000_i64,
            "memory": {
                "schema_version": "1.3",
                "core_instructions": ["keep state"],
                "active_projects": [{
                    "id": "p1",
                    "name": "Recursive Optimization",
                    "status": "active",
                    "description": "phase 2",
                    "detailed_spec_file_id": "file-9"
                }],
                "learned_truths": ["fact"],
                "knowledge_graph": { "nodes": [], "edges": [] },
                "confidence_metrics": [{ "label": "planning", "score": 0.9 }]
            },
            "focus": {
                "last_updated": "2023-10-27T20:30:00Z",
                "current_objective": "optimize",
                "chain_of_thought": ["step"],
                "pending_tasks": ["task"]
            }
        })
    }

    #[test]
    fn test_detects_legacy_layout() {
        assert_eq!(detect_version(&legacy_envelope()), DocumentVersion::V1);
        assert_eq!(
            detect_version(&json!({ "formatVersion": "2.0.0", "memory": { "directives": [] } })),
            DocumentVersion::V2
        );
    }

    #[test]
    fn test_v1_to_v2_renames_everything() {
        let migrated = migrate_envelope(legacy_envelope());

        assert_eq!(migrated["formatVersion"], "1.3.1");
        assert_eq!(migrated["lastSyncedAt"], 1_700_000_000_000_i64);
        assert_eq!(migrated["memory"]["directives"][0], "keep state");
        assert_eq!(
            migrated["memory"]["projects"][0]["externalDocumentRef"],
            "file-9"
        );
        assert_eq!(migrated["memory"]["metrics"]["planning"], 0.9);
        assert_eq!(migrated["focus"]["objective"], "optimize");
        assert_eq!(migrated["focus"]["reasoningTrace"][0], "step");
        assert!(migrated["memory"].get("core_instructions").is_none());
    }

    #[test]
    fn test_current_keys_win_over_legacy_duplicates() {
        let memory = migrate_memory(json!({
            "directives": ["new"],
            "core_instructions": ["old"],
            "projects": []
        }));
        assert_eq!(memory["directives"][0], "new");
        assert!(memory.get("core_instructions").is_none());
    }

    #[test]
    fn test_current_envelope_passes_through() {
        let current = json!({ "formatVersion": "2.0.0", "memory": { "directives": [], "projects": [] } });
        assert_eq!(migrate_envelope(current.clone()), current);
    }
}
