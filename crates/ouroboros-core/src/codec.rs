//! Envelope encoding, decoding and the backup step that precedes every primary write

use crate::error::{OuroborosError, OuroborosResult};
use crate::state::migration::migrate_envelope;
use crate::state::{now_millis, PersistedState};
use crate::storage::{EnvelopeWrite, MatchMode, SessionHandle, StorageGateway};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Serialize an envelope
///
/// Output is pretty-printed JSON; field order is fixed by the type definitions
/// and maps are ordered, so equal envelopes encode identically.
pub fn encode(envelope: &PersistedState) -> OuroborosResult<String> {
    serde_json::to_string_pretty(envelope).map_err(|e| OuroborosError::serialization("encode", e))
}

/// Parse an envelope, upgrading legacy layouts first
pub fn decode(raw: &str) -> OuroborosResult<PersistedState> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| OuroborosError::malformed(format!("not valid JSON: {}", e)))?;
    let value = migrate_envelope(value);
    precheck(&value)?;
    serde_json::from_value(value).map_err(|e| OuroborosError::malformed(e.to_string()))
}

/// Cheap structural check: `memory.directives` and `memory.projects` must be arrays
pub fn precheck(envelope: &Value) -> OuroborosResult<()> {
    let memory = envelope
        .get("memory")
        .filter(|m| m.is_object())
        .ok_or_else(|| OuroborosError::malformed("missing memory object"))?;

    for key in ["directives", "projects"] {
        match memory.get(key) {
            Some(Value::Array(_)) => {}
            Some(Value::Null) | None => {
                return Err(OuroborosError::malformed(format!("missing memory.{}", key)))
            }
            Some(_) => {
                return Err(OuroborosError::malformed(format!(
                    "memory.{} is not an array",
                    key
                )))
            }
        }
    }
    Ok(())
}

/// Result of the pre-write backup step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The previous primary was copied
    Created {
        /// Id of the backup object
        id: String,
        /// Name of the backup object
        name: String,
    },
    /// Nothing to back up: no primary exists yet
    Skipped,
    /// The backup could not be written; the primary write may still proceed
    Failed {
        /// Failure text
        message: String,
    },
}

impl BackupOutcome {
    /// Non-fatal warning for the caller, if any
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Failed { message } => Some(format!("Backup before write failed: {}", message)),
            _ => None,
        }
    }
}

/// Copy the current primary envelope, unchanged, to a timestamped backup object
///
/// Only [`OuroborosError::SessionExpired`] is returned as an error; every other
/// failure becomes [`BackupOutcome::Failed`].
pub async fn snapshot_before_write(
    gateway: &StorageGateway,
    session: &SessionHandle,
    container_id: &str,
) -> OuroborosResult<BackupOutcome> {
    match copy_primary(gateway, session, container_id).await {
        Ok(Some((id, name))) => {
            info!(backup_id = %id, backup_name = %name, "pre-write backup created");
            Ok(BackupOutcome::Created { id, name })
        }
        Ok(None) => {
            debug!("no primary envelope yet, backup skipped");
            Ok(BackupOutcome::Skipped)
        }
        Err(e) if e.is_session_expired() => Err(e),
        Err(e) => {
            warn!(error = %e, "pre-write backup failed");
            Ok(BackupOutcome::Failed {
                message: e.to_string(),
            })
        }
    }
}

async fn copy_primary(
    gateway: &StorageGateway,
    session: &SessionHandle,
    container_id: &str,
) -> OuroborosResult<Option<(String, String)>> {
    let naming = gateway.naming();
    let Some(primary_id) = gateway
        .find_object(session, &naming.primary, container_id, MatchMode::Exact)
        .await?
    else {
        return Ok(None);
    };

    let previous = gateway.read_object(session, &primary_id).await?;
    let name = naming.backup_name(now_millis());
    let id = gateway
        .write_envelope(
            session,
            container_id,
            &previous,
            EnvelopeWrite::Backup { name: name.clone() },
        )
        .await?;
    Ok(Some((id, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OuroborosConfig;
    use crate::state::{initial_state, MemoryState, Project, ProjectStatus};
    use crate::storage::{AccessToken, Fault, InMemoryObjectStore, StoreOp, StoreOpKind};
    use serde_json::json;
    use std::sync::Arc;

    async fn connected() -> (Arc<InMemoryObjectStore>, StorageGateway, SessionHandle) {
        let store = Arc::new(InMemoryObjectStore::new());
        let gateway = StorageGateway::new(store.clone(), &OuroborosConfig::default());
        let session = gateway.open_session(AccessToken::new("t")).await.unwrap();
        (store, gateway, session)
    }

    #[test]
    fn test_round_trip() {
        let mut state = initial_state();
        state.memory.projects.push(
            Project::new("audit", "Audit", ProjectStatus::Active).with_document("doc-1"),
        );
        let envelope = PersistedState::from_state(&state);

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_missing_projects_is_malformed() {
        let raw = json!({
            "formatVersion": "2.0.0",
            "lastSyncedAt": 0,
            "memory": { "directives": [] },
            "focus": {}
        })
        .to_string();
        let err = decode(&raw).unwrap_err();
        assert!(matches!(err, OuroborosError::MalformedEnvelope { reason } if reason.contains("projects")));
    }

    #[test]
    fn test_null_directives_is_malformed() {
        let raw = json!({
            "memory": { "directives": null, "projects": [] },
            "focus": {}
        })
        .to_string();
        assert!(matches!(
            decode(&raw),
            Err(OuroborosError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            decode("not json"),
            Err(OuroborosError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn test_unknown_top_level_keys_are_tolerated() {
        let raw = json!({
            "formatVersion": "2.0.0",
            "lastSyncedAt": 1_700_000_000_000_i64,
            "memory": { "directives": ["d"], "projects": [] },
            "focus": { "objective": "o" },
            "uiTheme": "dark"
        })
        .to_string();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.memory.directives, vec!["d".to_string()]);
        assert_eq!(decoded.focus.objective, "o");
    }

    #[test]
    fn test_legacy_envelope_decodes() {
        let raw = json!({
            "app_version": "1.3.1",
            "last_sync_timestamp": 1_700_000_000_000_i64,
            "memory": {
                "core_instructions": ["keep state"],
                "active_projects": [{ "id": "p", "name": "P", "status": "pending", "description": "" }],
                "confidence_metrics": [{ "label": "planning", "score": 0.5 }]
            },
            "focus": { "current_objective": "legacy" }
        })
        .to_string();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.memory.projects.len(), 1);
        assert_eq!(decoded.memory.metrics.get("planning"), Some(&0.5));
        assert_eq!(decoded.focus.objective, "legacy");
    }

    #[tokio::test]
    async fn test_snapshot_skipped_without_primary() {
        let (_store, gateway, session) = connected().await;
        let outcome = snapshot_before_write(&gateway, &session, session.container_id())
            .await
            .unwrap();
        assert_eq!(outcome, BackupOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_snapshot_copies_primary_verbatim() {
        let (store, gateway, session) = connected().await;
        let container = session.container_id().to_string();
        let envelope = encode(&PersistedState::new(MemoryState::empty(), Default::default())).unwrap();
        gateway
            .write_envelope(&session, &container, &envelope, EnvelopeWrite::Primary)
            .await
            .unwrap();

        let outcome = snapshot_before_write(&gateway, &session, &container).await.unwrap();
        let BackupOutcome::Created { id, name } = outcome else {
            panic!("expected a backup");
        };
        assert!(name.starts_with("app-data.backup-"));
        assert_eq!(store.content_of(&id).unwrap(), envelope);
        assert!(matches!(store.journal().last(), Some(StoreOp::Create { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_reported_not_raised() {
        let (store, gateway, session) = connected().await;
        let container = session.container_id().to_string();
        gateway
            .write_envelope(&session, &container, "{}", EnvelopeWrite::Primary)
            .await
            .unwrap();
        store.fail_next(StoreOpKind::Create, Fault::Unavailable);

        let outcome = snapshot_before_write(&gateway, &session, &container).await.unwrap();
        assert!(matches!(outcome, BackupOutcome::Failed { .. }));
        assert!(outcome.warning().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_propagates_expiry() {
        let (store, gateway, session) = connected().await;
        store.fail_next(StoreOpKind::List, Fault::Unauthorized);
        let err = snapshot_before_write(&gateway, &session, session.container_id())
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
    }
}
