//! Local volatile cache
//!
//! Best-effort crash recovery for the unsent draft and the current focus,
//! plus the display history. Lives entirely on the local machine and never
//! touches remote storage.

use crate::config::SlotKeys;
use crate::error::{OuroborosError, OuroborosResult};
use crate::state::{now_millis, FocusState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key-value slots for small local documents
pub trait SlotStore: Send + Sync {
    /// Read a slot
    fn get(&self, key: &str) -> OuroborosResult<Option<String>>;

    /// Overwrite a slot
    fn set(&self, key: &str, value: &str) -> OuroborosResult<()>;

    /// Delete a slot; deleting a missing slot is not an error
    fn remove(&self, key: &str) -> OuroborosResult<()>;
}

/// Slots as `<key>.json` files in one directory
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> OuroborosResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| OuroborosError::storage("slot_store_init", e))?;
        Ok(Self { dir })
    }

    /// Directory holding the slots
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> OuroborosResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(OuroborosError::validation(
                "slot key",
                "ASCII letters, digits, '_' or '-'",
                key,
            ));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> OuroborosResult<Option<String>> {
        match std::fs::read_to_string(self.path(key)?) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OuroborosError::storage("slot_get", e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> OuroborosResult<()> {
        let path = self.path(key)?;
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, value).map_err(|e| OuroborosError::storage("slot_set", e))?;
        std::fs::rename(&staging, &path).map_err(|e| OuroborosError::storage("slot_set", e))
    }

    fn remove(&self, key: &str) -> OuroborosResult<()> {
        match std::fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OuroborosError::storage("slot_remove", e)),
        }
    }
}

/// Slots held in process memory
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    slots: RwLock<HashMap<String, String>>,
}

impl InMemorySlotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for InMemorySlotStore {
    fn get(&self, key: &str) -> OuroborosResult<Option<String>> {
        Ok(self.slots.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> OuroborosResult<()> {
        self.slots.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> OuroborosResult<()> {
        self.slots.write().remove(key);
        Ok(())
    }
}

/// Unsent draft plus focus, as last seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatileSnapshot {
    /// Text typed but not yet submitted
    #[serde(default)]
    pub draft_input: String,

    /// Focus at the time of the save
    #[serde(default)]
    pub focus: FocusState,

    /// When the slot was written
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub saved_at: DateTime<Utc>,
}

/// Author of a display-history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The human
    User,
    /// The reasoning backend
    Model,
    /// Status lines from the application
    System,
}

/// One line of display history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Author
    pub role: ChatRole,

    /// Text
    pub content: String,

    /// Epoch milliseconds
    pub timestamp: i64,
}

impl ChatEntry {
    /// Entry stamped now
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis().timestamp_millis(),
        }
    }
}

/// The recovery slot and the display-history slot
#[derive(Clone)]
pub struct VolatileCache {
    slots: Arc<dyn SlotStore>,
    keys: SlotKeys,
}

impl std::fmt::Debug for VolatileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileCache").field("keys", &self.keys).finish()
    }
}

impl VolatileCache {
    /// Create a cache over `slots`
    pub fn new(slots: Arc<dyn SlotStore>, keys: SlotKeys) -> Self {
        Self { slots, keys }
    }

    /// Overwrite the recovery slot
    pub fn record(&self, draft_input: &str, focus: &FocusState) -> OuroborosResult<()> {
        let snapshot = VolatileSnapshot {
            draft_input: draft_input.to_string(),
            focus: focus.clone(),
            saved_at: now_millis(),
        };
        let raw = serde_json::to_string(&snapshot)
            .map_err(|e| OuroborosError::serialization("volatile_record", e))?;
        self.slots.set(&self.keys.volatile, &raw)
    }

    /// Current slot content; unreadable slots count as empty
    pub fn snapshot(&self) -> Option<VolatileSnapshot> {
        let raw = match self.slots.get(&self.keys.volatile) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "volatile slot unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "volatile slot corrupt, ignoring");
                None
            }
        }
    }

    /// The slot, if it holds something worth offering back
    ///
    /// Worth offering means a non-empty draft or an objective that differs
    /// from `default_focus`.
    pub fn pending_recovery(&self, default_focus: &FocusState) -> Option<VolatileSnapshot> {
        self.snapshot().filter(|s| {
            !s.draft_input.trim().is_empty() || s.focus.objective != default_focus.objective
        })
    }

    /// Take the slot for restoring and clear it
    pub fn recover(&self) -> OuroborosResult<Option<VolatileSnapshot>> {
        let snapshot = self.snapshot();
        self.slots.remove(&self.keys.volatile)?;
        debug!(recovered = snapshot.is_some(), "volatile slot consumed");
        Ok(snapshot)
    }

    /// Decline recovery and clear the slot
    pub fn dismiss(&self) -> OuroborosResult<()> {
        self.slots.remove(&self.keys.volatile)
    }

    /// Display history; unreadable history counts as empty
    pub fn load_history(&self) -> Vec<ChatEntry> {
        match self.slots.get(&self.keys.chat_history) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "chat history corrupt, starting fresh");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "chat history unreadable");
                Vec::new()
            }
        }
    }

    /// Overwrite display history
    pub fn save_history(&self, entries: &[ChatEntry]) -> OuroborosResult<()> {
        let raw = serde_json::to_string(entries)
            .map_err(|e| OuroborosError::serialization("save_history", e))?;
        self.slots.set(&self.keys.chat_history, &raw)
    }

    /// Append one entry to display history
    pub fn append_history(&self, entry: ChatEntry) -> OuroborosResult<()> {
        let mut entries = self.load_history();
        entries.push(entry);
        self.save_history(&entries)
    }

    /// Delete display history
    pub fn clear_history(&self) -> OuroborosResult<()> {
        self.slots.remove(&self.keys.chat_history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::initial_focus;

    fn memory_cache() -> VolatileCache {
        VolatileCache::new(Arc::new(InMemorySlotStore::new()), SlotKeys::default())
    }

    #[test]
    fn test_default_focus_and_empty_draft_offer_nothing() {
        let cache = memory_cache();
        cache.record("   ", &initial_focus()).unwrap();
        assert!(cache.snapshot().is_some());
        assert!(cache.pending_recovery(&initial_focus()).is_none());
    }

    #[test]
    fn test_draft_or_changed_objective_offers_recovery() {
        let cache = memory_cache();
        cache.record("half-typed", &initial_focus()).unwrap();
        assert!(cache.pending_recovery(&initial_focus()).is_some());

        let mut focus = initial_focus();
        focus.objective = "ship the audit".to_string();
        cache.record("", &focus).unwrap();
        let pending = cache.pending_recovery(&initial_focus()).unwrap();
        assert_eq!(pending.focus.objective, "ship the audit");
    }

    #[test]
    fn test_recover_consumes_slot() {
        let cache = memory_cache();
        cache.record("draft", &initial_focus()).unwrap();

        let recovered = cache.recover().unwrap().unwrap();
        assert_eq!(recovered.draft_input, "draft");
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn test_file_slots_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let keys = SlotKeys::default();

        let first = VolatileCache::new(Arc::new(FileSlotStore::new(dir.path()).unwrap()), keys.clone());
        first.record("survives restart", &initial_focus()).unwrap();
        first
            .append_history(ChatEntry::new(ChatRole::User, "hello"))
            .unwrap();

        let second = VolatileCache::new(Arc::new(FileSlotStore::new(dir.path()).unwrap()), keys);
        assert_eq!(second.snapshot().unwrap().draft_input, "survives restart");
        assert_eq!(second.load_history().len(), 1);

        second.clear_history().unwrap();
        second.dismiss().unwrap();
        assert!(second.load_history().is_empty());
        assert!(second.snapshot().is_none());
        assert!(!dir.path().join("ouroboros_volatile_memory.json").exists());
    }

    #[test]
    fn test_corrupt_slot_is_ignored() {
        let slots = Arc::new(InMemorySlotStore::new());
        slots.set("ouroboros_volatile_memory", "{not json").unwrap();
        slots.set("ouroboros_chat_history", "[oops").unwrap();
        let cache = VolatileCache::new(slots, SlotKeys::default());
        assert!(cache.snapshot().is_none());
        assert!(cache.load_history().is_empty());
    }

    #[test]
    fn test_invalid_slot_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSlotStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(OuroborosError::Validation { .. })
        ));
    }
}
