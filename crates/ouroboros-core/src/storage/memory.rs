//! In-process object store
//!
//! Behaves like the remote store (containers, ids, most-recent-first listing)
//! and records every successful call in a journal so callers can assert on
//! write ordering. Faults can be queued per operation kind.

use super::{AccessToken, NewObject, ObjectInfo, ObjectQuery, ObjectStore, CONTAINER_CONTENT_TYPE};
use crate::error::{OuroborosError, OuroborosResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Kind of store operation, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOpKind {
    /// `list`
    List,
    /// `get_metadata`
    GetMetadata,
    /// `get_content`
    GetContent,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `create_container`
    CreateContainer,
}

/// A successful store call, as recorded in the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Listing
    List,
    /// Metadata read
    GetMetadata {
        /// Object id
        id: String,
    },
    /// Content read
    GetContent {
        /// Object id
        id: String,
    },
    /// Object creation
    Create {
        /// New id
        id: String,
        /// Object name
        name: String,
    },
    /// Content replacement
    Update {
        /// Object id
        id: String,
        /// Object name
        name: String,
    },
    /// Container creation
    CreateContainer {
        /// New id
        id: String,
        /// Container name
        name: String,
    },
}

impl StoreOp {
    /// Name of a created or updated object
    pub fn written_name(&self) -> Option<&str> {
        match self {
            Self::Create { name, .. } | Self::Update { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Failure to inject into the next call of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Behave like HTTP 401
    Unauthorized,
    /// Behave like a transport failure or 5xx
    Unavailable,
}

#[derive(Debug, Clone)]
struct StoredObject {
    info: ObjectInfo,
    parent: Option<String>,
    content: Bytes,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    next_seq: u64,
    journal: Vec<StoreOp>,
    faults: HashMap<StoreOpKind, VecDeque<Fault>>,
    expired: bool,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn check(&mut self, kind: StoreOpKind, operation: &str) -> OuroborosResult<()> {
        if self.expired {
            return Err(OuroborosError::session_expired(operation));
        }
        match self.faults.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(Fault::Unauthorized) => Err(OuroborosError::session_expired(operation)),
            Some(Fault::Unavailable) => Err(OuroborosError::storage(operation, "injected fault")),
            None => Ok(()),
        }
    }

    fn insert(
        &mut self,
        name: &str,
        content_type: &str,
        parent: Option<String>,
        content: Bytes,
    ) -> ObjectInfo {
        let info = ObjectInfo {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            modified_at: Some(Utc::now()),
        };
        let seq = self.bump();
        self.objects.insert(
            info.id.clone(),
            StoredObject {
                info: info.clone(),
                parent,
                content,
                seq,
            },
        );
        info
    }
}

/// Object store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    inner: RwLock<Inner>,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing faults and the journal
    pub fn insert(
        &self,
        parent: Option<&str>,
        name: &str,
        content_type: &str,
        content: impl Into<Bytes>,
    ) -> String {
        self.inner
            .write()
            .insert(name, content_type, parent.map(str::to_string), content.into())
            .id
    }

    /// Seed a container directly
    pub fn insert_container(&self, name: &str) -> String {
        self.insert(None, name, CONTAINER_CONTENT_TYPE, Bytes::new())
    }

    /// Fail the next call of `kind` with `fault`
    pub fn fail_next(&self, kind: StoreOpKind, fault: Fault) {
        self.inner
            .write()
            .faults
            .entry(kind)
            .or_default()
            .push_back(fault);
    }

    /// Reject every call as unauthorized until [`Self::renew_sessions`]
    pub fn expire_sessions(&self) {
        self.inner.write().expired = true;
    }

    /// Accept calls again after [`Self::expire_sessions`]
    pub fn renew_sessions(&self) {
        self.inner.write().expired = false;
    }

    /// Successful calls so far, in order
    pub fn journal(&self) -> Vec<StoreOp> {
        self.inner.read().journal.clone()
    }

    /// Forget recorded calls
    pub fn clear_journal(&self) {
        self.inner.write().journal.clear();
    }

    /// Names of created or updated objects, in write order
    pub fn written_names(&self) -> Vec<String> {
        self.inner
            .read()
            .journal
            .iter()
            .filter_map(|op| op.written_name().map(str::to_string))
            .collect()
    }

    /// Content of an object as text
    pub fn content_of(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .objects
            .get(id)
            .map(|o| String::from_utf8_lossy(&o.content).into_owned())
    }

    /// Metadata of every object with this exact name, most recent first
    pub fn objects_named(&self, name: &str) -> Vec<ObjectInfo> {
        let inner = self.inner.read();
        let mut found: Vec<&StoredObject> =
            inner.objects.values().filter(|o| o.info.name == name).collect();
        found.sort_by(|a, b| b.seq.cmp(&a.seq));
        found.into_iter().map(|o| o.info.clone()).collect()
    }

    /// Number of stored objects, containers included
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// Whether the store holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(
        &self,
        _token: &AccessToken,
        query: &ObjectQuery,
    ) -> OuroborosResult<Vec<ObjectInfo>> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::List, "list")?;

        let mut matches: Vec<&StoredObject> = inner
            .objects
            .values()
            .filter(|o| query.matches(&o.info, o.parent.as_deref()))
            .collect();
        matches.sort_by(|a, b| b.seq.cmp(&a.seq));
        let listed = matches.into_iter().map(|o| o.info.clone()).collect();

        inner.journal.push(StoreOp::List);
        Ok(listed)
    }

    async fn get_metadata(&self, _token: &AccessToken, id: &str) -> OuroborosResult<ObjectInfo> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::GetMetadata, "get_metadata")?;

        let info = inner
            .objects
            .get(id)
            .map(|o| o.info.clone())
            .ok_or_else(|| OuroborosError::not_found(id))?;
        inner.journal.push(StoreOp::GetMetadata { id: id.to_string() });
        Ok(info)
    }

    async fn get_content(&self, _token: &AccessToken, id: &str) -> OuroborosResult<Bytes> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::GetContent, "get_content")?;

        let content = inner
            .objects
            .get(id)
            .map(|o| o.content.clone())
            .ok_or_else(|| OuroborosError::not_found(id))?;
        inner.journal.push(StoreOp::GetContent { id: id.to_string() });
        Ok(content)
    }

    async fn create(
        &self,
        _token: &AccessToken,
        object: &NewObject,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::Create, "create")?;

        if let Some(parent) = &object.parent {
            if !inner.objects.contains_key(parent) {
                return Err(OuroborosError::storage(
                    "create",
                    format!("parent container {} does not exist", parent),
                ));
            }
        }

        let info = inner.insert(
            &object.name,
            &object.content_type,
            object.parent.clone(),
            content,
        );
        inner.journal.push(StoreOp::Create {
            id: info.id.clone(),
            name: info.name.clone(),
        });
        Ok(info)
    }

    async fn update(
        &self,
        _token: &AccessToken,
        id: &str,
        content_type: &str,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::Update, "update")?;

        let seq = inner.bump();
        let stored = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| OuroborosError::not_found(id))?;
        stored.content = content;
        stored.seq = seq;
        stored.info.content_type = content_type.to_string();
        stored.info.modified_at = Some(Utc::now());
        let info = stored.info.clone();

        inner.journal.push(StoreOp::Update {
            id: info.id.clone(),
            name: info.name.clone(),
        });
        Ok(info)
    }

    async fn create_container(
        &self,
        _token: &AccessToken,
        name: &str,
    ) -> OuroborosResult<ObjectInfo> {
        let mut inner = self.inner.write();
        inner.check(StoreOpKind::CreateContainer, "create_container")?;

        let info = inner.insert(name, CONTAINER_CONTENT_TYPE, None, Bytes::new());
        inner.journal.push(StoreOp::CreateContainer {
            id: info.id.clone(),
            name: info.name.clone(),
        });
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> AccessToken {
        AccessToken::new("test")
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first() {
        let store = InMemoryObjectStore::new();
        let folder = store.insert_container("Ouroboros");
        let first = store.insert(Some(&folder), "a.md", "text/markdown", "a");
        let second = store.insert(Some(&folder), "b.md", "text/markdown", "b");

        store
            .update(&token(), &first, "text/markdown", Bytes::from("a2"))
            .await
            .unwrap();

        let listed = store
            .list(&token(), &ObjectQuery::new().in_container(folder.clone()))
            .await
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[tokio::test]
    async fn test_faults_fire_once() {
        let store = InMemoryObjectStore::new();
        store.fail_next(StoreOpKind::List, Fault::Unauthorized);

        let err = store.list(&token(), &ObjectQuery::new()).await.unwrap_err();
        assert!(err.is_session_expired());
        assert!(store.list(&token(), &ObjectQuery::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_sessions_reject_everything() {
        let store = InMemoryObjectStore::new();
        let id = store.insert(None, "x", "text/plain", "x");
        store.expire_sessions();
        assert!(store.get_content(&token(), &id).await.unwrap_err().is_session_expired());
        store.renew_sessions();
        assert_eq!(store.get_content(&token(), &id).await.unwrap(), Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get_metadata(&token(), "nope").await.unwrap_err();
        assert!(matches!(err, OuroborosError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_journal_records_writes_in_order() {
        let store = InMemoryObjectStore::new();
        let folder = store
            .create_container(&token(), "Ouroboros")
            .await
            .unwrap()
            .id;
        let created = store
            .create(
                &token(),
                &NewObject::new("app-data.json", "application/json", Some(folder)),
                Bytes::from("{}"),
            )
            .await
            .unwrap();
        store
            .update(&token(), &created.id, "application/json", Bytes::from("{ }"))
            .await
            .unwrap();

        assert_eq!(
            store.written_names(),
            vec!["app-data.json".to_string(), "app-data.json".to_string()]
        );
        assert!(matches!(store.journal()[0], StoreOp::CreateContainer { .. }));
    }
}
