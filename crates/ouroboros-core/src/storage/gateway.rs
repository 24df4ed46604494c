//! Session-scoped operations over an [`ObjectStore`]

use super::{AccessToken, NewObject, ObjectInfo, ObjectQuery, ObjectStore, SessionHandle, CONTAINER_CONTENT_TYPE};
use crate::config::{EnvelopeNaming, OuroborosConfig};
use crate::error::{OuroborosError, OuroborosResult};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Content type of envelope objects
pub const ENVELOPE_CONTENT_TYPE: &str = "application/json";

/// How [`StorageGateway::find_object`] compares names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Whole-name equality
    #[default]
    Exact,
    /// Case-sensitive substring
    Partial,
}

/// Client-side narrowing for [`StorageGateway::list_objects`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// Keep names containing this text
    pub name_contains: Option<String>,

    /// Keep this exact content type
    pub content_type: Option<String>,
}

impl ObjectFilter {
    /// No filtering
    pub fn all() -> Self {
        Self::default()
    }

    /// Names containing `text`
    pub fn name_contains(text: impl Into<String>) -> Self {
        Self {
            name_contains: Some(text.into()),
            ..Self::default()
        }
    }

    /// Restrict to a content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Destination of an envelope write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeWrite {
    /// Update the primary envelope in place, creating it on first write
    Primary,
    /// Create a new, distinctly named object
    Backup {
        /// Object name
        name: String,
    },
}

/// A user-supplied file to upload verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Object name
    pub name: String,

    /// MIME type
    pub content_type: String,

    /// Raw bytes
    pub bytes: Bytes,
}

impl Artifact {
    /// Create an artifact
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// A UTF-8 text artifact
    pub fn text(name: impl Into<String>, content_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, content_type, Bytes::from(text.into()))
    }
}

/// Storage gateway: the only component that talks to the object store
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    container_name: String,
    naming: EnvelopeNaming,
}

impl std::fmt::Debug for StorageGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGateway")
            .field("container_name", &self.container_name)
            .field("naming", &self.naming)
            .finish_non_exhaustive()
    }
}

impl StorageGateway {
    /// Create a gateway over `store`
    pub fn new(store: Arc<dyn ObjectStore>, config: &OuroborosConfig) -> Self {
        Self {
            store,
            container_name: config.container_name.clone(),
            naming: config.naming.clone(),
        }
    }

    /// Envelope naming in use
    pub fn naming(&self) -> &EnvelopeNaming {
        &self.naming
    }

    /// Name of the working container
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Resolve the working container and bind it to a session
    pub async fn open_session(&self, token: AccessToken) -> OuroborosResult<SessionHandle> {
        let container_id = self.ensure_container(&token).await?;
        info!(container_id = %container_id, "storage session opened");
        Ok(SessionHandle::new(token, container_id))
    }

    /// Find the working container by name, creating it when absent
    ///
    /// Repeated calls return the same id.
    #[instrument(skip(self, token), fields(container = %self.container_name))]
    pub async fn ensure_container(&self, token: &AccessToken) -> OuroborosResult<String> {
        let query = ObjectQuery::new()
            .named(self.container_name.clone())
            .of_type(CONTAINER_CONTENT_TYPE);

        let existing = self
            .store
            .list(token, &query)
            .await
            .map_err(|e| as_storage_failure("ensure_container", e))?;
        if let Some(found) = existing.into_iter().next() {
            return Ok(found.id);
        }

        debug!("container missing, creating");
        let created = self
            .store
            .create_container(token, &self.container_name)
            .await
            .map_err(|e| as_storage_failure("ensure_container", e))?;
        Ok(created.id)
    }

    /// Id of the most recent object named `name` (or containing it), if any
    pub async fn find_object(
        &self,
        session: &SessionHandle,
        name: &str,
        container_id: &str,
        mode: MatchMode,
    ) -> OuroborosResult<Option<String>> {
        let found = match mode {
            MatchMode::Exact => {
                let query = ObjectQuery::new().in_container(container_id).named(name);
                self.store.list(session.token(), &query).await?.into_iter().next()
            }
            MatchMode::Partial => {
                let query = ObjectQuery::new().in_container(container_id);
                self.store
                    .list(session.token(), &query)
                    .await?
                    .into_iter()
                    .find(|o| o.name.contains(name))
            }
        };
        Ok(found.map(|o| o.id))
    }

    /// Full content of an object as text
    pub async fn read_object(&self, session: &SessionHandle, id: &str) -> OuroborosResult<String> {
        let bytes = self.store.get_content(session.token(), id).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| OuroborosError::serialization("read_object", e))
    }

    /// Metadata of one object
    pub async fn object_info(&self, session: &SessionHandle, id: &str) -> OuroborosResult<ObjectInfo> {
        self.store.get_metadata(session.token(), id).await
    }

    /// Create a text object in a container and return its id
    pub async fn create_object(
        &self,
        session: &SessionHandle,
        name: &str,
        content: &str,
        container_id: &str,
        content_type: &str,
    ) -> OuroborosResult<String> {
        let object = NewObject::new(name, content_type, Some(container_id.to_string()));
        let info = self
            .store
            .create(session.token(), &object, Bytes::copy_from_slice(content.as_bytes()))
            .await?;
        debug!(id = %info.id, name = %info.name, "object created");
        Ok(info.id)
    }

    /// Objects in a container, most recently modified first
    pub async fn list_objects(
        &self,
        session: &SessionHandle,
        container_id: &str,
        filter: &ObjectFilter,
    ) -> OuroborosResult<Vec<ObjectInfo>> {
        let mut query = ObjectQuery::new().in_container(container_id);
        if let Some(content_type) = &filter.content_type {
            query = query.of_type(content_type.clone());
        }

        let mut listed: Vec<ObjectInfo> = self
            .store
            .list(session.token(), &query)
            .await?
            .into_iter()
            .filter(|o| {
                filter
                    .name_contains
                    .as_deref()
                    .map_or(true, |needle| o.name.contains(needle))
            })
            .collect();

        // Stores without timestamps keep their own order.
        if listed.iter().all(|o| o.modified_at.is_some()) {
            listed.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        }
        Ok(listed)
    }

    /// Every object in a container, most recent first
    pub async fn list_all_objects(
        &self,
        session: &SessionHandle,
        container_id: &str,
    ) -> OuroborosResult<Vec<ObjectInfo>> {
        self.list_objects(session, container_id, &ObjectFilter::all())
            .await
    }

    /// Write an encoded envelope and return the id written
    pub async fn write_envelope(
        &self,
        session: &SessionHandle,
        container_id: &str,
        encoded: &str,
        target: EnvelopeWrite,
    ) -> OuroborosResult<String> {
        let content = Bytes::copy_from_slice(encoded.as_bytes());

        match target {
            EnvelopeWrite::Primary => {
                let existing = self
                    .find_object(session, &self.naming.primary, container_id, MatchMode::Exact)
                    .await?;
                match existing {
                    Some(id) => {
                        let info = self
                            .store
                            .update(session.token(), &id, ENVELOPE_CONTENT_TYPE, content)
                            .await?;
                        Ok(info.id)
                    }
                    None => {
                        let object = NewObject::new(
                            self.naming.primary.clone(),
                            ENVELOPE_CONTENT_TYPE,
                            Some(container_id.to_string()),
                        );
                        Ok(self.store.create(session.token(), &object, content).await?.id)
                    }
                }
            }
            EnvelopeWrite::Backup { name } => {
                let object =
                    NewObject::new(name, ENVELOPE_CONTENT_TYPE, Some(container_id.to_string()));
                Ok(self.store.create(session.token(), &object, content).await?.id)
            }
        }
    }

    /// Upload a user-supplied file verbatim
    pub async fn upload_raw_artifact(
        &self,
        session: &SessionHandle,
        container_id: &str,
        artifact: Artifact,
    ) -> OuroborosResult<String> {
        let object = NewObject::new(
            artifact.name,
            artifact.content_type,
            Some(container_id.to_string()),
        );
        let info = self.store.create(session.token(), &object, artifact.bytes).await?;
        debug!(id = %info.id, name = %info.name, "artifact uploaded");
        Ok(info.id)
    }
}

fn as_storage_failure(operation: &str, err: OuroborosError) -> OuroborosError {
    match err {
        OuroborosError::SessionExpired { .. } | OuroborosError::StorageUnavailable { .. } => err,
        other => OuroborosError::storage(operation, other),
    }
}
