//! Object-store access
//!
//! [`ObjectStore`] is the raw HTTP-shaped surface of a folder-scoped object
//! store (list with query, metadata, raw content, multipart create/update).
//! [`StorageGateway`] builds the higher-level contract on top of it: ensuring
//! the working container, exact/partial lookup, envelope writes and artifact
//! uploads.
//!
//! Authorization is explicit: an [`Authorizer`] produces an [`AccessToken`],
//! [`StorageGateway::open_session`] turns it into a [`SessionHandle`], and every
//! gateway call takes that handle.

mod gateway;
mod memory;

#[cfg(feature = "http")]
mod drive;

pub use gateway::{
    Artifact, EnvelopeWrite, MatchMode, ObjectFilter, StorageGateway, ENVELOPE_CONTENT_TYPE,
};
pub use memory::{Fault, InMemoryObjectStore, StoreOp, StoreOpKind};

#[cfg(feature = "http")]
pub use drive::{DriveObjectStore, MULTIPART_BOUNDARY};

use crate::error::{OuroborosError, OuroborosResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type that marks an object as a container (folder)
pub const CONTAINER_CONTENT_TYPE: &str = "application/vnd.google-apps.folder";

/// Bearer token for the object store
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header only
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// An authorized connection to the working container
#[derive(Debug, Clone)]
pub struct SessionHandle {
    token: AccessToken,
    container_id: String,
    opened_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Build a handle for an already-resolved container
    pub fn new(token: AccessToken, container_id: impl Into<String>) -> Self {
        Self {
            token,
            container_id: container_id.into(),
            opened_at: Utc::now(),
        }
    }

    /// Bearer token
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Id of the working container
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// When the session was opened
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Store-assigned id
    pub id: String,

    /// Object name
    pub name: String,

    /// MIME type
    pub content_type: String,

    /// Last modification time, when the store reports it
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Server-side list query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectQuery {
    /// Restrict to children of this container
    pub parent: Option<String>,

    /// Exact name match
    pub name: Option<String>,

    /// Exact content-type match
    pub content_type: Option<String>,
}

impl ObjectQuery {
    /// Match everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a container
    pub fn in_container(mut self, container_id: impl Into<String>) -> Self {
        self.parent = Some(container_id.into());
        self
    }

    /// Exact name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Exact content type
    pub fn of_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether an object satisfies the query
    pub fn matches(&self, info: &ObjectInfo, parent: Option<&str>) -> bool {
        self.parent.as_deref().map_or(true, |p| parent == Some(p))
            && self.name.as_deref().map_or(true, |n| info.name == n)
            && self
                .content_type
                .as_deref()
                .map_or(true, |t| info.content_type == t)
    }
}

/// Metadata for an object about to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    /// Object name
    pub name: String,

    /// MIME type
    pub content_type: String,

    /// Parent container
    pub parent: Option<String>,
}

impl NewObject {
    /// Create metadata for a child of `parent`
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        parent: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            parent,
        }
    }
}

/// Raw object-store surface
///
/// Implementations map an HTTP 401 (or equivalent) to
/// [`OuroborosError::SessionExpired`], a missing object on a get-by-id to
/// [`OuroborosError::NotFound`] and everything else to
/// [`OuroborosError::StorageUnavailable`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects matching `query`, most recently modified first
    async fn list(&self, token: &AccessToken, query: &ObjectQuery)
        -> OuroborosResult<Vec<ObjectInfo>>;

    /// Metadata of one object
    async fn get_metadata(&self, token: &AccessToken, id: &str) -> OuroborosResult<ObjectInfo>;

    /// Raw content of one object
    async fn get_content(&self, token: &AccessToken, id: &str) -> OuroborosResult<Bytes>;

    /// Create an object with content
    async fn create(
        &self,
        token: &AccessToken,
        object: &NewObject,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo>;

    /// Replace the content of an existing object
    async fn update(
        &self,
        token: &AccessToken,
        id: &str,
        content_type: &str,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo>;

    /// Create a top-level container
    async fn create_container(&self, token: &AccessToken, name: &str)
        -> OuroborosResult<ObjectInfo>;
}

/// External authorization handshake
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Obtain a fresh access token
    async fn authorize(&self) -> OuroborosResult<AccessToken>;
}

/// Authorizer for tokens obtained out of band
#[derive(Debug, Clone)]
pub struct StaticTokenAuthorizer {
    token: Option<AccessToken>,
}

impl StaticTokenAuthorizer {
    /// Always hand out `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(AccessToken::new(token)),
        }
    }

    /// Read the token from `OUROBOROS_ACCESS_TOKEN`
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            token: std::env::var("OUROBOROS_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(AccessToken::new),
        }
    }
}

#[async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn authorize(&self) -> OuroborosResult<AccessToken> {
        self.token.clone().ok_or_else(|| OuroborosError::Authorization {
            message: "no access token configured (set OUROBOROS_ACCESS_TOKEN)".to_string(),
        })
    }
}
