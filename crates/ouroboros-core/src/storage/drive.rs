//! HTTP object store speaking the Drive v3 REST dialect

use super::{AccessToken, NewObject, ObjectInfo, ObjectQuery, ObjectStore, CONTAINER_CONTENT_TYPE};
use crate::config::StoreEndpoints;
use crate::error::{OuroborosError, OuroborosResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

/// Boundary used for `multipart/related` uploads
pub const MULTIPART_BOUNDARY: &str = "foo_bar_baz";

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime)";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for ObjectInfo {
    fn from(file: DriveFile) -> Self {
        Self {
            id: file.id,
            name: file.name,
            content_type: file.mime_type,
            modified_at: file.modified_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Object store backed by the Drive v3 REST API
#[derive(Debug, Clone)]
pub struct DriveObjectStore {
    http: reqwest::Client,
    api_base: Url,
    upload_base: Url,
}

impl DriveObjectStore {
    /// Create a store for the given endpoints
    pub fn new(endpoints: &StoreEndpoints) -> OuroborosResult<Self> {
        Self::with_client(reqwest::Client::new(), endpoints)
    }

    /// Create a store reusing an existing HTTP client
    pub fn with_client(http: reqwest::Client, endpoints: &StoreEndpoints) -> OuroborosResult<Self> {
        Ok(Self {
            http,
            api_base: parse_base(&endpoints.api_base)?,
            upload_base: parse_base(&endpoints.upload_base)?,
        })
    }

    fn files_url(base: &Url, id: Option<&str>) -> OuroborosResult<Url> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                OuroborosError::configuration(format!("store endpoint {} cannot be a base", base))
            })?;
            segments.pop_if_empty().push("files");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        operation: &str,
        id: Option<&str>,
        request: reqwest::RequestBuilder,
    ) -> OuroborosResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| OuroborosError::storage(operation, e))?;
        check_status(operation, id, response).await
    }

    async fn upload(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
        metadata: serde_json::Value,
        content_type: &str,
        content: &[u8],
    ) -> OuroborosResult<ObjectInfo> {
        let body = multipart_related(&metadata, content_type, content);
        let request = request
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body);

        let response = self.send(operation, None, request).await?;
        let file: DriveFile = decode(operation, response).await?;
        Ok(file.into())
    }
}

#[async_trait]
impl ObjectStore for DriveObjectStore {
    async fn list(
        &self,
        token: &AccessToken,
        query: &ObjectQuery,
    ) -> OuroborosResult<Vec<ObjectInfo>> {
        let url = Self::files_url(&self.api_base, None)?;
        let q = build_query(query);
        let mut listed = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("fields", LIST_FIELDS),
                ("orderBy", "modifiedTime desc"),
                ("spaces", "drive"),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(page) = page_token.as_deref() {
                params.push(("pageToken", page));
            }

            let request = self
                .http
                .get(url.clone())
                .bearer_auth(token.secret())
                .query(&params);
            let response = self.send("list", None, request).await?;
            let page: FileList = decode("list", response).await?;

            listed.extend(page.files.into_iter().map(ObjectInfo::from));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(query = %q, count = listed.len(), "listed objects");
        Ok(listed)
    }

    async fn get_metadata(&self, token: &AccessToken, id: &str) -> OuroborosResult<ObjectInfo> {
        let request = self
            .http
            .get(Self::files_url(&self.api_base, Some(id))?)
            .bearer_auth(token.secret())
            .query(&[("fields", FILE_FIELDS)]);
        let response = self.send("get_metadata", Some(id), request).await?;
        let file: DriveFile = decode("get_metadata", response).await?;
        Ok(file.into())
    }

    async fn get_content(&self, token: &AccessToken, id: &str) -> OuroborosResult<Bytes> {
        let request = self
            .http
            .get(Self::files_url(&self.api_base, Some(id))?)
            .bearer_auth(token.secret())
            .query(&[("alt", "media")]);
        let response = self.send("get_content", Some(id), request).await?;
        response
            .bytes()
            .await
            .map_err(|e| OuroborosError::storage("get_content", e))
    }

    async fn create(
        &self,
        token: &AccessToken,
        object: &NewObject,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo> {
        let mut metadata = json!({
            "name": object.name,
            "mimeType": object.content_type,
        });
        if let Some(parent) = &object.parent {
            metadata["parents"] = json!([parent]);
        }

        let request = self
            .http
            .post(Self::files_url(&self.upload_base, None)?)
            .bearer_auth(token.secret());
        self.upload("create", request, metadata, &object.content_type, &content)
            .await
    }

    async fn update(
        &self,
        token: &AccessToken,
        id: &str,
        content_type: &str,
        content: Bytes,
    ) -> OuroborosResult<ObjectInfo> {
        // Parents are immutable on update; sending them is rejected.
        let metadata = json!({ "mimeType": content_type });

        let request = self
            .http
            .patch(Self::files_url(&self.upload_base, Some(id))?)
            .bearer_auth(token.secret());
        self.upload("update", request, metadata, content_type, &content)
            .await
    }

    async fn create_container(
        &self,
        token: &AccessToken,
        name: &str,
    ) -> OuroborosResult<ObjectInfo> {
        let request = self
            .http
            .post(Self::files_url(&self.api_base, None)?)
            .bearer_auth(token.secret())
            .query(&[("fields", FILE_FIELDS)])
            .json(&json!({ "name": name, "mimeType": CONTAINER_CONTENT_TYPE }));
        let response = self.send("create_container", None, request).await?;
        let file: DriveFile = decode("create_container", response).await?;
        Ok(file.into())
    }
}

fn parse_base(raw: &str) -> OuroborosResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(OuroborosError::configuration("store endpoint is empty"));
    }
    Url::parse(trimmed)
        .map_err(|e| OuroborosError::configuration(format!("invalid store endpoint {}: {}", raw, e)))
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Render a query into the store's `q` language; trashed objects are always excluded
pub(crate) fn build_query(query: &ObjectQuery) -> String {
    let mut clauses = Vec::new();
    if let Some(name) = &query.name {
        clauses.push(format!("name = '{}'", escape_literal(name)));
    }
    if let Some(parent) = &query.parent {
        clauses.push(format!("'{}' in parents", escape_literal(parent)));
    }
    if let Some(content_type) = &query.content_type {
        clauses.push(format!("mimeType = '{}'", escape_literal(content_type)));
    }
    clauses.push("trashed = false".to_string());
    clauses.join(" and ")
}

fn multipart_related(metadata: &serde_json::Value, content_type: &str, content: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {ct}\r\n\r\n",
        b = MULTIPART_BOUNDARY,
        meta = metadata,
        ct = content_type,
    );
    let tail = format!("\r\n--{}--", MULTIPART_BOUNDARY);

    let mut body = Vec::with_capacity(head.len() + content.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(tail.as_bytes());
    body
}

async fn check_status(
    operation: &str,
    id: Option<&str>,
    response: Response,
) -> OuroborosResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match (status, id) {
        (StatusCode::UNAUTHORIZED, _) => Err(OuroborosError::session_expired(operation)),
        (StatusCode::NOT_FOUND, Some(id)) => Err(OuroborosError::not_found(id)),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let body = body.trim();
            let body = if body.is_empty() { "<empty>" } else { body };
            Err(OuroborosError::storage(
                operation,
                format!("HTTP {}: {}", status.as_u16(), body),
            ))
        }
    }
}

async fn decode<T>(operation: &str, response: Response) -> OuroborosResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let bytes = response
        .bytes()
        .await
        .map_err(|e| OuroborosError::storage(operation, e))?;
    serde_json::from_slice(&bytes).map_err(|e| OuroborosError::storage(operation, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> DriveObjectStore {
        DriveObjectStore::new(&StoreEndpoints::single_base(&server.uri())).unwrap()
    }

    fn token() -> AccessToken {
        AccessToken::new("tok")
    }

    #[test]
    fn test_query_rendering() {
        let q = build_query(
            &ObjectQuery::new()
                .named("it's.json")
                .in_container("folder-1"),
        );
        assert_eq!(
            q,
            "name = 'it\\'s.json' and 'folder-1' in parents and trashed = false"
        );
    }

    #[tokio::test]
    async fn test_list_sends_query_and_follows_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "b", "name": "b.md", "mimeType": "text/markdown" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("orderBy", "modifiedTime desc"))
            .and(query_param(
                "q",
                "'folder-1' in parents and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{
                    "id": "a",
                    "name": "a.md",
                    "mimeType": "text/markdown",
                    "modifiedTime": "2026-01-02T03:04:05.000Z"
                }],
                "nextPageToken": "p2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let listed = store
            .list(&token(), &ObjectQuery::new().in_container("folder-1"))
            .await
            .unwrap();

        let ids: Vec<&str> = listed.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(listed[0].modified_at.is_some());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/abc"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.get_content(&token(), "abc").await.unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn test_missing_object_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.get_metadata(&token(), "gone").await.unwrap_err();
        assert!(matches!(err, OuroborosError::NotFound { id } if id == "gone"));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store.list(&token(), &ObjectQuery::new()).await.unwrap_err();
        match err {
            OuroborosError::StorageUnavailable { operation, message } => {
                assert_eq!(operation, "list");
                assert!(message.contains("503"));
                assert!(message.contains("backend down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_content_reads_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/doc"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Capsule"))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let content = store.get_content(&token(), "doc").await.unwrap();
        assert_eq!(content, Bytes::from("# Capsule"));
    }

    #[tokio::test]
    async fn test_create_uses_multipart_with_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "multipart"))
            .and(header(
                "content-type",
                "multipart/related; boundary=foo_bar_baz",
            ))
            .and(body_string_contains("\"parents\":[\"folder-1\"]"))
            .and(body_string_contains("hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new-1",
                "name": "notes.md",
                "mimeType": "text/markdown"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let info = store
            .create(
                &token(),
                &NewObject::new("notes.md", "text/markdown", Some("folder-1".to_string())),
                Bytes::from("hello"),
            )
            .await
            .unwrap();
        assert_eq!(info.id, "new-1");
    }

    #[tokio::test]
    async fn test_update_never_sends_parents() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/upload/drive/v3/files/env-1"))
            .and(query_param("uploadType", "multipart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "env-1",
                "name": "app-data.json",
                "mimeType": "application/json"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        store
            .update(&token(), "env-1", "application/json", Bytes::from("{}"))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(!body.contains("parents"));
        assert!(body.starts_with("--foo_bar_baz\r\n"));
        assert!(body.ends_with("\r\n--foo_bar_baz--"));
    }

    #[tokio::test]
    async fn test_create_container_posts_folder_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_string_contains(CONTAINER_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "folder-9",
                "name": "Ouroboros",
                "mimeType": CONTAINER_CONTENT_TYPE
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let info = store.create_container(&token(), "Ouroboros").await.unwrap();
        assert_eq!(info.id, "folder-9");
    }

    #[tokio::test]
    async fn test_first_push_creates_container_and_primary() {
        use crate::config::OuroborosConfig;
        use crate::storage::{EnvelopeWrite, StorageGateway};
        use std::sync::Arc;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "folder-1",
                "name": "Ouroboros",
                "mimeType": CONTAINER_CONTENT_TYPE,
                "modifiedTime": "2026-10-18T09:00:00.000Z"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(body_string_contains("\"parents\":[\"folder-1\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "env-1",
                "name": "app-data.json",
                "mimeType": "application/json",
                "modifiedTime": "2026-10-18T09:00:01.000Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StorageGateway::new(
            Arc::new(store_for(&server).await),
            &OuroborosConfig::default(),
        );
        let session = gateway.open_session(token()).await.unwrap();
        assert_eq!(session.container_id(), "folder-1");

        let id = gateway
            .write_envelope(&session, "folder-1", "{}", EnvelopeWrite::Primary)
            .await
            .unwrap();
        assert_eq!(id, "env-1");
    }
}
