//! Push assembled documents to the configured servers.
//!
//! Transport is behind the [`DocumentStore`] trait so the orchestration can be
//! exercised against mocks; [`HttpStore`] is the real client speaking the
//! CouchDB protocol (`PUT /{db}`, `HEAD /{db}/{id}`, `POST /{db}/_bulk_docs`).
//!
//! Each server is handled strictly in sequence and in isolation: a failure
//! against one server is logged and must not abort delivery to the others.
//! There are no retries; a concurrent writer can still win between the
//! revision probe and the upload, and the server will reject that document.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::registry::ServerEntry;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// Minimal document-store surface the push flow needs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Idempotent database creation (`PUT /{database}`).
    async fn ensure_database(
        &self,
        server: &ServerEntry,
        database: &str,
    ) -> Result<(), StoreError>;

    /// Lightweight existence probe; returns the current revision token when
    /// the document exists.
    async fn current_revision(
        &self,
        server: &ServerEntry,
        database: &str,
        id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Single bulk upsert carrying the whole batch; returns the raw server
    /// response body.
    async fn bulk_upsert(
        &self,
        server: &ServerEntry,
        database: &str,
        docs: &[Value],
    ) -> Result<String, StoreError>;
}

/// reqwest-backed [`DocumentStore`].
pub struct HttpStore {
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpStore {
    fn default() -> Self {
        Self::new()
    }
}

fn server_url(server: &ServerEntry, path: &str) -> String {
    format!("{}/{}", server.url.trim_end_matches('/'), path)
}

fn with_auth(request: reqwest::RequestBuilder, server: &ServerEntry) -> reqwest::RequestBuilder {
    match &server.auth {
        Some(token) => request.header("Authorization", format!("Basic {token}")),
        None => request,
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn ensure_database(
        &self,
        server: &ServerEntry,
        database: &str,
    ) -> Result<(), StoreError> {
        let url = server_url(server, database);
        let response = with_auth(self.client.put(&url), server)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.clone(),
                source,
            })?;
        // 412 means the database already exists; either way it is usable.
        debug!(url = %url, status = %response.status(), "ensure database");
        Ok(())
    }

    async fn current_revision(
        &self,
        server: &ServerEntry,
        database: &str,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let url = server_url(server, &format!("{database}/{id}"));
        let response = with_auth(self.client.head(&url), server)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.clone(),
                source,
            })?;
        let revision = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_string());
        debug!(url = %url, status = %response.status(), revision = ?revision, "revision probe");
        Ok(revision)
    }

    async fn bulk_upsert(
        &self,
        server: &ServerEntry,
        database: &str,
        docs: &[Value],
    ) -> Result<String, StoreError> {
        let url = server_url(server, &format!("{database}/_bulk_docs"));
        let response = with_auth(self.client.post(&url), server)
            .json(&json!({ "docs": docs }))
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(StoreError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Outcome of the push against a single server.
#[derive(Debug)]
pub struct ServerPushOutcome {
    pub server: String,
    pub result: Result<String, StoreError>,
}

/// Per-server outcomes for one push invocation.
#[derive(Debug)]
pub struct PushReport {
    pub servers: Vec<ServerPushOutcome>,
}

impl PushReport {
    pub fn any_succeeded(&self) -> bool {
        self.servers.iter().any(|s| s.result.is_ok())
    }

    pub fn all_failed(&self) -> bool {
        !self.servers.is_empty() && !self.any_succeeded()
    }
}

/// Push `documents` to every configured server, sequentially.
///
/// Each server gets its own copy of the batch: revision tokens reported by
/// one server are never uploaded to another. Documents without an `_id` skip
/// the probe and are inserted as new.
pub async fn push<S: DocumentStore>(
    store: &S,
    documents: &[Value],
    database: &str,
    servers: &BTreeMap<String, ServerEntry>,
) -> PushReport {
    let mut outcomes = Vec::with_capacity(servers.len());
    for (name, server) in servers {
        info!(server = %name, url = %server.url, database, "uploading batch");
        let result = push_to_server(store, documents, database, server).await;
        match &result {
            Ok(body) => info!(server = %name, response = %body, "upload complete"),
            Err(error) => error!(server = %name, %error, "upload failed"),
        }
        outcomes.push(ServerPushOutcome {
            server: name.clone(),
            result,
        });
    }
    PushReport { servers: outcomes }
}

async fn push_to_server<S: DocumentStore>(
    store: &S,
    documents: &[Value],
    database: &str,
    server: &ServerEntry,
) -> Result<String, StoreError> {
    if let Err(error) = store.ensure_database(server, database).await {
        // Usually "already exists"; the bulk upload decides whether the
        // database is actually reachable.
        warn!(database, %error, "ensure database failed, continuing");
    }

    let mut batch: Vec<Value> = documents.to_vec();
    for doc in &mut batch {
        let Some(id) = doc.get("_id").and_then(Value::as_str).map(str::to_string) else {
            debug!("document without _id, server will assign one");
            continue;
        };
        if let Some(revision) = store.current_revision(server, database, &id).await? {
            debug!(id = %id, revision = %revision, "attaching current revision");
            if let Some(object) = doc.as_object_mut() {
                object.insert("_rev".to_string(), Value::String(revision));
            }
        }
    }

    store.bulk_upsert(server, database, &batch).await
}
