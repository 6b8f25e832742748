//! Identity backends
//!
//! [`IdentityBackend`] is the surface consumers of global IDs program
//! against. Two implementations exist:
//!
//! - [`LocalBackend`]: an in-process [`MetricStore`]; calls that may wait on
//!   the log lock run on the blocking pool
//! - [`RemoteBackend`]: a gidstore server reached over its HTTP API

use crate::api::dto::{
    DefragmentResponse, ErrorResponse, GlobalIdResponse, IdentityResponse, ResolveRequest,
    StatsResponse,
};
use crate::store::{CompactionReport, MetricIdentity, MetricStore, StoreError, StoreResult, StoreStats};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Operations every identity backend provides
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Short name for logs and health output
    fn name(&self) -> &'static str;

    /// Resolve a name and/or opaque key to a global ID
    async fn resolve(
        &self,
        name: Option<String>,
        opaque_key: Option<Vec<u8>>,
    ) -> BackendResult<i64>;

    async fn lookup_by_name(&self, name: &str) -> BackendResult<Option<i64>>;

    async fn lookup_by_opaque(&self, opaque_key: &[u8]) -> BackendResult<Option<i64>>;

    /// Fetch the live record of a global ID
    async fn get(&self, global_id: i64) -> BackendResult<Option<MetricIdentity>>;

    /// Delete a global ID; false if it was unknown
    async fn delete(&self, global_id: i64) -> BackendResult<bool>;

    async fn defragment(&self) -> BackendResult<CompactionReport>;

    async fn stats(&self) -> BackendResult<StoreStats>;
}

/// Errors that can occur in a backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Backend over a store in this process
#[derive(Debug, Clone)]
pub struct LocalBackend {
    store: Arc<MetricStore>,
}

impl LocalBackend {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    async fn blocking<T, F>(&self, op: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&MetricStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))?
            .map_err(BackendError::from)
    }
}

#[async_trait]
impl IdentityBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn resolve(
        &self,
        name: Option<String>,
        opaque_key: Option<Vec<u8>>,
    ) -> BackendResult<i64> {
        self.blocking(move |store| store.resolve(name.as_deref(), opaque_key.as_deref()))
            .await
    }

    async fn lookup_by_name(&self, name: &str) -> BackendResult<Option<i64>> {
        Ok(self.store.lookup_by_name(name))
    }

    async fn lookup_by_opaque(&self, opaque_key: &[u8]) -> BackendResult<Option<i64>> {
        Ok(self.store.lookup_by_opaque(opaque_key))
    }

    async fn get(&self, global_id: i64) -> BackendResult<Option<MetricIdentity>> {
        self.blocking(move |store| store.get(global_id)).await
    }

    async fn delete(&self, global_id: i64) -> BackendResult<bool> {
        self.blocking(move |store| store.delete(global_id)).await
    }

    async fn defragment(&self) -> BackendResult<CompactionReport> {
        self.blocking(|store| store.defragment()).await
    }

    async fn stats(&self) -> BackendResult<StoreStats> {
        self.blocking(|store| Ok(store.stats())).await
    }
}

/// Backend over a gidstore server's HTTP API
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: Url,
}

impl RemoteBackend {
    /// Create a client for the server at `base_url` (e.g. "http://localhost:8090")
    pub fn new(base_url: &str, timeout: Duration) -> BackendResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::InvalidResponse(format!("bad base URL {}: {}", base_url, e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// URL of `segments` below `/api/v1`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidResponse(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-success response into an error
    async fn check(response: reqwest::Response) -> BackendResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        let status = status.as_u16();
        if (400..500).contains(&status) {
            Err(BackendError::Rejected { status, message })
        } else {
            Err(BackendError::Remote { status, message })
        }
    }

    /// GET returning `None` on 404
    async fn get_optional<T: serde::de::DeserializeOwned>(&self, url: Url) -> BackendResult<Option<T>> {
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }
}

#[async_trait]
impl IdentityBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn resolve(
        &self,
        name: Option<String>,
        opaque_key: Option<Vec<u8>>,
    ) -> BackendResult<i64> {
        let body = ResolveRequest {
            name,
            opaque_key: opaque_key.map(hex::encode),
        };
        let url = self.endpoint(&["identities", "resolve"])?;
        let response = self.client.post(url).json(&body).send().await?;
        let resolved: GlobalIdResponse = Self::check(response).await?.json().await?;
        Ok(resolved.global_id)
    }

    async fn lookup_by_name(&self, name: &str) -> BackendResult<Option<i64>> {
        let url = self.endpoint(&["identities", "by-name", name])?;
        let found: Option<GlobalIdResponse> = self.get_optional(url).await?;
        Ok(found.map(|r| r.global_id))
    }

    async fn lookup_by_opaque(&self, opaque_key: &[u8]) -> BackendResult<Option<i64>> {
        let key = hex::encode(opaque_key);
        let url = self.endpoint(&["identities", "by-opaque", &key])?;
        let found: Option<GlobalIdResponse> = self.get_optional(url).await?;
        Ok(found.map(|r| r.global_id))
    }

    async fn get(&self, global_id: i64) -> BackendResult<Option<MetricIdentity>> {
        let url = self.endpoint(&["identities", &global_id.to_string()])?;
        let found: Option<IdentityResponse> = self.get_optional(url).await?;
        found
            .map(|identity| {
                identity
                    .into_identity()
                    .map_err(|e| BackendError::InvalidResponse(format!("opaque key: {}", e)))
            })
            .transpose()
    }

    async fn delete(&self, global_id: i64) -> BackendResult<bool> {
        let url = self.endpoint(&["identities", &global_id.to_string()])?;
        let response = self.client.delete(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    async fn defragment(&self) -> BackendResult<CompactionReport> {
        let url = self.endpoint(&["admin", "defragment"])?;
        let response = self.client.post(url).send().await?;
        let body: DefragmentResponse = Self::check(response).await?.json().await?;
        Ok(body.report)
    }

    async fn stats(&self) -> BackendResult<StoreStats> {
        let url = self.endpoint(&["admin", "stats"])?;
        let response = self.client.get(url).send().await?;
        let body: StatsResponse = Self::check(response).await?.json().await?;
        Ok(body.stats)
    }
}
