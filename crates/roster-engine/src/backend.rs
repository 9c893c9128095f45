//! Backend seam
//!
//! [`Backend`] is everything the engine needs from the service that owns
//! records and counters. [`HttpBackend`] speaks the REST surface:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | resolve | `GET /resolve?id=` → `{displayName, avatarUrl}` or 404 |
//! | resolve_batch | `GET /resolve/batch?ids=a,b,c` → `{id: {displayName, avatarUrl}}` |
//! | aggregate | `GET /aggregate?id=&metric=&start=&end=` → `{count}` |
//! | list_entities | `GET /entities?metric=` → `[id]` |

use crate::error::FetchError;
use async_trait::async_trait;
use roster_model::{DateRange, EntityId, Metric, Record};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Backend owning identifier records and counters
#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolve one identifier; `Ok(None)` when the backend does not know it
    async fn resolve(&self, id: &EntityId) -> Result<Option<Record>, FetchError>;

    /// Resolve up to 100 identifiers; missing keys are simply unresolved
    async fn resolve_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Record>, FetchError>;

    /// Count of `metric` for `id` over the inclusive `range`
    async fn aggregate(
        &self,
        id: &EntityId,
        metric: Metric,
        range: &DateRange,
    ) -> Result<u64, FetchError>;

    /// Every identifier that has a `metric` counter at all
    async fn list_entities(&self, metric: Metric) -> Result<Vec<EntityId>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// REST client for the dashboard backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create client for `base_url` with a per-request timeout
    ///
    /// # Errors
    /// - `FetchError::Transport` if the TLS backend cannot be initialised
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Base URL requests are issued against
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}{endpoint}", self.base_url);
        tracing::trace!(%url, "backend request");

        self.client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self.get(endpoint, query).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(endpoint, status.as_u16()));
        }
        decode(endpoint, response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn resolve(&self, id: &EntityId) -> Result<Option<Record>, FetchError> {
        const ENDPOINT: &str = "/resolve";

        let response = self.get(ENDPOINT, &[("id", id.to_string())]).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::status(ENDPOINT, status.as_u16()));
        }
        decode(ENDPOINT, response).await.map(Some)
    }

    async fn resolve_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Record>, FetchError> {
        let joined = ids
            .iter()
            .map(EntityId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.get_json("/resolve/batch", &[("ids", joined)]).await
    }

    async fn aggregate(
        &self,
        id: &EntityId,
        metric: Metric,
        range: &DateRange,
    ) -> Result<u64, FetchError> {
        let response: CountResponse = self
            .get_json(
                "/aggregate",
                &[
                    ("id", id.to_string()),
                    ("metric", metric.as_str().to_string()),
                    ("start", range.start_param()),
                    ("end", range.end_param()),
                ],
            )
            .await?;
        Ok(response.count)
    }

    async fn list_entities(&self, metric: Metric) -> Result<Vec<EntityId>, FetchError> {
        self.get_json("/entities", &[("metric", metric.as_str().to_string())])
            .await
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T, FetchError> {
    response.json::<T>().await.map_err(|err| {
        if err.is_decode() {
            FetchError::decode(endpoint, err)
        } else {
            transport_error(err)
        }
    })
}
