//! HTTP client for a running portal.
//!
//! The aggregate payload is cached on the client that fetched it, never in
//! process-wide state. Any write made through the client drops the cache so
//! the next read sees it.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::models::{AggregateResponse, ApiEnvelope, Professor, ProfessorInput};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("portal returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    cache: RwLock<Option<Arc<AggregateResponse>>>,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Returns the cached aggregate payload, fetching it on first use.
    pub async fn all_data(&self) -> Result<Arc<AggregateResponse>, ClientError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }
        self.refresh().await
    }

    /// Fetches the aggregate payload unconditionally and replaces the cache.
    pub async fn refresh(&self) -> Result<Arc<AggregateResponse>, ClientError> {
        let response = self.http.get(self.url("/api/all-data")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }

        let fresh = Arc::new(response.json::<AggregateResponse>().await?);
        *self.cache.write().await = Some(Arc::clone(&fresh));
        tracing::debug!(profiles = fresh.professors.profiles.len(), "aggregate cache refreshed");
        Ok(fresh)
    }

    pub async fn invalidate(&self) {
        self.cache.write().await.take();
    }

    async fn envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<ApiEnvelope<T>, ClientError> {
        let status = response.status();
        let envelope = response.json::<ApiEnvelope<T>>().await?;
        if !status.is_success() || !envelope.success {
            return Err(ClientError::Api {
                status,
                message: envelope.error.unwrap_or_default(),
            });
        }
        Ok(envelope)
    }

    fn missing_data(status: StatusCode) -> ClientError {
        ClientError::Api {
            status,
            message: "response carried no data".to_string(),
        }
    }

    pub async fn professor(&self, id: i64) -> Result<Professor, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/professors/{id}")))
            .send()
            .await?;
        let status = response.status();
        Self::envelope::<Professor>(response)
            .await?
            .data
            .ok_or_else(|| Self::missing_data(status))
    }

    pub async fn create_professor(&self, input: &ProfessorInput) -> Result<Professor, ClientError> {
        let response = self
            .http
            .post(self.url("/api/professors"))
            .json(input)
            .send()
            .await?;
        let status = response.status();
        let envelope = Self::envelope::<Professor>(response).await?;
        self.invalidate().await;
        envelope.data.ok_or_else(|| Self::missing_data(status))
    }

    pub async fn update_professor(
        &self,
        id: i64,
        input: &ProfessorInput,
    ) -> Result<Professor, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/api/professors/{id}")))
            .json(input)
            .send()
            .await?;
        let status = response.status();
        let envelope = Self::envelope::<Professor>(response).await?;
        self.invalidate().await;
        envelope.data.ok_or_else(|| Self::missing_data(status))
    }

    pub async fn delete_professor(&self, id: i64) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/professors/{id}")))
            .send()
            .await?;
        Self::envelope::<serde_json::Value>(response).await?;
        self.invalidate().await;
        Ok(())
    }
}
