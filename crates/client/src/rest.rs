//! HTTP API client for one-shot reads and service calls.
//!
//! Shares the session's credentials but none of its state: each call is an
//! independent bearer-authenticated request.

use homelink_shared::{ApiError, EntityState};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::credentials::Credentials;

/// HTTP client for the hub's `/api/` endpoints.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl RestClient {
    pub fn new(credentials: &Credentials) -> Result<Self, ApiError> {
        let base = credentials
            .rest_base_url()
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client: Client::new(),
            base_url: base.as_str().to_string(),
            access_token: credentials.access_token().to_string(),
        })
    }

    /// Point at a different base URL, e.g. a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::http(status, text));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !is_success {
            return Err(ApiError::http(status, text));
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    // --- Hub endpoints ---

    /// `{"message": "API running."}` when the token is accepted.
    pub async fn api_status(&self) -> Result<Value, ApiError> {
        self.get_json("/api/").await
    }

    pub async fn get_states(&self) -> Result<Vec<EntityState>, ApiError> {
        self.get_json("/api/states").await
    }

    pub async fn get_state(&self, entity_id: &str) -> Result<EntityState, ApiError> {
        self.get_json(&state_path(entity_id)).await
    }

    /// Returns the states that changed while the service ran.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: &Value,
    ) -> Result<Vec<EntityState>, ApiError> {
        self.post_json(&service_path(domain, service), service_data)
            .await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn state_path(entity_id: &str) -> String {
    format!("/api/states/{}", urlencoding::encode(entity_id))
}

fn service_path(domain: &str, service: &str) -> String {
    format!(
        "/api/services/{}/{}",
        urlencoding::encode(domain),
        urlencoding::encode(service)
    )
}
