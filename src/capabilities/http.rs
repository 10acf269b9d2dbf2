use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::model::AlertPayload;

pub const MAX_URL_LENGTH: usize = 2048;
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("invalid url '{url}': {reason}")]
    Invalid { url: String, reason: String },
}

/// An absolute http(s) URL with a host and no embedded credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl(String);

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, UrlError> {
        let url = url.into();
        let invalid = |reason: String| UrlError::Invalid {
            url: Self::truncate_url(&url),
            reason,
        };

        if url.trim().is_empty() {
            return Err(invalid("URL cannot be empty".to_string()));
        }
        if url.len() > MAX_URL_LENGTH {
            return Err(invalid(format!(
                "URL exceeds maximum length of {} bytes",
                MAX_URL_LENGTH
            )));
        }

        let parsed = Url::parse(&url).map_err(|e| invalid(e.to_string()))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(invalid(format!(
                "invalid scheme '{}', only 'http' and 'https' are allowed",
                scheme
            )));
        }
        if parsed.host_str().is_none() {
            return Err(invalid("URL must have a host".to_string()));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("credentials in URL are not allowed".to_string()));
        }

        Ok(Self(parsed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn truncate_url(url: &str) -> String {
        if url.len() <= 100 {
            url.to_string()
        } else {
            let mut end = 100;
            while !url.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &url[..end])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Backend error: {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// Submits one alert to the backend. One attempt per call; retry policy lives
/// with the caller.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> Result<(), DeliveryError>;
}

/// Classifies a finished exchange: 2xx with a JSON body is success.
pub fn classify_response(status: u16, body: &[u8]) -> Result<serde_json::Value, DeliveryError> {
    if !(200..300).contains(&status) {
        return Err(DeliveryError::Status(status));
    }
    serde_json::from_slice(body)
        .map_err(|e| DeliveryError::InvalidResponse(format!("failed to parse JSON: {}", e)))
}

/// `POST`s alerts as JSON to the backend's alert endpoint.
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    endpoint: ValidatedUrl,
}

impl HttpDeliveryClient {
    pub fn new(endpoint: ValidatedUrl) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: ValidatedUrl) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &ValidatedUrl {
        &self.endpoint
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    #[instrument(skip(self, payload), fields(source = %payload.source(), endpoint = %self.endpoint.as_str()))]
    async fn send(&self, payload: &AlertPayload) -> Result<(), DeliveryError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        let request_id = Uuid::new_v4().to_string();

        let response = self
            .client
            .post(self.endpoint.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        match classify_response(status, &bytes) {
            Ok(_) => {
                info!(status, request_id = %request_id, "alert delivered");
                Ok(())
            }
            Err(e) => {
                warn!(status, request_id = %request_id, error = %e, "alert delivery rejected");
                Err(e)
            }
        }
    }
}
