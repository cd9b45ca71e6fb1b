//! Synchronous request/response path to the conversational backend

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::protocol::ApiReply;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;

/// One-shot call carrying an encoded user message
#[async_trait]
pub trait Backend: Send + Sync {
    /// Post `payload` to the conversation and return the reply array
    async fn post_message(
        &self,
        conversation_ref: &str,
        payload: &str,
    ) -> Result<Vec<ApiReply>, ChatError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn post_message(
        &self,
        conversation_ref: &str,
        payload: &str,
    ) -> Result<Vec<ApiReply>, ChatError> {
        (**self).post_message(conversation_ref, payload).await
    }
}

/// HTTP implementation of [`Backend`]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    path_template: String,
    headers: HeaderMap,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatError::config(format!("Failed to create HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ChatError::config(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ChatError::config(format!("Invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            path_template: config.api_path.clone(),
            headers,
        })
    }

    fn url_for(&self, conversation_ref: &str) -> String {
        let path = self.path_template.replace("{conversation}", conversation_ref);
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn post_message(
        &self,
        conversation_ref: &str,
        payload: &str,
    ) -> Result<Vec<ApiReply>, ChatError> {
        let url = self.url_for(conversation_ref);

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::request_failed(None, format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ChatError::request_failed(None, format!("Connection failed: {e}"))
                } else {
                    ChatError::request_failed(None, format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ChatError::request_failed(
                Some(status.as_u16()),
                format!("Failed to read response: {e}"),
            )
        })?;

        if !status.is_success() {
            return Err(ChatError::request_failed(Some(status.as_u16()), body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ChatError::request_failed(
                Some(status.as_u16()),
                format!("Failed to parse response: {e} - body: {body}"),
            )
        })
    }
}

/// Logging wrapper for backends
pub struct LoggingBackend {
    inner: Arc<dyn Backend>,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Backend for LoggingBackend {
    async fn post_message(
        &self,
        conversation_ref: &str,
        payload: &str,
    ) -> Result<Vec<ApiReply>, ChatError> {
        let start = Instant::now();
        let result = self.inner.post_message(conversation_ref, payload).await;
        let duration = start.elapsed();

        match &result {
            Ok(replies) => {
                tracing::info!(
                    conversation = %conversation_ref,
                    duration_ms = %duration.as_millis(),
                    replies = replies.len(),
                    "Backend call completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    conversation = %conversation_ref,
                    duration_ms = %duration.as_millis(),
                    status = ?e.status(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Backend call failed"
                );
            }
        }

        result
    }
}
