//! Production implementation of BackendClient over HTTP.
//!
//! The keyframe stream is a server-sent event stream. The reader task splits
//! the response body into lines and forwards them untouched; SSE field
//! parsing (`data:` prefixes, comments) happens in the engine's protocol
//! layer so the simulation backend can feed the exact same text.

use crate::backend::{BackendClient, StreamReceiver, STREAM_CHANNEL_DEPTH};
use crate::error::EnvError;
use crate::types::{OrbitQuery, StreamEvent};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keyframe stream path relative to the backend base URL.
pub const STREAM_PATH: &str = "/api/v1/stream/keyframes";

/// Orbit propagation path prefix.
pub const PROPAGATE_PATH: &str = "/api/v1/propagate";

/// TLE refresh path.
pub const REFRESH_PATH: &str = "/api/v1/refresh-tles";

/// Structured error body some backend routes return.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// reqwest-backed client for the propagation backend.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Creates a client for `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, EnvError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EnvError::network(format!("http client init failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Overrides the per-request timeout for orbit and refresh calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> EnvError {
        if err.is_timeout() {
            EnvError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            EnvError::network(err.to_string())
        }
    }

    /// Turns a non-success response into an error, preferring the
    /// backend's structured `{"error": ...}` message when present.
    async fn error_from_response(response: Response, path: &str) -> EnvError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) if status == 404 => format!("Endpoint not found (backend needs {path})"),
            Err(_) => body.chars().take(100).collect(),
        };
        EnvError::http(status, message)
    }

    async fn read_body(&self, response: Response, path: &str) -> Result<String, EnvError> {
        if !response.status().is_success() {
            return Err(Self::error_from_response(response, path).await);
        }
        response.text().await.map_err(|e| self.map_send_error(e))
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn open_stream(&self) -> Result<StreamReceiver, EnvError> {
        let url = self.url(STREAM_PATH);
        info!("Connecting to {}...", url);

        let response = self
            .authorize(self.client.get(&url).header(ACCEPT, "text/event-stream"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, STREAM_PATH).await);
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();

            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Stream receiver dropped, closing connection");
                        return;
                    }
                    chunk = body.next() => chunk,
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Keyframe stream failed: {}", e);
                        let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                };
                pending.extend_from_slice(&bytes);

                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(|c| c == '\r' || c == '\n')
                        .to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(StreamEvent::Line(line)).await.is_err() {
                        debug!("Stream receiver dropped, stopping reader");
                        return;
                    }
                }
            }

            let _ = tx.send(StreamEvent::Closed).await;
        });

        Ok(rx)
    }

    async fn fetch_orbit(&self, query: OrbitQuery) -> Result<String, EnvError> {
        let path = format!("{}/{}", PROPAGATE_PATH, query.id);
        debug!("Fetching full orbit for {}...", query.id);

        let response = self
            .authorize(self.client.get(self.url(&path)))
            .query(&[("horizon", query.horizon_secs), ("step", query.step_secs)])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_body(response, PROPAGATE_PATH).await
    }

    async fn refresh_tles(&self) -> Result<String, EnvError> {
        info!("Requesting TLE refresh");
        let response = self
            .authorize(self.client.post(self.url(REFRESH_PATH)))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_body(response, REFRESH_PATH).await
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let backend = HttpBackend::new("http://localhost:8080/", None).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8080");
        assert_eq!(
            backend.url(STREAM_PATH),
            "http://localhost:8080/api/v1/stream/keyframes"
        );
    }

    #[test]
    fn test_empty_token_treated_as_absent() {
        let backend = HttpBackend::new("http://localhost:8080", Some(String::new())).unwrap();
        assert!(backend.auth_token.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Port 9 (discard) on loopback is closed in test environments
        let backend = HttpBackend::new("http://127.0.0.1:9", None)
            .unwrap()
            .with_request_timeout(Duration::from_secs(2));
        let err = backend.refresh_tles().await.unwrap_err();
        assert!(err.is_transient());
    }
}
