//! HTTP transport to compute servers.
//!
//! Everything that talks to a server goes through the [`Transport`] trait so
//! the solve path can run against a stub in tests. [`HttpTransport`] is the
//! reqwest-backed implementation: one pooled client, a per-request timeout,
//! and the API key header when one is configured.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use hopper_core::config::{ServersConfig, API_KEY_HEADER};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("unable to reach {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("http client: {0}")]
    Client(String),
}

/// Status, content type and body of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpReply, TransportError>>;

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, Result<HttpReply, TransportError>>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, api_key: Option<&str>) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|e| TransportError::Client(format!("invalid api key: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn from_config(servers: &ServersConfig) -> Result<Self, TransportError> {
        Self::new(
            Duration::from_secs(servers.http_timeout_secs.max(1)),
            Some(servers.api_key.as_str()),
        )
    }

    async fn finish(
        url: &str,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<HttpReply, TransportError> {
        let response = sent.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| classify(url, e))?;

        tracing::trace!(url, status, bytes = body.len(), "compute reply");
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpReply, TransportError>> {
        Box::pin(async move {
            let sent = self.client.get(url).send().await;
            Self::finish(url, sent).await
        })
    }

    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, Result<HttpReply, TransportError>> {
        Box::pin(async move {
            let sent = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string())
                .send()
                .await;
            Self::finish(url, sent).await
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else if err.is_connect() {
        TransportError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
