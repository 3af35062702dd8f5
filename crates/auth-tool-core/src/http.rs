//! HTTP Transport
//!
//! Every request the flow makes goes through [`HttpTransport`] so the protocol
//! logic can be driven without a network.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::debug;

use crate::error::{FlowError, FlowResult};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Raw reply: status code plus the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON, whatever the status.
    pub fn json(&self, url: &str) -> FlowResult<Value> {
        serde_json::from_str(&self.body).map_err(|e| FlowError::parse(url, e))
    }
}

#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    /// Plain GET.
    async fn get(&self, url: &str) -> FlowResult<HttpReply>;

    /// POST with `content-type: application/x-www-form-urlencoded` and the
    /// body sent exactly as given.
    async fn post_form(&self, url: &str, body: String) -> FlowResult<HttpReply>;
}

/// Create a reqwest HTTP client.
///
/// No timeout unless one is given: a hung provider keeps the flow waiting.
pub fn create_http_client(timeout: Option<Duration>) -> FlowResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| FlowError::Config(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> FlowResult<Self> {
        Ok(Self {
            client: create_http_client(timeout)?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read(url: &str, response: reqwest::Response) -> FlowResult<HttpReply> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FlowError::network(url, e))?;
        debug!("{} answered HTTP {} ({} bytes)", url, status, body.len());
        Ok(HttpReply { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> FlowResult<HttpReply> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FlowError::network(url, e))?;
        Self::read(url, response).await
    }

    async fn post_form(&self, url: &str, body: String) -> FlowResult<HttpReply> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| FlowError::network(url, e))?;
        Self::read(url, response).await
    }
}
