//! OpenID Provider Discovery
//!
//! Fetches `{issuer origin}/.well-known/openid-configuration`. The document is
//! kept as the raw JSON object so it can be displayed and persisted verbatim.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{FlowError, FlowResult};
use crate::http::HttpTransport;

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryDocument(Map<String, Value>);

impl DiscoveryDocument {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn authorization_endpoint(&self) -> FlowResult<&str> {
        self.endpoint("authorization_endpoint")
    }

    pub fn token_endpoint(&self) -> FlowResult<&str> {
        self.endpoint("token_endpoint")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.0
    }

    fn endpoint(&self, key: &'static str) -> FlowResult<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .ok_or(FlowError::MissingEndpoint(key))
    }
}

/// Discovery URL for an issuer: its origin plus the well-known path.
/// Any path, query or fragment on the issuer is dropped.
pub fn discovery_url(issuer_url: &str) -> FlowResult<String> {
    let url = Url::parse(issuer_url.trim())
        .map_err(|_| FlowError::InvalidIssuer(issuer_url.to_string()))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(FlowError::InvalidIssuer(issuer_url.to_string()));
    }
    Ok(format!("{}{}", origin.ascii_serialization(), DISCOVERY_PATH))
}

/// Single GET, no retry, no caching.
pub async fn resolve<T: HttpTransport>(
    transport: &T,
    issuer_url: &str,
) -> FlowResult<DiscoveryDocument> {
    let url = discovery_url(issuer_url)?;
    info!("Fetching discovery document from {}", url);

    let reply = transport.get(&url).await?;
    if !reply.is_success() {
        warn!("Discovery endpoint answered HTTP {}", reply.status);
    }

    match reply.json(&url)? {
        Value::Object(fields) => Ok(DiscoveryDocument(fields)),
        other => Err(FlowError::parse(
            &url,
            format!("expected a JSON object, got {}", json_type(&other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
