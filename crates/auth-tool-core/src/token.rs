//! Token Exchange and Refresh
//!
//! Both grants POST a form body to the token endpoint and hand back the
//! parsed reply together with its status. Only a 200 reply carries usable
//! tokens; anything else is still returned so it can be displayed.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::FlowResult;
use crate::http::HttpTransport;
use crate::request::{self, PendingFlowState};

/// A token endpoint reply.
#[derive(Clone, PartialEq, Serialize)]
pub struct TokenOutcome {
    pub status: u16,
    pub body: Value,
}

impl TokenOutcome {
    /// Status 200 exactly.
    pub fn is_usable(&self) -> bool {
        self.status == 200
    }

    pub fn access_token(&self) -> Option<&str> {
        self.body.get("access_token").and_then(Value::as_str)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.body.get("refresh_token").and_then(Value::as_str)
    }

    pub fn token_type(&self) -> Option<&str> {
        self.body.get("token_type").and_then(Value::as_str)
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.body.get("expires_in").and_then(Value::as_u64)
    }
}

impl std::fmt::Debug for TokenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenOutcome")
            .field("status", &self.status)
            .field("token_type", &self.token_type())
            .field("expires_in", &self.expires_in())
            .field("has_refresh_token", &self.refresh_token().is_some())
            .finish_non_exhaustive()
    }
}

/// Ordered `key=value` pairs. URI characters in values stay literal; only
/// `&`, `=`, `+`, `#`, `%` and non-URI characters are percent-encoded.
pub fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, request::encode_form_value(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn exchange_body(pending: &PendingFlowState, code: &str) -> String {
    form_body(&[
        ("grant_type", "authorization_code"),
        ("client_id", pending.client_id()),
        ("code_verifier", pending.code_verifier.as_str()),
        ("code", code),
        ("redirect_uri", pending.redirect_uri()),
    ])
}

pub fn refresh_body(client_id: &str, refresh_token: &str) -> String {
    form_body(&[
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token),
    ])
}

/// Authorization code grant.
pub async fn exchange<T: HttpTransport>(
    transport: &T,
    token_endpoint: &str,
    pending: &PendingFlowState,
    code: &str,
) -> FlowResult<TokenOutcome> {
    info!("Exchanging authorization code for tokens");
    post_grant(transport, token_endpoint, exchange_body(pending, code)).await
}

/// Refresh token grant.
pub async fn refresh<T: HttpTransport>(
    transport: &T,
    token_endpoint: &str,
    client_id: &str,
    refresh_token: &str,
) -> FlowResult<TokenOutcome> {
    info!("Refreshing access token");
    post_grant(transport, token_endpoint, refresh_body(client_id, refresh_token)).await
}

async fn post_grant<T: HttpTransport>(
    transport: &T,
    token_endpoint: &str,
    body: String,
) -> FlowResult<TokenOutcome> {
    let reply = transport.post_form(token_endpoint, body).await?;
    let body = reply.json(token_endpoint)?;
    let outcome = TokenOutcome {
        status: reply.status,
        body,
    };
    if !outcome.is_usable() {
        warn!("Token endpoint answered HTTP {}", outcome.status);
    }
    Ok(outcome)
}
