//! Authorization Request Builder
//!
//! Produces the authorization URL and the [`PendingFlowState`] that must be
//! persisted before the browser leaves for the provider.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigurationView;
use crate::discovery::DiscoveryDocument;
use crate::error::{FlowError, FlowResult};
use crate::pkce::PkcePair;

/// Characters left untouched by the final URL encoding pass: the reserved
/// and unreserved URI marks, as `encodeURI` does.
const URI_PRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// Form values: URI characters stay literal, but the characters that would
/// split or reinterpret a `key=value&...` body are encoded.
const FORM_VALUE: &AsciiSet = &URI_PRESERVED.add(b'&').add(b'=').add(b'+').add(b'#');

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub audience: String,
    pub state: String,
}

impl AuthorizationRequest {
    /// Parameters in wire order.
    pub fn params(&self) -> [(&'static str, &str); 8] {
        [
            ("response_type", self.response_type.as_str()),
            ("code_challenge", self.code_challenge.as_str()),
            ("code_challenge_method", self.code_challenge_method.as_str()),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
            ("audience", self.audience.as_str()),
            ("state", self.state.as_str()),
        ]
    }

    /// `key=value&...` with values left as they are.
    pub fn query_string(&self) -> String {
        self.params()
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn url(&self, authorization_endpoint: &str) -> String {
        encode_uri(&format!("{}?{}", authorization_endpoint, self.query_string()))
    }
}

/// Everything needed to finish the flow after the redirect returns.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFlowState {
    #[serde(flatten)]
    pub request: AuthorizationRequest,
    pub code_verifier: String,
    pub discovery_document: DiscoveryDocument,
    #[serde(default)]
    pub created_at: String,
}

impl PendingFlowState {
    pub fn state(&self) -> &str {
        &self.request.state
    }

    pub fn client_id(&self) -> &str {
        &self.request.client_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.request.redirect_uri
    }

    /// Seconds since the attempt was created, when the timestamp parses.
    pub fn age_secs(&self) -> Option<i64> {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|created| chrono::Utc::now().signed_duration_since(created).num_seconds())
    }
}

impl std::fmt::Debug for PendingFlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFlowState")
            .field("request", &self.request)
            .field("code_verifier", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Result of [`build`]. The pending state is moved out exactly once, into
/// the redirect state store.
#[derive(Debug)]
pub struct BuiltAuthorization {
    pub url: String,
    pub request: AuthorizationRequest,
    pending: PendingFlowState,
}

impl BuiltAuthorization {
    pub fn pending(&self) -> &PendingFlowState {
        &self.pending
    }

    pub fn into_pending(self) -> PendingFlowState {
        self.pending
    }
}

pub fn build(
    config: &ConfigurationView,
    pkce: &PkcePair,
    discovery: &DiscoveryDocument,
    redirect_uri: &str,
) -> FlowResult<BuiltAuthorization> {
    if config.client_id().trim().is_empty() {
        return Err(FlowError::Config("Client ID is required".into()));
    }
    let authorization_endpoint = discovery.authorization_endpoint()?;

    let request = AuthorizationRequest {
        response_type: "code".to_string(),
        code_challenge: pkce.code_challenge.clone(),
        code_challenge_method: pkce.method.as_str().to_string(),
        client_id: config.client_id().to_string(),
        redirect_uri: redirect_uri.to_string(),
        scope: config.scope().to_string(),
        audience: config.audience().to_string(),
        state: generate_state(),
    };

    let url = request.url(authorization_endpoint);
    debug!("Built authorization URL for client {}", request.client_id);

    let pending = PendingFlowState {
        request: request.clone(),
        code_verifier: pkce.code_verifier.clone(),
        discovery_document: discovery.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    Ok(BuiltAuthorization {
        url,
        request,
        pending,
    })
}

/// Fresh CSRF state: 32 bytes from the OS CSPRNG, hex encoded.
pub fn generate_state() -> String {
    let bytes: [u8; 32] = rand::rngs::OsRng.gen();
    hex::encode(bytes)
}

/// Percent-encode everything that cannot appear literally in a URL, leaving
/// URI delimiters intact.
pub fn encode_uri(input: &str) -> String {
    utf8_percent_encode(input, URI_PRESERVED).to_string()
}

/// Encode one value of a form body. A redirect URI comes out exactly as it
/// appears in the authorization URL.
pub fn encode_form_value(input: &str) -> String {
    utf8_percent_encode(input, FORM_VALUE).to_string()
}
