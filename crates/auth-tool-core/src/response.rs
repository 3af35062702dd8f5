//! Authorization Response Handler
//!
//! Decides whether a redirect return may proceed to the token exchange. A
//! return without a usable code is a normal outcome, not an error.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::request::PendingFlowState;

/// Query parameters of the redirect return. Duplicate keys keep the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AuthorizationResponse {
    params: BTreeMap<String, String>,
    /// `state` exactly as it appeared in the query, before decoding.
    #[serde(skip)]
    raw_state: Option<String>,
}

impl AuthorizationResponse {
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = BTreeMap::new();
        let mut raw_state = None;

        for segment in query.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            let key = decode(key);
            if key == "state" {
                raw_state = Some(value.to_string());
            }
            params.insert(key, decode(value));
        }

        Self { params, raw_state }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.get("code")
    }

    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    /// The undecoded `state`, used for the comparison with the pending attempt.
    pub fn raw_state(&self) -> Option<&str> {
        self.raw_state.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.get("error")
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }
}

fn decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Query part of whatever the operator pasted: a full redirect URL, a bare
/// `?query`, or `key=value` pairs. A fragment is dropped.
pub fn extract_query(input: &str) -> Option<&str> {
    let input = input.trim();
    let input = input.split_once('#').map_or(input, |(before, _)| before);
    let query = match input.split_once('?') {
        Some((_, query)) => query,
        None if input.contains('=') => input,
        None => return None,
    };
    if query.is_empty() {
        None
    } else {
        Some(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnVerdict {
    /// State matched and a code is present.
    Code(String),
    /// The provider reported an error for this attempt.
    ProviderError {
        error: String,
        description: Option<String>,
    },
    StateMismatch {
        expected: String,
        received: Option<String>,
    },
    MissingPendingState,
    MissingCode,
}

impl ReturnVerdict {
    pub fn into_code(self) -> Option<String> {
        match self {
            ReturnVerdict::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Whether this return ends the attempt it belongs to.
    pub fn is_terminal_for_pending(&self) -> bool {
        matches!(self, ReturnVerdict::Code(_) | ReturnVerdict::ProviderError { .. })
    }
}

impl fmt::Display for ReturnVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnVerdict::Code(_) => write!(f, "authorization code received"),
            ReturnVerdict::ProviderError { error, description } => match description {
                Some(desc) => write!(f, "provider returned error {}: {}", error, desc),
                None => write!(f, "provider returned error {}", error),
            },
            ReturnVerdict::StateMismatch { received: Some(_), .. } => {
                write!(f, "state does not match the pending authorization attempt")
            }
            ReturnVerdict::StateMismatch { received: None, .. } => {
                write!(f, "response carries no state parameter")
            }
            ReturnVerdict::MissingPendingState => write!(f, "no pending authorization attempt is stored"),
            ReturnVerdict::MissingCode => write!(f, "response carries no authorization code"),
        }
    }
}

/// Classify a return against the pending attempt.
pub fn inspect(response: &AuthorizationResponse, pending: Option<&PendingFlowState>) -> ReturnVerdict {
    let Some(pending) = pending else {
        return ReturnVerdict::MissingPendingState;
    };

    if response.raw_state() != Some(pending.state()) {
        return ReturnVerdict::StateMismatch {
            expected: pending.state().to_string(),
            received: response.raw_state().map(String::from),
        };
    }

    if let Some(error) = response.error() {
        return ReturnVerdict::ProviderError {
            error: error.to_string(),
            description: response.get("error_description").map(String::from),
        };
    }

    match response.code() {
        Some(code) if !code.is_empty() => ReturnVerdict::Code(code.to_string()),
        _ => ReturnVerdict::MissingCode,
    }
}

/// The authorization code, only when the return belongs to `pending`.
pub fn handle(query: &str, pending: Option<&PendingFlowState>) -> Option<String> {
    inspect(&AuthorizationResponse::parse(query), pending).into_code()
}
