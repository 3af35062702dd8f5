//! Flow Session
//!
//! Explicit state for one authorization attempt and the tokens it produced.
//! Presentation code reads [`SessionView`] snapshots; only the controller
//! drives transitions.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::response::{AuthorizationResponse, ReturnVerdict};
use crate::token::TokenOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Idle,
    /// Pending state persisted, waiting for the browser to come back.
    Requested,
    Returned,
    /// The return carried no usable code.
    Rejected,
    Exchanging,
    Exchanged,
    ExchangeFailed,
    Refreshing,
    Refreshed,
    RefreshFailed,
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowPhase::Idle => "idle",
            FlowPhase::Requested => "requested",
            FlowPhase::Returned => "returned",
            FlowPhase::Rejected => "rejected",
            FlowPhase::Exchanging => "exchanging",
            FlowPhase::Exchanged => "exchanged",
            FlowPhase::ExchangeFailed => "exchange failed",
            FlowPhase::Refreshing => "refreshing",
            FlowPhase::Refreshed => "refreshed",
            FlowPhase::RefreshFailed => "refresh failed",
        };
        f.write_str(name)
    }
}

/// What a refresh needs once the pending attempt has been consumed.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub client_id: String,
    pub token_endpoint: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Which token actions are currently enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub copy_access_token: bool,
    pub copy_authorization_header: bool,
    pub refresh: bool,
}

/// Read-only snapshot of a [`Session`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: FlowPhase,
    pub authorization_response: Option<Value>,
    pub token_response: Option<TokenOutcome>,
    pub message: Option<String>,
    pub controls: Controls,
}

#[derive(Debug)]
pub struct Session {
    phase: FlowPhase,
    response: Option<AuthorizationResponse>,
    /// Last usable token set.
    tokens: Option<TokenOutcome>,
    /// Last reply from the token endpoint, usable or not.
    last_reply: Option<TokenOutcome>,
    grant: Option<TokenGrant>,
    message: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: FlowPhase::Idle,
            response: None,
            tokens: None,
            last_reply: None,
            grant: None,
            message: None,
        }
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    pub fn controls(&self) -> Controls {
        let has_refresh_token = self
            .grant
            .as_ref()
            .is_some_and(|g| g.refresh_token.is_some());
        match self.phase {
            FlowPhase::Exchanged | FlowPhase::Refreshed => Controls {
                copy_access_token: true,
                copy_authorization_header: true,
                refresh: has_refresh_token,
            },
            FlowPhase::RefreshFailed => Controls {
                refresh: has_refresh_token,
                ..Controls::default()
            },
            _ => Controls::default(),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            authorization_response: self.response.as_ref().map(AuthorizationResponse::to_json),
            token_response: self.last_reply.clone(),
            message: self.message.clone(),
            controls: self.controls(),
        }
    }

    /// Current access token, only while the copy action is enabled.
    pub fn access_token(&self) -> Option<&str> {
        if !self.controls().copy_access_token {
            return None;
        }
        self.tokens.as_ref().and_then(TokenOutcome::access_token)
    }

    pub fn grant(&self) -> Option<&TokenGrant> {
        self.grant.as_ref()
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    /// Whether a new attempt may start. Checked before anything is persisted.
    pub(crate) fn ensure_can_request(&self) -> FlowResult<()> {
        self.expect("start an authorization attempt", |p| {
            !matches!(p, FlowPhase::Returned | FlowPhase::Exchanging | FlowPhase::Refreshing)
        })
    }

    pub(crate) fn requested(&mut self) -> FlowResult<()> {
        self.ensure_can_request()?;
        self.message = None;
        self.enter(FlowPhase::Requested);
        Ok(())
    }

    pub(crate) fn returned(&mut self, response: AuthorizationResponse) -> FlowResult<()> {
        self.expect("handle a redirect return", |p| {
            matches!(p, FlowPhase::Idle | FlowPhase::Requested)
        })?;
        self.response = Some(response);
        self.enter(FlowPhase::Returned);
        Ok(())
    }

    pub(crate) fn rejected(&mut self, verdict: &ReturnVerdict) -> FlowResult<()> {
        self.expect("reject a return", |p| p == FlowPhase::Returned)?;
        self.message = Some(verdict.to_string());
        self.enter(FlowPhase::Rejected);
        Ok(())
    }

    pub(crate) fn exchanging(&mut self) -> FlowResult<()> {
        self.expect("exchange a code", |p| p == FlowPhase::Returned)?;
        self.enter(FlowPhase::Exchanging);
        Ok(())
    }

    pub(crate) fn exchanged(&mut self, outcome: TokenOutcome, mut grant: TokenGrant) -> FlowResult<()> {
        self.expect("record an exchange", |p| p == FlowPhase::Exchanging)?;
        self.last_reply = Some(outcome.clone());
        if outcome.is_usable() {
            grant.refresh_token = outcome.refresh_token().map(String::from);
            self.grant = Some(grant);
            self.tokens = Some(outcome);
            self.message = None;
            self.enter(FlowPhase::Exchanged);
        } else {
            self.message = Some(format!("Token endpoint answered HTTP {}", outcome.status));
            self.enter(FlowPhase::ExchangeFailed);
        }
        Ok(())
    }

    pub(crate) fn exchange_failed(&mut self, err: &FlowError) -> FlowResult<()> {
        self.expect("record an exchange failure", |p| p == FlowPhase::Exchanging)?;
        self.message = Some(err.report());
        self.enter(FlowPhase::ExchangeFailed);
        Ok(())
    }

    /// Disables every token action until the refresh settles.
    pub(crate) fn refreshing(&mut self) -> FlowResult<TokenGrant> {
        if !self.controls().refresh {
            return Err(self.invalid("refresh tokens"));
        }
        let grant = self.grant.clone().ok_or_else(|| self.invalid("refresh tokens"))?;
        self.enter(FlowPhase::Refreshing);
        Ok(grant)
    }

    pub(crate) fn refreshed(&mut self, outcome: TokenOutcome) -> FlowResult<()> {
        self.expect("record a refresh", |p| p == FlowPhase::Refreshing)?;
        self.last_reply = Some(outcome.clone());
        if outcome.is_usable() {
            if let (Some(grant), Some(rotated)) = (self.grant.as_mut(), outcome.refresh_token()) {
                grant.refresh_token = Some(rotated.to_string());
            }
            self.tokens = Some(outcome);
            self.message = None;
            self.enter(FlowPhase::Refreshed);
        } else {
            self.message = Some(format!(
                "Refresh answered HTTP {}; previous tokens are stale",
                outcome.status
            ));
            self.enter(FlowPhase::RefreshFailed);
        }
        Ok(())
    }

    pub(crate) fn refresh_failed(&mut self, err: &FlowError) -> FlowResult<()> {
        self.expect("record a refresh failure", |p| p == FlowPhase::Refreshing)?;
        self.message = Some(err.report());
        self.enter(FlowPhase::RefreshFailed);
        Ok(())
    }

    fn expect(&self, event: &'static str, allowed: impl Fn(FlowPhase) -> bool) -> FlowResult<()> {
        if allowed(self.phase) {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    fn invalid(&self, event: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            event,
            phase: self.phase.to_string(),
        }
    }

    fn enter(&mut self, next: FlowPhase) {
        debug!("Flow phase {} -> {}", self.phase, next);
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grant() -> TokenGrant {
        TokenGrant {
            client_id: "abc".into(),
            token_endpoint: "https://idp.example/oauth/token".into(),
            refresh_token: None,
        }
    }

    fn ok(body: Value) -> TokenOutcome {
        TokenOutcome { status: 200, body }
    }

    fn exchanged_session() -> Session {
        let mut session = Session::new();
        session.returned(AuthorizationResponse::parse("code=1&state=s1")).unwrap();
        session.exchanging().unwrap();
        session
            .exchanged(ok(json!({"access_token": "at1", "refresh_token": "rt1"})), grant())
            .unwrap();
        session
    }

    #[test]
    fn test_idle_has_no_controls() {
        let session = Session::new();
        assert_eq!(session.phase(), FlowPhase::Idle);
        assert_eq!(session.controls(), Controls::default());
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn test_exchanged_enables_actions() {
        let session = exchanged_session();
        assert_eq!(session.phase(), FlowPhase::Exchanged);
        assert_eq!(
            session.controls(),
            Controls {
                copy_access_token: true,
                copy_authorization_header: true,
                refresh: true
            }
        );
        assert_eq!(session.access_token(), Some("at1"));
        assert_eq!(session.grant().unwrap().refresh_token.as_deref(), Some("rt1"));
    }

    #[test]
    fn test_non_200_exchange_withholds_actions() {
        let mut session = Session::new();
        session.returned(AuthorizationResponse::parse("code=1&state=s1")).unwrap();
        session.exchanging().unwrap();
        session
            .exchanged(TokenOutcome { status: 400, body: json!({"error": "invalid_grant"}) }, grant())
            .unwrap();
        assert_eq!(session.phase(), FlowPhase::ExchangeFailed);
        assert_eq!(session.controls(), Controls::default());
        assert_eq!(session.view().token_response.unwrap().status, 400);
    }

    #[test]
    fn test_refreshing_disables_everything() {
        let mut session = exchanged_session();
        session.refreshing().unwrap();
        assert_eq!(session.controls(), Controls::default());
        assert!(session.refreshing().is_err());
    }

    #[test]
    fn test_refresh_rotates_refresh_token() {
        let mut session = exchanged_session();
        session.refreshing().unwrap();
        session
            .refreshed(ok(json!({"access_token": "at2", "refresh_token": "rt2"})))
            .unwrap();
        assert_eq!(session.phase(), FlowPhase::Refreshed);
        assert_eq!(session.access_token(), Some("at2"));
        assert_eq!(session.grant().unwrap().refresh_token.as_deref(), Some("rt2"));
    }

    #[test]
    fn test_refresh_without_rotation_keeps_token() {
        let mut session = exchanged_session();
        session.refreshing().unwrap();
        session.refreshed(ok(json!({"access_token": "at2"}))).unwrap();
        assert_eq!(session.grant().unwrap().refresh_token.as_deref(), Some("rt1"));
    }

    #[test]
    fn test_refresh_failure_allows_retry_only() {
        let mut session = exchanged_session();
        session.refreshing().unwrap();
        session
            .refreshed(TokenOutcome { status: 401, body: json!({"error": "invalid_grant"}) })
            .unwrap();
        assert_eq!(session.phase(), FlowPhase::RefreshFailed);
        assert_eq!(
            session.controls(),
            Controls {
                copy_access_token: false,
                copy_authorization_header: false,
                refresh: true
            }
        );
        assert_eq!(session.access_token(), None);
        assert!(session.refreshing().is_ok());
    }

    #[test]
    fn test_no_refresh_token_means_no_refresh() {
        let mut session = Session::new();
        session.returned(AuthorizationResponse::parse("code=1&state=s1")).unwrap();
        session.exchanging().unwrap();
        session.exchanged(ok(json!({"access_token": "at1"})), grant()).unwrap();
        assert!(!session.controls().refresh);
        assert!(matches!(
            session.refreshing(),
            Err(FlowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_return_only_from_idle_or_requested() {
        let mut session = exchanged_session();
        let err = session
            .returned(AuthorizationResponse::parse("code=2&state=s1"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::State);
    }

    #[test]
    fn test_rejected_records_reason() {
        let mut session = Session::new();
        session.requested().unwrap();
        session.returned(AuthorizationResponse::parse("code=1&state=s2")).unwrap();
        session.rejected(&ReturnVerdict::MissingPendingState).unwrap();
        let view = session.view();
        assert_eq!(view.phase, FlowPhase::Rejected);
        assert!(view.message.unwrap().contains("no pending"));
        assert_eq!(view.authorization_response.unwrap()["code"], "1");
    }
}
