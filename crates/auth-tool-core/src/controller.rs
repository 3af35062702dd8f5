//! Flow Controller
//!
//! Translates operator and navigation events into session transitions. The
//! controller owns the transport, the redirect state store and the session;
//! nothing else holds flow state.

use serde_json::Value;
use tracing::{info, warn};

use crate::config::ConfigurationView;
use crate::discovery::{self, DiscoveryDocument};
use crate::error::{FlowError, FlowResult};
use crate::http::HttpTransport;
use crate::pkce::PkcePair;
use crate::redirect_store::RedirectStateStore;
use crate::request::{self, AuthorizationRequest};
use crate::response::{self, AuthorizationResponse, ReturnVerdict};
use crate::session::{Session, SessionView, TokenGrant};
use crate::storage::KeyValueStore;
use crate::token::{self, TokenOutcome};

/// Ready to navigate: the pending attempt is already persisted.
#[derive(Debug, Clone)]
pub struct AuthorizeStep {
    pub url: String,
    pub request: AuthorizationRequest,
    pub discovery: DiscoveryDocument,
}

#[derive(Debug, Clone)]
pub enum NavigationStep {
    /// No query string: nothing to handle.
    Idle,
    /// The return was parsed but did not lead to an exchange.
    Rejected {
        response: Value,
        verdict: ReturnVerdict,
    },
    /// The token endpoint answered; check [`TokenOutcome::is_usable`].
    Exchanged {
        response: Value,
        outcome: TokenOutcome,
    },
}

impl ReturnVerdict {
    /// Protocol mismatches as an error value; provider errors and codes are
    /// regular outcomes.
    pub fn to_error(&self) -> Option<FlowError> {
        match self {
            ReturnVerdict::Code(_) | ReturnVerdict::ProviderError { .. } => None,
            other => Some(FlowError::ProtocolMismatch(other.to_string())),
        }
    }
}

pub struct FlowController<T, S> {
    transport: T,
    redirect_store: RedirectStateStore<S>,
    session: Session,
}

impl<T: HttpTransport, S: KeyValueStore> FlowController<T, S> {
    pub fn new(transport: T, storage: S) -> Self {
        Self {
            transport,
            redirect_store: RedirectStateStore::new(storage),
            session: Session::new(),
        }
    }

    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn redirect_store(&self) -> &RedirectStateStore<S> {
        &self.redirect_store
    }

    pub async fn discover(&self, config: &ConfigurationView) -> FlowResult<DiscoveryDocument> {
        if config.authentication_server().trim().is_empty() {
            return Err(FlowError::Config("Authentication server is required".into()));
        }
        discovery::resolve(&self.transport, config.authentication_server()).await
    }

    /// Resolve discovery, build the request and persist the pending attempt.
    /// The returned URL must only be followed after this returns `Ok`.
    pub async fn authorize(
        &mut self,
        config: &ConfigurationView,
        redirect_uri: &str,
    ) -> FlowResult<AuthorizeStep> {
        self.session.ensure_can_request()?;
        let discovery = self.discover(config).await?;
        let pkce = PkcePair::generate();
        let built = request::build(config, &pkce, &discovery, redirect_uri)?;

        let url = built.url.clone();
        let request = built.request.clone();
        self.redirect_store.save(&built.into_pending())?;
        self.session.requested()?;

        info!("Authorization attempt prepared for client {}", request.client_id);
        Ok(AuthorizeStep {
            url,
            request,
            discovery,
        })
    }

    /// Handle the page coming back. `None` or an empty query leaves the
    /// session idle.
    pub async fn on_navigation(&mut self, query: Option<&str>) -> FlowResult<NavigationStep> {
        let Some(query) = query.map(str::trim).filter(|q| !q.trim_start_matches('?').is_empty()) else {
            return Ok(NavigationStep::Idle);
        };

        let response = AuthorizationResponse::parse(query);
        let response_json = response.to_json();
        self.session.returned(response.clone())?;

        let pending = self.redirect_store.load();
        if let Some(age) = pending.as_ref().and_then(|p| p.age_secs()) {
            info!("Pending authorization attempt is {}s old", age);
        }

        let verdict = response::inspect(&response, pending.as_ref());
        let (code, pending) = match (verdict, pending) {
            (ReturnVerdict::Code(code), Some(pending)) => (code, pending),
            (verdict, _) => {
                warn!("Not exchanging: {}", verdict);
                if verdict.is_terminal_for_pending() {
                    self.clear_pending();
                }
                self.session.rejected(&verdict)?;
                return Ok(NavigationStep::Rejected {
                    response: response_json,
                    verdict,
                });
            }
        };

        self.session.exchanging()?;
        let result = match pending.discovery_document.token_endpoint() {
            Ok(endpoint) => token::exchange(&self.transport, endpoint, &pending, &code)
                .await
                .map(|outcome| (endpoint.to_string(), outcome)),
            Err(e) => Err(e),
        };
        self.clear_pending();

        match result {
            Ok((token_endpoint, outcome)) => {
                let grant = TokenGrant {
                    client_id: pending.client_id().to_string(),
                    token_endpoint,
                    refresh_token: None,
                };
                self.session.exchanged(outcome.clone(), grant)?;
                Ok(NavigationStep::Exchanged {
                    response: response_json,
                    outcome,
                })
            }
            Err(e) => {
                self.session.exchange_failed(&e)?;
                Err(e)
            }
        }
    }

    /// Refresh grant with the current refresh token. Every token action is
    /// disabled until this returns.
    pub async fn refresh(&mut self) -> FlowResult<TokenOutcome> {
        let grant = self.session.refreshing()?;
        let refresh_token = grant.refresh_token.as_deref().unwrap_or_default();

        match token::refresh(
            &self.transport,
            &grant.token_endpoint,
            &grant.client_id,
            refresh_token,
        )
        .await
        {
            Ok(outcome) => {
                self.session.refreshed(outcome.clone())?;
                Ok(outcome)
            }
            Err(e) => {
                self.session.refresh_failed(&e)?;
                Err(e)
            }
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.access_token()
    }

    /// `"Authorization": "Bearer {access_token}"`, ready to paste.
    pub fn authorization_header(&self) -> Option<String> {
        if !self.session.controls().copy_authorization_header {
            return None;
        }
        self.session
            .access_token()
            .map(|token| format!("\"Authorization\": \"Bearer {}\"", token))
    }

    fn clear_pending(&self) {
        if let Err(e) = self.redirect_store.clear() {
            warn!("Failed to clear pending authorization attempt: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::redirect_store::PENDING_SLOT;
    use crate::request::PendingFlowState;
    use crate::session::FlowPhase;
    use crate::storage::MemoryStore;
    use crate::testing::FakeTransport;
    use serde_json::json;

    const DISCOVERY_URL: &str = "https://idp.example/.well-known/openid-configuration";
    const TOKEN_URL: &str = "https://idp.example/oauth/token";
    const REDIRECT: &str = "http://127.0.0.1:8400/callback";

    fn config() -> Configuration {
        Configuration {
            name: "dev".into(),
            authentication_server: "https://idp.example".into(),
            audience: "api".into(),
            client_id: "abc".into(),
            client_secret: "never-sent-secret".into(),
            scope: "openid".into(),
        }
    }

    fn discovery_json() -> Value {
        json!({
            "issuer": "https://idp.example/",
            "authorization_endpoint": "https://idp.example/authorize",
            "token_endpoint": TOKEN_URL
        })
    }

    fn transport() -> FakeTransport {
        FakeTransport::new().with_get(DISCOVERY_URL, 200, discovery_json())
    }

    fn tokens(access: &str, refresh: &str) -> Value {
        json!({"access_token": access, "refresh_token": refresh, "token_type": "Bearer", "expires_in": 300})
    }

    /// Persist a pending attempt with a known state, as if a previous
    /// process had built it before navigating away.
    fn seed_pending(store: &MemoryStore, state: &str) -> PendingFlowState {
        let discovery = DiscoveryDocument::new(discovery_json().as_object().cloned().unwrap());
        let mut pending = request::build(&config().view(), &PkcePair::generate(), &discovery, REDIRECT)
            .unwrap()
            .into_pending();
        pending.request.state = state.to_string();
        store
            .set(PENDING_SLOT, &serde_json::to_string(&pending).unwrap())
            .unwrap();
        pending
    }

    fn controller_with_pending(
        transport: FakeTransport,
        state: &str,
    ) -> (FlowController<FakeTransport, MemoryStore>, PendingFlowState) {
        let store = MemoryStore::new();
        let pending = seed_pending(&store, state);
        (FlowController::new(transport, store), pending)
    }

    #[tokio::test]
    async fn test_scenario_a_authorize_persists_before_navigation() {
        let mut controller = FlowController::new(transport(), MemoryStore::new());
        let step = controller.authorize(&config().view(), REDIRECT).await.unwrap();

        assert!(step.url.contains("code_challenge_method=S256"));
        let challenge = step
            .url
            .split('&')
            .find_map(|p| p.strip_prefix("code_challenge="))
            .unwrap();
        assert_eq!(challenge.len(), 43);

        let stored = controller.redirect_store().load().unwrap();
        assert_eq!(stored.state(), step.request.state);
        assert_eq!(stored.request, step.request);
        assert_eq!(controller.view().phase, FlowPhase::Requested);
    }

    #[tokio::test]
    async fn test_scenario_b_matching_return_exchanges_code() {
        let transport = transport().with_post(TOKEN_URL, 200, tokens("at1", "rt1"));
        let (mut controller, pending) = controller_with_pending(transport, "s1");

        let step = controller.on_navigation(Some("?code=123&state=s1")).await.unwrap();

        let NavigationStep::Exchanged { outcome, response } = step else {
            panic!("expected an exchange");
        };
        assert!(outcome.is_usable());
        assert_eq!(response["code"], "123");

        let sent = controller.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, TOKEN_URL);
        assert_eq!(
            sent[0].1,
            format!(
                "grant_type=authorization_code&client_id=abc&code_verifier={}&code=123&redirect_uri=http://127.0.0.1:8400/callback",
                pending.code_verifier
            )
        );
        assert_eq!(controller.view().phase, FlowPhase::Exchanged);
        assert_eq!(controller.access_token(), Some("at1"));
        assert_eq!(
            controller.authorization_header().as_deref(),
            Some("\"Authorization\": \"Bearer at1\"")
        );
    }

    #[tokio::test]
    async fn test_scenario_c_provider_error_never_exchanges() {
        let (mut controller, _) = controller_with_pending(transport(), "s1");

        let step = controller
            .on_navigation(Some("?error=access_denied&state=s1"))
            .await
            .unwrap();

        assert!(matches!(
            step,
            NavigationStep::Rejected { verdict: ReturnVerdict::ProviderError { .. }, .. }
        ));
        assert!(controller.transport().sent().is_empty());
        assert_eq!(controller.view().phase, FlowPhase::Rejected);
        // The attempt is over; the slot is cleared.
        assert!(controller.redirect_store().load().is_none());
    }

    #[tokio::test]
    async fn test_scenario_d_state_mismatch_never_exchanges() {
        let (mut controller, _) = controller_with_pending(transport(), "s1");

        let step = controller.on_navigation(Some("?code=123&state=s2")).await.unwrap();

        let NavigationStep::Rejected { verdict, .. } = step else {
            panic!("expected a rejection");
        };
        assert!(matches!(verdict, ReturnVerdict::StateMismatch { .. }));
        assert!(matches!(verdict.to_error(), Some(FlowError::ProtocolMismatch(_))));
        assert!(controller.transport().sent().is_empty());
        // A forged return must not discard the legitimate attempt.
        assert_eq!(controller.redirect_store().load().unwrap().state(), "s1");
    }

    #[tokio::test]
    async fn test_return_without_pending_state() {
        let mut controller = FlowController::new(transport(), MemoryStore::new());
        let step = controller.on_navigation(Some("code=123&state=s1")).await.unwrap();
        assert!(matches!(
            step,
            NavigationStep::Rejected { verdict: ReturnVerdict::MissingPendingState, .. }
        ));
        assert!(controller.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_query_stays_idle() {
        let (mut controller, _) = controller_with_pending(transport(), "s1");
        assert!(matches!(controller.on_navigation(None).await.unwrap(), NavigationStep::Idle));
        assert!(matches!(controller.on_navigation(Some("?")).await.unwrap(), NavigationStep::Idle));
        assert_eq!(controller.view().phase, FlowPhase::Idle);
        assert!(controller.redirect_store().load().is_some());
    }

    #[tokio::test]
    async fn test_slot_cleared_after_exchange() {
        let transport = transport().with_post(TOKEN_URL, 200, tokens("at1", "rt1"));
        let (mut controller, _) = controller_with_pending(transport, "s1");
        controller.on_navigation(Some("code=123&state=s1")).await.unwrap();
        assert!(controller.redirect_store().load().is_none());
    }

    #[tokio::test]
    async fn test_non_200_exchange_is_displayed_but_not_usable() {
        let transport = transport().with_post(TOKEN_URL, 400, json!({"error": "invalid_grant"}));
        let (mut controller, _) = controller_with_pending(transport, "s1");

        let step = controller.on_navigation(Some("code=123&state=s1")).await.unwrap();
        let NavigationStep::Exchanged { outcome, .. } = step else {
            panic!("expected an exchange");
        };
        assert_eq!(outcome.status, 400);

        let view = controller.view();
        assert_eq!(view.phase, FlowPhase::ExchangeFailed);
        assert!(!view.controls.refresh);
        assert_eq!(controller.access_token(), None);
        assert!(controller.redirect_store().load().is_none());
        assert!(controller.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_exchange_fetch_failure_reports_fixed_message() {
        let transport = transport().with_post_raw(TOKEN_URL, 200, "<html>");
        let (mut controller, _) = controller_with_pending(transport, "s1");

        let err = controller.on_navigation(Some("code=123&state=s1")).await.unwrap_err();
        assert!(err.is_fetch_failure());

        let view = controller.view();
        assert_eq!(view.phase, FlowPhase::ExchangeFailed);
        assert_eq!(view.message.as_deref(), Some(crate::error::FETCH_FAILURE_MESSAGE));
        assert!(controller.redirect_store().load().is_none());
    }

    #[tokio::test]
    async fn test_refresh_cycle() {
        let transport = transport()
            .with_post(TOKEN_URL, 200, tokens("at1", "rt1"))
            .with_post(TOKEN_URL, 200, tokens("at2", "rt2"))
            .with_post(TOKEN_URL, 200, json!({"access_token": "at3"}));
        let (mut controller, _) = controller_with_pending(transport, "s1");
        controller.on_navigation(Some("code=123&state=s1")).await.unwrap();

        controller.refresh().await.unwrap();
        assert_eq!(controller.access_token(), Some("at2"));
        controller.refresh().await.unwrap();
        assert_eq!(controller.access_token(), Some("at3"));

        let sent = controller.transport().sent();
        assert_eq!(sent[1].1, "grant_type=refresh_token&client_id=abc&refresh_token=rt1");
        assert_eq!(sent[2].1, "grant_type=refresh_token&client_id=abc&refresh_token=rt2");
        assert_eq!(controller.view().phase, FlowPhase::Refreshed);
    }

    #[tokio::test]
    async fn test_refresh_failures_can_be_retried() {
        let transport = transport()
            .with_post(TOKEN_URL, 200, tokens("at1", "rt1"))
            .with_post(TOKEN_URL, 400, json!({"error": "temporarily_unavailable"}))
            .with_post_failure(TOKEN_URL)
            .with_post(TOKEN_URL, 200, tokens("at2", "rt2"));
        let (mut controller, _) = controller_with_pending(transport, "s1");
        controller.on_navigation(Some("code=123&state=s1")).await.unwrap();

        let outcome = controller.refresh().await.unwrap();
        assert!(!outcome.is_usable());
        assert_eq!(controller.view().phase, FlowPhase::RefreshFailed);
        assert_eq!(controller.access_token(), None);

        let err = controller.refresh().await.unwrap_err();
        assert_eq!(err.report(), crate::error::FETCH_FAILURE_MESSAGE);
        assert!(controller.view().controls.refresh);

        controller.refresh().await.unwrap();
        assert_eq!(controller.access_token(), Some("at2"));

        let sent = controller.transport().sent();
        assert!(sent[1..].iter().all(|(_, body)| body.ends_with("refresh_token=rt1")));
    }

    #[tokio::test]
    async fn test_client_secret_never_sent() {
        let transport = transport()
            .with_post(TOKEN_URL, 200, tokens("at1", "rt1"))
            .with_post(TOKEN_URL, 200, tokens("at2", "rt2"));
        let mut controller = FlowController::new(transport, MemoryStore::new());

        let step = controller.authorize(&config().view(), REDIRECT).await.unwrap();
        assert!(!step.url.contains("never-sent-secret"));

        let query = format!("code=xyz&state={}", step.request.state);
        controller.on_navigation(Some(&query)).await.unwrap();
        controller.refresh().await.unwrap();

        for (_, body) in controller.transport().sent() {
            assert!(!body.contains("never-sent-secret"));
            assert!(!body.contains("client_secret"));
        }
    }

    #[tokio::test]
    async fn test_authorize_rejected_mid_flow_leaves_slot_untouched() {
        let mut controller = FlowController::new(transport(), MemoryStore::new());
        controller
            .session
            .returned(AuthorizationResponse::parse("code=1&state=s1"))
            .unwrap();

        let err = controller.authorize(&config().view(), REDIRECT).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::State);
        assert!(controller.redirect_store().load().is_none());
        assert_eq!(controller.view().phase, FlowPhase::Returned);
    }

    #[tokio::test]
    async fn test_authorize_requires_server() {
        let mut controller = FlowController::new(transport(), MemoryStore::new());
        let mut incomplete = config();
        incomplete.authentication_server.clear();
        let err = controller.authorize(&incomplete.view(), REDIRECT).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(controller.redirect_store().load().is_none());
    }
}
