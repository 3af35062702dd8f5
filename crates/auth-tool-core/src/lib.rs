//! Authorization Code with PKCE, step by step.
//!
//! Discovery, request building, the persisted redirect state, return
//! handling and the token grants, driven by [`FlowController`].

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod http;
pub mod paths;
pub mod pkce;
pub mod redirect_store;
pub mod request;
pub mod response;
pub mod session;
pub mod storage;
pub mod token;

#[cfg(test)]
mod testing;

pub use config::{Configuration, ConfigurationStore, ConfigurationView};
pub use controller::{AuthorizeStep, FlowController, NavigationStep};
pub use discovery::DiscoveryDocument;
pub use error::{ErrorKind, FlowError, FlowResult};
pub use http::{HttpReply, HttpTransport, ReqwestTransport};
pub use pkce::PkcePair;
pub use redirect_store::RedirectStateStore;
pub use request::{AuthorizationRequest, PendingFlowState};
pub use response::{AuthorizationResponse, ReturnVerdict};
pub use session::{Controls, FlowPhase, SessionView};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token::TokenOutcome;
