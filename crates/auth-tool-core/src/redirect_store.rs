//! Redirect State Store
//!
//! Holds the single in-flight authorization attempt across the browser
//! round trip. One fixed slot: a new attempt replaces whatever was there.

use tracing::{info, warn};

use crate::error::{FlowError, FlowResult};
use crate::request::PendingFlowState;
use crate::storage::KeyValueStore;

/// Storage key of the pending attempt.
pub const PENDING_SLOT: &str = "authorize";

pub struct RedirectStateStore<S> {
    storage: S,
}

impl<S: KeyValueStore> RedirectStateStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Persist the attempt, overwriting any unconsumed one.
    pub fn save(&self, pending: &PendingFlowState) -> FlowResult<()> {
        if let Ok(Some(_)) = self.storage.get(PENDING_SLOT) {
            info!("Replacing an unconsumed pending authorization attempt");
        }
        let json = serde_json::to_string_pretty(pending)
            .map_err(|e| FlowError::storage("Failed to serialize pending flow", e))?;
        self.storage.set(PENDING_SLOT, &json)
    }

    /// The stored attempt, or `None` when the slot is empty or unreadable.
    pub fn load(&self) -> Option<PendingFlowState> {
        let raw = match self.storage.get(PENDING_SLOT) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read pending flow: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!("Discarding unparseable pending flow: {}", e);
                None
            }
        }
    }

    pub fn clear(&self) -> FlowResult<()> {
        self.storage.remove(PENDING_SLOT)
    }
}
