//! Shared application state.

use std::sync::Arc;

use threadquest_core::store::QuestStore;
use threadquest_quest::application::{QuestEngine, RecoveryScanner};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Quest progression engine.
    pub engine: Arc<QuestEngine>,
    /// Quest persistence, for read-only views.
    pub store: Arc<dyn QuestStore>,
    /// Recovery scanner, for manual runs.
    pub recovery: Arc<RecoveryScanner>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        engine: Arc<QuestEngine>,
        store: Arc<dyn QuestStore>,
        recovery: Arc<RecoveryScanner>,
    ) -> Self {
        Self {
            engine,
            store,
            recovery,
        }
    }
}
