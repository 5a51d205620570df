//! Shared application state.

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::LimitsConfig;
use crate::engine::{EngineFactory, EngineGuard};
use crate::session::{SessionBackend, SessionStore};

/// Shared application state passed to all handlers.
pub struct AppState {
    pub admission: AdmissionController,
    pub sessions: SessionStore,
    pub engine: EngineGuard,
}

impl AppState {
    pub fn new(
        limits: &LimitsConfig,
        backend: Arc<dyn SessionBackend>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            admission: AdmissionController::new(
                limits.queue_max_size,
                limits.max_concurrent_requests,
            ),
            sessions: SessionStore::new(backend),
            engine: EngineGuard::new(factory),
        }
    }
}
