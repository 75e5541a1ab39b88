//! Application state.

use std::sync::Arc;

use courier_engine::Manager;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,

    /// Lease holder id of this node, reported by `/health`.
    pub holder_id: Arc<str>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>, holder_id: impl Into<Arc<str>>) -> Self {
        Self {
            manager,
            holder_id: holder_id.into(),
        }
    }
}
