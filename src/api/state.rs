//! Application state for the API server

use crate::operation::Operations;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the registry is a shared handle.
#[derive(Clone)]
pub struct AppState {
    /// The operation registry
    pub operations: Operations,
}

impl AppState {
    /// Create a new AppState
    pub fn new(operations: Operations) -> Self {
        Self { operations }
    }
}
