//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers.  The dispatcher owns every piece of mutable state; the edge
//! itself is stateless.

use std::sync::Arc;

use inferpool_kernel::Dispatcher;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The dispatch kernel all endpoints translate into.
    pub dispatcher: Arc<Dispatcher>,
}
