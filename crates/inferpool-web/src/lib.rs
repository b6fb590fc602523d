//! HTTP edge for inferpool.
//!
//! Exposes the dispatcher over an OpenAI-compatible surface:
//!
//! - `POST /{credential}[/{model}]/v1/chat/completions` -- user submits a
//!   completion and blocks until a worker answers or the deadline passes.
//! - `POST /{credential}/fetch_task` -- worker polls for work.
//! - `POST /{credential}/submit_result` -- worker returns a result.
//! - `GET  /{credential}[/{model}]/v1/models` -- model listing.
//!
//! Failures use the OpenAI error envelope so stock client libraries work
//! unmodified.

pub mod api;
pub mod error;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8000,
        }
    }
}
