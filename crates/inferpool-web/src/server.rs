//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and starts
//! the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use inferpool_kernel::Dispatcher;

use crate::WebConfig;
use crate::api;
use crate::state::AppState;

/// The inferpool HTTP edge.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server over a shared dispatcher.
    pub fn new(config: WebConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let state = Arc::new(AppState { dispatcher });
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    ///
    /// Public so tests can serve the router on an ephemeral port.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().expect("static origin"))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            // User-facing completion endpoints.
            .route(
                "/{credential}/v1/chat/completions",
                post(api::chat_completions),
            )
            .route(
                "/{credential}/{model}/v1/chat/completions",
                post(api::chat_completions_with_model),
            )
            // Worker endpoints.
            .route("/{credential}/fetch_task", post(api::fetch_task))
            .route("/{credential}/submit_result", post(api::submit_result))
            // Model listing.
            .route("/{credential}/v1/models", get(api::list_models))
            .route(
                "/{credential}/{model}/v1/models",
                get(api::list_models_with_model),
            )
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.router();
        tracing::info!(addr = ?listener.local_addr(), "web server listening");
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        tracing::info!(addr = %addr, "starting web server");
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }
}
