//! vipcast-api — admin HTTP API for the vipcast daemon.
//!
//! Read-only status plus the two control operations an operator needs
//! without signals: reload and shutdown.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/apps` | Status of every application |
//! | GET | `/api/v1/apps/{name}` | Status of one application |
//! | POST | `/api/v1/reload` | Replace the application set |
//! | GET | `/api/v1/peer` | Routing peer status |
//! | POST | `/api/v1/shutdown` | Request graceful termination |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::watch;
use vipcast_engine::Engine;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    /// Flipped to `true` by `POST /api/v1/shutdown`; the daemon owns the receiver.
    pub shutdown: watch::Sender<bool>,
}

/// Build the admin router.
pub fn build_router(engine: Arc<Engine>, shutdown: watch::Sender<bool>) -> Router {
    let state = ApiState { engine, shutdown };

    let api_routes = Router::new()
        .route("/apps", get(handlers::list_apps))
        .route("/apps/{name}", get(handlers::get_app))
        .route("/reload", post(handlers::reload))
        .route("/peer", get(handlers::get_peer))
        .route("/shutdown", post(handlers::shutdown))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
