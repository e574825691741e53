//! beacon-api — REST API for the Beacon registry.
//!
//! Thin axum layer over `RegistryStore`. The status code tells clients
//! which recovery applies: 409 (already registered / stale version),
//! 404 (re-register), 5xx (back off and retry).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/register` | Register a service (`{name, host, port}`) |
//! | GET | `/services` | List live services as `(name, host, port)` |
//! | GET | `/services/{name}` | Full record, including health and version |
//! | POST | `/heartbeat` | Heartbeat (`{name, expected_version?}`) |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use beacon_state::RegistryStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: RegistryStore,
}

/// Build the registry router.
pub fn build_router(store: RegistryStore) -> Router {
    let api_state = ApiState { store };

    Router::new()
        .route("/register", post(handlers::register_service))
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route("/heartbeat", post(handlers::heartbeat_service))
        .with_state(api_state)
}
