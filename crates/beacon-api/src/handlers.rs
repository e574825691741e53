//! REST API handlers.
//!
//! Each handler runs one `RegistryStore` operation on the blocking pool
//! and returns a JSON envelope. Bodies that fail to parse get the same
//! envelope with a 400.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use beacon_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Map a store error to the status code that tells the client how to recover.
fn store_error(e: StateError) -> Response {
    let status = match &e {
        StateError::Conflict(_) | StateError::VersionMismatch { .. } => StatusCode::CONFLICT,
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if e.is_storage() {
        error!(error = %e, "registry store failure");
    }
    error_response(&e.to_string(), status).into_response()
}

/// Malformed or mistyped request body.
fn bad_body(rejection: JsonRejection) -> Response {
    error_response(&rejection.body_text(), StatusCode::BAD_REQUEST).into_response()
}

/// Run a store call on the blocking pool; redb commits fsync.
async fn blocking<T, F>(state: &ApiState, op: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&RegistryStore) -> StateResult<T> + Send + 'static,
{
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || op(&store)).await {
        Ok(result) => result.map_err(store_error),
        Err(e) => {
            error!(error = %e, "registry store task failed");
            Err(error_response("internal error", StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
    }
}

// ── Register ───────────────────────────────────────────────────

/// Register request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// POST /register
pub async fn register_service(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_body(rejection),
    };
    match blocking(&state, move |store| store.register(&req.name, &req.host, req.port)).await {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record.endpoint())).into_response(),
        Err(resp) => resp,
    }
}

// ── Listing ────────────────────────────────────────────────────

/// GET /services
pub async fn list_services(State(state): State<ApiState>) -> Response {
    match blocking(&state, |store| store.list()).await {
        Ok(services) => ApiResponse::ok(services).into_response(),
        Err(resp) => resp,
    }
}

/// GET /services/{name}
pub async fn get_service(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let lookup = name.clone();
    match blocking(&state, move |store| store.get(&lookup)).await {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => store_error(StateError::NotFound(name)),
        Err(resp) => resp,
    }
}

// ── Heartbeat ──────────────────────────────────────────────────

/// Heartbeat request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub name: String,
    /// Only apply the heartbeat if the stored version still matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

/// Heartbeat acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub name: String,
    pub version: u64,
}

/// POST /heartbeat
pub async fn heartbeat_service(
    State(state): State<ApiState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_body(rejection),
    };
    let result = blocking(&state, move |store| match req.expected_version {
        Some(expected) => store.heartbeat_if_version(&req.name, expected),
        None => store.heartbeat(&req.name),
    })
    .await;
    match result {
        Ok(record) => ApiResponse::ok(HeartbeatAck {
            name: record.name,
            version: record.version,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> ApiState {
        let store = RegistryStore::open_in_memory().unwrap();
        ApiState { store }
    }

    fn register_req(name: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }

    fn heartbeat_req(name: &str, expected_version: Option<u64>) -> HeartbeatRequest {
        HeartbeatRequest {
            name: name.to_string(),
            expected_version,
        }
    }

    #[tokio::test]
    async fn list_services_empty() {
        let state = test_state();
        let resp = list_services(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_created_then_conflict() {
        let state = test_state();

        let resp = register_service(State(state.clone()), Ok(Json(register_req("svc-a")))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = register_service(State(state.clone()), Ok(Json(register_req("svc-a")))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        assert_eq!(state.store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_invalid_is_bad_request() {
        let state = test_state();
        let mut req = register_req("svc-a");
        req.port = 0;
        let resp = register_service(State(state), Ok(Json(req))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_known_service() {
        let state = test_state();
        state.store.register("svc-a", "127.0.0.1", 9000).unwrap();

        let resp = heartbeat_service(State(state.clone()), Ok(Json(heartbeat_req("svc-a", None)))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.get("svc-a").unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn heartbeat_unknown_service_not_found() {
        let state = test_state();
        let resp = heartbeat_service(State(state), Ok(Json(heartbeat_req("svc-ghost", None)))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_stale_version_conflicts() {
        let state = test_state();
        state.store.register("svc-a", "127.0.0.1", 9000).unwrap();
        state.store.heartbeat("svc-a").unwrap();

        let resp =
            heartbeat_service(State(state.clone()), Ok(Json(heartbeat_req("svc-a", Some(1))))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = heartbeat_service(State(state), Ok(Json(heartbeat_req("svc-a", Some(2))))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_service_found_and_missing() {
        let state = test_state();
        state.store.register("svc-a", "127.0.0.1", 9000).unwrap();

        let resp = get_service(State(state.clone()), Path("svc-a".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_service(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_calls_leave_the_runtime_thread() {
        use std::sync::{Arc, Mutex};
        use std::thread::ThreadId;

        #[derive(Debug, Default)]
        struct RecordingClock {
            threads: Mutex<Vec<ThreadId>>,
        }

        impl Clock for RecordingClock {
            fn now_ms(&self) -> u64 {
                self.threads.lock().unwrap().push(std::thread::current().id());
                1_000
            }
        }

        let clock = Arc::new(RecordingClock::default());
        let store = RegistryStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let state = ApiState { store };

        let resp = register_service(State(state.clone()), Ok(Json(register_req("svc-a")))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = heartbeat_service(State(state), Ok(Json(heartbeat_req("svc-a", None)))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let runtime_thread = std::thread::current().id();
        let threads = clock.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[test]
    fn heartbeat_request_version_is_optional() {
        let req: HeartbeatRequest = serde_json::from_str(r#"{"name":"svc-a"}"#).unwrap();
        assert_eq!(req.expected_version, None);
        let req: HeartbeatRequest =
            serde_json::from_str(r#"{"name":"svc-a","expected_version":4}"#).unwrap();
        assert_eq!(req.expected_version, Some(4));
    }
}
