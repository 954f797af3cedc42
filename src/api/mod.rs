use crate::control::FastCadence;
use crate::state::NodeState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

#[derive(Debug, Clone)]
pub struct ApiState {
    pub node: Arc<RwLock<NodeState>>,
    pub fast_cadence: Arc<FastCadence>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/status", get(handlers::get_status))
        .route(
            "/api/fast-cadence",
            post(handlers::request_fast_cadence).delete(handlers::cancel_fast_cadence),
        )
        .with_state(state)
}
