use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, head, post};
use tower_http::trace::TraceLayer;

use crate::advice;
use crate::api;
use crate::auth;
use crate::state::SharedState;

/// Build the gateway router with all routes. Changing an actuator mode
/// needs a bearer token; everything else is open.
pub fn build_router(state: SharedState) -> Router {
    let set_control = post(api::set_control).route_layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        auth::require_bearer,
    ));

    Router::new()
        // GET routes answer HEAD as well.
        .route("/api/health", get(api::health))
        .route("/api/hello", head(api::health))
        .route(
            "/api/readings",
            get(api::list_readings).post(api::create_readings),
        )
        .route("/api/login", post(auth::login))
        .route("/api/control", get(api::list_controls).merge(set_control))
        .route("/api/thresholds", get(api::thresholds))
        .route("/api/llm/plant-advice", get(advice::plant_advice))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
