use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api;
use crate::core::state::AppState;
use crate::middleware::{error_handler, request_id};

/// Control routes live under `/_bridge`; everything else is proxied upstream
pub fn create_app(state: AppState) -> Router {
    let bridge_routes = Router::new()
        .route("/_bridge/health", get(api::bridge::health))
        .route(
            "/_bridge/credential",
            put(api::bridge::set_credential).delete(api::bridge::clear_credential),
        )
        .route(
            "/_bridge/memory",
            get(api::bridge::get_memory).put(api::bridge::set_memory),
        )
        .route("/_bridge/save", post(api::bridge::save));

    Router::new()
        .merge(bridge_routes)
        .fallback(api::proxy::forward)
        .with_state(state)
        .layer(middleware::from_fn(request_id::add_request_id))
        .layer(middleware::from_fn(error_handler::handle_errors))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
