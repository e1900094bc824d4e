//! REST API module using Axum
//!
//! Read-only view over the snapshot store the publisher fills each cycle.
//! Nothing here touches device state.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable with comma-separated allowed CORS origins.
pub const CORS_ENV_VAR: &str = "BRICKLINE_CORS_ORIGINS";

/// Same-origin only unless `BRICKLINE_CORS_ORIGINS` lists origins.
fn build_cors_layer() -> CorsLayer {
    match std::env::var(CORS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET])
                .allow_headers([header::CONTENT_TYPE])
        }
        Err(_) => CorsLayer::new().allow_methods([Method::GET]),
    }
}

/// Complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
