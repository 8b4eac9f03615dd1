//! HTTP API handlers for pim-ai
//!
//! REST endpoints for submitting videos and polling jobs, plus an SSE stream
//! of pipeline events.

pub mod artifacts;
pub mod health;
pub mod jobs;
pub mod sse;

pub use artifacts::artifact_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::event_stream;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// CORS for the configured frontend origins
///
/// Unparseable origins are skipped with a warning.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}
