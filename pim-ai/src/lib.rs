//! pim-ai library interface
//!
//! Turns a product video into product imagery: download, frame sampling,
//! product identification, segmentation and styled enhancement, run as
//! background jobs that clients poll over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use pim_common::events::EventBus;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

use crate::services::{JobQueries, JobStore, PipelineRunner};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Registry of job records
    pub store: JobStore,
    /// Starts and supervises jobs
    pub runner: PipelineRunner,
    /// Status, results and artifact lookups
    pub queries: JobQueries,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// `<root>/jobs`
    pub jobs_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State sharing the runner's store, bus and jobs directory
    pub fn new(runner: PipelineRunner, event_bus: EventBus) -> Self {
        let store = runner.store().clone();
        let jobs_dir = runner.jobs_dir().to_path_buf();

        Self {
            queries: JobQueries::new(store.clone(), jobs_dir.clone()),
            store,
            runner,
            event_bus,
            jobs_dir,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .merge(api::artifact_routes())
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
