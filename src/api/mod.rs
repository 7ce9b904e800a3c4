//! Read-only HTTP diagnostics surface (spec §4.D/§4.G, SPEC_FULL §1):
//! queue/job/activity state for operators, no control endpoints. Grounded
//! in the teacher's axum router + `CorsLayer` setup in main.rs.

pub mod routes;

use crate::db::Db;
use crate::queue::WorkerQueue;
use crate::scheduler::JobManager;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub queue: Arc<WorkerQueue>,
    pub jobs: Arc<JobManager>,
}

pub fn build_router(db: Db, queue: Arc<WorkerQueue>, jobs: Arc<JobManager>) -> Router {
    let state = AppState { db, queue, jobs };
    Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
