//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;
use crate::lifecycle::TaskStats;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    pub tasks: TaskStats,
}

/// Always 200 while the process serves requests. The task counters show
/// whether background work is piling up or failing.
pub async fn health_handler(State(app_state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        tasks: app_state.sink().task_stats(),
    })
}
