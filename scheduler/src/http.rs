//! C9 — the admin HTTP surface. Exposes read-only status and metrics plus a
//! narrow set of write endpoints (`target`, `destroy`, `restart`) that never
//! touch the document directly: writes either go through `TargetUpdates`
//! (consumed by the next tick's `updateTarget`) or directly through the
//! store for flag/destroy operations that don't need the caretaker.

use crate::driver::SchedulerDriver;
use crate::manager::{self, TargetUpdates};
use crate::metrics::SchedulerMetrics;
use crate::store::Store;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use scheduler_types::{Role, Target};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub driver: Arc<dyn SchedulerDriver>,
    pub target_updates: Arc<TargetUpdates>,
    pub metrics: Arc<SchedulerMetrics>,
    pub path: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/target", post(post_target))
        .route("/destroy", post(destroy))
        .route("/restart", post(restart_all))
        .route("/restart/{role}/{slot}", post(restart_slot))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.load_raw(&state.path).await {
        Ok((_, document)) => Json(document).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "status query failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn post_target(State(state): State<AppState>, Json(target): Json<Target>) -> impl IntoResponse {
    state.target_updates.post(target).await;
    StatusCode::ACCEPTED
}

async fn destroy(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.destroy(&state.path).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "destroy failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn restart_all(State(state): State<AppState>, Json(flag): Json<scheduler_types::RestartFlag>) -> impl IntoResponse {
    match state.store.set_restart_flag(&state.path, flag).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!(error = %e, "restart flag write failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn restart_slot(State(state): State<AppState>, Path((role, slot)): Path<(String, usize)>) -> impl IntoResponse {
    let Some(role) = parse_role(&role) else {
        return StatusCode::BAD_REQUEST;
    };
    match manager::restart_one(&state.store, &state.driver, &state.path, role, slot).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!(error = %e, "single-slot restart failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "agent" => Some(Role::Agent),
        "dbserver" | "primary" => Some(Role::Primary),
        "secondary" => Some(Role::Secondary),
        "coordinator" => Some(Role::Coordinator),
        _ => None,
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.load_raw(&state.path).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
