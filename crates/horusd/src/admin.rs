//! Admin HTTP API.
//!
//! Read-only views of the leaf: cluster snapshots as JSON, single register
//! reads, and Prometheus exposition.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use horus_core::ClusterId;
use horus_leaf::{Leaf, LeafError, Register};

use crate::exposition::render_prometheus;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub leaf: Arc<Leaf>,
}

/// Build the admin router.
pub fn build_router(leaf: Arc<Leaf>) -> Router {
    let state = AdminState { leaf };

    let api_routes = Router::new()
        .route("/clusters", get(list_clusters))
        .route("/clusters/{id}", get(get_cluster))
        .route("/clusters/{id}/registers/{register}", get(read_register))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(prometheus_metrics).with_state(state))
}

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

fn leaf_error(e: &LeafError) -> axum::response::Response {
    let status = match e {
        LeafError::UnknownCluster(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<AdminState>) -> impl IntoResponse {
    ApiResponse::ok(state.leaf.snapshots())
}

/// GET /api/v1/clusters/{id}
pub async fn get_cluster(
    State(state): State<AdminState>,
    Path(id): Path<u16>,
) -> impl IntoResponse {
    match state.leaf.snapshot(ClusterId(id)) {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => leaf_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterQuery {
    #[serde(default)]
    pub index: usize,
}

#[derive(Debug, Serialize)]
struct RegisterValue {
    register: Register,
    index: usize,
    value: i32,
}

/// GET /api/v1/clusters/{id}/registers/{register}?index=N
pub async fn read_register(
    State(state): State<AdminState>,
    Path((id, register)): Path<(u16, Register)>,
    Query(query): Query<RegisterQuery>,
) -> impl IntoResponse {
    match state.leaf.read_register(ClusterId(id), register, query.index) {
        Ok(Some(value)) => ApiResponse::ok(RegisterValue {
            register,
            index: query.index,
            value,
        })
        .into_response(),
        Ok(None) => error_response("register index out of range", StatusCode::NOT_FOUND).into_response(),
        Err(e) => leaf_error(&e),
    }
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let body = render_prometheus(&state.leaf.snapshots());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
