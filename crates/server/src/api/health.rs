//! Liveness probe.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /healthz`: unauthenticated, never touches the warehouse.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
