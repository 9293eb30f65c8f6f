use axum::{Json, http::StatusCode};

/// GET /health
/// Liveness check
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": env!("CARGO_PKG_NAME"),
        })),
    )
}
