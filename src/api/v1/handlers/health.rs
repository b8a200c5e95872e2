/*
 * Responsibility
 * - GET /health (疎通用)
 * - security header middleware を通る (header 確認にも使える)
 */
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}
