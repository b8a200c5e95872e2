/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - /headers (preview), /static-config (preview + save)
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::{
    headers::preview_headers,
    static_config::{preview_static_config, save_static_config},
};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/headers", get(preview_headers))
        .route(
            "/static-config",
            get(preview_static_config).post(save_static_config),
        )
}
