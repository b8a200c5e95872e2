use axum::Json;
use axum::extract::{Query, State};

use crate::api::v1::dto::headers::{HeadersQuery, HeadersResponse};
use crate::error::AppError;
use crate::services::policy::{ClientContext, resolve};
use crate::state::AppState;

pub async fn preview_headers(
    State(state): State<AppState>,
    Query(query): Query<HeadersQuery>,
) -> Result<Json<HeadersResponse>, AppError> {
    let ctx = match query.client.as_deref() {
        None => ClientContext::Front,
        Some(raw) => ClientContext::parse(raw).ok_or_else(|| {
            AppError::bad_request(
                "INVALID_CLIENT",
                format!("unknown client context: {raw} (expected site or administrator)"),
            )
        })?,
    };

    let resolved = resolve(&state.options, ctx);
    Ok(Json(HeadersResponse::new(ctx, &resolved)))
}
