use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::api::v1::dto::static_config::StaticConfigPreview;
use crate::error::AppError;
use crate::services::policy::{ClientContext, resolve};
use crate::services::static_config::{self, ServerConfigFile, StaticWriteNotice};
use crate::state::AppState;

pub async fn preview_static_config(
    State(state): State<AppState>,
) -> Result<Json<StaticConfigPreview>, AppError> {
    // Static files only carry `both` entries, which resolve identically in every context.
    let resolved = resolve(&state.options, ClientContext::Front);
    let root = state.site_root.clone();
    let server = state.server_software;
    let write_enabled = state.options.write_static_headers;

    // Detection touches the filesystem.
    let preview = tokio::task::spawn_blocking(move || {
        let headers = resolved.static_eligible();
        let format = ServerConfigFile::detect(&root, server);

        StaticConfigPreview {
            server_software: server,
            format,
            write_enabled,
            headers: headers.len(),
            path: format
                .file_name()
                .map(|name| root.join(name).display().to_string()),
            rules: format.region().map(|region| region.rules(&headers)),
        }
    })
    .await?;

    Ok(Json(preview))
}

pub async fn save_static_config(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<StaticWriteNotice>), AppError> {
    if !state.options.write_static_headers {
        return Err(AppError::bad_request(
            "STATIC_WRITE_DISABLED",
            "write_static_headers is turned off in the header options",
        ));
    }

    let resolved = resolve(&state.options, ClientContext::Front);
    let root = state.site_root.clone();
    let server = state.server_software;
    let notice =
        tokio::task::spawn_blocking(move || static_config::sync(&root, server, &resolved)).await?;

    let status = if notice.is_success() {
        StatusCode::OK
    } else if notice.format == ServerConfigFile::None {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((status, Json(notice)))
}
