use serde::Serialize;

use crate::services::static_config::{ServerConfigFile, ServerSoftware};

#[derive(Debug, Clone, Serialize)]
pub struct StaticConfigPreview {
    pub server_software: ServerSoftware,
    pub format: ServerConfigFile,
    /// Whether the save action is turned on in the options.
    pub write_enabled: bool,
    pub headers: usize,

    /// Present when a target file was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
}
