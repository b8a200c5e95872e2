/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - options: 起動時に読み込んだ immutable な HeaderOptions
 *   - site root / server software: static config の書き込み先
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::services::policy::{ClientContext, HeaderOptions};
use crate::services::static_config::ServerSoftware;

#[derive(Clone, Debug)]
pub struct AppState {
    pub options: Arc<HeaderOptions>,
    pub site_root: Arc<PathBuf>,
    pub server_software: ServerSoftware,
    pub admin_path_prefix: Arc<str>,
    pub hash_body_limit: usize,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            options: Arc::new(config.options.clone()),
            site_root: Arc::new(config.site_root.clone()),
            server_software: config.server_software,
            admin_path_prefix: Arc::from(config.admin_path_prefix.as_str()),
            hash_body_limit: config.hash_body_limit,
        }
    }

    pub fn client_context(&self, path: &str) -> ClientContext {
        ClientContext::from_path(path, &self.admin_path_prefix)
    }
}
