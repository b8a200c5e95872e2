/*
 * Responsibility
 * - 環境変数や設定の読み込み (PORT, options file, site root, server software など)
 * - 設定値のバリデーション (不足なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::services::policy::{HeaderOptions, OptionsError};
use crate::services::static_config::ServerSoftware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(&'static str),
    Options { path: PathBuf, source: OptionsError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
            ConfigError::Options { path, source } => {
                write!(f, "invalid header options in {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Options { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    // Where `.htaccess` / `web.config` live.
    pub site_root: PathBuf,
    pub server_software: ServerSoftware,
    pub admin_path_prefix: String,

    pub options_path: Option<PathBuf>,
    pub options: HeaderOptions,

    // Largest HTML body buffered for hash injection, bytes.
    pub hash_body_limit: usize,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let site_root = std::env::var("SITE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let server_software =
            ServerSoftware::identify(std::env::var("SERVER_SOFTWARE").ok().as_deref());

        let admin_path_prefix = std::env::var("ADMIN_PATH_PREFIX")
            .unwrap_or_else(|_| "/administrator".to_string());
        if !admin_path_prefix.starts_with('/') {
            return Err(ConfigError::Invalid("ADMIN_PATH_PREFIX"));
        }

        let hash_body_limit = std::env::var("HASH_BODY_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(2 * 1024 * 1024);

        let request_timeout_seconds = std::env::var("REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let options_path = std::env::var("HTTPHEADER_OPTIONS").ok().map(PathBuf::from);
        let options = match &options_path {
            Some(path) => HeaderOptions::load(path).map_err(|source| ConfigError::Options {
                path: path.clone(),
                source,
            })?,
            None => HeaderOptions::default(),
        };

        Ok(Self {
            addr,
            app_env,
            site_root,
            server_software,
            admin_path_prefix,
            options_path,
            options,
            hash_body_limit,
            request_timeout_seconds,
        })
    }
}
