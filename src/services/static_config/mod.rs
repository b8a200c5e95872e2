//! Static config synchronization.
//!
//! Persists the static-eligible part of the resolved header set into whichever
//! server config file is present under the site root, so static assets get the
//! same headers as dynamic pages.

pub mod htaccess;
pub mod managed;
pub mod web_config;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::services::policy::ResolvedHeaders;

pub use htaccess::Htaccess;
pub use managed::{ManagedRegion, write_managed};
pub use web_config::WebConfig;

pub const HTACCESS_FILE: &str = ".htaccess";
pub const WEB_CONFIG_FILE: &str = "web.config";

#[derive(Debug, Error)]
pub enum StaticConfigError {
    #[error("no server configuration file (.htaccess or web.config) found in {}", .root.display())]
    NoServerConfig { root: PathBuf },
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// The web server answering for the site, as far as the host environment tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSoftware {
    Apache,
    LiteSpeed,
    Iis,
    Nginx,
    Unknown,
}

impl ServerSoftware {
    /// Identify from a `SERVER_SOFTWARE`-style banner, e.g. `Apache/2.4.57 (Debian)`.
    pub fn identify(banner: Option<&str>) -> Self {
        let Some(banner) = banner else {
            return Self::Unknown;
        };
        let banner = banner.to_ascii_lowercase();

        if banner.contains("apache") {
            Self::Apache
        } else if banner.contains("litespeed") {
            Self::LiteSpeed
        } else if banner.contains("iis") {
            Self::Iis
        } else if banner.contains("nginx") {
            Self::Nginx
        } else {
            Self::Unknown
        }
    }

    pub fn reads_htaccess(&self) -> bool {
        matches!(self, Self::Apache | Self::LiteSpeed | Self::Unknown)
    }
}

/// Which server config file the writer will target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerConfigFile {
    None,
    Htaccess,
    WebConfig,
}

impl ServerConfigFile {
    /// Re-run on every write; nothing here is cached.
    pub fn detect(root: &Path, server: ServerSoftware) -> Self {
        if server.reads_htaccess() && root.join(HTACCESS_FILE).is_file() {
            Self::Htaccess
        } else if root.join(WEB_CONFIG_FILE).is_file() {
            Self::WebConfig
        } else {
            Self::None
        }
    }

    pub fn file_name(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Htaccess => Some(HTACCESS_FILE),
            Self::WebConfig => Some(WEB_CONFIG_FILE),
        }
    }

    pub fn region(&self) -> Option<&'static dyn ManagedRegion> {
        match self {
            Self::None => None,
            Self::Htaccess => Some(&Htaccess),
            Self::WebConfig => Some(&WebConfig),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub format: ServerConfigFile,
    pub path: PathBuf,
    pub headers: usize,
    pub changed: bool,
}

/// Merge the static-eligible headers of `resolved` into the `format` file under `root`.
///
/// `format` comes from [`ServerConfigFile::detect`], run once per save.
pub fn write(
    root: &Path,
    format: ServerConfigFile,
    resolved: &ResolvedHeaders,
) -> Result<WriteOutcome, StaticConfigError> {
    let (Some(file_name), Some(region)) = (format.file_name(), format.region()) else {
        return Err(StaticConfigError::NoServerConfig {
            root: root.to_path_buf(),
        });
    };

    let headers = resolved.static_eligible();
    let path = root.join(file_name);
    let changed = write_managed(&path, region, &headers)?;

    Ok(WriteOutcome {
        format,
        path,
        headers: headers.len(),
        changed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Failure,
}

/// User-facing result of a static write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticWriteNotice {
    pub level: NoticeLevel,
    pub message: String,
    pub format: ServerConfigFile,
    /// On failure: the rules that would have been written, for manual setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl StaticWriteNotice {
    pub fn is_success(&self) -> bool {
        self.level == NoticeLevel::Success
    }
}

/// Run the explicit save action and turn its result into a notice.
pub fn sync(root: &Path, server: ServerSoftware, resolved: &ResolvedHeaders) -> StaticWriteNotice {
    let format = ServerConfigFile::detect(root, server);

    match write(root, format, resolved) {
        Ok(outcome) => {
            tracing::info!(
                path = %outcome.path.display(),
                headers = outcome.headers,
                changed = outcome.changed,
                "static header configuration written"
            );
            let message = if outcome.changed {
                format!(
                    "Wrote {} header rule(s) to {}.",
                    outcome.headers,
                    outcome.path.display()
                )
            } else {
                format!("{} is already up to date.", outcome.path.display())
            };
            StaticWriteNotice {
                level: NoticeLevel::Success,
                message,
                format,
                guidance: None,
            }
        }
        Err(err @ StaticConfigError::NoServerConfig { .. }) => {
            tracing::warn!(error = %err, "static header configuration skipped");
            StaticWriteNotice {
                level: NoticeLevel::Failure,
                message: err.to_string(),
                format,
                guidance: None,
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "static header configuration failed");
            StaticWriteNotice {
                level: NoticeLevel::Failure,
                message: err.to_string(),
                format,
                guidance: format
                    .region()
                    .map(|region| region.rules(&resolved.static_eligible())),
            }
        }
    }
}
