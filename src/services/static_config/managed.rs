//! Managed-region splicing shared by every static config renderer.
//!
//! A renderer knows how to find its own sentinel-delimited region inside a
//! file and regenerate it; this module owns the locked read-modify-write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::services::policy::ResolvedHeaderEntry;
use crate::services::static_config::StaticConfigError;

// Each retry means another saver replaced the file while we waited on its lock.
const LOCK_ATTEMPTS: usize = 8;

/// The existing file could not be understood well enough to splice into.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SpliceError(pub String);

pub trait ManagedRegion {
    /// Standalone rules for the user to apply by hand.
    fn rules(&self, headers: &[&ResolvedHeaderEntry]) -> String;

    /// Return `existing` with the managed region regenerated from `headers`.
    ///
    /// Content outside the region is carried over unchanged. Running this on its
    /// own output with the same headers returns that output.
    fn splice(&self, existing: &str, headers: &[&ResolvedHeaderEntry]) -> Result<String, SpliceError>;
}

/// Lock, read, splice and replace `path`.
///
/// Returns whether the file content changed. The file must already exist and be
/// writable. The new content is staged in a temporary file next to the target,
/// synced, then renamed over it, so on any error the target keeps its old content.
///
/// The exclusive lock is taken on the target itself. A rename swaps the inode
/// under a waiting saver, so after locking the content is compared with what the
/// path currently holds and the whole step is retried on a mismatch.
pub fn write_managed(
    path: &Path,
    region: &dyn ManagedRegion,
    headers: &[&ResolvedHeaderEntry],
) -> Result<bool, StaticConfigError> {
    let io_err = |source| StaticConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    for _ in 0..LOCK_ATTEMPTS {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        // Held until `file` drops, on every return path.
        file.lock().map_err(io_err)?;

        let mut existing = String::new();
        file.read_to_string(&mut existing).map_err(io_err)?;

        if fs::read_to_string(path).map_err(io_err)? != existing {
            tracing::debug!(path = %path.display(), "static config replaced while waiting for lock, retrying");
            continue;
        }

        let updated = region
            .splice(&existing, headers)
            .map_err(|e| StaticConfigError::Parse {
                path: path.to_path_buf(),
                message: e.0,
            })?;

        if updated == existing {
            tracing::debug!(path = %path.display(), "static config already up to date");
            return Ok(false);
        }

        replace(path, &file, &updated).map_err(io_err)?;
        return Ok(true);
    }

    Err(io_err(io::Error::new(
        io::ErrorKind::WouldBlock,
        "file kept being replaced while waiting for the lock",
    )))
}

fn replace(path: &Path, current: &File, content: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // Dropped (and removed) on any early return.
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(content.as_bytes())?;
    staged
        .as_file()
        .set_permissions(current.metadata()?.permissions())?;
    staged.as_file().sync_all()?;

    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
