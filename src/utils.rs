// ABOUTME: Utility functions for the beamer-preview application
// ABOUTME: Provides directory handling, atomic writes and path helpers

use crate::errors::{PreviewError, Result};
use log::warn;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Validate that a file exists
pub fn validate_file_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(PreviewError::Config(format!(
            "Not a readable file: {:?}",
            path
        )));
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    } else if !path.is_dir() {
        return Err(PreviewError::Config(format!(
            "Path exists but is not a directory: {:?}",
            path
        )));
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent_directory_exists(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory_exists(parent)?;
        }
    }
    Ok(())
}

/// Write `bytes` to `path` so readers see either the old or the new file.
///
/// The data goes to a uniquely named sibling, is synced, then renamed over
/// the target.
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_directory_exists(path)?;
    let tmp = sibling_temp_path(path);

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up temporary file {:?}: {}", tmp, cleanup);
            }
        }
        return Err(PreviewError::Io(e));
    }
    Ok(())
}

/// Temporary path next to `path`, unique per call
pub fn sibling_temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

/// Remove a directory tree, logging instead of failing
pub fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Get the absolute path
pub fn get_absolute_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| {
        PreviewError::Config(format!("Failed to get absolute path for {:?}: {}", path, e))
    })
}
