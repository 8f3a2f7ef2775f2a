//! Working directory checks.

use std::path::Path;

use bloomstore_core::{BloomResult, PermissionError};
use tracing::debug;

fn insufficient(path: &Path, reason: impl Into<String>) -> PermissionError {
    PermissionError::InsufficientPermissions {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Make sure `path` exists and the store can write below it.
///
/// Missing directories are created. A directory without the owner write
/// bit is rejected even when the process could write anyway (for example
/// when running as root), so that a read-only mount is caught at startup.
pub fn ensure_working_directory(path: &Path) -> BloomResult<()> {
    std::fs::create_dir_all(path).map_err(|e| insufficient(path, e.to_string()))?;

    let metadata = std::fs::metadata(path).map_err(|e| insufficient(path, e.to_string()))?;
    if !metadata.is_dir() {
        return Err(PermissionError::NotADirectory {
            path: path.display().to_string(),
        }
        .into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o200 == 0 {
            return Err(insufficient(path, format!("mode {:o} is not writable", mode & 0o777)).into());
        }
    }
    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() {
            return Err(insufficient(path, "directory is read-only").into());
        }
    }

    // scratch file is removed when dropped
    tempfile::Builder::new()
        .prefix(".write-check-")
        .tempfile_in(path)
        .map_err(|e| insufficient(path, e.to_string()))?;

    debug!(path = %path.display(), "Working directory ready");
    Ok(())
}
