//! Script directory layout and file operations.

use std::path::{Path, PathBuf};

use agora_core::{AgoraError, Utc};

/// Subdirectory owned by the script runtime.
pub const OUTPUT_DIR: &str = "output";
/// Subdirectory holding replaced scripts.
pub const HISTORY_DIR: &str = "version_history";

pub(crate) fn io_err(what: &str, path: &Path, e: &std::io::Error) -> AgoraError {
    AgoraError::Io(format!("{what} {}: {e}", path.display()))
}

/// Reject names that are empty, dotted or carry a path separator.
pub fn check_name(name: &str) -> Result<(), AgoraError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains('\0')
        || name == ".."
        || Path::new(name).file_name().is_none_or(|f| f != name);
    if bad {
        return Err(AgoraError::InvalidArg(format!(
            "'{name}' is not a plain file name"
        )));
    }
    Ok(())
}

/// Short VM name: the file name without extension.
#[must_use]
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `true` if `path` carries extension `ext`, ignoring case.
#[must_use]
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

/// Timestamped history path for `name`.
#[must_use]
pub fn history_path(dir: &Path, name: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    dir.join(HISTORY_DIR).join(format!("{stamp}-{name}"))
}

/// Create the script directory and its subdirectories.
pub async fn ensure_layout(dir: &Path) -> Result<(), AgoraError> {
    for sub in [dir.to_path_buf(), dir.join(OUTPUT_DIR), dir.join(HISTORY_DIR)] {
        tokio::fs::create_dir_all(&sub)
            .await
            .map_err(|e| io_err("create", &sub, &e))?;
    }
    Ok(())
}

/// Move `path` into the history directory; returns the new location.
pub async fn archive_previous(dir: &Path, path: &Path) -> Result<PathBuf, AgoraError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = history_path(dir, &name);
    tokio::fs::rename(path, &target)
        .await
        .map_err(|e| io_err("archive", path, &e))?;
    Ok(target)
}

/// Read `name` from `dir`.
pub async fn read(dir: &Path, name: &str) -> Result<Vec<u8>, AgoraError> {
    check_name(name)?;
    let path = dir.join(name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AgoraError::not_found(format!("script {name}")))
        }
        Err(e) => Err(io_err("read", &path, &e)),
    }
}
