//! ZIP bundle extraction for script uploads.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use agora_core::{AgoraError, ScriptValidator};

use super::storage::{has_extension, io_err};

fn zip_err(e: &zip::result::ZipError) -> AgoraError {
    AgoraError::InvalidArg(format!("bad archive: {e}"))
}

fn traversal(entry: &str) -> AgoraError {
    AgoraError::InvalidArg(format!("archive entry '{entry}' escapes the script directory"))
}

/// True when `path` lies strictly below `root` (both already canonical or
/// lexically normal).
#[must_use]
pub fn is_within(root: &Path, path: &Path) -> bool {
    path != root
        && path.starts_with(root)
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

/// Extract `bytes` into `target`, which must sit under `root`.
///
/// Every entry must resolve strictly below the canonical `root`; the first
/// entry that does not aborts the extraction. Returns the extracted files.
/// Blocking; run it off the async executor.
pub fn extract(bytes: &[u8], root: &Path, target: &Path) -> Result<Vec<PathBuf>, AgoraError> {
    let root = root
        .canonicalize()
        .map_err(|e| io_err("resolve", root, &e))?;
    std::fs::create_dir_all(target).map_err(|e| io_err("create", target, &e))?;
    let target = target
        .canonicalize()
        .map_err(|e| io_err("resolve", target, &e))?;
    if !is_within(&root, &target) {
        return Err(traversal(&target.display().to_string()));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| zip_err(&e))?;
    let mut files = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| zip_err(&e))?;
        let raw = entry.name().to_string();
        let rel = entry.enclosed_name().ok_or_else(|| traversal(&raw))?;
        let out = target.join(&rel);
        if !is_within(&root, &out) {
            return Err(traversal(&raw));
        }
        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| io_err("create", &out, &e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("create", parent, &e))?;
            // Catch symlinked parents the lexical check cannot see.
            let real = parent
                .canonicalize()
                .map_err(|e| io_err("resolve", parent, &e))?;
            if !real.starts_with(&root) {
                return Err(traversal(&raw));
            }
        }
        let mut file = std::fs::File::create(&out).map_err(|e| io_err("create", &out, &e))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| io_err("write", &out, &e))?;
        files.push(out);
    }
    Ok(files)
}

/// Names (relative to `base`) of extracted files that are not scripts or
/// fail `validator`.
#[must_use]
pub fn offenders(
    files: &[PathBuf],
    base: &Path,
    ext: &str,
    validator: &dyn ScriptValidator,
) -> Vec<String> {
    let mut bad = Vec::new();
    for path in files {
        let label = path
            .strip_prefix(base)
            .unwrap_or(path)
            .display()
            .to_string();
        let ok = has_extension(path, ext)
            && std::fs::read_to_string(path)
                .ok()
                .is_some_and(|src| validator.validate(&label, &src).is_ok());
        if !ok {
            bad.push(label);
        }
    }
    bad
}
