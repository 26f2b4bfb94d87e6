//! Path validation
//!
//! Every path crossing the client or the store boundary goes through here.
//! Valid paths are absolute, free of `..` segments and control characters,
//! and are normalized to a single canonical spelling (`/a/b`).

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Maximum number of segments in a path
pub const MAX_DIRECTORY_DEPTH: usize = 32;

/// Maximum length of a single path segment in bytes
pub const MAX_NAME_LENGTH: usize = 255;

/// Returns true if `path` is present and passes validation.
pub fn validate(path: Option<&str>) -> bool {
    path.is_some_and(is_valid_path)
}

/// Returns true if `path` passes validation.
pub fn is_valid_path(path: &str) -> bool {
    normalize_path(path).is_ok()
}

/// Validates `path` and returns its normalized form.
///
/// Empty and `.` segments are dropped, so `//a/./b/` becomes `/a/b`.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    if path.trim().is_empty() {
        return Err(StorageError::InvalidPath("Empty path".into()));
    }

    if path.contains(['\0', '\r', '\n']) {
        return Err(StorageError::InvalidPath(
            "Path contains control characters".into(),
        ));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::PathTraversal(path.to_string())),
            s if s.len() > MAX_NAME_LENGTH => {
                return Err(StorageError::InvalidPath(format!(
                    "Segment longer than {} bytes",
                    MAX_NAME_LENGTH
                )));
            }
            s => segments.push(s),
        }
    }

    if !path.starts_with('/') {
        return Err(StorageError::InvalidPath(format!(
            "Path must be absolute: {}",
            path
        )));
    }

    if segments.len() > MAX_DIRECTORY_DEPTH {
        return Err(StorageError::InvalidPath(format!(
            "Path deeper than {} levels",
            MAX_DIRECTORY_DEPTH
        )));
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Splits a normalized path into its parent directory and final name.
///
/// Returns `None` for the root.
pub fn split_parent(normalized: &str) -> Option<(&str, &str)> {
    if normalized == "/" {
        return None;
    }
    let idx = normalized.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &normalized[..idx] };
    Some((parent, &normalized[idx + 1..]))
}

/// Validates a volume name: a single non-blank segment.
pub fn is_valid_volume_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name != "."
        && name != ".."
        && !name.contains(['/', '\0', '\r', '\n'])
        && !name.contains(char::is_whitespace)
}

/// Maps a normalized virtual path onto the real path under `volume_root`.
pub fn virtual_to_real_path(volume_root: &Path, normalized: &str) -> PathBuf {
    let relative = normalized.trim_start_matches('/');
    if relative.is_empty() {
        volume_root.to_path_buf()
    } else {
        volume_root.join(relative)
    }
}

/// Normalizes `path` and resolves it under `volume_root`.
///
/// Returns the real path together with the normalized virtual path. The
/// deepest existing ancestor is canonicalized and must stay inside the
/// volume, so symlinks cannot lead out of it.
pub fn resolve_and_validate_path(
    volume_root: &Path,
    path: &str,
) -> Result<(PathBuf, String), StorageError> {
    let virtual_path = normalize_path(path)?;
    let real_path = virtual_to_real_path(volume_root, &virtual_path);

    let root_canonical = volume_root
        .canonicalize()
        .map_err(|_| StorageError::InvalidPath("Volume root invalid".into()))?;

    let mut probe = real_path.as_path();
    loop {
        // symlink_metadata also sees dangling links, which must not be skipped
        if probe.symlink_metadata().is_ok() {
            let canonical = probe.canonicalize().map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::PathTraversal(virtual_path.clone())
                } else {
                    StorageError::PermissionDenied(virtual_path.clone())
                }
            })?;
            if !canonical.starts_with(&root_canonical) {
                return Err(StorageError::PathTraversal(virtual_path));
            }
            break;
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => break,
        }
    }

    Ok((real_path, virtual_path))
}
