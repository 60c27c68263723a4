//! Virtual path resolution.
//!
//! Every user-supplied path (URL path or form field) goes through
//! [`resolve_path`] before touching the filesystem. The result is always the
//! root itself or one of its descendants, whatever the input contains.
//! [`verify_within_root`] then catches symlinks that lead back out of the tree.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use tracing::{error, warn};

use crate::error::GatewayError;

/// Percent-decode the path component of a request URI.
pub fn decode_request_path(raw: &str) -> Result<String, GatewayError> {
    urlencoding::decode(raw).map(Cow::into_owned).map_err(|e| {
        warn!("Request path is not valid UTF-8 after decoding: {}", e);
        GatewayError::InvalidPath
    })
}

/// Join a virtual path onto `root`, normalizing `.` and `..` lexically.
///
/// A `..` that would climb above `root` is rejected rather than clamped, so a
/// traversal attempt never silently lands somewhere else under the root.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, GatewayError> {
    let relative = relative.trim_start_matches('/');

    let mut parts: Vec<&OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(GatewayError::PathTraversal);
                }
                parts.push(name);
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                if parts.pop().is_none() {
                    warn!("Path traversal attempt detected: {:?}", relative);
                    return Err(GatewayError::PathTraversal);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in relative path: {:?}", relative);
                return Err(GatewayError::PathTraversal);
            }
        }
    }

    let mut result = root.to_path_buf();
    result.extend(parts);

    if !result.starts_with(root) {
        error!("Path resolution resulted in path outside root: {:?}", result);
        return Err(GatewayError::PathTraversal);
    }

    Ok(result)
}

/// Check that the nearest existing ancestor of `path` (the path itself if it
/// exists) canonicalizes to somewhere inside the canonical root.
///
/// Paths that do not exist yet are checked through their parent, which covers
/// upload destinations. A root that cannot be canonicalized has no contents
/// to escape through, so the check passes and the caller's own I/O reports
/// the failure.
pub fn verify_within_root(root: &Path, path: &Path) -> Result<(), GatewayError> {
    let Ok(canonical_root) = root.canonicalize() else {
        return Ok(());
    };

    for candidate in path.ancestors() {
        let Ok(canonical) = candidate.canonicalize() else {
            continue;
        };
        if canonical.starts_with(&canonical_root) {
            return Ok(());
        }
        warn!(
            "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
            path, canonical, canonical_root
        );
        return Err(GatewayError::PathTraversal);
    }

    Ok(())
}

/// Reduce a declared upload filename to its final component.
pub fn upload_file_name(declared: &str) -> Result<&OsStr, GatewayError> {
    if declared.contains('\0') {
        return Err(GatewayError::InvalidFileName(declared.to_string()));
    }
    Path::new(declared).file_name().ok_or_else(|| {
        warn!("Rejected upload filename: {:?}", declared);
        GatewayError::InvalidFileName(declared.to_string())
    })
}
