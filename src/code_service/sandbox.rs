//! Path-traversal guard shared by every C3 operation that touches the
//! filesystem. Canonicalizes the requested path and rejects anything that
//! resolves outside the project root, matching the context packer's
//! `canon_wd` / `starts_with` check.

use std::path::{Path, PathBuf};

use crate::errors::AppError;

pub fn resolve_in_root(root: &Path, relative: &str) -> Result<PathBuf, AppError> {
    let canon_root = root
        .canonicalize()
        .map_err(|e| AppError::internal(format!("failed to canonicalize project root: {e}")))?;

    let candidate = root.join(relative);
    let canonical = candidate
        .canonicalize()
        .map_err(|_| AppError::file_not_found(relative))?;

    if !canonical.starts_with(&canon_root) {
        return Err(AppError::new(
            format!("path escapes project root: {relative}"),
            crate::errors::ErrorCategory::Validation,
        )
        .recoverable(false));
    }

    Ok(canonical)
}
