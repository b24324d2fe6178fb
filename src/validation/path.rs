//! Path validation functions

use std::path::{Path, PathBuf};

use super::ValidationError;

/// Validate the list of watch roots
///
/// At least one root is required; every root must be an existing directory.
pub fn validate_watch_roots(roots: &[PathBuf]) -> Result<(), ValidationError> {
	if roots.is_empty() {
		return Err(ValidationError::ConfigError("no watch paths are configured".to_string()));
	}
	for root in roots {
		validate_watch_root(root)?;
	}
	Ok(())
}

/// Validate a single watch root
pub fn validate_watch_root(root: &Path) -> Result<(), ValidationError> {
	if root.as_os_str().is_empty() {
		return Err(ValidationError::PathError("watch path must not be empty".to_string()));
	}
	if !root.is_dir() {
		return Err(ValidationError::PathError(format!(
			"watch path {} is not a directory",
			root.display()
		)));
	}
	Ok(())
}

/// Check if path is within a root directory
pub fn is_path_within_root(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}


// vim: ts=4
