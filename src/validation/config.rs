//! Configuration validation functions

use super::ValidationError;

/// Validate the server base URL
///
/// Must be non-empty and use the http or https scheme.
pub fn validate_server_url(server: &str) -> Result<(), ValidationError> {
	let server = server.trim();
	if server.is_empty() {
		return Err(ValidationError::ConfigError("server URL is not configured".to_string()));
	}
	if !(server.starts_with("http://") || server.starts_with("https://")) {
		return Err(ValidationError::ConfigError(format!(
			"server URL must start with http:// or https://, got {}",
			server
		)));
	}
	Ok(())
}

/// Validate the API key
pub fn validate_api_key(key: &str) -> Result<(), ValidationError> {
	if key.trim().is_empty() {
		return Err(ValidationError::ConfigError("API key is not configured".to_string()));
	}
	Ok(())
}

/// Validate backoff tiers in milliseconds
///
/// The schedule needs at least one tier and every tier must be positive.
pub fn validate_backoff_tiers(tiers_ms: &[u64]) -> Result<(), ValidationError> {
	if tiers_ms.is_empty() {
		return Err(ValidationError::ConfigError("backoff schedule must not be empty".to_string()));
	}
	if let Some(pos) = tiers_ms.iter().position(|t| *t == 0) {
		return Err(ValidationError::ConfigError(format!(
			"backoff tier {} must be greater than 0",
			pos
		)));
	}
	Ok(())
}

/// Validate timeout in seconds
pub fn validate_timeout_secs(timeout_secs: u64) -> Result<(), ValidationError> {
	if timeout_secs == 0 {
		return Err(ValidationError::ConfigError("Timeout must be greater than 0".to_string()));
	}
	if timeout_secs > 3600 {
		return Err(ValidationError::ConfigError(format!(
			"Timeout too large: {} seconds (max 3600)",
			timeout_secs
		)));
	}
	Ok(())
}


// vim: ts=4
