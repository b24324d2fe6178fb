//! Error types for mediasync operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::validation::ValidationError;

/// Main error type for sync operations
#[derive(Debug)]
pub enum SyncError {
	/// Network failure, timeout or non-success status from the server
	Transport { message: String },

	/// Local file could not be opened or read
	FileRead { path: PathBuf, source: io::Error },

	/// Descriptive metadata for an upload could not be derived
	MetadataExtraction { path: PathBuf, message: String },

	/// Well-formed response refusing the request
	ServerRejection { status: u16, body: String },

	/// Missing or invalid server/key/paths configuration
	Configuration { message: String },

	/// Filesystem notifier failure
	Watch { message: String },

	/// I/O error
	Io(io::Error),
}

impl SyncError {
	/// Whether this failure should trigger a connectivity re-probe
	pub fn is_transport(&self) -> bool {
		matches!(self, SyncError::Transport { .. })
	}

	/// Whether this failure is bound to the local file rather than the server
	pub fn is_local_file(&self) -> bool {
		matches!(self, SyncError::FileRead { .. } | SyncError::MetadataExtraction { .. })
	}

	pub fn transport(message: impl Into<String>) -> Self {
		SyncError::Transport { message: message.into() }
	}

	pub fn config(message: impl Into<String>) -> Self {
		SyncError::Configuration { message: message.into() }
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Transport { message } => write!(f, "Transport error: {}", message),
			SyncError::FileRead { path, source } => {
				write!(f, "Cannot read {}: {}", path.display(), source)
			}
			SyncError::MetadataExtraction { path, message } => {
				write!(f, "Metadata extraction failed for {}: {}", path.display(), message)
			}
			SyncError::ServerRejection { status, body } => {
				write!(f, "Server rejected request (HTTP {}): {}", status, body)
			}
			SyncError::Configuration { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Watch { message } => write!(f, "Watch error: {}", message),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::FileRead { source, .. } => Some(source),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		SyncError::Configuration { message: e.to_string() }
	}
}

impl From<notify::Error> for SyncError {
	fn from(e: notify::Error) -> Self {
		SyncError::Watch { message: e.to_string() }
	}
}

impl From<reqwest::Error> for SyncError {
	fn from(e: reqwest::Error) -> Self {
		if let Some(status) = e.status() {
			SyncError::Transport { message: format!("HTTP {}: {}", status.as_u16(), e) }
		} else {
			SyncError::Transport { message: e.to_string() }
		}
	}
}


// vim: ts=4
