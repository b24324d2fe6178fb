//! Core data types shared by the sync engine components

use std::fmt;
use std::path::PathBuf;

use base64::Engine as _;
use chrono::{DateTime, FixedOffset};

/// Content digest of a local file paired with its stable local identifier
///
/// Produced by the indexer and consumed once by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
	/// Raw SHA-1 digest of the file bytes
	pub digest: Vec<u8>,
	/// Absolute path of the file
	pub local_id: PathBuf,
}

impl ChecksumEntry {
	/// Digest as sent on the wire (standard base64)
	pub fn encoded_digest(&self) -> String {
		base64::engine::general_purpose::STANDARD.encode(&self.digest)
	}
}

/// Server verdict for one submitted checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
	/// The local file is new and should be uploaded
	Accept,
	/// The server already holds this content
	Reject,
}

impl ReconcileAction {
	/// Anything other than the literal "accept" is treated as a rejection
	pub fn parse(s: &str) -> Self {
		if s == "accept" {
			ReconcileAction::Accept
		} else {
			ReconcileAction::Reject
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationDecision {
	pub action: ReconcileAction,
	pub remote_asset_id: Option<String>,
	pub local_id: PathBuf,
	pub already_trashed_remotely: bool,
	pub reason: String,
}

impl ReconciliationDecision {
	pub fn is_accepted(&self) -> bool {
		self.action == ReconcileAction::Accept
	}
}

/// Descriptive form fields sent along with an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
	pub device_asset_id: String,
	pub device_owner_tag: String,
	pub content_created_at: DateTime<FixedOffset>,
	pub content_modified_at: DateTime<FixedOffset>,
}

/// Whether new change events go straight to upload or into the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
	#[default]
	Connected,
	Disconnected,
}

impl fmt::Display for ConnectivityState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectivityState::Connected => write!(f, "connected"),
			ConnectivityState::Disconnected => write!(f, "disconnected"),
		}
	}
}


// vim: ts=4
