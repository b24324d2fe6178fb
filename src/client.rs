//! Remote asset server client
//!
//! Four stateless request/response operations: liveness ping, supported
//! media types, bulk checksum reconciliation and single-asset upload. Every
//! call is one outbound request; nothing here retries. Retry policy belongs
//! to the connectivity monitor and the watch loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use crate::config::Config;
use crate::error::SyncError;
use crate::logging::*;
use crate::media_types::{MediaTypesResponse, SupportedTypeSet};
use crate::metadata::MetadataSource;
use crate::types::{ChecksumEntry, ReconcileAction, ReconciliationDecision, UploadMetadata};

/// Exact liveness payload returned by `GET /server/ping`
pub const PING_RESPONSE: &str = r#"{"res":"pong"}"#;

const API_KEY_HEADER: &str = "x-api-key";

/// Operations the sync engine needs from the server
#[async_trait]
pub trait Remote: Send + Sync {
	/// True only if the server answered with the exact liveness payload
	async fn ping(&self) -> bool;

	/// Server-advertised extensions, or the built-in set on any failure
	async fn fetch_supported_types(&self) -> SupportedTypeSet;

	/// Submit all checksums in one request
	async fn reconcile(
		&self,
		entries: &[ChecksumEntry],
	) -> Result<Vec<ReconciliationDecision>, SyncError>;

	/// Upload one file with its descriptive fields
	async fn upload(&self, path: &Path, metadata: &UploadMetadata) -> Result<Vec<u8>, SyncError>;
}

/// Derive metadata for `path` and upload it
pub async fn upload_path(
	remote: &dyn Remote,
	metadata: &dyn MetadataSource,
	path: &Path,
) -> Result<Vec<u8>, SyncError> {
	let fields = metadata.metadata_of(path)?;
	remote.upload(path, &fields).await
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumPair {
	pub checksum: String,
	pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCheckRequest {
	pub assets: Vec<ChecksumPair>,
}

impl BulkCheckRequest {
	pub fn from_entries(entries: &[ChecksumEntry]) -> Self {
		BulkCheckRequest {
			assets: entries
				.iter()
				.map(|e| ChecksumPair {
					checksum: e.encoded_digest(),
					id: e.local_id.to_string_lossy().into_owned(),
				})
				.collect(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCheckResult {
	pub action: String,
	#[serde(default)]
	pub asset_id: Option<String>,
	pub id: String,
	#[serde(default)]
	pub is_trashed: bool,
	#[serde(default)]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkCheckResponse {
	#[serde(default)]
	pub results: Vec<BulkCheckResult>,
}

/// Decode a bulk-check response body
///
/// A garbled body yields no decisions: reconciliation is advisory, and a
/// missed accept is simply re-checked on the next startup pass.
pub fn parse_bulk_check(body: &[u8]) -> Vec<ReconciliationDecision> {
	let resp: BulkCheckResponse = match serde_json::from_slice(body) {
		Ok(resp) => resp,
		Err(e) => {
			warn!("Unreadable reconciliation response, treating as no accepted files: {}", e);
			return Vec::new();
		}
	};
	resp.results
		.into_iter()
		.map(|r| ReconciliationDecision {
			action: ReconcileAction::parse(&r.action),
			remote_asset_id: r.asset_id,
			local_id: PathBuf::from(r.id),
			already_trashed_remotely: r.is_trashed,
			reason: r.reason.unwrap_or_default(),
		})
		.collect()
}

/// Map a non-success status to the error taxonomy
///
/// Server errors, timeouts and throttling are transient; any other client
/// error is the server refusing this particular request.
pub fn classify_status(status: StatusCode, body: String) -> SyncError {
	if status.is_server_error()
		|| status == StatusCode::REQUEST_TIMEOUT
		|| status == StatusCode::TOO_MANY_REQUESTS
	{
		SyncError::transport(format!("HTTP {}: {}", status.as_u16(), body))
	} else {
		SyncError::ServerRejection { status: status.as_u16(), body }
	}
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

/// reqwest-backed implementation of [`Remote`]
pub struct HttpRemote {
	http: reqwest::Client,
	api_base: String,
	key: String,
}

impl HttpRemote {
	pub fn new(config: &Config) -> Result<Self, SyncError> {
		let http = reqwest::Client::builder()
			.timeout(config.request_timeout())
			.build()
			.map_err(|e| SyncError::config(format!("cannot build HTTP client: {}", e)))?;
		Ok(HttpRemote { http, api_base: config.api_base(), key: config.key.clone() })
	}

	fn url(&self, endpoint: &str) -> String {
		format!("{}{}", self.api_base, endpoint)
	}

	async fn try_fetch_supported_types(&self) -> Result<SupportedTypeSet, SyncError> {
		let resp = self.http.get(self.url("/server/media-types")).send().await?;
		let status = resp.status();
		if !status.is_success() {
			return Err(classify_status(status, resp.text().await.unwrap_or_default()));
		}
		let body: MediaTypesResponse = resp.json().await?;
		SupportedTypeSet::from_response(&body)
			.ok_or_else(|| SyncError::transport("server advertised no image types"))
	}
}

#[async_trait]
impl Remote for HttpRemote {
	async fn ping(&self) -> bool {
		debug!("Checking connectivity");
		let resp = match self.http.get(self.url("/server/ping")).send().await {
			Ok(resp) => resp,
			Err(e) => {
				debug!("Ping failed: {}", e);
				return false;
			}
		};
		match resp.text().await {
			Ok(body) if body.trim() == PING_RESPONSE => true,
			Ok(body) => {
				debug!("Unexpected ping response: {}", body);
				false
			}
			Err(e) => {
				debug!("Ping body unreadable: {}", e);
				false
			}
		}
	}

	async fn fetch_supported_types(&self) -> SupportedTypeSet {
		match self.try_fetch_supported_types().await {
			Ok(set) => set,
			Err(e) => {
				warn!("Could not fetch supported media types, using built-in list: {}", e);
				SupportedTypeSet::builtin()
			}
		}
	}

	async fn reconcile(
		&self,
		entries: &[ChecksumEntry],
	) -> Result<Vec<ReconciliationDecision>, SyncError> {
		let resp = self
			.http
			.post(self.url("/assets/bulk-upload-check"))
			.header(API_KEY_HEADER, &self.key)
			.header(reqwest::header::ACCEPT, "application/json")
			.json(&BulkCheckRequest::from_entries(entries))
			.send()
			.await?;
		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(SyncError::transport(format!("HTTP {}: {}", status.as_u16(), body)));
		}
		let body = resp.bytes().await?;
		Ok(parse_bulk_check(&body))
	}

	async fn upload(&self, path: &Path, metadata: &UploadMetadata) -> Result<Vec<u8>, SyncError> {
		let file = tokio::fs::File::open(path)
			.await
			.map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
		let len = file
			.metadata()
			.await
			.map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?
			.len();
		let file_name = path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| metadata.device_asset_id.clone());

		let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
		let part = Part::stream_with_length(body, len)
			.file_name(file_name)
			.mime_str("application/octet-stream")
			.map_err(|e| SyncError::transport(e.to_string()))?;
		let form = Form::new()
			.part("assetData", part)
			.text("deviceAssetId", metadata.device_asset_id.clone())
			.text("deviceId", metadata.device_owner_tag.clone())
			.text("fileCreatedAt", metadata.content_created_at.to_rfc3339())
			.text("fileModifiedAt", metadata.content_modified_at.to_rfc3339());

		let resp = self
			.http
			.post(self.url("/assets"))
			.header(API_KEY_HEADER, &self.key)
			.header(reqwest::header::ACCEPT, "application/json")
			.multipart(form)
			.send()
			.await?;
		let status = resp.status();
		if !status.is_success() {
			return Err(classify_status(status, resp.text().await.unwrap_or_default()));
		}
		Ok(resp.bytes().await?.to_vec())
	}
}


// vim: ts=4
