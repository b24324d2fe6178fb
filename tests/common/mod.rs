//! Shared fakes for engine and drain tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use mediasync::client::Remote;
use mediasync::indexer::digest_file;
use mediasync::media_types::SupportedTypeSet;
use mediasync::metadata::MetadataSource;
use mediasync::types::{ChecksumEntry, ReconcileAction, ReconciliationDecision, UploadMetadata};
use mediasync::SyncError;

pub mod responder;

/// Scripted result of one upload call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
	Ok,
	Transport,
	Rejected,
}

/// In-memory server: knows digests, records uploads, follows scripts
///
/// Reconciliation accepts every digest it has not seen; a successful
/// upload makes the digest known, so a second pass rejects it.
pub struct FakeRemote {
	pings: Mutex<VecDeque<bool>>,
	ping_default: AtomicBool,
	pub ping_calls: AtomicUsize,
	upload_script: Mutex<VecDeque<UploadResult>>,
	pub uploads: Mutex<Vec<PathBuf>>,
	known: Mutex<HashSet<Vec<u8>>>,
	reconcile_fails: AtomicBool,
	pub reconcile_calls: AtomicUsize,
	extra_accept: Mutex<Option<PathBuf>>,
	upload_delay: Mutex<Option<Duration>>,
}

impl Default for FakeRemote {
	fn default() -> Self {
		FakeRemote {
			pings: Mutex::new(VecDeque::new()),
			ping_default: AtomicBool::new(true),
			ping_calls: AtomicUsize::new(0),
			upload_script: Mutex::new(VecDeque::new()),
			uploads: Mutex::new(Vec::new()),
			known: Mutex::new(HashSet::new()),
			reconcile_fails: AtomicBool::new(false),
			reconcile_calls: AtomicUsize::new(0),
			extra_accept: Mutex::new(None),
			upload_delay: Mutex::new(None),
		}
	}
}

impl FakeRemote {
	/// Ping answers consumed in order, then `default`
	pub fn script_pings(&self, answers: &[bool], default: bool) {
		self.pings.lock().unwrap().extend(answers.iter().copied());
		self.ping_default.store(default, Ordering::SeqCst);
	}

	/// Upload results consumed in order, then success
	pub fn script_uploads(&self, results: &[UploadResult]) {
		self.upload_script.lock().unwrap().extend(results.iter().copied());
	}

	pub fn know_file(&self, path: &Path) {
		self.known.lock().unwrap().insert(digest_file(path).unwrap());
	}

	pub fn fail_reconcile(&self, fail: bool) {
		self.reconcile_fails.store(fail, Ordering::SeqCst);
	}

	/// Add an accept for an id that was never submitted
	pub fn accept_unknown(&self, id: PathBuf) {
		*self.extra_accept.lock().unwrap() = Some(id);
	}

	/// Every upload takes this long before answering
	pub fn set_upload_delay(&self, delay: Duration) {
		*self.upload_delay.lock().unwrap() = Some(delay);
	}

	pub fn uploaded(&self) -> Vec<PathBuf> {
		self.uploads.lock().unwrap().clone()
	}

	pub fn upload_count(&self, path: &Path) -> usize {
		self.uploads.lock().unwrap().iter().filter(|p| p.as_path() == path).count()
	}
}

#[async_trait]
impl Remote for FakeRemote {
	async fn ping(&self) -> bool {
		self.ping_calls.fetch_add(1, Ordering::SeqCst);
		match self.pings.lock().unwrap().pop_front() {
			Some(answer) => answer,
			None => self.ping_default.load(Ordering::SeqCst),
		}
	}

	async fn fetch_supported_types(&self) -> SupportedTypeSet {
		SupportedTypeSet::builtin()
	}

	async fn reconcile(
		&self,
		entries: &[ChecksumEntry],
	) -> Result<Vec<ReconciliationDecision>, SyncError> {
		self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
		if self.reconcile_fails.load(Ordering::SeqCst) {
			return Err(SyncError::transport("connection reset"));
		}
		let known = self.known.lock().unwrap();
		let mut decisions: Vec<ReconciliationDecision> = entries
			.iter()
			.map(|e| {
				let dup = known.contains(&e.digest);
				ReconciliationDecision {
					action: if dup { ReconcileAction::Reject } else { ReconcileAction::Accept },
					remote_asset_id: if dup { Some("remote-1".to_string()) } else { None },
					local_id: e.local_id.clone(),
					already_trashed_remotely: false,
					reason: if dup { "duplicate".to_string() } else { String::new() },
				}
			})
			.collect();
		if let Some(id) = self.extra_accept.lock().unwrap().clone() {
			decisions.push(ReconciliationDecision {
				action: ReconcileAction::Accept,
				remote_asset_id: None,
				local_id: id,
				already_trashed_remotely: false,
				reason: String::new(),
			});
		}
		Ok(decisions)
	}

	async fn upload(&self, path: &Path, _metadata: &UploadMetadata) -> Result<Vec<u8>, SyncError> {
		let delay = *self.upload_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let result = self.upload_script.lock().unwrap().pop_front().unwrap_or(UploadResult::Ok);
		match result {
			UploadResult::Ok => {
				let digest = digest_file(path)?;
				self.known.lock().unwrap().insert(digest);
				self.uploads.lock().unwrap().push(path.to_path_buf());
				Ok(br#"{"id":"asset","status":"created"}"#.to_vec())
			}
			UploadResult::Transport => Err(SyncError::transport("connection refused")),
			UploadResult::Rejected => {
				Err(SyncError::ServerRejection { status: 400, body: "bad request".to_string() })
			}
		}
	}
}

/// Metadata with fixed timestamps; fails like the real source on a missing file
pub struct FixedMetadata;

impl MetadataSource for FixedMetadata {
	fn metadata_of(&self, path: &Path) -> Result<UploadMetadata, SyncError> {
		fs::metadata(path).map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
		let at: DateTime<FixedOffset> = DateTime::parse_from_rfc3339("2024-05-01T12:00:00+02:00")
			.map_err(|e| SyncError::MetadataExtraction {
				path: path.to_path_buf(),
				message: e.to_string(),
			})?;
		Ok(UploadMetadata {
			device_asset_id: path.file_stem().unwrap().to_string_lossy().into_owned(),
			device_owner_tag: "test-device".to_string(),
			content_created_at: at,
			content_modified_at: at,
		})
	}
}

pub fn write_file(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
	let path = dir.join(rel);
	fs::create_dir_all(path.parent().unwrap()).unwrap();
	fs::write(&path, content).unwrap();
	path
}

// vim: ts=4
