//! Watch loop and startup reconciliation
//!
//! One dispatcher owns the connectivity state, the upload buffer and the
//! watcher registry. It consumes filesystem events, recovery signals and
//! control messages one at a time, so uploads never run concurrently and
//! filesystem ordering is preserved. While an upload or a drain is in
//! progress, new events queue up in the notifier channel.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::Event;
use tokio::sync::{mpsc, watch};

use crate::buffer::{DrainOutcome, UploadBuffer};
use crate::client::{upload_path, Remote};
use crate::connectivity::{BackoffSchedule, ConnectivityMonitor, Recovery};
use crate::error::SyncError;
use crate::indexer::{self, Index};
use crate::logging::*;
use crate::media_types::SupportedTypeSet;
use crate::metadata::MetadataSource;
use crate::types::{ChecksumEntry, ConnectivityState};
use crate::validation::is_path_within_root;
use crate::watcher::{self, FsChange, RawEvent, WatchRegistry};

/// Messages from outside collaborators (configuration reload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
	UpdateRoots(Vec<PathBuf>),
}

/// Files uploaded by this process, keyed by path, with the uploaded digest
///
/// A file seen by both the startup walk and a watch event is only sent once
/// as long as its content has not changed in between. Entries live until the
/// file is deleted or moved away.
#[derive(Debug, Default)]
pub struct UploadLedger {
	uploaded: HashMap<PathBuf, Vec<u8>>,
}

impl UploadLedger {
	pub fn record(&mut self, path: &Path, digest: Vec<u8>) {
		self.uploaded.insert(path.to_path_buf(), digest);
	}

	pub fn record_current(&mut self, path: &Path) {
		match indexer::digest_file(path) {
			Ok(digest) => self.record(path, digest),
			Err(e) => debug!("Not recording {}: {}", path.display(), e),
		}
	}

	/// True if `path` was uploaded and still has the same content
	pub fn is_unchanged(&self, path: &Path) -> bool {
		match self.uploaded.get(path) {
			Some(digest) => indexer::digest_file(path).map(|d| &d == digest).unwrap_or(false),
			None => false,
		}
	}

	/// Drop entries for `root` and everything below it
	pub fn forget_under(&mut self, root: &Path) -> usize {
		let before = self.uploaded.len();
		self.uploaded.retain(|p, _| !is_path_within_root(p, root));
		before - self.uploaded.len()
	}

	pub fn len(&self) -> usize {
		self.uploaded.len()
	}

	pub fn is_empty(&self) -> bool {
		self.uploaded.is_empty()
	}
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
	pub uploaded: usize,
	pub buffered: usize,
	pub failed: usize,
	pub skipped_duplicates: usize,
	pub drains: usize,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
	pub indexed: usize,
	pub accepted: usize,
	pub rejected: usize,
	pub skipped: usize,
}

pub struct Engine {
	remote: Arc<dyn Remote>,
	metadata: Arc<dyn MetadataSource>,
	types: Arc<SupportedTypeSet>,
	registry: Box<dyn WatchRegistry>,
	monitor: ConnectivityMonitor,
	recovery_rx: mpsc::Receiver<Recovery>,
	buffer: UploadBuffer,
	ledger: UploadLedger,
	pending_writes: HashSet<PathBuf>,
	roots: Vec<PathBuf>,
	max_drain_attempts: u32,
	stats: EngineStats,
	shutdown: Option<watch::Receiver<bool>>,
}

impl Engine {
	pub fn new(
		remote: Arc<dyn Remote>,
		metadata: Arc<dyn MetadataSource>,
		types: Arc<SupportedTypeSet>,
		registry: Box<dyn WatchRegistry>,
		schedule: BackoffSchedule,
		max_drain_attempts: u32,
	) -> Self {
		let buffer = UploadBuffer::new();
		let (monitor, recovery_rx) =
			ConnectivityMonitor::new(Arc::clone(&remote), schedule, buffer.depth_handle());
		Engine {
			remote,
			metadata,
			types,
			registry,
			monitor,
			recovery_rx,
			buffer,
			ledger: UploadLedger::default(),
			pending_writes: HashSet::new(),
			roots: Vec::new(),
			max_drain_attempts: max_drain_attempts.max(1),
			stats: EngineStats::default(),
			shutdown: None,
		}
	}

	/// Let the startup pass and drains stop between uploads
	pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
		self.shutdown = Some(shutdown);
		self
	}

	fn stopping(&self) -> bool {
		self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
	}

	pub fn state(&self) -> ConnectivityState {
		self.monitor.state()
	}

	pub fn buffer(&self) -> &UploadBuffer {
		&self.buffer
	}

	pub fn stats(&self) -> EngineStats {
		self.stats
	}

	pub fn roots(&self) -> &[PathBuf] {
		&self.roots
	}

	pub fn ledger(&self) -> &UploadLedger {
		&self.ledger
	}

	pub fn registry(&self) -> &dyn WatchRegistry {
		self.registry.as_ref()
	}

	pub fn probe_active(&self) -> bool {
		self.monitor.probe_active()
	}

	/// Wait for the probe of the current episode to report back
	pub async fn next_recovery(&mut self) -> Option<Recovery> {
		self.recovery_rx.recv().await
	}

	// ========================================================================
	// STARTUP PASS
	// ========================================================================

	/// Index `roots`, reconcile against the server and upload accepted files
	///
	/// Runs before live events are consumed. Reconciliation is advisory: if it
	/// fails, nothing is uploaded this round and the files are checked again
	/// on the next pass. A shutdown request stops it between uploads.
	pub async fn startup_pass(&mut self, roots: &[PathBuf]) -> ReconcileSummary {
		for root in roots {
			let root = indexer::absolutize(root);
			if !self.roots.contains(&root) {
				self.roots.push(root);
			}
		}

		let types = Arc::clone(&self.types);
		let index = indexer::index(roots, |p| types.is_supported(p), self.registry.as_mut());
		let mut summary = ReconcileSummary {
			indexed: index.entries.len(),
			skipped: index.skipped,
			..ReconcileSummary::default()
		};
		if index.entries.is_empty() {
			return summary;
		}

		info!("Syncing {} existing files", index.entries.len());
		let accepted = match reconcile_index(self.remote.as_ref(), &index).await {
			Ok((accepted, rejected)) => {
				summary.rejected = rejected;
				accepted
			}
			Err(e) => {
				error!("Reconciliation failed: {}", e);
				if e.is_transport() && !self.monitor.recheck().await {
					self.monitor.mark_disconnected();
				}
				return summary;
			}
		};
		summary.accepted = accepted.len();

		let total = accepted.len();
		for (done, entry) in accepted.into_iter().enumerate() {
			if self.stopping() {
				info!(
					"Shutdown requested; {} of {} accepted files left for next run",
					total - done,
					total
				);
				return summary;
			}
			self.submit(entry.local_id, Some(entry.digest)).await;
		}
		info!(
			"Finished syncing existing files: {} accepted, {} already on server",
			summary.accepted, summary.rejected
		);
		summary
	}

	// ========================================================================
	// DISPATCH
	// ========================================================================

	/// Consume events until shutdown or until the notifier goes away
	pub async fn run(
		mut self,
		mut events: mpsc::UnboundedReceiver<RawEvent>,
		mut control: mpsc::UnboundedReceiver<Control>,
		mut shutdown: watch::Receiver<bool>,
	) -> EngineStats {
		self.shutdown = Some(shutdown.clone());
		info!("Watching {} directories", self.registry.watched().len());
		loop {
			if *shutdown.borrow() {
				break;
			}
			tokio::select! {
				biased;
				_ = shutdown.changed() => {
					debug!("Shutdown requested");
					break;
				}
				Some(recovery) = self.recovery_rx.recv() => self.handle_recovery(recovery).await,
				Some(msg) = control.recv() => self.handle_control(msg).await,
				event = events.recv() => match event {
					Some(Ok(event)) => self.handle_event(event).await,
					Some(Err(e)) => error!("Watch error: {}", e),
					None => {
						warn!("Filesystem notifier closed");
						break;
					}
				},
			}
		}

		if !self.buffer.is_empty() {
			warn!("Exiting with {} files still buffered", self.buffer.len());
		}
		self.monitor.cancel_probe();
		info!(
			"Watch loop stopped: {} uploaded, {} buffered, {} failed",
			self.stats.uploaded, self.stats.buffered, self.stats.failed
		);
		self.stats
	}

	/// Handle one filesystem notification
	pub async fn handle_event(&mut self, event: Event) {
		for change in watcher::classify(&event) {
			match change {
				FsChange::DirCreated(dir) => self.register_tree(&dir),
				FsChange::FileCreated(path) => {
					self.pending_writes.remove(&path);
					if !self.types.is_supported(&path) {
						debug!("Ignoring unsupported file {}", path.display());
						continue;
					}
					info!("New file: {}", path.display());
					self.submit(path, None).await;
				}
				FsChange::FileOpened(path) => {
					if self.types.is_supported(&path) {
						debug!("Waiting for {} to be written", path.display());
						self.pending_writes.insert(path);
					}
				}
				FsChange::FileWritten(path) => {
					// Only files created while watched; rewrites of older files are ignored
					if self.pending_writes.remove(&path) {
						info!("New file: {}", path.display());
						self.submit(path, None).await;
					}
				}
				FsChange::Removed(path) => {
					self.pending_writes.retain(|p| !is_path_within_root(p, &path));
					let n = self.ledger.forget_under(&path);
					if n > 0 {
						debug!("Forgot {} uploaded files under {}", n, path.display());
					}
				}
			}
		}
	}

	/// Drain the buffer once per recovery signal
	pub async fn handle_recovery(&mut self, recovery: Recovery) {
		if !self.monitor.on_recovered(&recovery) {
			return;
		}
		info!("Connectivity re-established, uploading buffer");
		self.stats.drains += 1;
		let ledger = &mut self.ledger;
		let stats = &mut self.stats;
		let outcome = self
			.buffer
			.drain_and_upload_all(
				self.remote.as_ref(),
				self.metadata.as_ref(),
				self.max_drain_attempts,
				self.shutdown.as_ref(),
				|path| {
					ledger.record_current(path);
					stats.uploaded += 1;
				},
			)
			.await;
		match outcome {
			DrainOutcome::Drained { dropped, .. } => {
				self.stats.failed += dropped;
				self.monitor.reset_escalation();
			}
			DrainOutcome::Disconnected { uploaded, .. } => {
				// A drain that moved nothing waits longer before the next attempt
				if uploaded == 0 {
					self.monitor.escalate();
				} else {
					self.monitor.reset_escalation();
				}
				self.monitor.mark_disconnected();
			}
			DrainOutcome::Interrupted { .. } => {}
		}
	}

	/// Apply a configuration change
	pub async fn handle_control(&mut self, control: Control) {
		match control {
			Control::UpdateRoots(new_roots) => {
				let new_roots: Vec<PathBuf> = new_roots.iter().map(|r| indexer::absolutize(r)).collect();
				let old: BTreeSet<PathBuf> = self.roots.iter().cloned().collect();
				let new: BTreeSet<PathBuf> = new_roots.iter().cloned().collect();

				for removed in old.difference(&new) {
					let n = self.registry.unwatch_under(removed);
					info!("Stopped watching {} ({} directories)", removed.display(), n);
				}
				self.roots.retain(|r| new.contains(r));

				let added: Vec<PathBuf> = new_roots.into_iter().filter(|r| !old.contains(r)).collect();
				if !added.is_empty() {
					info!("Adding watch paths {:?}", added);
					self.startup_pass(&added).await;
				}
			}
		}
	}

	// ========================================================================
	// UPLOAD PATH
	// ========================================================================

	/// Upload now if connected, otherwise buffer
	async fn submit(&mut self, path: PathBuf, digest: Option<Vec<u8>>) {
		if self.ledger.is_unchanged(&path) {
			debug!("Already uploaded {}, skipping", path.display());
			self.stats.skipped_duplicates += 1;
			return;
		}

		if !self.monitor.is_connected() {
			self.buffer.enqueue(path);
			self.stats.buffered += 1;
			return;
		}

		match upload_path(self.remote.as_ref(), self.metadata.as_ref(), &path).await {
			Ok(resp) => {
				info!("Uploaded {}", path.display());
				debug!("Server response: {}", String::from_utf8_lossy(&resp));
				match digest {
					Some(d) => self.ledger.record(&path, d),
					None => self.ledger.record_current(&path),
				}
				self.stats.uploaded += 1;
			}
			Err(e) if e.is_local_file() => {
				error!("Upload skipped: {}", e);
				self.stats.failed += 1;
			}
			Err(e) if e.is_transport() => {
				error!("Upload of {} failed: {}", path.display(), e);
				info!("Storing {} to buffer and retrying", path.display());
				self.buffer.enqueue(path);
				self.stats.buffered += 1;
				self.monitor.mark_disconnected();
			}
			Err(e) => {
				// Refused by the server; the next startup pass re-checks the file
				error!("Upload of {} refused: {}", path.display(), e);
				self.stats.failed += 1;
			}
		}
	}

	/// Register a newly created directory and whatever already sits below it
	fn register_tree(&mut self, dir: &Path) {
		let mut stack = vec![dir.to_path_buf()];
		while let Some(d) = stack.pop() {
			match self.registry.watch(&d) {
				Ok(true) => info!("Watching new directory {}", d.display()),
				Ok(false) => {}
				Err(e) => warn!("Cannot watch {}: {}", d.display(), e),
			}
			if let Ok(entries) = std::fs::read_dir(&d) {
				for entry in entries.flatten() {
					if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
						stack.push(entry.path());
					}
				}
			}
		}
	}
}

/// Submit an index to the server and split out accepted entries
///
/// Only paths that were actually submitted can be accepted, whatever the
/// server sends back.
pub async fn reconcile_index(
	remote: &dyn Remote,
	index: &Index,
) -> Result<(Vec<ChecksumEntry>, usize), SyncError> {
	let decisions = remote.reconcile(&index.entries).await?;
	let mut by_path: HashMap<&Path, &ChecksumEntry> =
		index.entries.iter().map(|e| (e.local_id.as_path(), e)).collect();

	let mut accepted = Vec::new();
	let mut rejected = 0;
	for decision in decisions {
		if !decision.is_accepted() {
			debug!(
				"Server already has {} ({}{})",
				decision.local_id.display(),
				decision.reason,
				if decision.already_trashed_remotely { ", trashed" } else { "" }
			);
			rejected += 1;
			continue;
		}
		match by_path.remove(decision.local_id.as_path()) {
			Some(entry) => accepted.push(entry.clone()),
			None => warn!("Ignoring accept for unknown or repeated id {}", decision.local_id.display()),
		}
	}
	Ok((accepted, rejected))
}

/// Index and reconcile without uploading or watching anything
pub async fn scan(
	remote: &dyn Remote,
	types: &SupportedTypeSet,
	roots: &[PathBuf],
) -> Result<ReconcileSummary, SyncError> {
	let mut registry = watcher::MemoryRegistry::default();
	let index = indexer::index(roots, |p| types.is_supported(p), &mut registry);
	let mut summary =
		ReconcileSummary { indexed: index.entries.len(), skipped: index.skipped, ..Default::default() };
	if index.entries.is_empty() {
		return Ok(summary);
	}
	let (accepted, rejected) = reconcile_index(remote, &index).await?;
	summary.accepted = accepted.len();
	summary.rejected = rejected;
	Ok(summary)
}


// vim: ts=4
