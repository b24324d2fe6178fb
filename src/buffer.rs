//! Pending upload buffer
//!
//! FIFO of local paths collected while the server is unreachable. Entries
//! leave the buffer only by being uploaded, by a logged give-up after the
//! server refused them, or when the file itself is gone. Nothing is dropped
//! silently and a transport failure never removes an entry. Contents live in
//! memory only.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::client::{upload_path, Remote};
use crate::logging::*;
use crate::metadata::MetadataSource;

/// Shared read-only view of the buffer length, for progress logging
#[derive(Debug, Clone, Default)]
pub struct BufferDepth(Arc<AtomicUsize>);

impl BufferDepth {
	pub fn get(&self) -> usize {
		self.0.load(Ordering::Relaxed)
	}

	fn set(&self, n: usize) {
		self.0.store(n, Ordering::Relaxed);
	}
}

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
	/// Buffer is empty
	Drained { uploaded: usize, dropped: usize },
	/// Upload failed in transit; `remaining` entries stay buffered
	Disconnected { uploaded: usize, remaining: usize },
	/// Shutdown requested; `remaining` entries stay buffered
	Interrupted { uploaded: usize, remaining: usize },
}

#[derive(Debug, Default)]
pub struct UploadBuffer {
	queue: VecDeque<PathBuf>,
	depth: BufferDepth,
}

impl UploadBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn depth_handle(&self) -> BufferDepth {
		self.depth.clone()
	}

	/// Append a path; the watch loop only does this while disconnected
	pub fn enqueue(&mut self, path: PathBuf) {
		debug!("Buffering {}", path.display());
		self.queue.push_back(path);
		self.depth.set(self.queue.len());
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
		self.queue.iter()
	}

	pub fn contains(&self, path: &std::path::Path) -> bool {
		self.queue.iter().any(|p| p == path)
	}

	fn pop_front(&mut self) -> Option<PathBuf> {
		let path = self.queue.pop_front();
		self.depth.set(self.queue.len());
		path
	}

	/// Upload every buffered path in insertion order
	///
	/// Each entry leaves the buffer as soon as it is uploaded, so a retry
	/// "from the top" only covers what is left.
	/// - A transport failure ends the drain with the failing entry still at
	///   the head; the caller treats the server as unreachable.
	/// - A server rejection is retried from the head, and the entry is given
	///   up with an error log after `max_attempts` consecutive rejections.
	/// - A local file error drops the entry with an error log.
	///
	/// `shutdown` is checked before every upload; the upload in flight
	/// always completes. `on_uploaded` sees every successful upload in order.
	pub async fn drain_and_upload_all<F>(
		&mut self,
		remote: &dyn Remote,
		metadata: &dyn MetadataSource,
		max_attempts: u32,
		shutdown: Option<&watch::Receiver<bool>>,
		mut on_uploaded: F,
	) -> DrainOutcome
	where
		F: FnMut(&PathBuf),
	{
		info!("Uploading {} buffered files", self.queue.len());
		let mut uploaded = 0;
		let mut dropped = 0;
		let mut head_rejections: u32 = 0;

		while let Some(path) = self.queue.front().cloned() {
			if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
				info!("Shutdown requested; {} files stay buffered", self.queue.len());
				return DrainOutcome::Interrupted { uploaded, remaining: self.queue.len() };
			}
			match upload_path(remote, metadata, &path).await {
				Ok(_) => {
					info!("Uploaded buffered file {}", path.display());
					on_uploaded(&path);
					self.pop_front();
					uploaded += 1;
					head_rejections = 0;
				}
				Err(e) if e.is_local_file() => {
					error!("Dropping buffered file: {}", e);
					self.pop_front();
					dropped += 1;
					head_rejections = 0;
				}
				Err(e) if e.is_transport() => {
					error!("Buffered upload of {} failed: {}", path.display(), e);
					info!("Drain stopped; {} files stay buffered", self.queue.len());
					return DrainOutcome::Disconnected { uploaded, remaining: self.queue.len() };
				}
				Err(e) => {
					error!("Buffered upload of {} refused: {}", path.display(), e);
					head_rejections += 1;
					if head_rejections >= max_attempts {
						error!(
							"Giving up on {} after {} refused attempts",
							path.display(),
							head_rejections
						);
						self.pop_front();
						dropped += 1;
						head_rejections = 0;
					}
				}
			}
		}

		info!("Buffer drained: {} uploaded, {} dropped", uploaded, dropped);
		DrainOutcome::Drained { uploaded, dropped }
	}
}


// vim: ts=4
