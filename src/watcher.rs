//! Filesystem notifier adapter
//!
//! Directories are registered one by one (non-recursive), the way the
//! indexer discovers them. Registering an already-watched directory is a
//! no-op.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::logging::*;
use crate::validation::is_path_within_root;

pub type RawEvent = notify::Result<Event>;

/// Registry of watched directories
pub trait WatchRegistry: Send {
	/// Start watching `dir`; returns false if it was already watched
	fn watch(&mut self, dir: &Path) -> Result<bool, SyncError>;

	/// Stop watching `root` and every directory below it; returns how many were dropped
	fn unwatch_under(&mut self, root: &Path) -> usize;

	fn watched(&self) -> &BTreeSet<PathBuf>;
}

/// Watcher backed by the platform notifier
pub struct DirectoryWatcher {
	watcher: RecommendedWatcher,
	watched: BTreeSet<PathBuf>,
}

impl DirectoryWatcher {
	/// Events are forwarded unbounded; the notifier callback never blocks
	pub fn new(events_tx: mpsc::UnboundedSender<RawEvent>) -> Result<Self, SyncError> {
		let watcher = notify::recommended_watcher(move |res: RawEvent| {
			if events_tx.send(res).is_err() {
				debug!("Watch loop stopped; dropping filesystem event");
			}
		})?;
		Ok(DirectoryWatcher { watcher, watched: BTreeSet::new() })
	}
}

impl WatchRegistry for DirectoryWatcher {
	fn watch(&mut self, dir: &Path) -> Result<bool, SyncError> {
		if self.watched.contains(dir) {
			return Ok(false);
		}
		self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
		self.watched.insert(dir.to_path_buf());
		debug!("Watching {}", dir.display());
		Ok(true)
	}

	fn unwatch_under(&mut self, root: &Path) -> usize {
		let dropped: Vec<PathBuf> =
			self.watched.iter().filter(|p| is_path_within_root(p, root)).cloned().collect();
		for dir in &dropped {
			if let Err(e) = self.watcher.unwatch(dir) {
				debug!("Unwatch {} failed: {}", dir.display(), e);
			}
			self.watched.remove(dir);
		}
		dropped.len()
	}

	fn watched(&self) -> &BTreeSet<PathBuf> {
		&self.watched
	}
}

/// Registry that only records directories, used when nothing is watched live
#[derive(Debug, Default)]
pub struct MemoryRegistry {
	watched: BTreeSet<PathBuf>,
}

impl WatchRegistry for MemoryRegistry {
	fn watch(&mut self, dir: &Path) -> Result<bool, SyncError> {
		Ok(self.watched.insert(dir.to_path_buf()))
	}

	fn unwatch_under(&mut self, root: &Path) -> usize {
		let before = self.watched.len();
		self.watched.retain(|p| !is_path_within_root(p, root));
		before - self.watched.len()
	}

	fn watched(&self) -> &BTreeSet<PathBuf> {
		&self.watched
	}
}

/// Whether the notifier reports when a writer closes a file (inotify)
///
/// Where it does, a plain creation only marks the file as being written and
/// the upload waits for the close.
pub const WRITE_CLOSE_EVENTS: bool = cfg!(target_os = "linux");

/// Filesystem change relevant to the watch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
	/// File appeared with its content in place
	FileCreated(PathBuf),
	/// New file opened for writing; content may still be arriving
	FileOpened(PathBuf),
	/// Writer closed the file
	FileWritten(PathBuf),
	DirCreated(PathBuf),
	/// Deleted or moved away
	Removed(PathBuf),
}

/// Reduce a notifier event to the changes the watch loop acts on
///
/// A rename into a watched directory counts as a creation. Backends that
/// report an unspecific creation are resolved by looking at the path.
pub fn classify(event: &Event) -> Vec<FsChange> {
	let paths = event.paths.iter().cloned();
	match event.kind {
		EventKind::Create(CreateKind::Folder) => paths.map(FsChange::DirCreated).collect(),
		EventKind::Create(CreateKind::File) if WRITE_CLOSE_EVENTS => {
			paths.map(FsChange::FileOpened).collect()
		}
		EventKind::Create(CreateKind::File) => paths.map(FsChange::FileCreated).collect(),
		EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
			.map(|p| if p.is_dir() { FsChange::DirCreated(p) } else { FsChange::FileCreated(p) })
			.collect(),
		EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
			paths.map(FsChange::FileWritten).collect()
		}
		EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
			paths.map(FsChange::Removed).collect()
		}
		_ => Vec::new(),
	}
}


// vim: ts=4
