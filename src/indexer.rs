//! Checksum indexer
//!
//! Walks the watch roots, registers every directory with the watcher and
//! hashes each supported file. Unreadable entries are reported and skipped;
//! the walk itself never aborts on a single bad file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::error::SyncError;
use crate::logging::*;
use crate::types::ChecksumEntry;
use crate::watcher::WatchRegistry;

/// Result of indexing a set of roots
#[derive(Debug, Default)]
pub struct Index {
	pub entries: Vec<ChecksumEntry>,
	/// Files or directories that could not be read
	pub skipped: usize,
	/// Directories registered with the watcher during the walk
	pub directories: usize,
}

/// SHA-1 of the whole file, streamed
pub fn digest_file(path: &Path) -> Result<Vec<u8>, SyncError> {
	let mut file =
		fs::File::open(path).map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
	let mut hasher = Sha1::new();
	io::copy(&mut file, &mut hasher)
		.map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
	Ok(hasher.finalize().to_vec())
}

/// Make a root absolute without resolving symlinks
pub fn absolutize(root: &Path) -> PathBuf {
	if root.is_absolute() {
		root.to_path_buf()
	} else {
		std::env::current_dir().map(|cwd| cwd.join(root)).unwrap_or_else(|_| root.to_path_buf())
	}
}

/// Index every root; directories are registered, supported files hashed
pub fn index<F>(roots: &[PathBuf], is_supported: F, registry: &mut dyn WatchRegistry) -> Index
where
	F: Fn(&Path) -> bool,
{
	let mut out = Index::default();
	for root in roots {
		let root = absolutize(root);
		info!("Indexing {}", root.display());
		scan_dir(&root, &is_supported, registry, &mut out);
	}
	info!(
		"Indexed {} files in {} directories ({} skipped)",
		out.entries.len(),
		out.directories,
		out.skipped
	);
	out
}

fn scan_dir<F>(dir: &Path, is_supported: &F, registry: &mut dyn WatchRegistry, out: &mut Index)
where
	F: Fn(&Path) -> bool,
{
	match registry.watch(dir) {
		Ok(_) => out.directories += 1,
		Err(e) => warn!("Cannot watch {}: {}", dir.display(), e),
	}

	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) => {
			warn!("Cannot read directory {}: {}", dir.display(), e);
			out.skipped += 1;
			return;
		}
	};

	let mut children: Vec<PathBuf> = Vec::new();
	for entry_result in entries {
		match entry_result {
			Ok(entry) => children.push(entry.path()),
			Err(e) => {
				warn!("Error reading entry in {}: {}", dir.display(), e);
				out.skipped += 1;
			}
		}
	}
	// Deterministic order keeps uploads in a stable sequence
	children.sort();

	for path in children {
		let metadata = match fs::symlink_metadata(&path) {
			Ok(m) => m,
			Err(e) => {
				warn!("Cannot access {}: {}", path.display(), e);
				out.skipped += 1;
				continue;
			}
		};

		if metadata.is_dir() {
			scan_dir(&path, is_supported, registry, out);
		} else if metadata.is_file() && is_supported(&path) {
			match digest_file(&path) {
				Ok(digest) => out.entries.push(ChecksumEntry { digest, local_id: path }),
				Err(e) => {
					warn!("Skipping {}", e);
					out.skipped += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::media_types::SupportedTypeSet;
	use crate::watcher::MemoryRegistry;
	use tempfile::TempDir;

	fn write(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
		let path = dir.join(rel);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_digest_file_sha1() {
		let dir = TempDir::new().unwrap();
		let path = write(dir.path(), "a.jpg", b"abc");
		let digest = digest_file(&path).unwrap();
		let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
		assert_eq!(hex, "a9993e364706816aba3e25717850c26c9cd0d89d");
	}

	#[test]
	fn test_index_filters_and_registers_directories() {
		let dir = TempDir::new().unwrap();
		let jpg = write(dir.path(), "a.jpg", b"one");
		let png = write(dir.path(), "sub/deeper/b.PNG", b"two");
		write(dir.path(), "notes.txt", b"three");
		write(dir.path(), "sub/clip.mp4", b"four");

		let types = SupportedTypeSet::builtin();
		let mut registry = MemoryRegistry::default();
		let index = index(&[dir.path().to_path_buf()], |p| types.is_supported(p), &mut registry);

		let ids: Vec<&PathBuf> = index.entries.iter().map(|e| &e.local_id).collect();
		assert_eq!(ids, vec![&jpg, &png]);
		assert_eq!(index.directories, 3);
		assert!(registry.watched().contains(&dir.path().join("sub").join("deeper")));
		assert_eq!(index.skipped, 0);
	}

	#[test]
	fn test_index_same_content_same_digest() {
		let dir = TempDir::new().unwrap();
		write(dir.path(), "a.jpg", b"same");
		write(dir.path(), "b.jpg", b"same");
		let mut registry = MemoryRegistry::default();
		let index = index(&[dir.path().to_path_buf()], |_| true, &mut registry);
		assert_eq!(index.entries.len(), 2);
		assert_eq!(index.entries[0].digest, index.entries[1].digest);
	}

	#[test]
	fn test_index_missing_root_is_skipped() {
		let dir = TempDir::new().unwrap();
		let good = write(dir.path(), "ok/a.jpg", b"x");
		let mut registry = MemoryRegistry::default();
		let roots = vec![dir.path().join("missing"), dir.path().join("ok")];
		let index = index(&roots, |_| true, &mut registry);
		assert_eq!(index.entries.len(), 1);
		assert_eq!(index.entries[0].local_id, good);
		assert_eq!(index.skipped, 1);
	}

	#[cfg(unix)]
	#[test]
	fn test_index_unreadable_file_does_not_abort() {
		use std::os::unix::fs::PermissionsExt;

		let dir = TempDir::new().unwrap();
		let locked = write(dir.path(), "a.jpg", b"secret");
		write(dir.path(), "b.jpg", b"open");
		fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
		// Root ignores permission bits
		if fs::File::open(&locked).is_ok() {
			return;
		}

		let mut registry = MemoryRegistry::default();
		let index = index(&[dir.path().to_path_buf()], |_| true, &mut registry);
		assert_eq!(index.entries.len(), 1);
		assert_eq!(index.skipped, 1);
	}
}

// vim: ts=4
