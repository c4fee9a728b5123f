//! Change tracking over share trees
//!
//! Walks a share root in a deterministic order, applies the exclusion set,
//! hashes every file, and diffs the result against a client cursor to
//! produce an ordered change feed plus a new cursor capturing the full
//! current state.

use crate::cursor::Cursor;
use crate::error::{Result, SyncError};
use crate::exclusion::ExclusionSet;
use crate::hasher;
use crate::logging::*;
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Metadata for one share entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
	/// Share-relative path, POSIX separators
	pub path: String,

	/// Byte size (0 for directories)
	pub size: u64,

	/// Last-modified time, nanoseconds since the Unix epoch
	pub modified_ns: u64,

	/// Hex SHA-256 of the content; empty for directories
	pub hash: String,

	/// Permission bits
	pub mode: u32,

	/// Whether the entry is a directory
	pub is_dir: bool,
}

/// Kind of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
	Create,
	Modify,
	Delete,
}

impl fmt::Display for ChangeType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChangeType::Create => write!(f, "create"),
			ChangeType::Modify => write!(f, "modify"),
			ChangeType::Delete => write!(f, "delete"),
		}
	}
}

/// One change between two snapshots of a share.
///
/// Renames are not emitted: they are not observable from a stat walk, and
/// clients may synthesize them from delete+create pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
	/// Share-relative path, POSIX separators
	pub path: String,

	#[serde(rename = "type")]
	pub change_type: ChangeType,

	/// Byte size after the change (0 for deletes)
	pub size: u64,

	/// Content hash after the change; absent for deletes
	#[serde(skip_serializing_if = "Option::is_none")]
	pub hash: Option<String>,

	/// Permission bits after the change (0 for deletes)
	pub mode: u32,

	/// Modification time driving the feed order, nanoseconds
	pub modified_ns: u64,
}

/// Result of one change query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFeed {
	pub changes: Vec<Change>,

	/// Opaque cursor over the full current state (not just the emitted
	/// prefix). When `has_more` is set, clients must re-request with their
	/// original cursor until they can consume a complete response.
	pub cursor: String,

	pub has_more: bool,
}

/// Aggregate counts for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStats {
	pub file_count: u64,
	pub total_size: u64,
}

/// Walks shares and diffs snapshots against cursors.
///
/// The exclusion set sits behind a single configuration lock; walks of
/// different shares may run in parallel, and two concurrent walks of a
/// quiescent share produce the same cursor.
pub struct ChangeTracker {
	exclusions: RwLock<ExclusionSet>,
	max_file_size: u64,
}

impl ChangeTracker {
	pub fn new(exclusions: ExclusionSet, max_file_size: u64) -> Self {
		ChangeTracker { exclusions: RwLock::new(exclusions), max_file_size }
	}

	/// Replace the exclusion set; the next walk observes the new patterns.
	pub fn set_exclusions(&self, exclusions: ExclusionSet) {
		*self.exclusions.write().expect("exclusion lock poisoned") = exclusions;
	}

	/// Compute the changes between a client cursor and the share's current
	/// state.
	///
	/// A `limit` of 0 means unlimited. When more than `limit` changes
	/// exist, the feed is truncated to the first `limit` records in feed
	/// order and `has_more` is set; the same cursor yields the same prefix
	/// on the next call.
	pub fn get_changes(
		&self,
		share_root: &Path,
		cursor_token: &str,
		limit: usize,
	) -> Result<ChangeFeed> {
		let prior = Cursor::decode(cursor_token)?;
		let current = self.walk(share_root)?;
		let snapshot_ns = util::now_ns();

		let mut changes = Vec::new();
		for (path, meta) in &current {
			match prior.file_hashes.get(path) {
				None => changes.push(Change {
					path: path.clone(),
					change_type: ChangeType::Create,
					size: meta.size,
					hash: Some(meta.hash.clone()),
					mode: meta.mode,
					modified_ns: meta.modified_ns,
				}),
				Some(prior_hash) if *prior_hash != meta.hash => changes.push(Change {
					path: path.clone(),
					change_type: ChangeType::Modify,
					size: meta.size,
					hash: Some(meta.hash.clone()),
					mode: meta.mode,
					modified_ns: meta.modified_ns,
				}),
				Some(_) => {}
			}
		}
		for path in prior.file_hashes.keys() {
			if !current.contains_key(path) {
				// A deletion has no mtime of its own; it carries the
				// snapshot timestamp.
				changes.push(Change {
					path: path.clone(),
					change_type: ChangeType::Delete,
					size: 0,
					hash: None,
					mode: 0,
					modified_ns: snapshot_ns,
				});
			}
		}

		changes.sort_by(|a, b| {
			a.modified_ns.cmp(&b.modified_ns).then_with(|| a.path.cmp(&b.path))
		});

		let has_more = limit > 0 && changes.len() > limit;
		if has_more {
			changes.truncate(limit);
		}

		let hashes: BTreeMap<String, String> =
			current.into_iter().map(|(path, meta)| (path, meta.hash)).collect();
		let cursor = Cursor::snapshot(snapshot_ns, hashes).encode()?;

		Ok(ChangeFeed { changes, cursor, has_more })
	}

	/// Metadata for a single entry of a share.
	pub fn get_file_metadata(&self, share_root: &Path, rel: &str) -> Result<FileMetadata> {
		self.check_root(share_root)?;
		let cleaned = util::clean_rel_path(rel)?;
		let full = share_root.join(&cleaned);

		let meta = match std::fs::symlink_metadata(&full) {
			Ok(meta) => meta,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(SyncError::FileNotFound { path: rel.to_string() });
			}
			Err(e) => return Err(SyncError::Io(e)),
		};
		if meta.file_type().is_symlink() {
			// Symlinks are outside the sync surface
			return Err(SyncError::FileNotFound { path: rel.to_string() });
		}

		let rel_posix = util::path_to_posix(&cleaned);
		let hash = if meta.is_dir() { String::new() } else { hasher::file_sha256(&full)? };
		Ok(FileMetadata {
			path: rel_posix,
			size: if meta.is_dir() { 0 } else { meta.len() },
			modified_ns: meta.modified().map(util::system_time_ns).unwrap_or(0),
			hash,
			mode: mode_bits(&meta),
			is_dir: meta.is_dir(),
		})
	}

	/// File count and total size, honoring the exclusion set.
	pub fn share_stats(&self, share_root: &Path) -> Result<ShareStats> {
		let files = self.walk(share_root)?;
		let total_size = files.values().map(|m| m.size).sum();
		Ok(ShareStats { file_count: files.len() as u64, total_size })
	}

	/// Walk the share and build the current file snapshot.
	///
	/// Per-entry failures are logged and skipped; they never abort the
	/// walk. Only the missing/invalid root is fatal.
	fn walk(&self, share_root: &Path) -> Result<BTreeMap<String, FileMetadata>> {
		self.check_root(share_root)?;
		let exclusions = self.exclusions.read().expect("exclusion lock poisoned");
		let mut files = BTreeMap::new();
		self.walk_dir(share_root, PathBuf::new(), &exclusions, &mut files);
		Ok(files)
	}

	fn check_root(&self, share_root: &Path) -> Result<()> {
		match std::fs::metadata(share_root) {
			Ok(meta) if meta.is_dir() => Ok(()),
			Ok(_) | Err(_) => Err(SyncError::ShareNotAccessible {
				path: share_root.display().to_string(),
			}),
		}
	}

	fn walk_dir(
		&self,
		dir: &Path,
		rel_prefix: PathBuf,
		exclusions: &ExclusionSet,
		files: &mut BTreeMap<String, FileMetadata>,
	) {
		let reader = match std::fs::read_dir(dir) {
			Ok(reader) => reader,
			Err(e) => {
				warn!("skipping unreadable directory {}: {}", dir.display(), e);
				return;
			}
		};

		let mut entries: Vec<_> = reader
			.filter_map(|entry| match entry {
				Ok(entry) => Some(entry),
				Err(e) => {
					warn!("skipping unreadable entry under {}: {}", dir.display(), e);
					None
				}
			})
			.collect();
		// Deterministic walk order: entries sorted by name
		entries.sort_by_key(|e| e.file_name());

		for entry in entries {
			let name = entry.file_name();
			let rel = rel_prefix.join(&name);
			if exclusions.is_excluded(&rel) {
				trace!("excluded: {}", rel.display());
				continue;
			}

			let meta = match entry.metadata() {
				Ok(meta) => meta,
				Err(e) => {
					warn!("skipping {}: {}", rel.display(), e);
					continue;
				}
			};

			if meta.file_type().is_symlink() {
				trace!("skipping symlink: {}", rel.display());
				continue;
			}

			if meta.is_dir() {
				self.walk_dir(&entry.path(), rel, exclusions, files);
				continue;
			}

			if meta.len() > self.max_file_size {
				debug!(
					"skipping {}: {} bytes exceeds the {} byte limit",
					rel.display(),
					meta.len(),
					self.max_file_size
				);
				continue;
			}

			let hash = match hasher::file_sha256(&entry.path()) {
				Ok(hash) => hash,
				Err(e) => {
					warn!("skipping unhashable file {}: {}", rel.display(), e);
					continue;
				}
			};

			let rel_posix = util::path_to_posix(&rel);
			files.insert(
				rel_posix.clone(),
				FileMetadata {
					path: rel_posix,
					size: meta.len(),
					modified_ns: meta.modified().map(util::system_time_ns).unwrap_or(0),
					hash,
					mode: mode_bits(&meta),
					is_dir: false,
				},
			);
		}
	}
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
	use std::os::unix::fs::PermissionsExt;
	meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &std::fs::Metadata) -> u32 {
	0o644
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::io::Write;
	use tempfile::TempDir;

	fn tracker() -> ChangeTracker {
		ChangeTracker::new(ExclusionSet::defaults(), crate::config::DEFAULT_MAX_FILE_SIZE)
	}

	fn write_file(root: &Path, rel: &str, content: &[u8]) {
		let path = root.join(rel);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).unwrap();
		}
		let mut f = fs::File::create(&path).unwrap();
		f.write_all(content).unwrap();
	}

	#[test]
	fn test_empty_cursor_yields_creates() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "a.txt", b"A");
		write_file(tmp.path(), "dir/b.txt", b"B");

		let feed = tracker().get_changes(tmp.path(), "", 1000).unwrap();
		assert_eq!(feed.changes.len(), 2);
		assert!(feed.changes.iter().all(|c| c.change_type == ChangeType::Create));
		assert!(!feed.has_more);
		assert!(!feed.cursor.is_empty());
	}

	#[test]
	fn test_quiescent_share_yields_no_changes() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "a.txt", b"A");

		let t = tracker();
		let first = t.get_changes(tmp.path(), "", 1000).unwrap();
		let second = t.get_changes(tmp.path(), &first.cursor, 1000).unwrap();
		assert!(second.changes.is_empty());

		// The new cursor is equivalent modulo timestamp
		let c1 = Cursor::decode(&first.cursor).unwrap();
		let c2 = Cursor::decode(&second.cursor).unwrap();
		assert_eq!(c1.file_hashes, c2.file_hashes);
	}

	#[test]
	fn test_modify_and_delete_detected() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "a.txt", b"A");
		write_file(tmp.path(), "b.txt", b"B");

		let t = tracker();
		let first = t.get_changes(tmp.path(), "", 1000).unwrap();

		write_file(tmp.path(), "a.txt", b"AA");
		fs::remove_file(tmp.path().join("b.txt")).unwrap();

		let feed = t.get_changes(tmp.path(), &first.cursor, 1000).unwrap();
		assert_eq!(feed.changes.len(), 2);
		let modify = feed.changes.iter().find(|c| c.path == "a.txt").unwrap();
		assert_eq!(modify.change_type, ChangeType::Modify);
		assert_eq!(modify.size, 2);
		let delete = feed.changes.iter().find(|c| c.path == "b.txt").unwrap();
		assert_eq!(delete.change_type, ChangeType::Delete);
		assert!(delete.hash.is_none());
	}

	#[test]
	fn test_truncation_is_stable() {
		let tmp = TempDir::new().unwrap();
		for i in 0..10 {
			write_file(tmp.path(), &format!("f{:02}.txt", i), b"x");
		}

		let t = tracker();
		let first = t.get_changes(tmp.path(), "", 4).unwrap();
		assert_eq!(first.changes.len(), 4);
		assert!(first.has_more);

		// Same cursor, same prefix
		let again = t.get_changes(tmp.path(), "", 4).unwrap();
		let paths: Vec<_> = first.changes.iter().map(|c| &c.path).collect();
		let paths_again: Vec<_> = again.changes.iter().map(|c| &c.path).collect();
		assert_eq!(paths, paths_again);

		// The truncated response still carries the full state
		let cursor = Cursor::decode(&first.cursor).unwrap();
		assert_eq!(cursor.file_hashes.len(), 10);
	}

	#[test]
	fn test_exclusions_applied_during_walk() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "keep.txt", b"k");
		write_file(tmp.path(), "scratch.tmp", b"t");
		write_file(tmp.path(), ".hidden", b"h");

		let feed = tracker().get_changes(tmp.path(), "", 1000).unwrap();
		let paths: Vec<_> = feed.changes.iter().map(|c| c.path.as_str()).collect();
		assert_eq!(paths, vec!["keep.txt"]);
	}

	#[test]
	fn test_oversize_files_left_out() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "small.bin", b"ok");
		write_file(tmp.path(), "big.bin", &vec![0u8; 2048]);

		let t = ChangeTracker::new(ExclusionSet::defaults(), 1024);
		let feed = t.get_changes(tmp.path(), "", 1000).unwrap();
		let paths: Vec<_> = feed.changes.iter().map(|c| c.path.as_str()).collect();
		assert_eq!(paths, vec!["small.bin"]);
	}

	#[test]
	fn test_missing_root_not_accessible() {
		let tmp = TempDir::new().unwrap();
		let result = tracker().get_changes(&tmp.path().join("gone"), "", 100);
		assert!(matches!(result, Err(SyncError::ShareNotAccessible { .. })));
	}

	#[test]
	fn test_get_file_metadata() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "dir/b.txt", b"B");

		let t = tracker();
		let meta = t.get_file_metadata(tmp.path(), "dir/b.txt").unwrap();
		assert_eq!(meta.path, "dir/b.txt");
		assert_eq!(meta.size, 1);
		assert!(!meta.is_dir);
		assert_eq!(meta.hash, hasher::sha256_hex(b"B"));

		let dir_meta = t.get_file_metadata(tmp.path(), "dir").unwrap();
		assert!(dir_meta.is_dir);
		assert!(dir_meta.hash.is_empty());

		assert!(matches!(
			t.get_file_metadata(tmp.path(), "nope.txt"),
			Err(SyncError::FileNotFound { .. })
		));
		assert!(matches!(
			t.get_file_metadata(tmp.path(), "../escape"),
			Err(SyncError::PathEscape { .. })
		));
	}

	#[test]
	fn test_share_stats() {
		let tmp = TempDir::new().unwrap();
		write_file(tmp.path(), "a.txt", b"AAAA");
		write_file(tmp.path(), "dir/b.txt", b"BB");
		write_file(tmp.path(), "skip.tmp", b"XXXXXXXX");

		let stats = tracker().share_stats(tmp.path()).unwrap();
		assert_eq!(stats.file_count, 2);
		assert_eq!(stats.total_size, 6);
	}
}

// vim: ts=4
