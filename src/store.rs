//! Atomic JSON snapshot store
//!
//! Every durable structure in the engine (devices, queue, conflicts, sync
//! states, placeholders) persists through this module: serialize the whole
//! snapshot, write to a temp file in the same directory, fsync, rename over
//! the target. Writers serialize per path through a lock file; readers never
//! take the lock.
//!
//! A crash between rename and the directory fsync may lose the last write;
//! callers treat a missing file as an empty store. Partial JSON surfaces as
//! a load error at startup rather than silently resetting state.

use crate::error::{Result, SyncError};
use crate::logging::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Unix mode for snapshots holding secrets (token digests).
pub const MODE_SECRET: u32 = 0o600;

/// Unix mode for ordinary state snapshots.
pub const MODE_STATE: u32 = 0o640;

/// Unix mode for data directories.
pub const MODE_DIR: u32 = 0o750;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const LOCK_RETRY_LIMIT: u32 = 100;

fn persistence_error(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> SyncError {
	SyncError::Persistence { path: path.display().to_string(), source: Box::new(source) }
}

/// Create a directory (and parents) with the store's directory mode.
pub async fn ensure_dir(path: &Path) -> Result<()> {
	tokio::fs::create_dir_all(path).await.map_err(|e| persistence_error(path, e))?;
	set_mode(path, MODE_DIR).await;
	Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) {
	use std::os::unix::fs::PermissionsExt;
	if let Err(e) =
		tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
	{
		warn!("failed to set mode {:o} on {}: {}", mode, path.display(), e);
	}
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) {}

/// Load a JSON snapshot.
///
/// Returns `Ok(None)` when the file does not exist; malformed content is a
/// persistence error surfaced to the caller.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
	let contents = match tokio::fs::read(path).await {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(persistence_error(path, e)),
	};
	let value = serde_json::from_slice(&contents).map_err(|e| persistence_error(path, e))?;
	Ok(Some(value))
}

/// Atomically replace `path` with the JSON serialization of `value`.
///
/// The snapshot is written to `<path>.<pid>.tmp` in the same directory,
/// fsynced, chmodded to `mode`, then renamed over the target. The directory
/// fsync afterwards is best effort.
pub async fn save_json<T: Serialize>(path: &Path, value: &T, mode: u32) -> Result<()> {
	if let Some(parent) = path.parent() {
		ensure_dir(parent).await?;
	}

	let json = serde_json::to_vec_pretty(value).map_err(|e| persistence_error(path, e))?;

	let tmp = temp_path(path);
	let mut file =
		tokio::fs::File::create(&tmp).await.map_err(|e| persistence_error(&tmp, e))?;
	file.write_all(&json).await.map_err(|e| persistence_error(&tmp, e))?;
	file.sync_all().await.map_err(|e| persistence_error(&tmp, e))?;
	drop(file);

	set_mode(&tmp, mode).await;

	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		let _ = tokio::fs::remove_file(&tmp).await;
		return Err(persistence_error(path, e));
	}

	sync_parent_dir(path).await;
	Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
	let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	path.with_file_name(format!("{}.{}.tmp", name, std::process::id()))
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
	if let Some(parent) = path.parent().map(Path::to_path_buf) {
		let result = tokio::task::spawn_blocking(move || {
			std::fs::File::open(&parent).and_then(|dir| dir.sync_all())
		})
		.await;
		match result {
			Ok(Ok(())) => {}
			Ok(Err(e)) => debug!("directory fsync skipped for {}: {}", path.display(), e),
			Err(e) => debug!("directory fsync task failed: {}", e),
		}
	}
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}

/// Exclusive advisory lock over a persisted path.
///
/// Backed by a `<path>.lock` file containing the owner PID; released on
/// drop on every exit path. Two processes writing the same snapshot
/// serialize here.
pub struct PathLock {
	lock_path: PathBuf,
}

impl PathLock {
	/// Acquire the lock, retrying briefly if another writer holds it.
	pub async fn acquire(target: &Path) -> Result<Self> {
		let lock_path = lock_path_for(target);
		if let Some(parent) = lock_path.parent() {
			ensure_dir(parent).await?;
		}

		for attempt in 0..LOCK_RETRY_LIMIT {
			match std::fs::OpenOptions::new()
				.write(true)
				.create_new(true)
				.open(&lock_path)
			{
				Ok(mut file) => {
					use std::io::Write;
					let _ = write!(file, "{}", std::process::id());
					return Ok(PathLock { lock_path });
				}
				Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
					if attempt + 1 == LOCK_RETRY_LIMIT {
						break;
					}
					tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
				}
				Err(e) => return Err(persistence_error(&lock_path, e)),
			}
		}

		Err(SyncError::Internal {
			message: format!(
				"could not acquire lock {} (stale lock file? delete it manually)",
				lock_path.display()
			),
		})
	}
}

impl Drop for PathLock {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.lock_path);
	}
}

fn lock_path_for(target: &Path) -> PathBuf {
	let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	target.with_file_name(format!("{}.lock", name))
}

/// Run `f` while holding the exclusive lock for `target`.
///
/// The lock is released on all exit paths, including an error from `f`.
pub async fn with_lock<T, F, Fut>(target: &Path, f: F) -> Result<T>
where
	F: FnOnce() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let lock = PathLock::acquire(target).await?;
	let result = f().await;
	drop(lock);
	result
}


// vim: ts=4
