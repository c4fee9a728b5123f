//! Utility helpers shared across the engine

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC wall-clock time for lifecycle stamps.
pub fn now() -> DateTime<Utc> {
	Utc::now()
}

/// Current time as nanoseconds since the Unix epoch.
///
/// File modification times and cursor timestamps use nanosecond precision
/// throughout; a u64 carries us well past the year 2500.
pub fn now_ns() -> u64 {
	system_time_ns(SystemTime::now())
}

/// Convert a [`SystemTime`] to nanoseconds since the Unix epoch.
///
/// Times before the epoch clamp to zero.
pub fn system_time_ns(t: SystemTime) -> u64 {
	t.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

/// Validate a client-supplied relative path and return it as a `PathBuf`.
///
/// Rejects absolute paths and any `..` component so the result can be
/// joined onto a share root without escaping it. Separators are POSIX
/// (`/`) on the wire.
pub fn clean_rel_path(rel: &str) -> Result<PathBuf> {
	if rel.is_empty() {
		return Err(SyncError::MissingField { field: "path" });
	}
	let path = Path::new(rel);
	let mut cleaned = PathBuf::new();
	for component in path.components() {
		match component {
			Component::Normal(part) => cleaned.push(part),
			Component::CurDir => {}
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(SyncError::PathEscape { path: rel.to_string() });
			}
		}
	}
	if cleaned.as_os_str().is_empty() {
		return Err(SyncError::PathEscape { path: rel.to_string() });
	}
	Ok(cleaned)
}

/// Render a relative path with POSIX separators for the wire and cursors.
pub fn path_to_posix(path: &Path) -> String {
	let parts: Vec<String> =
		path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
	parts.join("/")
}

/// Reduce an identifier to a filesystem-safe file name component.
///
/// Used for per-key state files (`state/<device>_<share>.json`) where ids
/// may contain characters that are not path-safe.
pub fn safe_file_component(id: &str) -> String {
	id.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
		.collect()
}


// vim: ts=4
