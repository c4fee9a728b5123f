//! Opaque change-feed cursors
//!
//! A cursor captures a share snapshot as `path -> content hash` plus the
//! time it was taken. The wire form is URL-safe base64 over the JSON
//! payload; clients treat it as opaque and round-trip it unchanged. The
//! empty string is the "no prior state" cursor.

use crate::error::{Result, SyncError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cursor payload format version. Cursors from other engine versions are
/// rejected as client errors, never accepted partially.
pub const CURSOR_VERSION: u32 = 1;

/// Decoded cursor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
	/// Payload format version
	pub version: u32,

	/// Nanosecond UTC timestamp of the snapshot
	pub timestamp_ns: u64,

	/// Content hash of every non-excluded file at snapshot time
	pub file_hashes: BTreeMap<String, String>,
}

impl Cursor {
	/// The "no prior state" cursor.
	pub fn empty() -> Self {
		Cursor { version: CURSOR_VERSION, timestamp_ns: 0, file_hashes: BTreeMap::new() }
	}

	/// Snapshot cursor over a hash map taken at `timestamp_ns`.
	pub fn snapshot(timestamp_ns: u64, file_hashes: BTreeMap<String, String>) -> Self {
		Cursor { version: CURSOR_VERSION, timestamp_ns, file_hashes }
	}

	/// True when this cursor carries no prior state.
	pub fn is_empty(&self) -> bool {
		self.file_hashes.is_empty()
	}

	/// Encode to the opaque wire form.
	pub fn encode(&self) -> Result<String> {
		let json = serde_json::to_vec(self)
			.map_err(|e| SyncError::Internal { message: format!("cursor encode: {}", e) })?;
		Ok(URL_SAFE_NO_PAD.encode(json))
	}

	/// Decode from the wire form.
	///
	/// The empty string decodes to [`Cursor::empty`]. Any malformed or
	/// cross-version payload is a client error (`input.invalid`); a decode
	/// failure is never a server fault.
	pub fn decode(token: &str) -> Result<Self> {
		if token.is_empty() {
			return Ok(Cursor::empty());
		}
		let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|e| SyncError::InvalidInput {
			message: format!("cursor is not valid base64: {}", e),
		})?;
		let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|e| {
			SyncError::InvalidInput { message: format!("cursor payload malformed: {}", e) }
		})?;
		if cursor.version != CURSOR_VERSION {
			return Err(SyncError::InvalidInput {
				message: format!("cursor version {} is not supported", cursor.version),
			});
		}
		Ok(cursor)
	}
}


// vim: ts=4
