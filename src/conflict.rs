//! Sync conflict records and resolutions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a conflict: a concrete version of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
	/// Monotonic version counter on the owning side
	pub version: u64,

	/// Hex SHA-256 of the content
	pub hash: String,

	/// Byte size
	pub size: u64,

	/// When this version was written
	pub modified_at: DateTime<Utc>,

	/// User who wrote this version
	pub modified_by: String,

	/// Device that produced this version
	pub device_id: String,
}

/// Shape of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
	/// Both sides modified the same file
	ModifyModify,

	/// Local modified, remote deleted
	ModifyDelete,

	/// Local deleted, remote modified
	DeleteModify,

	/// Both sides created the same path with different content
	CreateCreate,

	/// Both sides moved the same file to different destinations
	MoveMove,
}

impl fmt::Display for ConflictType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConflictType::ModifyModify => "modify_modify",
			ConflictType::ModifyDelete => "modify_delete",
			ConflictType::DeleteModify => "delete_modify",
			ConflictType::CreateCreate => "create_create",
			ConflictType::MoveMove => "move_move",
		};
		write!(f, "{}", s)
	}
}

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
	KeepLocal,
	KeepRemote,
	KeepBoth,
	Merge,
	Manual,
}

/// A captured conflict awaiting (or carrying) a resolution.
///
/// Conflicts reference operations by id only; operations never point back,
/// so there are no object cycles to collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
	pub id: String,
	pub share_id: String,

	/// Share-relative path of the contested file
	pub path: String,

	pub local_version: FileVersion,
	pub remote_version: FileVersion,

	/// Common ancestor, when a three-way base is known
	#[serde(skip_serializing_if = "Option::is_none")]
	pub base_version: Option<FileVersion>,

	pub conflict_type: ConflictType,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolution: Option<ConflictResolution>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolved_at: Option<DateTime<Utc>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolved_by: Option<String>,

	pub created_at: DateTime<Utc>,
}

impl SyncConflict {
	pub fn is_resolved(&self) -> bool {
		self.resolution.is_some()
	}

	/// The side with the later modification time.
	pub fn newer_version(&self) -> &FileVersion {
		if self.remote_version.modified_at > self.local_version.modified_at {
			&self.remote_version
		} else {
			&self.local_version
		}
	}

	/// The side with the larger content.
	pub fn larger_version(&self) -> &FileVersion {
		if self.remote_version.size > self.local_version.size {
			&self.remote_version
		} else {
			&self.local_version
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn version(ts: i64, size: u64) -> FileVersion {
		FileVersion {
			version: 1,
			hash: "h".to_string(),
			size,
			modified_at: Utc.timestamp_opt(ts, 0).unwrap(),
			modified_by: "alice".to_string(),
			device_id: "dev-1".to_string(),
		}
	}

	fn conflict(local: FileVersion, remote: FileVersion) -> SyncConflict {
		SyncConflict {
			id: "c-1".to_string(),
			share_id: "docs".to_string(),
			path: "report.txt".to_string(),
			local_version: local,
			remote_version: remote,
			base_version: None,
			conflict_type: ConflictType::ModifyModify,
			resolution: None,
			resolved_at: None,
			resolved_by: None,
			created_at: Utc::now(),
		}
	}

	#[test]
	fn test_newer_version() {
		let c = conflict(version(100, 10), version(200, 5));
		assert_eq!(c.newer_version().modified_at, version(200, 5).modified_at);
	}

	#[test]
	fn test_larger_version() {
		let c = conflict(version(100, 10), version(200, 5));
		assert_eq!(c.larger_version().size, 10);
	}

	#[test]
	fn test_resolution_serializes_snake_case() {
		let json = serde_json::to_string(&ConflictResolution::KeepRemote).unwrap();
		assert_eq!(json, "\"keep_remote\"");
		let json = serde_json::to_string(&ConflictType::ModifyDelete).unwrap();
		assert_eq!(json, "\"modify_delete\"");
	}

	#[test]
	fn test_is_resolved() {
		let mut c = conflict(version(100, 10), version(200, 5));
		assert!(!c.is_resolved());
		c.resolution = Some(ConflictResolution::KeepLocal);
		assert!(c.is_resolved());
	}
}

// vim: ts=4
