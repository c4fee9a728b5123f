//! Error types for the NithronSync engine
//!
//! Every fallible engine operation returns [`SyncError`]. The variant set
//! mirrors the wire-stable error taxonomy: `kind()` yields the stable kind
//! string handlers put on the wire, `http_status()` the advisory status code.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io;

/// Convenience result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Unified error type for all engine operations.
#[derive(Debug)]
pub enum SyncError {
	/// Malformed request payload or argument
	InvalidInput { message: String },

	/// A required field was missing from the request
	MissingField { field: &'static str },

	/// No credentials were presented
	AuthMissing,

	/// Credentials were presented but malformed
	AuthInvalid { message: String },

	/// Token does not have the expected prefix/length shape
	TokenInvalidFormat,

	/// Token has a valid shape but matches no live device
	TokenInvalid,

	/// Token matched a device but is past its expiry
	TokenExpired,

	/// Device was revoked by its owner
	DeviceRevoked,

	/// No device with this id
	DeviceNotFound { device_id: String },

	/// Per-user device cap reached
	DeviceLimit { limit: usize },

	/// Caller does not own the device
	DeviceUnauthorized,

	/// Unknown share id
	ShareNotFound { share_id: String },

	/// Share root missing or not a directory
	ShareNotAccessible { path: String },

	/// Relative path resolves outside the share root
	PathEscape { path: String },

	/// File not present in the share
	FileNotFound { path: String },

	/// File exceeds the configured maximum size
	FileTooLarge { path: String, size: u64, limit: u64 },

	/// No queued operation with this id
	OperationNotFound { id: String },

	/// Requested status change violates the operation state machine
	InvalidTransition { from: String, to: String },

	/// No conflict with this id
	ConflictNotFound { id: String },

	/// Conflict already carries a resolution
	ConflictAlreadyResolved { id: String },

	/// Hydration of a placeholder failed
	HydrationFailed { path: String, message: String },

	/// Bounded hydration queue rejected the request
	HydrationQueueFull,

	/// File is currently hydrating and cannot be dehydrated
	DehydrateInUse { path: String },

	/// Underlying I/O failure
	Io(io::Error),

	/// Persistent snapshot load/save failure
	Persistence { path: String, source: Box<dyn Error + Send + Sync> },

	/// Catch-all; never leaks implementation details on the wire
	Internal { message: String },
}

impl SyncError {
	/// Wire-stable error kind string.
	pub fn kind(&self) -> &'static str {
		match self {
			SyncError::InvalidInput { .. } => "input.invalid",
			SyncError::MissingField { .. } => "input.required",
			SyncError::AuthMissing => "auth.missing",
			SyncError::AuthInvalid { .. } => "auth.invalid",
			SyncError::TokenInvalidFormat => "token.invalid_format",
			SyncError::TokenInvalid => "token.invalid",
			SyncError::TokenExpired => "token.expired",
			SyncError::DeviceRevoked => "device.revoked",
			SyncError::DeviceNotFound { .. } => "device.not_found",
			SyncError::DeviceLimit { .. } => "device.limit",
			SyncError::DeviceUnauthorized => "device.unauthorized",
			SyncError::ShareNotFound { .. } => "share.not_found",
			SyncError::ShareNotAccessible { .. } => "share.not_accessible",
			SyncError::PathEscape { .. } => "path.escape",
			SyncError::FileNotFound { .. } => "file.not_found",
			SyncError::FileTooLarge { .. } => "file.too_large",
			SyncError::OperationNotFound { .. } => "queue.not_found",
			SyncError::InvalidTransition { .. } => "queue.invalid_transition",
			SyncError::ConflictNotFound { .. } => "conflict.not_found",
			SyncError::ConflictAlreadyResolved { .. } => "conflict.already_resolved",
			SyncError::HydrationFailed { .. } => "hydration.failed",
			SyncError::HydrationQueueFull => "hydration.queue_full",
			SyncError::DehydrateInUse { .. } => "dehydrate.in_use",
			SyncError::Io(_) | SyncError::Persistence { .. } | SyncError::Internal { .. } => {
				"internal"
			}
		}
	}

	/// Advisory HTTP status for the wire mapping.
	pub fn http_status(&self) -> u16 {
		match self {
			SyncError::InvalidInput { .. }
			| SyncError::MissingField { .. }
			| SyncError::PathEscape { .. }
			| SyncError::FileTooLarge { .. } => 400,
			SyncError::AuthMissing
			| SyncError::AuthInvalid { .. }
			| SyncError::TokenInvalidFormat
			| SyncError::TokenInvalid
			| SyncError::TokenExpired => 401,
			SyncError::DeviceRevoked | SyncError::DeviceUnauthorized => 403,
			SyncError::DeviceNotFound { .. }
			| SyncError::ShareNotFound { .. }
			| SyncError::ShareNotAccessible { .. }
			| SyncError::FileNotFound { .. }
			| SyncError::OperationNotFound { .. }
			| SyncError::ConflictNotFound { .. } => 404,
			SyncError::InvalidTransition { .. }
			| SyncError::ConflictAlreadyResolved { .. }
			| SyncError::DehydrateInUse { .. } => 409,
			SyncError::DeviceLimit { .. } | SyncError::HydrationQueueFull => 429,
			SyncError::HydrationFailed { .. }
			| SyncError::Io(_)
			| SyncError::Persistence { .. }
			| SyncError::Internal { .. } => 500,
		}
	}

	/// Seconds the client should wait before retrying, where that is meaningful.
	pub fn retry_after(&self) -> Option<u64> {
		match self {
			SyncError::HydrationQueueFull => Some(5),
			_ => None,
		}
	}

	/// Handler-facing wire form. Internal variants never leak their detail.
	pub fn to_wire(&self) -> WireError {
		let message = match self {
			SyncError::Io(_) | SyncError::Persistence { .. } | SyncError::Internal { .. } => {
				String::from("internal error")
			}
			other => other.to_string(),
		};
		WireError { kind: self.kind().to_string(), message, retry_after: self.retry_after() }
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::InvalidInput { message } => write!(f, "invalid input: {}", message),
			SyncError::MissingField { field } => write!(f, "missing required field: {}", field),
			SyncError::AuthMissing => write!(f, "no credentials presented"),
			SyncError::AuthInvalid { message } => write!(f, "invalid credentials: {}", message),
			SyncError::TokenInvalidFormat => write!(f, "token has an invalid format"),
			SyncError::TokenInvalid => write!(f, "token is not valid"),
			SyncError::TokenExpired => write!(f, "token has expired"),
			SyncError::DeviceRevoked => write!(f, "device has been revoked"),
			SyncError::DeviceNotFound { device_id } => {
				write!(f, "device not found: {}", device_id)
			}
			SyncError::DeviceLimit { limit } => {
				write!(f, "device limit reached ({} per user)", limit)
			}
			SyncError::DeviceUnauthorized => write!(f, "device belongs to another user"),
			SyncError::ShareNotFound { share_id } => write!(f, "share not found: {}", share_id),
			SyncError::ShareNotAccessible { path } => {
				write!(f, "share root not accessible: {}", path)
			}
			SyncError::PathEscape { path } => {
				write!(f, "path escapes the share root: {}", path)
			}
			SyncError::FileNotFound { path } => write!(f, "file not found: {}", path),
			SyncError::FileTooLarge { path, size, limit } => {
				write!(f, "file {} is {} bytes, above the {} byte limit", path, size, limit)
			}
			SyncError::OperationNotFound { id } => write!(f, "operation not found: {}", id),
			SyncError::InvalidTransition { from, to } => {
				write!(f, "invalid operation transition: {} -> {}", from, to)
			}
			SyncError::ConflictNotFound { id } => write!(f, "conflict not found: {}", id),
			SyncError::ConflictAlreadyResolved { id } => {
				write!(f, "conflict already resolved: {}", id)
			}
			SyncError::HydrationFailed { path, message } => {
				write!(f, "hydration of {} failed: {}", path, message)
			}
			SyncError::HydrationQueueFull => write!(f, "hydration queue is full"),
			SyncError::DehydrateInUse { path } => {
				write!(f, "cannot dehydrate {}: file is in use", path)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Persistence { path, source } => {
				write!(f, "persistence failure for {}: {}", path, source)
			}
			SyncError::Internal { message } => write!(f, "internal error: {}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Io(e) => Some(e),
			SyncError::Persistence { source, .. } => Some(source.as_ref()),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

/// Shape of an error as handlers return it on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
	pub kind: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}


// vim: ts=4
