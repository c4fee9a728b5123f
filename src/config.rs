//! Unified engine configuration
//!
//! Every tunable the engine consumes lives on [`EngineConfig`]; components
//! receive the knobs they need at construction time and there is no global
//! mutable state beyond the `Engine` instance itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Files above this size are excluded from the change feed (50 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Access tokens live 90 days by default.
pub const DEFAULT_ACCESS_TOKEN_TTL_DAYS: i64 = 90;

/// Refresh tokens live 365 days by default.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 365;

/// Default per-user device cap.
pub const DEFAULT_DEVICE_LIMIT: usize = 20;

/// Revoked devices are retained this long for audit before purge.
pub const REVOKED_RETENTION_DAYS: i64 = 30;

/// Terminal queue operations are retained this long before the sweeper
/// removes them.
pub const TERMINAL_RETENTION_HOURS: i64 = 24;

/// Unified configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
	// ========================================================================
	// DATA ROOT & SHARES
	// ========================================================================
	/// Directory holding every persisted snapshot (devices.json, queue/, ...)
	pub data_root: PathBuf,

	/// Shares exposed to sync, keyed by stable share id
	pub shares: BTreeMap<String, PathBuf>,

	// ========================================================================
	// CHANGE TRACKING
	// ========================================================================
	/// Glob patterns excluded from every walk (on top of the built-ins)
	pub exclude_patterns: Vec<String>,

	/// Include dotfiles in the change feed (excluded by default)
	pub sync_dotfiles: bool,

	/// Dotfile patterns re-included even when `sync_dotfiles` is off
	pub dotfile_allow_list: Vec<String>,

	/// Files above this byte size never enter the change feed
	pub max_file_size: u64,

	// ========================================================================
	// DELTA TRANSFER
	// ========================================================================
	/// Default block size for block-hash computation (clamped to 64KiB..64MiB)
	pub default_block_size: usize,

	// ========================================================================
	// DEVICE AUTHENTICATION
	// ========================================================================
	/// Access token lifetime in days
	pub access_token_ttl_days: i64,

	/// Refresh token lifetime in days
	pub refresh_token_ttl_days: i64,

	/// Maximum live devices per user
	pub device_limit: usize,

	/// Token validation cache entry lifetime in seconds
	pub token_cache_ttl_secs: u64,

	// ========================================================================
	// SMART SYNC
	// ========================================================================
	/// Number of hydration workers
	pub hydration_workers: usize,

	/// Bound on the hydration admission queue
	pub hydration_queue_limit: usize,

	/// Dehydration policy applied by the periodic scan
	pub dehydration: DehydrationPolicy,

	// ========================================================================
	// BACKGROUND CADENCE
	// ========================================================================
	/// Seconds between dehydration policy passes
	pub policy_interval_secs: u64,

	/// Seconds between placeholder snapshot writes
	pub snapshot_interval_secs: u64,

	/// Seconds between queue terminal-operation sweeps
	pub queue_sweep_interval_secs: u64,

	/// Seconds between device expiry sweeps
	pub device_purge_interval_secs: u64,

	/// Seconds between token cache cleanups
	pub cache_cleanup_interval_secs: u64,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			data_root: PathBuf::from("/var/lib/nithronsync"),
			shares: BTreeMap::new(),
			exclude_patterns: vec![],
			sync_dotfiles: false,
			dotfile_allow_list: vec![],
			max_file_size: DEFAULT_MAX_FILE_SIZE,
			default_block_size: crate::hasher::DEFAULT_BLOCK_SIZE,
			access_token_ttl_days: DEFAULT_ACCESS_TOKEN_TTL_DAYS,
			refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
			device_limit: DEFAULT_DEVICE_LIMIT,
			token_cache_ttl_secs: 300,
			hydration_workers: 2,
			hydration_queue_limit: 64,
			dehydration: DehydrationPolicy::default(),
			policy_interval_secs: 300,
			snapshot_interval_secs: 60,
			queue_sweep_interval_secs: 3600,
			device_purge_interval_secs: 86400,
			cache_cleanup_interval_secs: 300,
		}
	}
}

impl EngineConfig {
	/// Config rooted at a specific data directory, everything else default.
	pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
		EngineConfig { data_root: data_root.into(), ..Default::default() }
	}

	/// Register a share root under a stable id.
	pub fn add_share(mut self, share_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
		self.shares.insert(share_id.into(), root.into());
		self
	}
}

/// Policy driving the periodic dehydration scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DehydrationPolicy {
	/// Master switch; a disabled policy never evicts
	pub enabled: bool,

	/// Evict oldest-accessed files once total local bytes exceed this
	pub max_local_size: Option<u64>,

	/// Evict files untouched for longer than this many seconds
	pub max_file_age_secs: Option<u64>,

	/// Evict until the filesystem has at least this much free space
	pub min_free_space: Option<u64>,

	/// Paths matching these globs are never evicted
	pub exclude_patterns: Vec<String>,

	/// Pinned files are never evicted regardless of pressure
	pub pinned_always_local: bool,
}

impl Default for DehydrationPolicy {
	fn default() -> Self {
		DehydrationPolicy {
			enabled: true,
			max_local_size: None,
			max_file_age_secs: None,
			min_free_space: None,
			exclude_patterns: vec![],
			pinned_always_local: true,
		}
	}
}


// vim: ts=4
