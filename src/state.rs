//! Per-device sync state and configuration
//!
//! Tracks what each (device, share) pair has acknowledged: the last
//! cursor, the last sync time, an optional file-state snapshot and
//! transfer totals. Reads hit an in-memory cache backed by one file per
//! key; writes go through the atomic snapshot store under a per-file lock.

use crate::error::Result;
use crate::store;
use crate::util;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Acknowledged sync position of one device on one share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
	pub device_id: String,
	pub share_id: String,

	/// Last cursor the client finished applying; opaque
	pub cursor: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_sync: Option<DateTime<Utc>>,

	/// Optional client-reported file state (path -> content hash)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_state: Option<BTreeMap<String, String>>,

	pub bytes_uploaded: u64,
	pub bytes_downloaded: u64,
}

impl SyncState {
	fn fresh(device_id: &str, share_id: &str) -> Self {
		SyncState {
			device_id: device_id.to_string(),
			share_id: share_id.to_string(),
			cursor: String::new(),
			last_sync: None,
			file_state: None,
			bytes_uploaded: 0,
			bytes_downloaded: 0,
		}
	}
}

/// Per-device sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceSyncConfig {
	pub device_id: String,

	/// Shares this device actively syncs
	pub active_shares: Vec<String>,

	/// Upload ceiling in KiB/s; unlimited when absent
	pub upload_limit_kbps: Option<u64>,

	/// Download ceiling in KiB/s; unlimited when absent
	pub download_limit_kbps: Option<u64>,

	/// Keep syncing on metered networks
	pub sync_on_metered: bool,

	/// All sync activity paused for this device
	pub paused: bool,
}

impl Default for DeviceSyncConfig {
	fn default() -> Self {
		DeviceSyncConfig {
			device_id: String::new(),
			active_shares: vec![],
			upload_limit_kbps: None,
			download_limit_kbps: None,
			sync_on_metered: false,
			paused: false,
		}
	}
}

/// Store for per-(device, share) cursors and per-device configs.
pub struct SyncStateStore {
	states: RwLock<HashMap<(String, String), SyncState>>,
	configs: RwLock<BTreeMap<String, DeviceSyncConfig>>,
	state_dir: PathBuf,
	configs_path: PathBuf,
}

impl SyncStateStore {
	pub fn new(data_root: &Path) -> Self {
		SyncStateStore {
			states: RwLock::new(HashMap::new()),
			configs: RwLock::new(BTreeMap::new()),
			state_dir: data_root.join("state"),
			configs_path: data_root.join("configs.json"),
		}
	}

	/// Load persisted device configs. States load lazily per key.
	pub async fn load(&self) -> Result<()> {
		if let Some(configs) = store::load_json(&self.configs_path).await? {
			*self.configs.write().await = configs;
		}
		Ok(())
	}

	/// Sync state for a (device, share) pair; a fresh state when none was
	/// ever recorded.
	pub async fn get_state(&self, device_id: &str, share_id: &str) -> Result<SyncState> {
		let key = (device_id.to_string(), share_id.to_string());
		if let Some(state) = self.states.read().await.get(&key) {
			return Ok(state.clone());
		}

		// Cache miss: read through from the per-key file
		let path = self.state_path(device_id, share_id);
		let state: SyncState = store::load_json(&path)
			.await?
			.unwrap_or_else(|| SyncState::fresh(device_id, share_id));
		self.states.write().await.insert(key, state.clone());
		Ok(state)
	}

	/// Record the cursor a device finished applying for a share.
	pub async fn set_cursor(
		&self,
		device_id: &str,
		share_id: &str,
		cursor: &str,
		file_state: Option<BTreeMap<String, String>>,
	) -> Result<SyncState> {
		let mut state = self.get_state(device_id, share_id).await?;
		state.cursor = cursor.to_string();
		state.last_sync = Some(util::now());
		if file_state.is_some() {
			state.file_state = file_state;
		}
		self.commit(state.clone()).await?;
		Ok(state)
	}

	/// Accumulate transfer totals for a (device, share) pair.
	pub async fn record_transfer(
		&self,
		device_id: &str,
		share_id: &str,
		bytes_uploaded: u64,
		bytes_downloaded: u64,
	) -> Result<SyncState> {
		let mut state = self.get_state(device_id, share_id).await?;
		state.bytes_uploaded += bytes_uploaded;
		state.bytes_downloaded += bytes_downloaded;
		self.commit(state.clone()).await?;
		Ok(state)
	}

	/// Forget a device's position on a share; the next change query starts
	/// from the empty cursor.
	pub async fn reset_state(&self, device_id: &str, share_id: &str) -> Result<()> {
		let key = (device_id.to_string(), share_id.to_string());
		self.states.write().await.remove(&key);

		let path = self.state_path(device_id, share_id);
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Sync configuration for a device; defaults when never configured.
	pub async fn get_config(&self, device_id: &str) -> DeviceSyncConfig {
		self.configs.read().await.get(device_id).cloned().unwrap_or_else(|| DeviceSyncConfig {
			device_id: device_id.to_string(),
			..Default::default()
		})
	}

	/// Persist a device's sync configuration.
	pub async fn set_config(&self, config: DeviceSyncConfig) -> Result<()> {
		let mut configs = self.configs.write().await;
		let mut next = configs.clone();
		next.insert(config.device_id.clone(), config);
		store::with_lock(&self.configs_path, || async {
			store::save_json(&self.configs_path, &next, store::MODE_STATE).await
		})
		.await?;
		*configs = next;
		Ok(())
	}

	async fn commit(&self, state: SyncState) -> Result<()> {
		let path = self.state_path(&state.device_id, &state.share_id);
		store::with_lock(&path, || async {
			store::save_json(&path, &state, store::MODE_STATE).await
		})
		.await?;
		let key = (state.device_id.clone(), state.share_id.clone());
		self.states.write().await.insert(key, state);
		Ok(())
	}

	fn state_path(&self, device_id: &str, share_id: &str) -> PathBuf {
		self.state_dir.join(format!(
			"{}_{}.json",
			util::safe_file_component(device_id),
			util::safe_file_component(share_id)
		))
	}
}


// vim: ts=4
