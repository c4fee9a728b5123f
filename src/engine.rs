//! Engine wiring
//!
//! One [`Engine`] value owns every component and is passed explicitly to
//! handlers; there is no module-level mutable state. `start()` launches
//! the background tasks (sweeps, hydration workers, the policy loop) and
//! `shutdown()` stops them through a watch signal.

use crate::changes::{ChangeFeed, ChangeTracker, FileMetadata, ShareStats};
use crate::config::{EngineConfig, REVOKED_RETENTION_DAYS, TERMINAL_RETENTION_HOURS};
use crate::delta::{self, TransferPlan};
use crate::device::DeviceManager;
use crate::error::{Result, SyncError};
use crate::exclusion::ExclusionSet;
use crate::hasher::{self, BlockHashResponse};
use crate::logging::*;
use crate::queue::OperationQueue;
use crate::smartsync::SmartSyncManager;
use crate::state::SyncStateStore;
use crate::store;
use crate::util;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// The sync engine: change tracking, delta transfer, devices, the
/// operation queue, sync state and smart sync behind one instance.
pub struct Engine {
	config: EngineConfig,
	tracker: ChangeTracker,
	devices: DeviceManager,
	queue: Arc<OperationQueue>,
	states: SyncStateStore,
	smartsync: Arc<SmartSyncManager>,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
	/// Build the engine and load every persisted snapshot.
	///
	/// Fails fast on corrupt state rather than silently starting empty.
	pub async fn new(config: EngineConfig) -> Result<Engine> {
		store::ensure_dir(&config.data_root).await?;

		let exclusions = ExclusionSet::new(
			&config.exclude_patterns,
			&config.dotfile_allow_list,
			config.sync_dotfiles,
		)?;
		let tracker = ChangeTracker::new(exclusions, config.max_file_size);

		let devices = DeviceManager::new(
			&config.data_root,
			config.access_token_ttl_days,
			config.refresh_token_ttl_days,
			config.device_limit,
			config.token_cache_ttl_secs,
		);
		devices.load().await?;

		let queue = Arc::new(OperationQueue::new(&config.data_root));
		queue.load().await?;

		let states = SyncStateStore::new(&config.data_root);
		states.load().await?;

		let smartsync = Arc::new(SmartSyncManager::new(
			&config.data_root,
			config.shares.clone(),
			config.default_block_size,
			config.hydration_queue_limit,
		));
		smartsync.load().await?;

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Ok(Engine {
			config,
			tracker,
			devices,
			queue,
			states,
			smartsync,
			shutdown_tx,
			shutdown_rx,
			tasks: Mutex::new(Vec::new()),
		})
	}

	/// Launch the background tasks. Call once after `new`.
	pub async fn start(&self) {
		let mut tasks = self.tasks.lock().await;
		if !tasks.is_empty() {
			return;
		}

		for worker in 0..self.config.hydration_workers.max(1) {
			let smartsync = self.smartsync.clone();
			let shutdown = self.shutdown_rx.clone();
			tasks.push(tokio::spawn(async move {
				debug!("hydration worker {} up", worker);
				smartsync.run_hydration_worker(shutdown).await;
			}));
		}

		{
			let smartsync = self.smartsync.clone();
			let policy = self.config.dehydration.clone();
			tasks.push(spawn_periodic(
				"dehydration-policy",
				self.config.policy_interval_secs,
				self.shutdown_rx.clone(),
				move || {
					let smartsync = smartsync.clone();
					let policy = policy.clone();
					async move {
						if let Err(e) = smartsync.run_policy_pass(&policy).await {
							error!("dehydration policy pass failed: {}", e);
						}
					}
				},
			));
		}

		{
			let smartsync = self.smartsync.clone();
			tasks.push(spawn_periodic(
				"placeholder-snapshot",
				self.config.snapshot_interval_secs,
				self.shutdown_rx.clone(),
				move || {
					let smartsync = smartsync.clone();
					async move {
						if let Err(e) = smartsync.snapshot().await {
							error!("placeholder snapshot failed: {}", e);
						}
					}
				},
			));
		}

		{
			let queue = self.queue.clone();
			tasks.push(spawn_periodic(
				"queue-sweep",
				self.config.queue_sweep_interval_secs,
				self.shutdown_rx.clone(),
				move || {
					let queue = queue.clone();
					async move {
						if let Err(e) =
							queue.sweep_terminal(chrono::Duration::hours(TERMINAL_RETENTION_HOURS)).await
						{
							error!("queue sweep failed: {}", e);
						}
					}
				},
			));
		}

		{
			let devices = self.devices.clone();
			tasks.push(spawn_periodic(
				"device-purge",
				self.config.device_purge_interval_secs,
				self.shutdown_rx.clone(),
				move || {
					let devices = devices.clone();
					async move {
						if let Err(e) =
							devices.purge_expired(chrono::Duration::days(REVOKED_RETENTION_DAYS)).await
						{
							error!("device purge failed: {}", e);
						}
					}
				},
			));
		}

		{
			let devices = self.devices.clone();
			tasks.push(spawn_periodic(
				"token-cache-cleanup",
				self.config.cache_cleanup_interval_secs,
				self.shutdown_rx.clone(),
				move || {
					let devices = devices.clone();
					async move {
						let dropped = devices.cleanup_cache();
						if dropped > 0 {
							trace!("dropped {} stale token cache entries", dropped);
						}
					}
				},
			));
		}

		info!("engine started with {} background tasks", tasks.len());
	}

	/// Signal shutdown and wait for every background task.
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
		let mut tasks = self.tasks.lock().await;
		for task in tasks.drain(..) {
			if let Err(e) = task.await {
				warn!("background task ended abnormally: {}", e);
			}
		}
		// A final snapshot so placeholders survive the restart
		if let Err(e) = self.smartsync.snapshot().await {
			warn!("final placeholder snapshot failed: {}", e);
		}
		info!("engine stopped");
	}

	/// Filesystem root of a share.
	pub fn share_root(&self, share_id: &str) -> Result<&PathBuf> {
		self.config
			.shares
			.get(share_id)
			.ok_or_else(|| SyncError::ShareNotFound { share_id: share_id.to_string() })
	}

	/// Change feed for a share between a client cursor and now.
	pub fn get_changes(&self, share_id: &str, cursor: &str, limit: usize) -> Result<ChangeFeed> {
		let root = self.share_root(share_id)?;
		self.tracker.get_changes(root, cursor, limit)
	}

	/// Metadata of a single share entry.
	pub fn get_file_metadata(&self, share_id: &str, rel_path: &str) -> Result<FileMetadata> {
		let root = self.share_root(share_id)?;
		self.tracker.get_file_metadata(root, rel_path)
	}

	/// File count and total size of a share.
	pub fn share_stats(&self, share_id: &str) -> Result<ShareStats> {
		let root = self.share_root(share_id)?;
		self.tracker.share_stats(root)
	}

	/// Block hashes for one share file, for delta planning.
	pub fn compute_block_hashes(
		&self,
		share_id: &str,
		rel_path: &str,
		block_size: usize,
	) -> Result<BlockHashResponse> {
		let root = self.share_root(share_id)?;
		let cleaned = util::clean_rel_path(rel_path)?;
		let full = root.join(&cleaned);

		let size = std::fs::metadata(&full)
			.map_err(|e| match e.kind() {
				std::io::ErrorKind::NotFound => {
					SyncError::FileNotFound { path: rel_path.to_string() }
				}
				_ => SyncError::Io(e),
			})?
			.len();
		if size > self.config.max_file_size {
			return Err(SyncError::FileTooLarge {
				path: rel_path.to_string(),
				size,
				limit: self.config.max_file_size,
			});
		}

		hasher::compute_block_hashes(&full, &util::path_to_posix(&cleaned), block_size)
	}

	/// Minimal transfer plan between a local and a remote file state.
	pub fn create_transfer_plan(
		&self,
		local: &BlockHashResponse,
		remote: &BlockHashResponse,
	) -> TransferPlan {
		delta::create_transfer_plan(local, remote)
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn tracker(&self) -> &ChangeTracker {
		&self.tracker
	}

	pub fn devices(&self) -> &DeviceManager {
		&self.devices
	}

	pub fn queue(&self) -> &OperationQueue {
		&self.queue
	}

	pub fn sync_states(&self) -> &SyncStateStore {
		&self.states
	}

	pub fn smart_sync(&self) -> &SmartSyncManager {
		&self.smartsync
	}
}

fn spawn_periodic<F, Fut>(
	name: &'static str,
	period_secs: u64,
	mut shutdown: watch::Receiver<bool>,
	job: F,
) -> JoinHandle<()>
where
	F: Fn() -> Fut + Send + 'static,
	Fut: Future<Output = ()> + Send,
{
	tokio::spawn(async move {
		let period = std::time::Duration::from_secs(period_secs.max(1));
		let mut ticker = tokio::time::interval(period);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		// The first tick fires immediately; swallow it so jobs run one
		// period after startup
		ticker.tick().await;
		loop {
			tokio::select! {
				_ = ticker.tick() => job().await,
				result = shutdown.changed() => {
					if result.is_err() || *shutdown.borrow() {
						break;
					}
				}
			}
		}
		debug!("{} task stopped", name);
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::changes::ChangeType;
	use std::io::Write as _;
	use tempfile::TempDir;

	async fn engine_with_share() -> (TempDir, TempDir, Engine) {
		let data = TempDir::new().unwrap();
		let share = TempDir::new().unwrap();
		let config = EngineConfig::with_data_root(data.path()).add_share("docs", share.path());
		let engine = Engine::new(config).await.unwrap();
		(data, share, engine)
	}

	fn write_file(root: &std::path::Path, rel: &str, content: &[u8]) {
		let path = root.join(rel);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).unwrap();
		}
		let mut f = std::fs::File::create(&path).unwrap();
		f.write_all(content).unwrap();
	}

	#[tokio::test]
	async fn test_unknown_share() {
		let (_data, _share, engine) = engine_with_share().await;
		assert!(matches!(
			engine.get_changes("nope", "", 100),
			Err(SyncError::ShareNotFound { .. })
		));
	}

	#[tokio::test]
	async fn test_change_feed_through_engine() {
		let (_data, share, engine) = engine_with_share().await;
		write_file(share.path(), "a.txt", b"A");

		let feed = engine.get_changes("docs", "", 100).unwrap();
		assert_eq!(feed.changes.len(), 1);
		assert_eq!(feed.changes[0].change_type, ChangeType::Create);
	}

	#[tokio::test]
	async fn test_block_hashes_respect_size_cap() {
		let (_data, share, engine) = {
			let data = TempDir::new().unwrap();
			let share = TempDir::new().unwrap();
			let mut config =
				EngineConfig::with_data_root(data.path()).add_share("docs", share.path());
			config.max_file_size = 4;
			(data, share, Engine::new(config).await.unwrap())
		};

		write_file(share.path(), "small.bin", b"ok");
		write_file(share.path(), "big.bin", b"too large");

		assert!(engine.compute_block_hashes("docs", "small.bin", 0).is_ok());
		assert!(matches!(
			engine.compute_block_hashes("docs", "big.bin", 0),
			Err(SyncError::FileTooLarge { .. })
		));
		assert!(matches!(
			engine.compute_block_hashes("docs", "../escape", 0),
			Err(SyncError::PathEscape { .. })
		));
	}

	#[tokio::test]
	async fn test_start_and_shutdown() {
		let (_data, _share, engine) = engine_with_share().await;
		engine.start().await;
		// start() is idempotent
		engine.start().await;
		engine.shutdown().await;
	}
}

// vim: ts=4
