//! Smart-sync placeholder management
//!
//! A placeholder tracks one on-demand file: its canonical metadata plus a
//! state machine (`cloud -> hydrating -> local`, with `pinned` as the
//! sticky variant of local). States are a function of the last transition
//! event, never inferred from disk content. Hydration runs through a
//! bounded priority queue drained by a worker pool; a periodic policy scan
//! dehydrates cold files under size, age or free-space pressure.

pub mod hydration;
pub mod policy;

pub use hydration::{Admission, HydrationCallback, HydrationPriority, HydrationQueue, HydrationRequest};

use crate::delta;
use crate::error::{Result, SyncError};
use crate::hasher;
use crate::logging::*;
use crate::store;
use crate::util;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};

/// Placeholder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderState {
	/// Metadata only; content lives on the server
	Cloud,

	/// Admitted for hydration or transferring
	Hydrating,

	/// Content materialized locally
	Local,

	/// Local and sticky; never a dehydration candidate
	Pinned,
}

/// One on-demand file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
	pub share_id: String,

	/// Share-relative path, POSIX separators
	pub path: String,

	/// File name component, for listings
	pub name: String,

	pub size: u64,

	/// Hex SHA-256 of the canonical content
	pub hash: String,

	pub modified_at: DateTime<Utc>,

	pub state: PlaceholderState,

	pub is_pinned: bool,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_accessed: Option<DateTime<Utc>>,

	/// Percent complete while hydrating
	pub hydration_progress: u8,
}

impl Placeholder {
	/// Fresh cloud-state placeholder for a canonical file.
	pub fn new(
		share_id: impl Into<String>,
		path: impl Into<String>,
		size: u64,
		hash: impl Into<String>,
	) -> Self {
		let path = path.into();
		let name = path.rsplit('/').next().unwrap_or(&path).to_string();
		Placeholder {
			share_id: share_id.into(),
			path,
			name,
			size,
			hash: hash.into(),
			modified_at: util::now(),
			state: PlaceholderState::Cloud,
			is_pinned: false,
			last_accessed: None,
			hydration_progress: 0,
		}
	}
}

/// Counts and byte totals per placeholder state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartSyncStats {
	pub cloud_count: usize,
	pub cloud_bytes: u64,
	pub hydrating_count: usize,
	pub hydrating_bytes: u64,
	pub local_count: usize,
	pub local_bytes: u64,
	pub pinned_count: usize,
	pub pinned_bytes: u64,
}

/// Placeholder registry, hydration queue and dehydration policy driver.
pub struct SmartSyncManager {
	// share_id -> path -> placeholder
	placeholders: RwLock<BTreeMap<String, BTreeMap<String, Placeholder>>>,
	queue: HydrationQueue,
	snapshot_path: PathBuf,
	shares: BTreeMap<String, PathBuf>,
	local_root: PathBuf,
	block_size: usize,
}

impl SmartSyncManager {
	pub fn new(
		data_root: &Path,
		shares: BTreeMap<String, PathBuf>,
		block_size: usize,
		queue_limit: usize,
	) -> Self {
		SmartSyncManager {
			placeholders: RwLock::new(BTreeMap::new()),
			queue: HydrationQueue::new(queue_limit),
			snapshot_path: data_root.join("smartsync").join("placeholders.json"),
			shares,
			local_root: data_root.join("smartsync").join("files"),
			block_size,
		}
	}

	/// Load the persisted placeholder registry.
	///
	/// A placeholder left `hydrating` by a crash reverts to `cloud`: its
	/// admission queue did not survive the restart.
	pub async fn load(&self) -> Result<()> {
		let snapshot: Option<BTreeMap<String, BTreeMap<String, Placeholder>>> =
			store::load_json(&self.snapshot_path).await?;
		if let Some(mut registry) = snapshot {
			for share in registry.values_mut() {
				for placeholder in share.values_mut() {
					if placeholder.state == PlaceholderState::Hydrating {
						placeholder.state = PlaceholderState::Cloud;
						placeholder.hydration_progress = 0;
					}
				}
			}
			*self.placeholders.write().await = registry;
		}
		Ok(())
	}

	/// Persist the placeholder registry.
	pub async fn snapshot(&self) -> Result<()> {
		let registry = self.placeholders.read().await.clone();
		store::with_lock(&self.snapshot_path, || async {
			store::save_json(&self.snapshot_path, &registry, store::MODE_STATE).await
		})
		.await
	}

	/// Register a placeholder for a canonical file.
	///
	/// Idempotent on identical `(hash, size)`. When the canonical content
	/// changed, the metadata is refreshed and any materialized copy is
	/// dropped back to `cloud` (the local bytes are stale); the pin flag
	/// survives.
	pub async fn register_placeholder(&self, placeholder: Placeholder) -> Result<Placeholder> {
		let mut registry = self.placeholders.write().await;
		let share = registry.entry(placeholder.share_id.clone()).or_default();

		let committed = match share.get_mut(&placeholder.path) {
			Some(existing) => {
				if existing.hash == placeholder.hash && existing.size == placeholder.size {
					existing.clone()
				} else {
					existing.hash = placeholder.hash;
					existing.size = placeholder.size;
					existing.modified_at = placeholder.modified_at;
					if matches!(
						existing.state,
						PlaceholderState::Local | PlaceholderState::Pinned
					) {
						let stale = self.local_path(&existing.share_id, &existing.path);
						let _ = std::fs::remove_file(stale);
						existing.state = PlaceholderState::Cloud;
						existing.hydration_progress = 0;
					}
					existing.clone()
				}
			}
			None => {
				share.insert(placeholder.path.clone(), placeholder.clone());
				placeholder
			}
		};
		drop(registry);

		self.snapshot().await?;
		Ok(committed)
	}

	/// Admit a placeholder to the hydration queue.
	///
	/// Already-local (or pinned) files are a no-op; an already-hydrating
	/// file can only have its priority raised. Admission to a full queue
	/// fails with `hydration.queue_full`.
	pub async fn request_hydration(
		&self,
		share_id: &str,
		path: &str,
		priority: HydrationPriority,
		callback: Option<HydrationCallback>,
	) -> Result<()> {
		let state = self.get(share_id, path).await?.state;
		match state {
			PlaceholderState::Local | PlaceholderState::Pinned => Ok(()),
			PlaceholderState::Hydrating => {
				// Queued: maybe upgrade. Already transferring: the rank is
				// moot, the file is on its way.
				self.queue.upgrade_if_queued(share_id, path, priority.rank(), callback);
				Ok(())
			}
			PlaceholderState::Cloud => {
				self.queue.push(share_id, path, priority.rank(), callback)?;
				self.set_state(share_id, path, PlaceholderState::Hydrating, 0).await?;
				Ok(())
			}
		}
	}

	/// Withdraw a hydration request that has not started transferring.
	pub async fn cancel_hydration(&self, share_id: &str, path: &str) -> Result<()> {
		let placeholder = self.get(share_id, path).await?;
		if placeholder.state != PlaceholderState::Hydrating {
			return Err(SyncError::InvalidInput {
				message: format!("{} is not hydrating", path),
			});
		}
		if self.queue.remove(share_id, path).is_none() {
			return Err(SyncError::HydrationFailed {
				path: path.to_string(),
				message: "transfer already started".to_string(),
			});
		}
		self.set_state(share_id, path, PlaceholderState::Cloud, 0).await
	}

	/// Evict the local bytes of a hydrated, unpinned, idle file.
	pub async fn dehydrate(&self, share_id: &str, path: &str) -> Result<()> {
		let placeholder = self.get(share_id, path).await?;
		if placeholder.is_pinned || placeholder.state == PlaceholderState::Pinned {
			return Err(SyncError::InvalidInput {
				message: format!("{} is pinned and stays local", path),
			});
		}
		match placeholder.state {
			PlaceholderState::Cloud => Ok(()),
			PlaceholderState::Hydrating => {
				Err(SyncError::DehydrateInUse { path: path.to_string() })
			}
			PlaceholderState::Local => {
				let local = self.local_path(share_id, path);
				match std::fs::remove_file(&local) {
					Ok(()) => {}
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
					Err(e) => return Err(e.into()),
				}
				self.set_state(share_id, path, PlaceholderState::Cloud, 0).await?;
				debug!("dehydrated {}/{}", share_id, path);
				Ok(())
			}
			PlaceholderState::Pinned => unreachable!("pinned handled above"),
		}
	}

	/// Set the sticky flag. Pinning a cloud file enqueues a
	/// critical-priority hydration.
	pub async fn pin(&self, share_id: &str, path: &str) -> Result<()> {
		let state = {
			let mut registry = self.placeholders.write().await;
			let placeholder = registry
				.get_mut(share_id)
				.and_then(|share| share.get_mut(path))
				.ok_or_else(|| SyncError::FileNotFound { path: path.to_string() })?;
			placeholder.is_pinned = true;
			if placeholder.state == PlaceholderState::Local {
				placeholder.state = PlaceholderState::Pinned;
			}
			placeholder.state
		};
		self.snapshot().await?;

		if state == PlaceholderState::Cloud {
			self.request_hydration(share_id, path, HydrationPriority::Critical, None).await?;
		}
		Ok(())
	}

	/// Clear the sticky flag; a pinned file becomes plain local.
	pub async fn unpin(&self, share_id: &str, path: &str) -> Result<()> {
		{
			let mut registry = self.placeholders.write().await;
			let placeholder = registry
				.get_mut(share_id)
				.and_then(|share| share.get_mut(path))
				.ok_or_else(|| SyncError::FileNotFound { path: path.to_string() })?;
			placeholder.is_pinned = false;
			if placeholder.state == PlaceholderState::Pinned {
				placeholder.state = PlaceholderState::Local;
			}
		}
		self.snapshot().await
	}

	/// Record an access to a hydrated file, for the dehydration policy.
	pub async fn mark_accessed(&self, share_id: &str, path: &str) -> Result<()> {
		{
			let mut registry = self.placeholders.write().await;
			let placeholder = registry
				.get_mut(share_id)
				.and_then(|share| share.get_mut(path))
				.ok_or_else(|| SyncError::FileNotFound { path: path.to_string() })?;
			placeholder.last_accessed = Some(util::now());
		}
		self.snapshot().await
	}

	/// Fetch one placeholder.
	pub async fn get(&self, share_id: &str, path: &str) -> Result<Placeholder> {
		self.placeholders
			.read()
			.await
			.get(share_id)
			.and_then(|share| share.get(path))
			.cloned()
			.ok_or_else(|| SyncError::FileNotFound { path: path.to_string() })
	}

	/// Current lifecycle state of one placeholder.
	pub async fn get_state(&self, share_id: &str, path: &str) -> Result<PlaceholderState> {
		Ok(self.get(share_id, path).await?.state)
	}

	/// Every placeholder of a share.
	pub async fn list_placeholders(&self, share_id: &str) -> Vec<Placeholder> {
		self.placeholders
			.read()
			.await
			.get(share_id)
			.map(|share| share.values().cloned().collect())
			.unwrap_or_default()
	}

	/// All placeholders whose content is cloud-only.
	pub async fn get_cloud_only(&self) -> Vec<Placeholder> {
		self.filter_state(PlaceholderState::Cloud).await
	}

	/// All placeholders materialized locally (excluding pinned).
	pub async fn get_local(&self) -> Vec<Placeholder> {
		self.filter_state(PlaceholderState::Local).await
	}

	/// All pinned placeholders.
	pub async fn get_pinned(&self) -> Vec<Placeholder> {
		self.filter_state(PlaceholderState::Pinned).await
	}

	/// Counts and sizes per state.
	pub async fn stats(&self) -> SmartSyncStats {
		let registry = self.placeholders.read().await;
		let mut stats = SmartSyncStats::default();
		for share in registry.values() {
			for placeholder in share.values() {
				match placeholder.state {
					PlaceholderState::Cloud => {
						stats.cloud_count += 1;
						stats.cloud_bytes += placeholder.size;
					}
					PlaceholderState::Hydrating => {
						stats.hydrating_count += 1;
						stats.hydrating_bytes += placeholder.size;
					}
					PlaceholderState::Local => {
						stats.local_count += 1;
						stats.local_bytes += placeholder.size;
					}
					PlaceholderState::Pinned => {
						stats.pinned_count += 1;
						stats.pinned_bytes += placeholder.size;
					}
				}
			}
		}
		stats
	}

	/// Requests waiting for a hydration worker.
	pub fn queued_hydrations(&self) -> usize {
		self.queue.len()
	}

	/// Worker loop: drain the queue until shutdown.
	///
	/// Each request computes a transfer plan against the canonical file,
	/// streams the needed blocks, verifies the full hash and lands the
	/// placeholder in `local` (or `pinned`). A failed or interrupted
	/// hydration reverts to `cloud`.
	pub async fn run_hydration_worker(&self, mut shutdown: watch::Receiver<bool>) {
		while let Some((request, callbacks)) = self.queue.pop_wait(&mut shutdown).await {
			let outcome = self.hydrate_one(&request).await;
			let hydrated = match outcome {
				Ok(()) => true,
				Err(e) => {
					warn!("hydration of {}/{} failed: {}", request.share_id, request.path, e);
					let reverted = self
						.set_state(&request.share_id, &request.path, PlaceholderState::Cloud, 0)
						.await;
					if let Err(e) = reverted {
						error!("could not revert {} to cloud: {}", request.path, e);
					}
					false
				}
			};
			for callback in &callbacks {
				callback(&request.share_id, &request.path, hydrated);
			}
		}
		debug!("hydration worker stopped");
	}

	/// Materialize one placeholder from its canonical content.
	async fn hydrate_one(&self, request: &HydrationRequest) -> Result<()> {
		let placeholder = self.get(&request.share_id, &request.path).await?;
		let canonical = self.canonical_path(&request.share_id, &request.path)?;
		let local = self.local_path(&request.share_id, &request.path);
		if let Some(parent) = local.parent() {
			store::ensure_dir(parent).await?;
		}

		let target = hasher::compute_block_hashes(&canonical, &request.path, self.block_size)?;

		// Blocks already present in a partial local copy are reused; the
		// rest stream from the canonical file.
		let have = if local.exists() {
			Some(hasher::compute_block_hashes(&local, &request.path, self.block_size)?)
		} else {
			None
		};
		let plan = have.as_ref().map(|have| delta::create_transfer_plan(&target, have));
		let to_fetch: Option<std::collections::HashSet<u32>> = plan
			.as_ref()
			.map(|p| p.blocks_to_send.iter().map(|b| b.index).collect());
		if let Some(plan) = &plan {
			debug!(
				"hydrating {}/{}: {} of {} bytes reused ({:.1}% savings)",
				request.share_id,
				request.path,
				plan.file_size - plan.bytes_to_transfer,
				plan.file_size,
				plan.savings_percent
			);
		}
		let local_by_strong: HashMap<String, u64> = have
			.as_ref()
			.map(|have| {
				have.blocks
					.iter()
					.map(|b| (b.strong_hash.clone(), b.offset))
					.collect()
			})
			.unwrap_or_default();

		let part = part_path(&local);
		let total = target.blocks.len();
		// An empty canonical file still materializes
		std::fs::File::create(&part)?;

		for (done, block) in target.blocks.iter().enumerate() {
			let fetch = to_fetch.as_ref().map(|set| set.contains(&block.index)).unwrap_or(true);
			let data = if fetch {
				delta::read_block(&canonical, block.offset, block.size as usize)?
			} else {
				match local_by_strong.get(&block.strong_hash) {
					Some(&offset) => delta::read_block(&local, offset, block.size as usize)?,
					None => delta::read_block(&canonical, block.offset, block.size as usize)?,
				}
			};
			delta::write_block(&part, block.offset, &data)?;
			let progress = (((done + 1) * 100) / total.max(1)) as u8;
			self.set_progress(&request.share_id, &request.path, progress).await;
		}

		// The reconstructed content must hash to the canonical full hash
		let materialized = hasher::file_sha256(&part)?;
		if materialized != target.full_hash {
			let _ = std::fs::remove_file(&part);
			return Err(SyncError::HydrationFailed {
				path: request.path.clone(),
				message: "content hash mismatch after reconstruction".to_string(),
			});
		}
		std::fs::rename(&part, &local)?;

		let final_state = if placeholder.is_pinned {
			PlaceholderState::Pinned
		} else {
			PlaceholderState::Local
		};
		{
			let mut registry = self.placeholders.write().await;
			if let Some(entry) =
				registry.get_mut(&request.share_id).and_then(|share| share.get_mut(&request.path))
			{
				entry.state = final_state;
				entry.hydration_progress = 100;
				entry.size = target.file_size;
				entry.hash = target.full_hash.clone();
				entry.last_accessed = Some(util::now());
			}
		}
		self.snapshot().await?;
		info!("hydrated {}/{} ({} bytes)", request.share_id, request.path, target.file_size);
		Ok(())
	}

	/// Local cache path of a placeholder's materialized content.
	pub fn local_path(&self, share_id: &str, path: &str) -> PathBuf {
		let mut full = self.local_root.join(util::safe_file_component(share_id));
		for part in path.split('/') {
			full.push(part);
		}
		full
	}

	fn canonical_path(&self, share_id: &str, path: &str) -> Result<PathBuf> {
		let root = self
			.shares
			.get(share_id)
			.ok_or_else(|| SyncError::ShareNotFound { share_id: share_id.to_string() })?;
		Ok(root.join(util::clean_rel_path(path)?))
	}

	async fn filter_state(&self, state: PlaceholderState) -> Vec<Placeholder> {
		self.placeholders
			.read()
			.await
			.values()
			.flat_map(|share| share.values())
			.filter(|p| p.state == state)
			.cloned()
			.collect()
	}

	async fn set_state(
		&self,
		share_id: &str,
		path: &str,
		state: PlaceholderState,
		progress: u8,
	) -> Result<()> {
		{
			let mut registry = self.placeholders.write().await;
			let placeholder = registry
				.get_mut(share_id)
				.and_then(|share| share.get_mut(path))
				.ok_or_else(|| SyncError::FileNotFound { path: path.to_string() })?;
			placeholder.state = state;
			placeholder.hydration_progress = progress;
		}
		self.snapshot().await
	}

	async fn set_progress(&self, share_id: &str, path: &str, progress: u8) {
		let mut registry = self.placeholders.write().await;
		if let Some(placeholder) =
			registry.get_mut(share_id).and_then(|share| share.get_mut(path))
		{
			placeholder.hydration_progress = progress;
		}
	}
}

fn part_path(local: &Path) -> PathBuf {
	let name = local.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	local.with_file_name(format!("{}.nsync-part", name))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write as _;
	use tempfile::TempDir;

	struct Fixture {
		_data: TempDir,
		_share: TempDir,
		manager: SmartSyncManager,
		share_root: PathBuf,
	}

	fn fixture() -> Fixture {
		let data = TempDir::new().unwrap();
		let share = TempDir::new().unwrap();
		let share_root = share.path().to_path_buf();
		let mut shares = BTreeMap::new();
		shares.insert("docs".to_string(), share_root.clone());
		let manager = SmartSyncManager::new(data.path(), shares, crate::hasher::MIN_BLOCK_SIZE, 16);
		Fixture { _data: data, _share: share, manager, share_root }
	}

	fn write_canonical(fx: &Fixture, rel: &str, content: &[u8]) -> Placeholder {
		let path = fx.share_root.join(rel);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).unwrap();
		}
		let mut f = std::fs::File::create(&path).unwrap();
		f.write_all(content).unwrap();
		Placeholder::new("docs", rel, content.len() as u64, hasher::sha256_hex(content))
	}

	#[tokio::test]
	async fn test_register_is_idempotent_on_same_content() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "report.txt", b"hello");

		fx.manager.register_placeholder(placeholder.clone()).await.unwrap();
		fx.manager.register_placeholder(placeholder.clone()).await.unwrap();

		assert_eq!(fx.manager.list_placeholders("docs").await.len(), 1);
		let state = fx.manager.get_state("docs", "report.txt").await.unwrap();
		assert_eq!(state, PlaceholderState::Cloud);
	}

	#[tokio::test]
	async fn test_hydration_materializes_and_verifies() {
		let fx = fixture();
		let content = vec![0x42u8; crate::hasher::MIN_BLOCK_SIZE + 100];
		let placeholder = write_canonical(&fx, "big.bin", &content);
		fx.manager.register_placeholder(placeholder).await.unwrap();

		fx.manager
			.request_hydration("docs", "big.bin", HydrationPriority::Normal, None)
			.await
			.unwrap();
		assert_eq!(
			fx.manager.get_state("docs", "big.bin").await.unwrap(),
			PlaceholderState::Hydrating
		);

		let (request, _) = fx.manager.queue.try_pop().unwrap();
		fx.manager.hydrate_one(&request).await.unwrap();

		let placeholder = fx.manager.get("docs", "big.bin").await.unwrap();
		assert_eq!(placeholder.state, PlaceholderState::Local);
		assert_eq!(placeholder.hydration_progress, 100);

		let local = fx.manager.local_path("docs", "big.bin");
		assert_eq!(std::fs::read(&local).unwrap(), content);
	}

	#[tokio::test]
	async fn test_hydrate_local_is_noop() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Normal, None)
			.await
			.unwrap();
		let (request, _) = fx.manager.queue.try_pop().unwrap();
		fx.manager.hydrate_one(&request).await.unwrap();

		// Hydrating an already-local file admits nothing
		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Critical, None)
			.await
			.unwrap();
		assert!(fx.manager.queue.try_pop().is_none());
	}

	#[tokio::test]
	async fn test_cancel_before_transfer() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Low, None)
			.await
			.unwrap();
		fx.manager.cancel_hydration("docs", "a.txt").await.unwrap();
		assert_eq!(
			fx.manager.get_state("docs", "a.txt").await.unwrap(),
			PlaceholderState::Cloud
		);

		// Nothing left for the workers
		assert!(fx.manager.queue.try_pop().is_none());
	}

	#[tokio::test]
	async fn test_dehydrate_rules() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"content");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		// Cloud file: dehydrate is idempotent
		fx.manager.dehydrate("docs", "a.txt").await.unwrap();

		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Normal, None)
			.await
			.unwrap();
		// Hydrating: refused as in use
		assert!(matches!(
			fx.manager.dehydrate("docs", "a.txt").await,
			Err(SyncError::DehydrateInUse { .. })
		));

		let (request, _) = fx.manager.queue.try_pop().unwrap();
		fx.manager.hydrate_one(&request).await.unwrap();

		fx.manager.dehydrate("docs", "a.txt").await.unwrap();
		assert_eq!(
			fx.manager.get_state("docs", "a.txt").await.unwrap(),
			PlaceholderState::Cloud
		);
		assert!(!fx.manager.local_path("docs", "a.txt").exists());
	}

	#[tokio::test]
	async fn test_pin_cloud_enqueues_critical() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		fx.manager.pin("docs", "a.txt").await.unwrap();
		let (request, _) = fx.manager.queue.try_pop().unwrap();
		assert_eq!(request.priority, HydrationPriority::Critical.rank());

		fx.manager.hydrate_one(&request).await.unwrap();
		assert_eq!(
			fx.manager.get_state("docs", "a.txt").await.unwrap(),
			PlaceholderState::Pinned
		);

		// Pinned files refuse dehydration
		assert!(fx.manager.dehydrate("docs", "a.txt").await.is_err());

		fx.manager.unpin("docs", "a.txt").await.unwrap();
		assert_eq!(
			fx.manager.get_state("docs", "a.txt").await.unwrap(),
			PlaceholderState::Local
		);
	}

	#[tokio::test]
	async fn test_state_is_total() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		// Unknown placeholders are an error, never a phantom state
		assert!(fx.manager.get_state("docs", "ghost.txt").await.is_err());
		let state = fx.manager.get_state("docs", "a.txt").await.unwrap();
		assert!(matches!(
			state,
			PlaceholderState::Cloud
				| PlaceholderState::Hydrating
				| PlaceholderState::Local
				| PlaceholderState::Pinned
		));
	}

	#[tokio::test]
	async fn test_crash_during_hydration_reverts_to_cloud() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();
		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Normal, None)
			.await
			.unwrap();

		// Simulated restart: a new manager over the same data root
		let data_root = fx.manager.snapshot_path.parent().unwrap().parent().unwrap();
		let mut shares = BTreeMap::new();
		shares.insert("docs".to_string(), fx.share_root.clone());
		let reborn =
			SmartSyncManager::new(data_root, shares, crate::hasher::MIN_BLOCK_SIZE, 16);
		reborn.load().await.unwrap();
		assert_eq!(
			reborn.get_state("docs", "a.txt").await.unwrap(),
			PlaceholderState::Cloud
		);
	}

	#[tokio::test]
	async fn test_stats_by_state() {
		let fx = fixture();
		for (name, content) in &[("a.txt", b"aaaa".as_ref()), ("b.txt", b"bb".as_ref())] {
			let placeholder = write_canonical(&fx, name, content);
			fx.manager.register_placeholder(placeholder).await.unwrap();
		}

		fx.manager
			.request_hydration("docs", "a.txt", HydrationPriority::Normal, None)
			.await
			.unwrap();
		let (request, _) = fx.manager.queue.try_pop().unwrap();
		fx.manager.hydrate_one(&request).await.unwrap();

		let stats = fx.manager.stats().await;
		assert_eq!(stats.local_count, 1);
		assert_eq!(stats.local_bytes, 4);
		assert_eq!(stats.cloud_count, 1);
		assert_eq!(stats.cloud_bytes, 2);
	}

	#[tokio::test]
	async fn test_worker_fires_callbacks() {
		let fx = fixture();
		let placeholder = write_canonical(&fx, "a.txt", b"a");
		fx.manager.register_placeholder(placeholder).await.unwrap();

		use std::sync::atomic::{AtomicBool, Ordering};

		let fired = std::sync::Arc::new(AtomicBool::new(false));
		let observed = fired.clone();
		fx.manager
			.request_hydration(
				"docs",
				"a.txt",
				HydrationPriority::High,
				Some(Box::new(move |_share, _path, hydrated| {
					assert!(hydrated);
					observed.store(true, Ordering::SeqCst);
				})),
			)
			.await
			.unwrap();

		// Drive one worker until the callback lands, then shut it down
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let stopper = async {
			for _ in 0..500 {
				if fired.load(Ordering::SeqCst) {
					break;
				}
				tokio::time::sleep(std::time::Duration::from_millis(10)).await;
			}
			shutdown_tx.send(true).unwrap();
		};
		tokio::join!(fx.manager.run_hydration_worker(shutdown_rx), stopper);

		assert!(fired.load(Ordering::SeqCst));
	}
}

// vim: ts=4
