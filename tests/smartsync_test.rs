//! Smart-sync scenarios: placeholder states, hydration, policy
//!
//! Drives the manager with a real share directory and a real worker so
//! hydrated bytes land on disk and verify against the canonical hash.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::sync::watch;

use nithronsync::config::DehydrationPolicy;
use nithronsync::error::SyncError;
use nithronsync::hasher;
use nithronsync::smartsync::{
	HydrationPriority, Placeholder, PlaceholderState, SmartSyncManager,
};

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
	_data: TempDir,
	_share: TempDir,
	manager: SmartSyncManager,
	share_root: PathBuf,
}

fn fixture_with_queue(queue_limit: usize) -> Fixture {
	let data = TempDir::new().unwrap();
	let share = TempDir::new().unwrap();
	let share_root = share.path().to_path_buf();
	let mut shares = BTreeMap::new();
	shares.insert("docs".to_string(), share_root.clone());
	let manager =
		SmartSyncManager::new(data.path(), shares, hasher::MIN_BLOCK_SIZE, queue_limit);
	Fixture { _data: data, _share: share, manager, share_root }
}

fn fixture() -> Fixture {
	fixture_with_queue(64)
}

async fn register_file(fx: &Fixture, rel: &str, content: &[u8]) -> Placeholder {
	let path = fx.share_root.join(rel);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).unwrap();
	}
	std::fs::write(&path, content).unwrap();
	let placeholder =
		Placeholder::new("docs", rel, content.len() as u64, hasher::sha256_hex(content));
	fx.manager.register_placeholder(placeholder).await.unwrap()
}

/// Run hydration workers until the queue drains, then stop them.
async fn drain_queue(fx: &Fixture) {
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let stopper = async {
		for _ in 0..1000 {
			if fx.manager.queued_hydrations() == 0 {
				// One more beat so an in-flight hydration finishes
				tokio::time::sleep(std::time::Duration::from_millis(50)).await;
				break;
			}
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		}
		shutdown_tx.send(true).unwrap();
	};
	tokio::join!(fx.manager.run_hydration_worker(shutdown_rx), stopper);
}

// ============================================================================
// Placeholder state machine
// ============================================================================

#[tokio::test]
async fn test_every_placeholder_has_exactly_one_state() {
	let fx = fixture();
	register_file(&fx, "a.txt", b"alpha").await;

	let state = fx.manager.get_state("docs", "a.txt").await.unwrap();
	assert_eq!(state, PlaceholderState::Cloud);

	// Unknown files are an error, not a default state
	assert!(matches!(
		fx.manager.get_state("docs", "missing.txt").await,
		Err(SyncError::FileNotFound { .. })
	));
}

#[tokio::test]
async fn test_hydration_through_worker_pool() {
	let fx = fixture();
	let content = vec![0x7fu8; hasher::MIN_BLOCK_SIZE * 2 + 17];
	register_file(&fx, "big.bin", &content).await;

	fx.manager
		.request_hydration("docs", "big.bin", HydrationPriority::High, None)
		.await
		.unwrap();
	drain_queue(&fx).await;

	let placeholder = fx.manager.get("docs", "big.bin").await.unwrap();
	assert_eq!(placeholder.state, PlaceholderState::Local);
	assert_eq!(placeholder.hydration_progress, 100);

	// The materialized bytes match the canonical content exactly
	let local = fx.manager.local_path("docs", "big.bin");
	assert_eq!(std::fs::read(local).unwrap(), content);
}

#[tokio::test]
async fn test_pinned_is_sticky_local() {
	let fx = fixture();
	register_file(&fx, "keep.txt", b"keep me").await;

	// Pinning a cloud file hydrates at critical priority
	fx.manager.pin("docs", "keep.txt").await.unwrap();
	drain_queue(&fx).await;

	assert_eq!(
		fx.manager.get_state("docs", "keep.txt").await.unwrap(),
		PlaceholderState::Pinned
	);

	// Pinned files never dehydrate, by API or by policy
	assert!(fx.manager.dehydrate("docs", "keep.txt").await.is_err());
	let policy = DehydrationPolicy {
		max_local_size: Some(0),
		..Default::default()
	};
	assert_eq!(fx.manager.run_policy_pass(&policy).await.unwrap(), 0);
	assert_eq!(
		fx.manager.get_state("docs", "keep.txt").await.unwrap(),
		PlaceholderState::Pinned
	);

	fx.manager.unpin("docs", "keep.txt").await.unwrap();
	assert_eq!(
		fx.manager.get_state("docs", "keep.txt").await.unwrap(),
		PlaceholderState::Local
	);
}

#[tokio::test]
async fn test_dehydrate_releases_bytes_keeps_metadata() {
	let fx = fixture();
	register_file(&fx, "doc.txt", b"document body").await;

	fx.manager
		.request_hydration("docs", "doc.txt", HydrationPriority::Normal, None)
		.await
		.unwrap();
	drain_queue(&fx).await;
	assert!(fx.manager.local_path("docs", "doc.txt").exists());

	fx.manager.dehydrate("docs", "doc.txt").await.unwrap();
	assert!(!fx.manager.local_path("docs", "doc.txt").exists());

	let placeholder = fx.manager.get("docs", "doc.txt").await.unwrap();
	assert_eq!(placeholder.state, PlaceholderState::Cloud);
	assert_eq!(placeholder.size, 13);
	assert_eq!(placeholder.hash, hasher::sha256_hex(b"document body"));
}

// ============================================================================
// Bounded admission
// ============================================================================

#[tokio::test]
async fn test_queue_bound_rejects_overflow() {
	let fx = fixture_with_queue(2);
	register_file(&fx, "a.txt", b"a").await;
	register_file(&fx, "b.txt", b"b").await;
	register_file(&fx, "c.txt", b"c").await;

	fx.manager
		.request_hydration("docs", "a.txt", HydrationPriority::Low, None)
		.await
		.unwrap();
	fx.manager
		.request_hydration("docs", "b.txt", HydrationPriority::Low, None)
		.await
		.unwrap();

	let err = fx
		.manager
		.request_hydration("docs", "c.txt", HydrationPriority::Critical, None)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), "hydration.queue_full");

	// Re-requesting a queued file upgrades instead of re-admitting
	fx.manager
		.request_hydration("docs", "a.txt", HydrationPriority::Critical, None)
		.await
		.unwrap();
	assert_eq!(fx.manager.queued_hydrations(), 2);
}

#[tokio::test]
async fn test_cancel_only_before_transfer() {
	let fx = fixture();
	register_file(&fx, "a.txt", b"a").await;

	fx.manager
		.request_hydration("docs", "a.txt", HydrationPriority::Low, None)
		.await
		.unwrap();
	fx.manager.cancel_hydration("docs", "a.txt").await.unwrap();
	assert_eq!(
		fx.manager.get_state("docs", "a.txt").await.unwrap(),
		PlaceholderState::Cloud
	);

	// Cancelling something that is not hydrating is a client error
	assert!(fx.manager.cancel_hydration("docs", "a.txt").await.is_err());
}

// ============================================================================
// Dehydration policy
// ============================================================================

#[tokio::test]
async fn test_policy_evicts_coldest_until_clear() {
	let fx = fixture();
	for name in &["one.txt", "two.txt", "three.txt"] {
		register_file(&fx, name, &vec![0x30u8; 100]).await;
		fx.manager
			.request_hydration("docs", name, HydrationPriority::Normal, None)
			.await
			.unwrap();
	}
	drain_queue(&fx).await;

	// Access order: one is coldest, three is hottest
	fx.manager.mark_accessed("docs", "two.txt").await.unwrap();
	tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	fx.manager.mark_accessed("docs", "three.txt").await.unwrap();

	// 300 bytes local, ceiling 250: exactly one eviction needed
	let policy = DehydrationPolicy {
		max_local_size: Some(250),
		..Default::default()
	};
	assert_eq!(fx.manager.run_policy_pass(&policy).await.unwrap(), 1);
	assert_eq!(
		fx.manager.get_state("docs", "one.txt").await.unwrap(),
		PlaceholderState::Cloud
	);
	assert_eq!(
		fx.manager.get_state("docs", "three.txt").await.unwrap(),
		PlaceholderState::Local
	);
}

#[tokio::test]
async fn test_stats_track_states() {
	let fx = fixture();
	register_file(&fx, "cloudy.txt", b"12345").await;
	register_file(&fx, "hydrated.txt", b"123").await;

	fx.manager
		.request_hydration("docs", "hydrated.txt", HydrationPriority::Normal, None)
		.await
		.unwrap();
	drain_queue(&fx).await;

	let stats = fx.manager.stats().await;
	assert_eq!(stats.cloud_count, 1);
	assert_eq!(stats.cloud_bytes, 5);
	assert_eq!(stats.local_count, 1);
	assert_eq!(stats.local_bytes, 3);
	assert_eq!(stats.hydrating_count, 0);

	assert_eq!(fx.manager.get_cloud_only().await.len(), 1);
	assert_eq!(fx.manager.get_local().await.len(), 1);
	assert!(fx.manager.get_pinned().await.is_empty());
}

// vim: ts=4
