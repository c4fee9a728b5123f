//! # NithronSync — server-side file synchronization engine
//!
//! NithronSync keeps many client devices consistent with a set of
//! server-hosted shares: deterministic change feeds behind opaque cursors,
//! block-level delta transfer, a durable operation queue with conflict
//! capture, device authentication with rotating tokens, and on-demand
//! ("smart sync") placeholders.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nithronsync::config::EngineConfig;
//! use nithronsync::engine::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::with_data_root("/var/lib/nithronsync")
//!         .add_share("docs", "/srv/shares/docs");
//!     let engine = Engine::new(config).await?;
//!     engine.start().await;
//!
//!     let feed = engine.get_changes("docs", "", 1000)?;
//!     println!("{} changes", feed.changes.len());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod changes;
pub mod config;
pub mod conflict;
pub mod cursor;
pub mod delta;
pub mod device;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod hasher;
pub mod logging;
pub mod queue;
pub mod smartsync;
pub mod state;
pub mod store;
pub mod util;

// Re-export commonly used types
pub use changes::{Change, ChangeFeed, ChangeTracker, ChangeType, FileMetadata};
pub use config::{DehydrationPolicy, EngineConfig};
pub use conflict::{ConflictResolution, ConflictType, FileVersion, SyncConflict};
pub use cursor::Cursor;
pub use delta::TransferPlan;
pub use device::{bearer_token, Device, DeviceManager, DeviceType, IssuedTokens, RegisterRequest};
pub use engine::Engine;
pub use error::{Result, SyncError, WireError};
pub use exclusion::ExclusionSet;
pub use hasher::{BlockHash, BlockHashResponse, RollingHash};
pub use queue::{OperationQueue, OperationStatus, OperationType, QueueObserver, SyncOperation};
pub use smartsync::{
	HydrationPriority, Placeholder, PlaceholderState, SmartSyncManager, SmartSyncStats,
};
pub use state::{DeviceSyncConfig, SyncState, SyncStateStore};

// vim: ts=4
