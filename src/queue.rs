//! Durable prioritized operation queue
//!
//! Local edits from clients queue here until the sync machinery drives
//! them to a terminal state. The queue coalesces duplicate pending edits,
//! dequeues by priority then age, captures conflicts, and persists every
//! mutation through the atomic snapshot store with a single commit point
//! per call: when persistence fails, in-memory state is untouched.

use crate::conflict::{ConflictResolution, SyncConflict};
use crate::error::{Result, SyncError};
use crate::logging::*;
use crate::store;
use crate::util;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Kind of a queued local edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
	Create,
	Modify,
	Delete,
	Rename,
	Move,
}

impl fmt::Display for OperationType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OperationType::Create => "create",
			OperationType::Modify => "modify",
			OperationType::Delete => "delete",
			OperationType::Rename => "rename",
			OperationType::Move => "move",
		};
		write!(f, "{}", s)
	}
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
	Conflict,
	Cancelled,
}

impl OperationStatus {
	/// Terminal states are swept after their retention window.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OperationStatus::Completed | OperationStatus::Cancelled)
	}
}

impl fmt::Display for OperationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OperationStatus::Pending => "pending",
			OperationStatus::InProgress => "in_progress",
			OperationStatus::Completed => "completed",
			OperationStatus::Failed => "failed",
			OperationStatus::Conflict => "conflict",
			OperationStatus::Cancelled => "cancelled",
		};
		write!(f, "{}", s)
	}
}

/// A queued local edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
	pub id: String,
	pub share_id: String,

	/// Share-relative path, POSIX separators
	pub path: String,

	/// Source path for rename/move operations
	#[serde(skip_serializing_if = "Option::is_none")]
	pub old_path: Option<String>,

	#[serde(rename = "type")]
	pub op_type: OperationType,

	pub status: OperationStatus,

	/// Larger values dequeue earlier
	pub priority: i32,

	pub size: u64,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub hash: Option<String>,

	pub local_version: u64,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub remote_version: Option<u64>,

	pub created_at: DateTime<Utc>,
	pub modified_at: DateTime<Utc>,

	pub attempt_count: u32,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_attempt: Option<DateTime<Utc>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl SyncOperation {
	/// New pending operation with defaults; `enqueue` assigns the id.
	pub fn new(
		share_id: impl Into<String>,
		path: impl Into<String>,
		op_type: OperationType,
	) -> Self {
		let now = util::now();
		SyncOperation {
			id: String::new(),
			share_id: share_id.into(),
			path: path.into(),
			old_path: None,
			op_type,
			status: OperationStatus::Pending,
			priority: 0,
			size: 0,
			hash: None,
			local_version: 0,
			remote_version: None,
			created_at: now,
			modified_at: now,
			attempt_count: 0,
			last_attempt: None,
			error: None,
		}
	}
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
	pub total: usize,
	pub pending: usize,
	pub pending_bytes: u64,
	pub in_progress: usize,
	pub completed: usize,
	pub failed: usize,
	pub conflicts: usize,
}

/// Observer callbacks for queue events.
///
/// Invoked synchronously inside the mutating call with the queue lock
/// held: implementations must be trivial (enqueue a notification, poke a
/// channel) and must not call back into the queue.
pub trait QueueObserver: Send + Sync {
	fn on_status_change(&self, _op: &SyncOperation) {}
	fn on_conflict(&self, _conflict: &SyncConflict) {}
}

/// Durable, prioritized queue of local edits with conflict capture.
pub struct OperationQueue {
	ops: RwLock<BTreeMap<String, SyncOperation>>,
	conflicts: RwLock<BTreeMap<String, SyncConflict>>,
	observers: std::sync::RwLock<Vec<Box<dyn QueueObserver>>>,
	ops_path: PathBuf,
	conflicts_path: PathBuf,
}

impl OperationQueue {
	pub fn new(data_root: &Path) -> Self {
		OperationQueue {
			ops: RwLock::new(BTreeMap::new()),
			conflicts: RwLock::new(BTreeMap::new()),
			observers: std::sync::RwLock::new(Vec::new()),
			ops_path: data_root.join("queue").join("operations.json"),
			conflicts_path: data_root.join("queue").join("conflicts.json"),
		}
	}

	/// Load persisted operations and conflicts. Missing snapshots are
	/// empty queues; corrupt ones surface at startup.
	pub async fn load(&self) -> Result<()> {
		if let Some(ops) = store::load_json(&self.ops_path).await? {
			*self.ops.write().await = ops;
		}
		if let Some(conflicts) = store::load_json(&self.conflicts_path).await? {
			*self.conflicts.write().await = conflicts;
		}
		Ok(())
	}

	/// Register an observer for status and conflict events.
	pub fn register_observer(&self, observer: Box<dyn QueueObserver>) {
		self.observers.write().expect("observer lock poisoned").push(observer);
	}

	/// Insert a new operation, coalescing with a pending duplicate.
	///
	/// A pending operation with the same `(share_id, path, type)` absorbs
	/// the new one: size, hash and modified stamp are replaced, the
	/// priority keeps the higher of the two.
	pub async fn enqueue(&self, mut op: SyncOperation) -> Result<SyncOperation> {
		let mut ops = self.ops.write().await;

		let existing_id = ops
			.values()
			.find(|o| {
				o.status == OperationStatus::Pending
					&& o.share_id == op.share_id
					&& o.path == op.path
					&& o.op_type == op.op_type
			})
			.map(|o| o.id.clone());

		let committed = match existing_id {
			Some(id) => {
				let mut next = ops.clone();
				{
					let entry = next.get_mut(&id).expect("coalesce target exists");
					entry.size = op.size;
					entry.hash = op.hash.clone();
					entry.old_path = op.old_path.clone();
					entry.local_version = op.local_version;
					entry.priority = entry.priority.max(op.priority);
					entry.modified_at = util::now();
				}
				let committed = next.get(&id).cloned().expect("coalesce target exists");
				self.persist_ops(&next).await?;
				*ops = next;
				debug!("coalesced {} {} into operation {}", op.op_type, op.path, id);
				committed
			}
			None => {
				if op.id.is_empty() {
					op.id = uuid::Uuid::new_v4().to_string();
				}
				let now = util::now();
				op.created_at = now;
				op.modified_at = now;
				op.status = OperationStatus::Pending;

				let mut next = ops.clone();
				next.insert(op.id.clone(), op.clone());
				self.persist_ops(&next).await?;
				*ops = next;
				self.notify_status(&op);
				op
			}
		};

		Ok(committed)
	}

	/// Atomically claim the next pending operation.
	///
	/// Selection order: priority descending, then earliest `created_at`,
	/// then `(share_id, path)`. The claimed operation transitions to
	/// in-progress before the lock is released, so two callers never see
	/// the same operation.
	pub async fn dequeue(&self) -> Result<Option<SyncOperation>> {
		let mut ops = self.ops.write().await;

		let best_id = ops
			.values()
			.filter(|o| o.status == OperationStatus::Pending)
			.min_by(|a, b| {
				b.priority
					.cmp(&a.priority)
					.then_with(|| a.created_at.cmp(&b.created_at))
					.then_with(|| (&a.share_id, &a.path).cmp(&(&b.share_id, &b.path)))
			})
			.map(|o| o.id.clone());

		let id = match best_id {
			Some(id) => id,
			None => return Ok(None),
		};

		let mut next = ops.clone();
		{
			let entry = next.get_mut(&id).expect("selected operation exists");
			entry.status = OperationStatus::InProgress;
			entry.attempt_count += 1;
			entry.last_attempt = Some(util::now());
			entry.modified_at = util::now();
		}
		let claimed = next.get(&id).cloned().expect("selected operation exists");
		self.persist_ops(&next).await?;
		*ops = next;
		self.notify_status(&claimed);
		Ok(Some(claimed))
	}

	/// Apply a status transition, enforcing the operation state machine.
	pub async fn update_status(
		&self,
		id: &str,
		new_status: OperationStatus,
		error: Option<String>,
	) -> Result<SyncOperation> {
		let mut ops = self.ops.write().await;
		let current = ops
			.get(id)
			.ok_or_else(|| SyncError::OperationNotFound { id: id.to_string() })?
			.status;

		if !transition_allowed(current, new_status) {
			return Err(SyncError::InvalidTransition {
				from: current.to_string(),
				to: new_status.to_string(),
			});
		}

		let mut next = ops.clone();
		{
			let entry = next.get_mut(id).expect("operation exists");
			entry.status = new_status;
			entry.error = error;
			entry.modified_at = util::now();
		}
		let updated = next.get(id).cloned().expect("operation exists");
		self.persist_ops(&next).await?;
		*ops = next;
		self.notify_status(&updated);
		Ok(updated)
	}

	/// Re-arm a failed operation.
	pub async fn retry(&self, id: &str) -> Result<SyncOperation> {
		self.require_status(id, &[OperationStatus::Failed]).await?;
		self.update_status(id, OperationStatus::Pending, None).await
	}

	/// Cancel a pending or failed operation.
	pub async fn cancel(&self, id: &str) -> Result<SyncOperation> {
		self.require_status(id, &[OperationStatus::Pending, OperationStatus::Failed]).await?;
		self.update_status(id, OperationStatus::Cancelled, None).await
	}

	/// Re-arm every failed operation. Returns how many were re-armed.
	pub async fn retry_all(&self) -> Result<usize> {
		let mut ops = self.ops.write().await;
		let failed: Vec<String> = ops
			.values()
			.filter(|o| o.status == OperationStatus::Failed)
			.map(|o| o.id.clone())
			.collect();
		if failed.is_empty() {
			return Ok(0);
		}

		let mut next = ops.clone();
		let now = util::now();
		for id in &failed {
			let entry = next.get_mut(id).expect("failed operation exists");
			entry.status = OperationStatus::Pending;
			entry.error = None;
			entry.modified_at = now;
		}
		self.persist_ops(&next).await?;
		*ops = next;
		for id in &failed {
			if let Some(op) = ops.get(id) {
				self.notify_status(op);
			}
		}
		Ok(failed.len())
	}

	/// Remove all terminal operations immediately. Returns how many.
	pub async fn clear(&self) -> Result<usize> {
		let mut ops = self.ops.write().await;
		let mut next = ops.clone();
		let before = next.len();
		next.retain(|_, o| !o.status.is_terminal());
		let removed = before - next.len();
		if removed > 0 {
			self.persist_ops(&next).await?;
			*ops = next;
		}
		Ok(removed)
	}

	/// Remove terminal operations older than the retention window.
	pub async fn sweep_terminal(&self, retention: Duration) -> Result<usize> {
		let cutoff = util::now() - retention;
		let mut ops = self.ops.write().await;
		let mut next = ops.clone();
		let before = next.len();
		next.retain(|_, o| !(o.status.is_terminal() && o.modified_at < cutoff));
		let removed = before - next.len();
		if removed > 0 {
			self.persist_ops(&next).await?;
			*ops = next;
			debug!("swept {} terminal operations", removed);
		}
		Ok(removed)
	}

	/// Fetch a single operation.
	pub async fn get(&self, id: &str) -> Result<SyncOperation> {
		self.ops
			.read()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| SyncError::OperationNotFound { id: id.to_string() })
	}

	/// List operations, optionally filtered by share and status.
	pub async fn list(
		&self,
		share_id: Option<&str>,
		status: Option<OperationStatus>,
	) -> Vec<SyncOperation> {
		self.ops
			.read()
			.await
			.values()
			.filter(|o| share_id.map_or(true, |s| o.share_id == s))
			.filter(|o| status.map_or(true, |s| o.status == s))
			.cloned()
			.collect()
	}

	/// Store a captured conflict.
	pub async fn add_conflict(&self, mut conflict: SyncConflict) -> Result<SyncConflict> {
		if conflict.id.is_empty() {
			conflict.id = uuid::Uuid::new_v4().to_string();
		}
		conflict.created_at = util::now();

		let mut conflicts = self.conflicts.write().await;
		let mut next = conflicts.clone();
		next.insert(conflict.id.clone(), conflict.clone());
		self.persist_conflicts(&next).await?;
		*conflicts = next;
		self.notify_conflict(&conflict);
		Ok(conflict)
	}

	/// List conflicts, optionally only unresolved ones.
	pub async fn get_conflicts(&self, unresolved_only: bool) -> Vec<SyncConflict> {
		self.conflicts
			.read()
			.await
			.values()
			.filter(|c| !unresolved_only || !c.is_resolved())
			.cloned()
			.collect()
	}

	/// Record a resolution on a conflict.
	///
	/// Resolving does not advance any operation by itself; the owning
	/// component re-enqueues as appropriate.
	pub async fn resolve_conflict(
		&self,
		id: &str,
		resolution: ConflictResolution,
		actor: &str,
	) -> Result<SyncConflict> {
		let mut conflicts = self.conflicts.write().await;
		let current = conflicts
			.get(id)
			.ok_or_else(|| SyncError::ConflictNotFound { id: id.to_string() })?;
		if current.is_resolved() {
			return Err(SyncError::ConflictAlreadyResolved { id: id.to_string() });
		}

		let mut next = conflicts.clone();
		{
			let entry = next.get_mut(id).expect("conflict exists");
			entry.resolution = Some(resolution);
			entry.resolved_at = Some(util::now());
			entry.resolved_by = Some(actor.to_string());
		}
		let resolved = next.get(id).cloned().expect("conflict exists");
		self.persist_conflicts(&next).await?;
		*conflicts = next;
		Ok(resolved)
	}

	/// Current queue counters.
	pub async fn stats(&self) -> QueueStats {
		let ops = self.ops.read().await;
		let conflicts = self.conflicts.read().await;

		let mut stats = QueueStats { total: ops.len(), ..Default::default() };
		for op in ops.values() {
			match op.status {
				OperationStatus::Pending => {
					stats.pending += 1;
					stats.pending_bytes += op.size;
				}
				OperationStatus::InProgress => stats.in_progress += 1,
				OperationStatus::Completed => stats.completed += 1,
				OperationStatus::Failed => stats.failed += 1,
				_ => {}
			}
		}
		stats.conflicts = conflicts.values().filter(|c| !c.is_resolved()).count();
		stats
	}

	async fn require_status(&self, id: &str, allowed: &[OperationStatus]) -> Result<()> {
		let ops = self.ops.read().await;
		let op = ops
			.get(id)
			.ok_or_else(|| SyncError::OperationNotFound { id: id.to_string() })?;
		if allowed.contains(&op.status) {
			Ok(())
		} else {
			Err(SyncError::InvalidTransition {
				from: op.status.to_string(),
				to: allowed.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("|"),
			})
		}
	}

	async fn persist_ops(&self, snapshot: &BTreeMap<String, SyncOperation>) -> Result<()> {
		store::with_lock(&self.ops_path, || async {
			store::save_json(&self.ops_path, snapshot, store::MODE_STATE).await
		})
		.await
	}

	async fn persist_conflicts(&self, snapshot: &BTreeMap<String, SyncConflict>) -> Result<()> {
		store::with_lock(&self.conflicts_path, || async {
			store::save_json(&self.conflicts_path, snapshot, store::MODE_STATE).await
		})
		.await
	}

	fn notify_status(&self, op: &SyncOperation) {
		for observer in self.observers.read().expect("observer lock poisoned").iter() {
			observer.on_status_change(op);
		}
	}

	fn notify_conflict(&self, conflict: &SyncConflict) {
		for observer in self.observers.read().expect("observer lock poisoned").iter() {
			observer.on_conflict(conflict);
		}
	}
}

/// The operation state machine.
///
/// ```text
///    enqueue                           finish
///  -----------> pending ---dequeue---> in_progress ------> completed
///                 |                        |
///                 |                        +--fail--> failed --retry--> pending
///                 |                        |
///                 |                        +-conflict-> conflict --resolve--> pending
///                 |
///                 +--cancel--> cancelled        (failed may also cancel)
/// ```
fn transition_allowed(from: OperationStatus, to: OperationStatus) -> bool {
	use OperationStatus::*;
	matches!(
		(from, to),
		(Pending, InProgress)
			| (Pending, Cancelled)
			| (InProgress, Completed)
			| (InProgress, Failed)
			| (InProgress, Conflict)
			| (Failed, Pending)
			| (Failed, Cancelled)
			| (Conflict, Pending)
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conflict::{ConflictType, FileVersion};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use tempfile::TempDir;

	fn op(share: &str, path: &str, op_type: OperationType, priority: i32) -> SyncOperation {
		let mut op = SyncOperation::new(share, path, op_type);
		op.priority = priority;
		op
	}

	fn version() -> FileVersion {
		FileVersion {
			version: 1,
			hash: "h".to_string(),
			size: 1,
			modified_at: util::now(),
			modified_by: "alice".to_string(),
			device_id: "dev-1".to_string(),
		}
	}

	fn conflict_for(path: &str) -> SyncConflict {
		SyncConflict {
			id: String::new(),
			share_id: "docs".to_string(),
			path: path.to_string(),
			local_version: version(),
			remote_version: version(),
			base_version: None,
			conflict_type: ConflictType::ModifyModify,
			resolution: None,
			resolved_at: None,
			resolved_by: None,
			created_at: util::now(),
		}
	}

	#[tokio::test]
	async fn test_enqueue_assigns_id_and_persists() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let committed = queue.enqueue(op("docs", "x.txt", OperationType::Modify, 5)).await.unwrap();
		assert!(!committed.id.is_empty());
		assert_eq!(committed.status, OperationStatus::Pending);

		// A fresh queue instance sees the persisted operation
		let reloaded = OperationQueue::new(tmp.path());
		reloaded.load().await.unwrap();
		assert_eq!(reloaded.get(&committed.id).await.unwrap().path, "x.txt");
	}

	#[tokio::test]
	async fn test_coalescing_keeps_one_pending() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let mut first = op("docs", "x.txt", OperationType::Modify, 5);
		first.size = 10;
		queue.enqueue(first).await.unwrap();

		let mut second = op("docs", "x.txt", OperationType::Modify, 5);
		second.size = 20;
		queue.enqueue(second).await.unwrap();

		let mut third = op("docs", "x.txt", OperationType::Modify, 10);
		third.size = 30;
		let committed = queue.enqueue(third).await.unwrap();

		let pending = queue.list(Some("docs"), Some(OperationStatus::Pending)).await;
		assert_eq!(pending.len(), 1);
		assert_eq!(committed.priority, 10);
		assert_eq!(committed.size, 30);
	}

	#[tokio::test]
	async fn test_coalescing_is_per_type() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		queue.enqueue(op("docs", "x.txt", OperationType::Modify, 0)).await.unwrap();
		queue.enqueue(op("docs", "x.txt", OperationType::Delete, 0)).await.unwrap();

		assert_eq!(queue.list(None, Some(OperationStatus::Pending)).await.len(), 2);
	}

	#[tokio::test]
	async fn test_dequeue_order_priority_then_age() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		queue.enqueue(op("docs", "low.txt", OperationType::Modify, 1)).await.unwrap();
		queue.enqueue(op("docs", "high.txt", OperationType::Modify, 9)).await.unwrap();
		queue.enqueue(op("docs", "mid.txt", OperationType::Modify, 5)).await.unwrap();

		let first = queue.dequeue().await.unwrap().unwrap();
		assert_eq!(first.path, "high.txt");
		assert_eq!(first.status, OperationStatus::InProgress);
		assert_eq!(first.attempt_count, 1);

		let second = queue.dequeue().await.unwrap().unwrap();
		assert_eq!(second.path, "mid.txt");

		let third = queue.dequeue().await.unwrap().unwrap();
		assert_eq!(third.path, "low.txt");

		assert!(queue.dequeue().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_transition_legality() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let committed = queue.enqueue(op("docs", "x.txt", OperationType::Modify, 0)).await.unwrap();

		// pending -> completed skips in_progress and must fail
		let result = queue.update_status(&committed.id, OperationStatus::Completed, None).await;
		assert!(matches!(result, Err(SyncError::InvalidTransition { .. })));

		queue.dequeue().await.unwrap().unwrap();
		queue
			.update_status(&committed.id, OperationStatus::Failed, Some("io error".to_string()))
			.await
			.unwrap();
		queue.retry(&committed.id).await.unwrap();
		assert_eq!(queue.get(&committed.id).await.unwrap().status, OperationStatus::Pending);
	}

	#[tokio::test]
	async fn test_cancel_requires_pending_or_failed() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let committed = queue.enqueue(op("docs", "x.txt", OperationType::Modify, 0)).await.unwrap();
		queue.dequeue().await.unwrap().unwrap();

		assert!(queue.cancel(&committed.id).await.is_err());

		queue.update_status(&committed.id, OperationStatus::Failed, None).await.unwrap();
		queue.cancel(&committed.id).await.unwrap();
		assert_eq!(queue.get(&committed.id).await.unwrap().status, OperationStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_retry_all_and_clear() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		for name in &["a.txt", "b.txt"] {
			let committed =
				queue.enqueue(op("docs", name, OperationType::Modify, 0)).await.unwrap();
			queue.dequeue().await.unwrap().unwrap();
			queue.update_status(&committed.id, OperationStatus::Failed, None).await.unwrap();
		}
		assert_eq!(queue.retry_all().await.unwrap(), 2);
		assert_eq!(queue.stats().await.pending, 2);

		// Drive one to completion, then clear terminals
		let claimed = queue.dequeue().await.unwrap().unwrap();
		queue.update_status(&claimed.id, OperationStatus::Completed, None).await.unwrap();
		assert_eq!(queue.clear().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_sweep_respects_retention() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let committed = queue.enqueue(op("docs", "x.txt", OperationType::Modify, 0)).await.unwrap();
		queue.dequeue().await.unwrap().unwrap();
		queue.update_status(&committed.id, OperationStatus::Completed, None).await.unwrap();

		// Fresh terminal op survives a 24h retention sweep
		assert_eq!(queue.sweep_terminal(Duration::hours(24)).await.unwrap(), 0);
		// Zero retention removes it
		assert_eq!(queue.sweep_terminal(Duration::zero()).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_conflict_lifecycle() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let stored = queue.add_conflict(conflict_for("y.txt")).await.unwrap();
		assert!(!stored.id.is_empty());
		assert_eq!(queue.get_conflicts(true).await.len(), 1);

		let resolved = queue
			.resolve_conflict(&stored.id, ConflictResolution::KeepRemote, "alice")
			.await
			.unwrap();
		assert_eq!(resolved.resolution, Some(ConflictResolution::KeepRemote));
		assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
		assert!(resolved.resolved_at.is_some());
		assert!(queue.get_conflicts(true).await.is_empty());

		let again = queue
			.resolve_conflict(&stored.id, ConflictResolution::KeepLocal, "bob")
			.await;
		assert!(matches!(again, Err(SyncError::ConflictAlreadyResolved { .. })));
	}

	#[tokio::test]
	async fn test_stats() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let mut pending = op("docs", "a.txt", OperationType::Create, 0);
		pending.size = 100;
		queue.enqueue(pending).await.unwrap();
		queue.enqueue(op("docs", "b.txt", OperationType::Modify, 5)).await.unwrap();
		queue.dequeue().await.unwrap().unwrap();
		queue.add_conflict(conflict_for("c.txt")).await.unwrap();

		let stats = queue.stats().await;
		assert_eq!(stats.total, 2);
		assert_eq!(stats.pending, 1);
		assert_eq!(stats.pending_bytes, 100);
		assert_eq!(stats.in_progress, 1);
		assert_eq!(stats.conflicts, 1);
	}

	struct CountingObserver {
		status_events: Arc<AtomicUsize>,
		conflict_events: Arc<AtomicUsize>,
	}

	impl QueueObserver for CountingObserver {
		fn on_status_change(&self, _op: &SyncOperation) {
			self.status_events.fetch_add(1, Ordering::SeqCst);
		}
		fn on_conflict(&self, _conflict: &SyncConflict) {
			self.conflict_events.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[tokio::test]
	async fn test_observers_fire_synchronously() {
		let tmp = TempDir::new().unwrap();
		let queue = OperationQueue::new(tmp.path());

		let status_events = Arc::new(AtomicUsize::new(0));
		let conflict_events = Arc::new(AtomicUsize::new(0));
		queue.register_observer(Box::new(CountingObserver {
			status_events: status_events.clone(),
			conflict_events: conflict_events.clone(),
		}));

		queue.enqueue(op("docs", "x.txt", OperationType::Modify, 0)).await.unwrap();
		assert_eq!(status_events.load(Ordering::SeqCst), 1);

		queue.dequeue().await.unwrap().unwrap();
		assert_eq!(status_events.load(Ordering::SeqCst), 2);

		queue.add_conflict(conflict_for("x.txt")).await.unwrap();
		assert_eq!(conflict_events.load(Ordering::SeqCst), 1);
	}
}

// vim: ts=4
