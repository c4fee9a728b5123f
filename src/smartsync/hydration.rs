//! Bounded priority queue feeding the hydration worker pool
//!
//! Admission is keyed by (share, path): re-requesting a queued file can
//! only raise its priority, and a full queue rejects new keys outright.
//! Workers block on [`HydrationQueue::pop_wait`] until work or shutdown.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::sync::Notify;

/// Priority classes for hydration requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HydrationPriority {
	Low,
	Normal,
	High,
	Critical,
}

impl HydrationPriority {
	/// Numeric rank; larger hydrates earlier.
	pub fn rank(self) -> u32 {
		match self {
			HydrationPriority::Low => 0,
			HydrationPriority::Normal => 50,
			HydrationPriority::High => 100,
			HydrationPriority::Critical => 200,
		}
	}
}

impl fmt::Display for HydrationPriority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			HydrationPriority::Low => "low",
			HydrationPriority::Normal => "normal",
			HydrationPriority::High => "high",
			HydrationPriority::Critical => "critical",
		};
		write!(f, "{}", s)
	}
}

/// Completion callback: `(share_id, path, hydrated_ok)`.
pub type HydrationCallback = Box<dyn Fn(&str, &str, bool) + Send + Sync>;

/// A request handed to a worker.
#[derive(Debug, Clone)]
pub struct HydrationRequest {
	pub share_id: String,
	pub path: String,
	pub priority: u32,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	/// New key entered the queue
	Queued,

	/// Key was queued already; its priority rose
	Upgraded,

	/// Key was queued already at an equal or higher priority
	AlreadyQueued,
}

struct HeapEntry {
	priority: u32,
	seq: u64,
	share_id: String,
	path: String,
}

impl PartialEq for HeapEntry {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority && self.seq == other.seq
	}
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> Ordering {
		// Max-heap: higher priority first, earlier admission breaks ties
		self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
	}
}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

struct QueueState {
	heap: BinaryHeap<HeapEntry>,
	// Key -> currently admitted priority; heap entries that disagree are
	// stale and get skipped at pop time
	admitted: HashMap<String, u32>,
	callbacks: HashMap<String, Vec<HydrationCallback>>,
	seq: u64,
}

/// Bounded admission queue ordered by (priority desc, admission order).
pub struct HydrationQueue {
	state: Mutex<QueueState>,
	notify: Notify,
	limit: usize,
}

fn queue_key(share_id: &str, path: &str) -> String {
	format!("{}\u{1f}{}", share_id, path)
}

impl HydrationQueue {
	pub fn new(limit: usize) -> Self {
		HydrationQueue {
			state: Mutex::new(QueueState {
				heap: BinaryHeap::new(),
				admitted: HashMap::new(),
				callbacks: HashMap::new(),
				seq: 0,
			}),
			notify: Notify::new(),
			limit,
		}
	}

	/// Admit a request, upgrade a queued one, or reject when full.
	pub fn push(
		&self,
		share_id: &str,
		path: &str,
		priority: u32,
		callback: Option<HydrationCallback>,
	) -> Result<Admission> {
		let key = queue_key(share_id, path);
		let mut state = self.state.lock().expect("hydration queue lock poisoned");

		let admission = match state.admitted.get(&key).copied() {
			Some(current) if priority > current => {
				state.admitted.insert(key.clone(), priority);
				let seq = state.seq;
				state.seq += 1;
				state.heap.push(HeapEntry {
					priority,
					seq,
					share_id: share_id.to_string(),
					path: path.to_string(),
				});
				Admission::Upgraded
			}
			Some(_) => Admission::AlreadyQueued,
			None => {
				if state.admitted.len() >= self.limit {
					return Err(SyncError::HydrationQueueFull);
				}
				state.admitted.insert(key.clone(), priority);
				let seq = state.seq;
				state.seq += 1;
				state.heap.push(HeapEntry {
					priority,
					seq,
					share_id: share_id.to_string(),
					path: path.to_string(),
				});
				Admission::Queued
			}
		};

		if let Some(callback) = callback {
			state.callbacks.entry(key).or_default().push(callback);
		}

		drop(state);
		self.notify.notify_one();
		Ok(admission)
	}

	/// Raise the priority of a still-queued key.
	///
	/// Returns `false` when the key is not waiting (it was never admitted,
	/// or a worker already took it) — never a new admission.
	pub fn upgrade_if_queued(
		&self,
		share_id: &str,
		path: &str,
		priority: u32,
		callback: Option<HydrationCallback>,
	) -> bool {
		let key = queue_key(share_id, path);
		let mut state = self.state.lock().expect("hydration queue lock poisoned");
		match state.admitted.get(&key).copied() {
			Some(current) => {
				if priority > current {
					state.admitted.insert(key.clone(), priority);
					let seq = state.seq;
					state.seq += 1;
					state.heap.push(HeapEntry {
						priority,
						seq,
						share_id: share_id.to_string(),
						path: path.to_string(),
					});
				}
				if let Some(callback) = callback {
					state.callbacks.entry(key).or_default().push(callback);
				}
				drop(state);
				self.notify.notify_one();
				true
			}
			None => false,
		}
	}

	/// Remove a request that has not been handed to a worker yet.
	///
	/// Returns its registered callbacks when it was queued; `None` when
	/// the key is not waiting (never queued, or already transferring).
	pub fn remove(&self, share_id: &str, path: &str) -> Option<Vec<HydrationCallback>> {
		let key = queue_key(share_id, path);
		let mut state = self.state.lock().expect("hydration queue lock poisoned");
		if state.admitted.remove(&key).is_none() {
			return None;
		}
		Some(state.callbacks.remove(&key).unwrap_or_default())
	}

	/// Non-blocking pop of the highest-priority admitted request.
	pub fn try_pop(&self) -> Option<(HydrationRequest, Vec<HydrationCallback>)> {
		let mut state = self.state.lock().expect("hydration queue lock poisoned");
		while let Some(entry) = state.heap.pop() {
			let key = queue_key(&entry.share_id, &entry.path);
			// Skip entries superseded by an upgrade or removed by cancel
			match state.admitted.get(&key) {
				Some(&priority) if priority == entry.priority => {
					state.admitted.remove(&key);
					let callbacks = state.callbacks.remove(&key).unwrap_or_default();
					return Some((
						HydrationRequest {
							share_id: entry.share_id,
							path: entry.path,
							priority: entry.priority,
						},
						callbacks,
					));
				}
				_ => continue,
			}
		}
		None
	}

	/// Block until a request is available or shutdown is signaled.
	pub async fn pop_wait(
		&self,
		shutdown: &mut watch::Receiver<bool>,
	) -> Option<(HydrationRequest, Vec<HydrationCallback>)> {
		loop {
			if let Some(item) = self.try_pop() {
				return Some(item);
			}
			if *shutdown.borrow() {
				return None;
			}
			tokio::select! {
				_ = self.notify.notified() => {}
				result = shutdown.changed() => {
					if result.is_err() || *shutdown.borrow() {
						return None;
					}
				}
			}
		}
	}

	/// Number of requests waiting for a worker.
	pub fn len(&self) -> usize {
		self.state.lock().expect("hydration queue lock poisoned").admitted.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}


// vim: ts=4
