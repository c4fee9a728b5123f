//! Dehydration policy scan
//!
//! Runs on a fixed interval. When a pressure trigger is crossed (local
//! bytes over the ceiling, files past the age limit, free disk below the
//! floor), eligible files dehydrate oldest-accessed first until the
//! trigger clears. Pinned files and policy-excluded paths are never
//! candidates.

use super::{Placeholder, PlaceholderState, SmartSyncManager};
pub use crate::config::DehydrationPolicy;
use crate::error::Result;
use crate::logging::*;
use chrono::{DateTime, Duration, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

impl SmartSyncManager {
	/// Whether the policy would ever evict this placeholder.
	///
	/// Pinned files are never candidates, regardless of pressure.
	pub fn is_dehydration_candidate(placeholder: &Placeholder, excluded: &GlobSet) -> bool {
		placeholder.state == PlaceholderState::Local
			&& !placeholder.is_pinned
			&& !excluded.is_match(Path::new(&placeholder.path))
	}

	/// One pass of the dehydration policy. Returns how many files were
	/// dehydrated.
	pub async fn run_policy_pass(&self, policy: &DehydrationPolicy) -> Result<usize> {
		if !policy.enabled {
			return Ok(0);
		}

		let excluded = compile_patterns(&policy.exclude_patterns);
		let now = crate::util::now();

		let mut local: Vec<Placeholder> = self.get_local().await;
		let pinned_bytes: u64 = self.get_pinned().await.iter().map(|p| p.size).sum();
		// Oldest access evicts first; never-accessed files count as oldest
		local.sort_by_key(|p| p.last_accessed.unwrap_or(DateTime::<Utc>::MIN_UTC));

		let mut local_bytes: u64 = local.iter().map(|p| p.size).sum::<u64>() + pinned_bytes;
		let mut evicted = 0usize;

		// Age is its own trigger: files idle past the limit go regardless
		// of space pressure
		if let Some(max_age_secs) = policy.max_file_age_secs {
			let cutoff = now - Duration::seconds(max_age_secs as i64);
			for placeholder in &local {
				if !Self::is_dehydration_candidate(placeholder, &excluded) {
					continue;
				}
				let idle_since = placeholder.last_accessed.unwrap_or(DateTime::<Utc>::MIN_UTC);
				if idle_since < cutoff {
					if self.dehydrate(&placeholder.share_id, &placeholder.path).await.is_ok() {
						local_bytes = local_bytes.saturating_sub(placeholder.size);
						evicted += 1;
					}
				}
			}
		}

		let over_size = |local_bytes: u64| {
			policy.max_local_size.map(|limit| local_bytes > limit).unwrap_or(false)
		};
		let under_free = || {
			policy
				.min_free_space
				.map(|floor| free_space(self.local_root()) < floor)
				.unwrap_or(false)
		};

		if !over_size(local_bytes) && !under_free() {
			if evicted > 0 {
				debug!("policy pass dehydrated {} aged files", evicted);
			}
			return Ok(evicted);
		}

		for placeholder in &local {
			if !over_size(local_bytes) && !under_free() {
				break;
			}
			if !Self::is_dehydration_candidate(placeholder, &excluded) {
				continue;
			}
			match self.dehydrate(&placeholder.share_id, &placeholder.path).await {
				Ok(()) => {
					local_bytes = local_bytes.saturating_sub(placeholder.size);
					evicted += 1;
				}
				Err(e) => {
					// Raced with a hydration or a concurrent evict; move on
					debug!("policy skip {}/{}: {}", placeholder.share_id, placeholder.path, e);
				}
			}
		}

		if over_size(local_bytes) || under_free() {
			warn!("dehydration pressure not cleared after a full pass");
		}
		if evicted > 0 {
			info!("policy pass dehydrated {} files", evicted);
		}
		Ok(evicted)
	}

	fn local_root(&self) -> &Path {
		&self.local_root
	}
}

fn compile_patterns(patterns: &[String]) -> GlobSet {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		match Glob::new(pattern) {
			Ok(glob) => {
				builder.add(glob);
			}
			Err(e) => warn!("ignoring bad policy exclude pattern {}: {}", pattern, e),
		}
	}
	builder.build().unwrap_or_else(|e| {
		warn!("policy exclude patterns not compiled: {}", e);
		GlobSet::empty()
	})
}

/// Available bytes on the filesystem holding `path`: the disk with the
/// longest mount-point prefix of it.
fn free_space(path: &Path) -> u64 {
	let disks = sysinfo::Disks::new_with_refreshed_list();
	disks
		.iter()
		.filter(|disk| path.starts_with(disk.mount_point()))
		.max_by_key(|disk| disk.mount_point().as_os_str().len())
		.map(|disk| disk.available_space())
		.unwrap_or(u64::MAX)
}


// vim: ts=4
