//! Pattern-based file exclusion for share walks
//!
//! Combines three layers: built-in always-excluded patterns, the
//! configured glob set, and the dotfile rule (dotfiles are excluded unless
//! synced globally or re-included through the allow list).

use crate::error::{Result, SyncError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Combined exclusion set applied at each level of a walk.
#[derive(Debug)]
pub struct ExclusionSet {
	/// Built-in cruft patterns, always active
	builtin: GlobSet,

	/// User-configured exclusion patterns
	user: GlobSet,

	/// Dotfile patterns re-included despite the dotfile rule
	dotfile_allow: GlobSet,

	/// When set, the dotfile rule is disabled entirely
	sync_dotfiles: bool,
}

impl ExclusionSet {
	/// Build an exclusion set from configuration.
	///
	/// An invalid glob is an `input.invalid` error naming the pattern.
	pub fn new(
		patterns: &[String],
		dotfile_allow: &[String],
		sync_dotfiles: bool,
	) -> Result<Self> {
		Ok(ExclusionSet {
			builtin: build_glob_set(&builtin_patterns())?,
			user: build_glob_set(patterns)?,
			dotfile_allow: build_glob_set(dotfile_allow)?,
			sync_dotfiles,
		})
	}

	/// Exclusion set with only the built-ins and the dotfile rule.
	pub fn defaults() -> Self {
		// Built-in patterns are valid by construction
		ExclusionSet::new(&[], &[], false).expect("built-in exclusion patterns compile")
	}

	/// Whether a share-relative path is excluded from sync.
	pub fn is_excluded(&self, rel_path: &Path) -> bool {
		if self.builtin.is_match(rel_path) {
			return true;
		}
		if !self.sync_dotfiles && self.has_dot_component(rel_path) {
			return !self.dotfile_allow.is_match(rel_path);
		}
		self.user.is_match(rel_path)
	}

	fn has_dot_component(&self, rel_path: &Path) -> bool {
		rel_path.components().any(|c| {
			c.as_os_str().to_string_lossy().starts_with('.')
		})
	}
}

/// Always-excluded patterns: sync machinery, temp files, OS cruft.
fn builtin_patterns() -> Vec<String> {
	vec![
		"**/*.tmp",
		"**/*.nsync-part", // partially hydrated files
		"**/.DS_Store",
		"**/.git",
		"**/.git/**",
		"**/Thumbs.db",
		"**/desktop.ini",
		"**/*.swp",
		"**/*~",
		"**/.nfs*",
		"lost+found/**",
	]
	.into_iter()
	.map(String::from)
	.collect()
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| SyncError::InvalidInput {
			message: format!("bad exclusion pattern {}: {}", pattern, e),
		})?;
		builder.add(glob);
	}
	builder.build().map_err(|e| SyncError::InvalidInput {
		message: format!("could not compile exclusion patterns: {}", e),
	})
}


// vim: ts=4
