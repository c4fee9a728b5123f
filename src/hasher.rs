//! Rolling weak checksum and SHA-256 block hashing
//!
//! The weak checksum is an Adler-32-style `(a, b)` pair reduced modulo
//! 65521 with a constant-time slide: it gates the expensive strong-hash
//! comparisons during block matching. SHA-256 is the authoritative match.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Smallest accepted block size (64 KiB).
pub const MIN_BLOCK_SIZE: usize = 64 * 1024;

/// Default block size (4 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Largest accepted block size (64 MiB).
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Adler modulus; the largest prime below 2^16.
pub const WEAK_MOD: u32 = 65521;

/// Clamp a requested block size into `[MIN_BLOCK_SIZE, MAX_BLOCK_SIZE]`.
///
/// Out-of-range sizes are clamped silently; a zero request yields the
/// default.
pub fn clamp_block_size(requested: usize) -> usize {
	if requested == 0 {
		return DEFAULT_BLOCK_SIZE;
	}
	requested.max(MIN_BLOCK_SIZE).min(MAX_BLOCK_SIZE)
}

/// Hash descriptor for one fixed-size block of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHash {
	/// Zero-based block index
	pub index: u32,

	/// Byte offset of the block within the file
	pub offset: u64,

	/// Block length; only the trailing block may be shorter
	pub size: u32,

	/// Hex SHA-256 of the block content
	pub strong_hash: String,

	/// Packed Adler-style weak checksum of the block content
	pub weak_hash: u32,
}

/// Block hashes for one file state, as exchanged between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHashResponse {
	/// Relative path of the hashed file (POSIX separators)
	pub path: String,

	/// Total file size in bytes
	pub file_size: u64,

	/// Block size the descriptors were computed with
	pub block_size: u32,

	/// Hex SHA-256 over the whole file
	pub full_hash: String,

	/// Per-block descriptors, ordered by index
	pub blocks: Vec<BlockHash>,
}

/// Streaming Adler-style checksum over a fixed window.
///
/// `a` is the byte sum and `b` the sum of running prefix sums, both modulo
/// 65521. [`RollingHash::roll`] slides the window by one byte in constant
/// time; re-scanning the window on each slide is never needed.
#[derive(Debug, Clone)]
pub struct RollingHash {
	a: u32,
	b: u32,
	window: usize,
}

impl RollingHash {
	/// Seed the checksum from a full window of bytes.
	pub fn from_window(window: &[u8]) -> Self {
		let mut a: u32 = 0;
		let mut b: u32 = 0;
		for &byte in window {
			a = (a + u32::from(byte)) % WEAK_MOD;
			b = (b + a) % WEAK_MOD;
		}
		RollingHash { a, b, window: window.len() }
	}

	/// Slide the window one byte: remove `old`, append `new`.
	pub fn roll(&mut self, old: u8, new: u8) {
		let old = u32::from(old);
		let new = u32::from(new);
		self.a = (self.a + WEAK_MOD - old + new) % WEAK_MOD;
		// window * old can exceed u32 for the largest windows
		let removed = ((self.window as u64 * u64::from(old)) % u64::from(WEAK_MOD)) as u32;
		self.b = (self.b + WEAK_MOD - removed + self.a) % WEAK_MOD;
	}

	/// Number of bytes covered by the window.
	pub fn window_len(&self) -> usize {
		self.window
	}

	/// Packed checksum value: `b << 16 | a`.
	pub fn value(&self) -> u32 {
		(self.b << 16) | self.a
	}
}

/// Weak checksum of a block in one shot.
pub fn weak_hash(block: &[u8]) -> u32 {
	RollingHash::from_window(block).value()
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data);
	hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> Result<String> {
	let mut file = std::fs::File::open(path)?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; MIN_BLOCK_SIZE];
	loop {
		let n = file.read(&mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hex::encode(hasher.finalize()))
}

/// Compute the full SHA-256 and per-block descriptors of a file in one pass.
///
/// A file of size S yields ceil(S / block_size) blocks; the last block is
/// shorter. The same file hashed with the same block size always produces
/// identical descriptors.
pub fn compute_block_hashes(path: &Path, rel_path: &str, block_size: usize) -> Result<BlockHashResponse> {
	let block_size = clamp_block_size(block_size);

	let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
		std::io::ErrorKind::NotFound => SyncError::FileNotFound { path: rel_path.to_string() },
		_ => SyncError::Io(e),
	})?;

	let mut full = Sha256::new();
	let mut blocks = Vec::new();
	let mut buf = vec![0u8; block_size];
	let mut offset: u64 = 0;
	let mut index: u32 = 0;

	loop {
		let filled = read_up_to(&mut file, &mut buf)?;
		if filled == 0 {
			break;
		}
		let block = &buf[..filled];
		full.update(block);
		blocks.push(BlockHash {
			index,
			offset,
			size: filled as u32,
			strong_hash: sha256_hex(block),
			weak_hash: weak_hash(block),
		});
		offset += filled as u64;
		index += 1;
		if filled < block_size {
			break;
		}
	}

	Ok(BlockHashResponse {
		path: rel_path.to_string(),
		file_size: offset,
		block_size: block_size as u32,
		full_hash: hex::encode(full.finalize()),
		blocks,
	})
}

// Read until the buffer is full or EOF; plain read() may return short.
fn read_up_to(file: &mut std::fs::File, buf: &mut [u8]) -> Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		let n = file.read(&mut buf[filled..])?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}


// vim: ts=4
