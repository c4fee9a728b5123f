//! Block-level delta engine
//!
//! Given block descriptors for a local and a remote file state, builds the
//! minimal transfer plan: which blocks must be sent and which remote blocks
//! can be reused. Matching is gated by the cheap weak checksum and settled
//! by the strong hash.

use crate::error::{Result, SyncError};
use crate::hasher::{self, BlockHash, BlockHashResponse, RollingHash};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Plan to materialize the local file state on the remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPlan {
	pub file_path: String,

	/// Size of the local (target) file state
	pub file_size: u64,

	/// Block size the plan was computed with
	pub block_size: u32,

	/// Total number of blocks in the local file state
	pub total_blocks: u32,

	/// Blocks whose content must be transferred
	pub blocks_to_send: Vec<BlockHash>,

	/// Remote block indices whose content can be reused in place
	pub blocks_to_reuse: Vec<u32>,

	/// Sum of the sizes of `blocks_to_send`
	pub bytes_to_transfer: u64,

	/// Percentage of the file that does not need to move
	pub savings_percent: f64,
}

/// Build a transfer plan from local and remote block descriptors.
///
/// Identical full hashes short-circuit to an empty plan with 100% savings.
/// When several remote blocks share a strong hash, the lowest index wins
/// and each remote block is consumed at most once.
pub fn create_transfer_plan(local: &BlockHashResponse, remote: &BlockHashResponse) -> TransferPlan {
	let total_blocks = local.blocks.len() as u32;

	if local.full_hash == remote.full_hash {
		return TransferPlan {
			file_path: local.path.clone(),
			file_size: local.file_size,
			block_size: local.block_size,
			total_blocks,
			blocks_to_send: Vec::new(),
			blocks_to_reuse: remote.blocks.iter().map(|b| b.index).collect(),
			bytes_to_transfer: 0,
			savings_percent: 100.0,
		};
	}

	// Remote index candidates per strong hash, lowest index first
	let mut by_strong: HashMap<&str, VecDeque<u32>> = HashMap::new();
	for block in &remote.blocks {
		by_strong.entry(block.strong_hash.as_str()).or_default().push_back(block.index);
	}

	let mut blocks_to_send = Vec::new();
	let mut blocks_to_reuse = Vec::new();
	let mut bytes_to_transfer: u64 = 0;

	for block in &local.blocks {
		match by_strong.get_mut(block.strong_hash.as_str()).and_then(VecDeque::pop_front) {
			Some(remote_index) => blocks_to_reuse.push(remote_index),
			None => {
				bytes_to_transfer += u64::from(block.size);
				blocks_to_send.push(block.clone());
			}
		}
	}

	let savings_percent = if local.file_size > 0 {
		(local.file_size - bytes_to_transfer) as f64 / local.file_size as f64 * 100.0
	} else {
		0.0
	};

	TransferPlan {
		file_path: local.path.clone(),
		file_size: local.file_size,
		block_size: local.block_size,
		total_blocks,
		blocks_to_send,
		blocks_to_reuse,
		bytes_to_transfer,
		savings_percent,
	}
}

/// Find remote blocks whose content occurs anywhere in `path`.
///
/// Slides a window of the remote block size across the file. At each
/// position the weak checksum gates a strong-hash verification against the
/// remote candidates; a verified match records the remote index, marks it
/// consumed, and the window jumps past the matched bytes. Returns the
/// matched remote indices in file order.
pub fn find_matching_blocks(path: &Path, remote_blocks: &[BlockHash]) -> Result<Vec<u32>> {
	if remote_blocks.is_empty() {
		return Ok(Vec::new());
	}
	let block_size = remote_blocks.iter().map(|b| b.size as usize).max().unwrap_or(0);
	if block_size == 0 {
		return Ok(Vec::new());
	}

	// Weak hash -> candidates; each candidate is consumable once
	let mut by_weak: HashMap<u32, Vec<(u32, &str, u32)>> = HashMap::new();
	for block in remote_blocks {
		by_weak
			.entry(block.weak_hash)
			.or_default()
			.push((block.index, block.strong_hash.as_str(), block.size));
	}
	for candidates in by_weak.values_mut() {
		candidates.sort_by_key(|(index, _, _)| *index);
	}
	let mut consumed: HashSet<u32> = HashSet::new();

	let data = std::fs::read(path).map_err(|e| match e.kind() {
		std::io::ErrorKind::NotFound => {
			SyncError::FileNotFound { path: path.display().to_string() }
		}
		_ => SyncError::Io(e),
	})?;

	let mut matched = Vec::new();
	let mut start = 0usize;
	let mut rolling: Option<RollingHash> = None;

	while start < data.len() {
		let end = (start + block_size).min(data.len());
		let window = &data[start..end];

		let weak = match &rolling {
			Some(hash) => hash.value(),
			None => {
				let hash = RollingHash::from_window(window);
				let value = hash.value();
				rolling = Some(hash);
				value
			}
		};

		let mut advance_past = None;
		if let Some(candidates) = by_weak.get(&weak) {
			for (index, strong, size) in candidates {
				if consumed.contains(index) || *size as usize != window.len() {
					continue;
				}
				if hasher::sha256_hex(window) == *strong {
					consumed.insert(*index);
					matched.push(*index);
					advance_past = Some(window.len());
					break;
				}
			}
		}

		match advance_past {
			Some(len) => {
				start += len;
				rolling = None;
			}
			None => {
				// Slide one byte; reseed at the tail where the window shrinks
				if end < data.len() {
					if let Some(hash) = rolling.as_mut() {
						hash.roll(data[start], data[end]);
					}
					start += 1;
				} else {
					start += 1;
					rolling = None;
				}
			}
		}
	}

	Ok(matched)
}

/// Read up to `size` bytes at `offset`.
///
/// Tolerates partial reads near EOF: the returned buffer may be shorter
/// than requested.
pub fn read_block(path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
	let mut file = std::fs::File::open(path)?;
	file.seek(SeekFrom::Start(offset))?;

	let mut buf = vec![0u8; size];
	let mut filled = 0;
	while filled < size {
		let n = file.read(&mut buf[filled..])?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	buf.truncate(filled);
	Ok(buf)
}

/// Write `data` at `offset`, creating the file if needed.
///
/// Never truncates: bytes beyond the written range are left untouched.
pub fn write_block(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
	let mut file = std::fs::OpenOptions::new().write(true).create(true).open(path)?;
	file.seek(SeekFrom::Start(offset))?;
	file.write_all(data)?;
	file.flush()?;
	Ok(())
}


// vim: ts=4
