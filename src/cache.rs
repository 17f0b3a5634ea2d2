/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! A fixed-capacity, write-back LRU cache over a [`BlockDevice`].
//!
//! This plays the same role as `StorageCache`/`CachedStorageInterface` in the
//! teacher codebase, but the eviction policy is upgraded from the teacher's FIFO
//! ring buffer to true LRU, and the list is threaded through the fixed slot pool
//! with plain indices rather than an intrusive pointer list, per the safe-language
//! guidance in spec.md's design notes.

use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use log::{trace, warn};

/// Default number of entries in a [`BlockCache`] when not otherwise specified.
pub const DEFAULT_CAPACITY: usize = 256;

/// One fixed slot in the cache's backing pool.
struct Slot {
	/// The cached block number. Meaningless while `valid` is `false`.
	block: u64,
	/// Whether this slot currently holds a block's contents.
	valid: bool,
	/// Whether the slot's contents differ from the on-device block.
	dirty: bool,
	/// The cached bytes, `block_size` long.
	data: Vec<u8>,
	/// Previous slot in the LRU list (more recently used), `None` at the head.
	prev: Option<usize>,
	/// Next slot in the LRU list (less recently used), `None` at the tail.
	next: Option<usize>,
}

/// A fixed-capacity, fully-associative, write-back LRU cache over one
/// [`BlockDevice`].
///
/// `write` never touches the device directly: a written block only reaches disk
/// when it is evicted, invalidated, or [`BlockCache::flush`] is called. A dirty
/// block is never discarded silently — it is flushed before its slot is reused,
/// or the operation that would have reused it fails and the block stays dirty.
pub struct BlockCache<D> {
	device: D,
	block_size: usize,
	slots: Vec<Slot>,
	/// Maps a block number to its slot index, for valid slots only.
	lookup: BTreeMap<u64, usize>,
	/// Indices of slots never yet populated (or returned by `invalidate`), free
	/// for reuse at zero eviction cost.
	free: Vec<usize>,
	/// Head of the LRU list: most recently used valid slot.
	head: Option<usize>,
	/// Tail of the LRU list: least recently used valid slot, the next eviction
	/// victim.
	tail: Option<usize>,
	hits: u64,
	misses: u64,
}

impl<D: BlockDevice> BlockCache<D> {
	/// Creates a cache of `capacity` entries over `device`.
	pub fn new(device: D, capacity: usize) -> FsResult<Self> {
		let block_size = device.block_size();
		if capacity == 0 || block_size == 0 {
			return Err(Error::Invalid);
		}
		let slots = (0..capacity)
			.map(|_| Slot {
				block: 0,
				valid: false,
				dirty: false,
				data: vec![0u8; block_size],
				prev: None,
				next: None,
			})
			.collect();
		Ok(Self {
			device,
			block_size,
			slots,
			lookup: BTreeMap::new(),
			free: (0..capacity).rev().collect(),
			head: None,
			tail: None,
			hits: 0,
			misses: 0,
		})
	}

	/// Returns the block size this cache was created with.
	pub fn block_size(&self) -> usize {
		self.block_size
	}

	/// Returns a reference to the wrapped device.
	pub fn device(&self) -> &D {
		&self.device
	}

	/// Returns a mutable reference to the wrapped device.
	pub fn device_mut(&mut self) -> &mut D {
		&mut self.device
	}

	/// Returns `(hits, misses)` since creation.
	pub fn stats(&self) -> (u64, u64) {
		(self.hits, self.misses)
	}

	/// Unlinks `idx` from the LRU list. The slot must currently be linked in.
	fn unlink(&mut self, idx: usize) {
		let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
		match prev {
			Some(p) => self.slots[p].next = next,
			None => self.head = next,
		}
		match next {
			Some(n) => self.slots[n].prev = prev,
			None => self.tail = prev,
		}
		self.slots[idx].prev = None;
		self.slots[idx].next = None;
	}

	/// Inserts `idx` at the head (most-recently-used end) of the LRU list.
	fn push_front(&mut self, idx: usize) {
		self.slots[idx].prev = None;
		self.slots[idx].next = self.head;
		if let Some(h) = self.head {
			self.slots[h].prev = Some(idx);
		}
		self.head = Some(idx);
		if self.tail.is_none() {
			self.tail = Some(idx);
		}
	}

	/// Moves an already-linked slot to the head of the LRU list.
	fn touch(&mut self, idx: usize) {
		if self.head == Some(idx) {
			return;
		}
		self.unlink(idx);
		self.push_front(idx);
	}

	/// Writes a dirty slot's contents back to the device and clears its dirty
	/// flag on success.
	fn writeback(&mut self, idx: usize) -> FsResult<()> {
		if !self.slots[idx].dirty {
			return Ok(());
		}
		let block = self.slots[idx].block;
		self.device.write_block(block, &self.slots[idx].data)?;
		self.slots[idx].dirty = false;
		Ok(())
	}

	/// Picks a slot to hold a new block, evicting the LRU valid entry if no free
	/// slot remains. Flushes the victim first if it is dirty.
	///
	/// On write-back failure, the dirty victim is left untouched and in place, the
	/// new block is not installed, and the failure is surfaced as [`Error::Busy`]
	/// (spec.md §4.2/§6.3: "no cache slot available after flush failure"), not the
	/// device's raw error.
	fn acquire_slot(&mut self) -> FsResult<usize> {
		if let Some(idx) = self.free.pop() {
			return Ok(idx);
		}
		// `free` is only empty once every slot has been used at least once, which
		// only happens after `tail` has been set by a first `push_front` — so this
		// can't actually be `None`, but a capacity of 0 is rejected in `new`.
		let victim = self.tail.ok_or(Error::Busy)?;
		if self.writeback(victim).is_err() {
			return Err(Error::Busy);
		}
		self.lookup.remove(&self.slots[victim].block);
		self.unlink(victim);
		self.slots[victim].valid = false;
		Ok(victim)
	}

	/// Reads `block` into `out`, which must be at least `block_size` bytes long.
	pub fn read(&mut self, block: u64, out: &mut [u8]) -> FsResult<()> {
		if block >= self.device.block_count() {
			return Err(Error::Invalid);
		}
		if let Some(&idx) = self.lookup.get(&block) {
			trace!("cache hit on block {block}");
			self.hits += 1;
			out[..self.block_size].copy_from_slice(&self.slots[idx].data);
			self.touch(idx);
			return Ok(());
		}
		trace!("cache miss on block {block}");
		self.misses += 1;
		let idx = self.acquire_slot()?;
		match self.device.read_block(block, &mut self.slots[idx].data) {
			Ok(()) => {}
			Err(e) => {
				self.slots[idx].valid = false;
				self.free.push(idx);
				return Err(e);
			}
		}
		self.slots[idx].block = block;
		self.slots[idx].valid = true;
		self.slots[idx].dirty = false;
		self.lookup.insert(block, idx);
		self.push_front(idx);
		out[..self.block_size].copy_from_slice(&self.slots[idx].data);
		Ok(())
	}

	/// Writes `src` into the cached entry for `block`, marking it dirty. Does not
	/// touch the device.
	pub fn write(&mut self, block: u64, src: &[u8]) -> FsResult<()> {
		if block >= self.device.block_count() {
			return Err(Error::Invalid);
		}
		if let Some(&idx) = self.lookup.get(&block) {
			self.slots[idx].data[..self.block_size].copy_from_slice(&src[..self.block_size]);
			self.slots[idx].dirty = true;
			self.touch(idx);
			return Ok(());
		}
		let idx = self.acquire_slot()?;
		self.slots[idx].data[..self.block_size].copy_from_slice(&src[..self.block_size]);
		self.slots[idx].block = block;
		self.slots[idx].valid = true;
		self.slots[idx].dirty = true;
		self.lookup.insert(block, idx);
		self.push_front(idx);
		Ok(())
	}

	/// Writes back every dirty, valid entry and clears their dirty flags.
	///
	/// Continues past individual write-back failures rather than stopping early
	/// (spec.md §7's "partial flush" behavior); returns the number of blocks that
	/// failed to write back, so `Ok(0)` means a fully successful flush.
	pub fn flush(&mut self) -> FsResult<usize> {
		let mut failures = 0;
		let dirty: Vec<usize> = (0..self.slots.len())
			.filter(|&i| self.slots[i].valid && self.slots[i].dirty)
			.collect();
		for idx in dirty {
			if self.writeback(idx).is_err() {
				warn!("flush: write-back of block {} failed", self.slots[idx].block);
				failures += 1;
			}
		}
		Ok(failures)
	}

	/// If `block` is cached, flushes it (if dirty) and marks the slot invalid.
	pub fn invalidate(&mut self, block: u64) -> FsResult<()> {
		let Some(&idx) = self.lookup.get(&block) else {
			return Ok(());
		};
		self.writeback(idx)?;
		self.lookup.remove(&block);
		self.unlink(idx);
		self.slots[idx].valid = false;
		self.free.push(idx);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::MemoryBlockDevice;

	fn cache(capacity: usize) -> BlockCache<MemoryBlockDevice> {
		BlockCache::new(MemoryBlockDevice::new(64, 64), capacity).unwrap()
	}

	#[test]
	fn hit_and_miss_counted() {
		let mut c = cache(4);
		let mut buf = [0u8; 64];
		c.read(0, &mut buf).unwrap();
		c.read(0, &mut buf).unwrap();
		assert_eq!(c.stats(), (1, 1));
	}

	#[test]
	fn eviction_is_lru() {
		let mut c = cache(4);
		let mut buf = [0u8; 64];
		for b in 0..4 {
			c.read(b, &mut buf).unwrap();
		}
		// Fifth distinct block evicts block 0, the LRU entry.
		c.read(4, &mut buf).unwrap();
		let (_, misses_before) = c.stats();
		c.read(0, &mut buf).unwrap();
		let (_, misses_after) = c.stats();
		assert_eq!(misses_after, misses_before + 1);
		assert_eq!(c.stats(), (0, 6));
	}

	#[test]
	fn write_then_read_hits() {
		let mut c = cache(4);
		let block = [7u8; 64];
		c.write(1, &block).unwrap();
		let mut out = [0u8; 64];
		c.read(1, &mut out).unwrap();
		assert_eq!(out, block);
		assert_eq!(c.stats(), (1, 0));
	}

	#[test]
	fn flush_clears_dirty_and_writes_through() {
		let mut c = cache(4);
		c.write(2, &[9u8; 64]).unwrap();
		assert_eq!(c.flush().unwrap(), 0);
		// A fresh cache over the same device observes the flushed contents.
		let mut out = [0u8; 64];
		c.device_mut().read_block(2, &mut out).unwrap();
		assert_eq!(out, [9u8; 64]);
	}

	#[test]
	fn eviction_writeback_failure_is_busy_and_keeps_victim_in_place() {
		let mut c = cache(1);
		c.write(1, &[1u8; 64]).unwrap();
		c.device_mut().fail_next_writes(1);
		// No free slot and the sole (dirty) entry's write-back fails.
		let err = c.read(2, &mut [0u8; 64]).unwrap_err();
		assert_eq!(err, Error::Busy);
		// The victim is still cached, dirty, and reachable — nothing was evicted.
		let mut out = [0u8; 64];
		c.read(1, &mut out).unwrap();
		assert_eq!(out, [1u8; 64]);
	}

	#[test]
	fn flush_failure_keeps_block_dirty() {
		let mut c = cache(4);
		c.write(3, &[5u8; 64]).unwrap();
		c.device_mut().fail_next_writes(1);
		assert_eq!(c.flush().unwrap(), 1);
		// A second, successful flush re-attempts and clears the flag.
		assert_eq!(c.flush().unwrap(), 0);
	}

	#[test]
	fn invalidate_flushes_dirty_entry() {
		let mut c = cache(4);
		c.write(5, &[3u8; 64]).unwrap();
		c.invalidate(5).unwrap();
		let mut out = [0u8; 64];
		c.device_mut().read_block(5, &mut out).unwrap();
		assert_eq!(out, [3u8; 64]);
	}
}
