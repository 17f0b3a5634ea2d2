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

//! The [`BlockDevice`] capability: the only thing this engine asks of the raw
//! storage it sits on.
//!
//! Any type exposing `read_block`/`write_block`/`block_size`/`block_count` is a
//! block device to this crate — a RAM disk, a VirtIO block device, or (in tests) a
//! plain `Vec<u8>`. No retries happen at this layer: every error is handed
//! straight up to the caller.

use crate::error::{Error, FsResult};

/// A block-addressable storage device.
///
/// Implementations must never change `block_size`/`block_count` for the lifetime
/// of the value: the engine above assumes both are fixed once a filesystem is
/// mounted.
pub trait BlockDevice {
	/// Reads the block at index `block` into `buf`.
	///
	/// `buf` must be at least [`Self::block_size`] bytes long. Returns an error if
	/// `block >= block_count()`.
	fn read_block(&mut self, block: u64, buf: &mut [u8]) -> FsResult<()>;

	/// Writes the block at index `block` from `buf`.
	///
	/// `buf` must be at least [`Self::block_size`] bytes long. Returns an error if
	/// `block >= block_count()`.
	fn write_block(&mut self, block: u64, buf: &[u8]) -> FsResult<()>;

	/// Returns the device's block size in bytes.
	fn block_size(&self) -> usize;

	/// Returns the total number of blocks on the device.
	fn block_count(&self) -> u64;
}

#[cfg(any(test, feature = "std"))]
pub use memory::MemoryBlockDevice;

#[cfg(any(test, feature = "std"))]
mod memory {
	use super::BlockDevice;
	use crate::error::{Error, FsResult};
	use alloc::vec;
	use alloc::vec::Vec;

	/// An in-memory [`BlockDevice`] backed by a single `Vec<u8>`, used by the test
	/// harness in place of a RAM disk or VirtIO device.
	///
	/// `fail_next_writes` lets a test inject a bounded run of write failures, used
	/// to exercise the "flush preserves dirty-on-failure" scenario without actually
	/// corrupting the device state: failed writes are rejected before touching
	/// `data`.
	pub struct MemoryBlockDevice {
		block_size: usize,
		data: Vec<u8>,
		fail_next_writes: usize,
	}

	impl MemoryBlockDevice {
		/// Creates a new device of `block_count` blocks of `block_size` bytes,
		/// zero-initialized.
		pub fn new(block_size: usize, block_count: u64) -> Self {
			Self {
				block_size,
				data: vec![0u8; block_size * block_count as usize],
				fail_next_writes: 0,
			}
		}

		/// Makes the next `n` calls to [`BlockDevice::write_block`] fail with
		/// [`Error::Io`] without modifying the backing store.
		pub fn fail_next_writes(&mut self, n: usize) {
			self.fail_next_writes = n;
		}
	}

	impl BlockDevice for MemoryBlockDevice {
		fn read_block(&mut self, block: u64, buf: &mut [u8]) -> FsResult<()> {
			if block >= self.block_count() {
				return Err(Error::Invalid);
			}
			let off = block as usize * self.block_size;
			buf[..self.block_size].copy_from_slice(&self.data[off..off + self.block_size]);
			Ok(())
		}

		fn write_block(&mut self, block: u64, buf: &[u8]) -> FsResult<()> {
			if block >= self.block_count() {
				return Err(Error::Invalid);
			}
			if self.fail_next_writes > 0 {
				self.fail_next_writes -= 1;
				return Err(Error::Io);
			}
			let off = block as usize * self.block_size;
			self.data[off..off + self.block_size].copy_from_slice(&buf[..self.block_size]);
			Ok(())
		}

		fn block_size(&self) -> usize {
			self.block_size
		}

		fn block_count(&self) -> u64 {
			(self.data.len() / self.block_size) as u64
		}
	}
}
