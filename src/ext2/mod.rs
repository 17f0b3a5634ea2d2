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

//! The ext2 filesystem is a classical filesystem used in Unix systems. It is
//! nowadays obsolete and has been replaced by ext3 and ext4, but its on-disk
//! format is simple enough to make a good teaching example.
//!
//! The filesystem divides the storage device into several substructures:
//! - Block group: described by an entry in the Block Group Descriptor Table
//!   (BGDT).
//! - Block: the atomic unit of storage inside a block group.
//! - Inode: represents a file's metadata and the map of blocks holding its
//!   content.
//! - Directory entry: a variable-length record stored in a directory's content,
//!   naming one file.
//!
//! Access to an inode's content is resolved through up to three levels of
//! indirection, each overflowing onto the next once full: direct block
//! pointers, a singly indirect pointer, and a doubly indirect pointer. Triply
//! indirect pointers exist in the on-disk layout but resolving them is out of
//! scope for this engine.

pub mod bitmap;
pub mod dir;
pub mod file;
pub mod group;
pub mod inode;
pub mod superblock;
#[cfg(any(test, feature = "std"))]
pub mod testutil;

use crate::cache::BlockCache;
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use alloc::vec::Vec;
use group::GroupDesc;
use log::{debug, error};
use superblock::Superblock;

/// The inode number of the filesystem root directory.
pub const ROOT_INODE: u32 = 2;
/// Inode 0 does not exist; inode numbers are 1-based.
pub const INVALID_INODE: u32 = 0;

/// Reinterprets `buf` as a `T`. Callers must ensure `buf` is at least
/// `size_of::<T>()` bytes and that any bit pattern is a valid `T` (true for every
/// plain-old-data, `repr(C, packed)` on-disk record in this crate).
pub(crate) unsafe fn read_struct<T: Copy>(buf: &[u8]) -> T {
	debug_assert!(buf.len() >= core::mem::size_of::<T>());
	core::ptr::read_unaligned(buf.as_ptr() as *const T)
}

/// Serializes `val` into the first `size_of::<T>()` bytes of `buf`.
pub(crate) unsafe fn write_struct<T: Copy>(val: &T, buf: &mut [u8]) {
	debug_assert!(buf.len() >= core::mem::size_of::<T>());
	core::ptr::write_unaligned(buf.as_mut_ptr() as *mut T, *val)
}

/// A mounted ext2 filesystem.
///
/// Owns the block cache, the in-RAM superblock and group descriptor array, and
/// tracks whether that in-RAM metadata differs from what is on the device. There
/// is no module-level mutable state: a `Fs` is a value created by [`Fs::mount`]
/// and passed explicitly into every operation, per spec.md §9's note on avoiding
/// global mutable state.
pub struct Fs<D: BlockDevice> {
	pub(crate) cache: BlockCache<D>,
	pub(crate) sb: Superblock,
	pub(crate) groups: Vec<GroupDesc>,
	dirty: bool,
}

impl<D: BlockDevice> Fs<D> {
	/// Mounts the filesystem found on `device`, using a block cache of
	/// `cache_capacity` entries.
	///
	/// The superblock is read directly off `device` before the cache exists,
	/// since the cache must be created with the real (validated) block size
	/// rather than an assumed one.
	pub fn mount(mut device: D, cache_capacity: usize) -> FsResult<Self> {
		let sb = Superblock::read(&mut device)?;
		sb.validate()?;
		let mut cache = BlockCache::new(device, cache_capacity)?;
		let groups = group::read_all(&mut cache, sb.num_groups())?;
		debug!(
			"mounted: {} groups, {} inodes, {} blocks",
			groups.len(),
			{ sb.inodes_count },
			{ sb.blocks_count }
		);
		Ok(Self {
			cache,
			sb,
			groups,
			dirty: false,
		})
	}

	/// Returns the filesystem's block size in bytes (always 1024 for this
	/// engine).
	pub fn block_size(&self) -> usize {
		self.sb.block_size()
	}

	/// Returns whether the in-RAM metadata differs from what is on the device.
	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	/// Returns the in-RAM group descriptor array.
	pub fn groups(&self) -> &[GroupDesc] {
		&self.groups
	}

	/// Returns the in-RAM superblock.
	pub fn superblock(&self) -> &Superblock {
		&self.sb
	}

	/// Returns `(hits, misses)` for the underlying block cache.
	pub fn cache_stats(&self) -> (u64, u64) {
		self.cache.stats()
	}

	/// Returns a mutable reference to the wrapped block device, e.g. for a test
	/// to inject a write failure.
	pub fn device_mut(&mut self) -> &mut D {
		self.cache.device_mut()
	}

	pub(crate) fn mark_dirty(&mut self) {
		self.dirty = true;
	}

	/// Flushes the superblock, the group descriptor table, and every dirty cache
	/// entry to the device.
	///
	/// Returns the number of blocks that failed to write back (`Ok(0)` is a
	/// fully successful sync); matches spec.md §7's instruction to preserve
	/// "continues after a failure" behavior while surfacing more than a bare
	/// success/failure flag.
	pub fn sync(&mut self) -> FsResult<usize> {
		let mut sb_buf = [0u8; superblock::BLOCK_SIZE];
		unsafe { write_struct(&self.sb, &mut sb_buf) };
		self.cache.write(1, &sb_buf)?;
		group::write_all(&mut self.cache, &self.groups)?;
		let failures = self.cache.flush()?;
		if failures == 0 {
			self.dirty = false;
		}
		debug!("sync: {failures} blocks failed to flush");
		Ok(failures)
	}

	/// Unmounts the filesystem, syncing first. Consuming `self` prevents any
	/// further use of the handle after unmount.
	pub fn unmount(mut self) -> FsResult<usize> {
		self.sync()
	}
}

impl<D: BlockDevice> Drop for Fs<D> {
	/// Best-effort sync on drop, so a caller that forgets to call
	/// [`Fs::unmount`] still never silently loses a dirty block.
	fn drop(&mut self) {
		match self.sync() {
			Ok(0) => {}
			Ok(n) => error!("fs dropped without clean unmount: {n} blocks left dirty"),
			Err(e) => error!("fs dropped without clean unmount: sync failed: {e}"),
		}
	}
}

/// Directory entry file-type tag (spec.md §3, on-disk `file_type` byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
	Unknown = 0,
	Regular = 1,
	Directory = 2,
	CharDevice = 3,
	BlockDevice = 4,
	Fifo = 5,
	Socket = 6,
	Symlink = 7,
}

impl FileType {
	pub(crate) fn from_raw(raw: u8) -> Self {
		match raw {
			1 => Self::Regular,
			2 => Self::Directory,
			3 => Self::CharDevice,
			4 => Self::BlockDevice,
			5 => Self::Fifo,
			6 => Self::Socket,
			7 => Self::Symlink,
			_ => Self::Unknown,
		}
	}
}

/// Returns `Err(Error::Invalid)` unless `1 <= ino <= inodes_count`.
pub(crate) fn check_inode_range(sb: &Superblock, ino: u32) -> FsResult<()> {
	let inodes_count = sb.inodes_count;
	if ino == INVALID_INODE || ino > inodes_count {
		return Err(Error::Invalid);
	}
	Ok(())
}
