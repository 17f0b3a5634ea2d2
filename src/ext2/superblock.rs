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

//! The ext2 superblock: 1024 bytes at device offset 1024, describing the
//! filesystem as a whole.

use super::{read_struct, write_struct};
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};

/// The ext2 magic number (`s_magic`).
pub const EXT2_MAGIC: u16 = 0xef53;
/// The block device offset, in bytes, of the superblock.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The only block size this engine supports (revision 0, `log_block_size == 0`).
pub const BLOCK_SIZE: usize = 1024;

/// Filesystem state: unmounted cleanly.
pub const FS_STATE_CLEAN: u16 = 1;
/// Filesystem state: errors detected.
pub const FS_STATE_ERROR: u16 = 2;

/// The ext2 superblock, byte-exact with the on-disk layout (revision 0 fields;
/// `magic` sits at byte offset 56 and `inode_size` at byte offset 88 within this
/// structure, matching the real ext2 layout).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
	pub inodes_count: u32,
	pub blocks_count: u32,
	pub r_blocks_count: u32,
	pub free_blocks_count: u32,
	pub free_inodes_count: u32,
	pub first_data_block: u32,
	pub log_block_size: u32,
	pub log_frag_size: u32,
	pub blocks_per_group: u32,
	pub frags_per_group: u32,
	pub inodes_per_group: u32,
	pub mtime: u32,
	pub wtime: u32,
	pub mnt_count: u16,
	pub max_mnt_count: u16,
	pub magic: u16,
	pub state: u16,
	pub errors: u16,
	pub minor_rev_level: u16,
	pub lastcheck: u32,
	pub checkinterval: u32,
	pub creator_os: u32,
	pub rev_level: u32,
	pub def_resuid: u16,
	pub def_resgid: u16,
	// -- revision-1 fields, kept for byte-exactness even though this engine only
	// -- supports revision 0 semantics (no dynamic inode size beyond 128).
	pub first_ino: u32,
	pub inode_size: u16,
	pub block_group_nr: u16,
	pub feature_compat: u32,
	pub feature_incompat: u32,
	pub feature_ro_compat: u32,
	pub uuid: [u8; 16],
	pub volume_name: [u8; 16],
	pub last_mounted: [u8; 64],
	pub algo_bitmap: u32,
	pub prealloc_blocks: u8,
	pub prealloc_dir_blocks: u8,
	pub _reserved_gdt: u16,
	pub journal_uuid: [u8; 16],
	pub journal_inum: u32,
	pub journal_dev: u32,
	pub last_orphan: u32,
	pub _reserved: [u8; 788],
}

const _: () = assert!(core::mem::size_of::<Superblock>() == 1024);

impl Superblock {
	/// Reads the superblock directly off `device` (block 1, bypassing the cache —
	/// mount must know the real block size before a [`crate::cache::BlockCache`]
	/// can be created).
	pub fn read(device: &mut impl BlockDevice) -> FsResult<Self> {
		if device.block_size() != BLOCK_SIZE {
			return Err(Error::Invalid);
		}
		let mut buf = [0u8; BLOCK_SIZE];
		device.read_block(1, &mut buf)?;
		Ok(unsafe { read_struct(&buf) })
	}

	/// Writes the superblock back to block 1.
	pub fn write(&self, device: &mut impl BlockDevice) -> FsResult<()> {
		let mut buf = [0u8; BLOCK_SIZE];
		unsafe { write_struct(self, &mut buf) };
		device.write_block(1, &buf)
	}

	/// Validates the invariants a mountable filesystem must satisfy (spec.md §3).
	/// Mount aborts if this fails; there is no recovery at this layer.
	pub fn validate(&self) -> FsResult<()> {
		if self.magic != EXT2_MAGIC {
			log::error!("superblock: bad magic {:#x}", { self.magic });
			return Err(Error::Invalid);
		}
		if self.inodes_count == 0
			|| self.blocks_count == 0
			|| self.blocks_per_group == 0
			|| self.inodes_per_group == 0
		{
			log::error!("superblock: zero count in a field that must be positive");
			return Err(Error::Invalid);
		}
		if self.log_block_size != 0 {
			log::error!("superblock: block size other than 1024 is not supported");
			return Err(Error::Invalid);
		}
		if self.free_blocks_count > self.blocks_count || self.free_inodes_count > self.inodes_count
		{
			log::error!("superblock: free count exceeds total count");
			return Err(Error::Invalid);
		}
		Ok(())
	}

	/// Returns the block size in bytes (`1024 << log_block_size`).
	pub fn block_size(&self) -> usize {
		BLOCK_SIZE << self.log_block_size
	}

	/// Returns the size in bytes of one on-disk inode, defaulting to 128 when the
	/// field is absent (revision 0).
	pub fn inode_size(&self) -> usize {
		if self.inode_size == 0 {
			128
		} else {
			self.inode_size as usize
		}
	}

	/// Returns the number of block groups (`ceil(blocks_count / blocks_per_group)`).
	pub fn num_groups(&self) -> u32 {
		let blocks_count = self.blocks_count;
		let blocks_per_group = self.blocks_per_group;
		(blocks_count + blocks_per_group - 1) / blocks_per_group
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn size_is_exact() {
		assert_eq!(core::mem::size_of::<Superblock>(), 1024);
	}
}
