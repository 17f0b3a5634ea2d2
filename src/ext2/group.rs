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

//! The block group descriptor table (BGDT): a flat array of 32-byte records
//! starting at block 2, one entry per block group.

use super::{read_struct, write_struct};
use crate::cache::BlockCache;
use crate::device::BlockDevice;
use crate::error::FsResult;
use alloc::vec::Vec;

/// The block index, relative to the start of the filesystem, of the first group
/// descriptor table block.
pub const BGDT_BLOCK: u64 = 2;

/// A single block group's descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GroupDesc {
	pub block_bitmap: u32,
	pub inode_bitmap: u32,
	pub inode_table: u32,
	pub free_blocks_count: u16,
	pub free_inodes_count: u16,
	pub used_dirs_count: u16,
	pub _padding: [u8; 14],
}

const _: () = assert!(core::mem::size_of::<GroupDesc>() == 32);

/// Reads the full group descriptor array, given `num_groups` computed from the
/// superblock. Descriptors are packed 32-per-1024-byte-block; a partial last
/// block is tolerated.
pub fn read_all<D: BlockDevice>(
	cache: &mut BlockCache<D>,
	num_groups: u32,
) -> FsResult<Vec<GroupDesc>> {
	const PER_BLOCK: usize = 1024 / core::mem::size_of::<GroupDesc>();
	let mut groups = Vec::with_capacity(num_groups as usize);
	let mut block = [0u8; 1024];
	let mut remaining = num_groups as usize;
	let mut blk = BGDT_BLOCK;
	while remaining > 0 {
		cache.read(blk, &mut block)?;
		let n = remaining.min(PER_BLOCK);
		for i in 0..n {
			let off = i * core::mem::size_of::<GroupDesc>();
			groups.push(unsafe { read_struct(&block[off..off + core::mem::size_of::<GroupDesc>()]) });
		}
		remaining -= n;
		blk += 1;
	}
	Ok(groups)
}

/// Writes the full group descriptor array back to the BGDT.
pub fn write_all<D: BlockDevice>(cache: &mut BlockCache<D>, groups: &[GroupDesc]) -> FsResult<()> {
	const PER_BLOCK: usize = 1024 / core::mem::size_of::<GroupDesc>();
	for (chunk_idx, chunk) in groups.chunks(PER_BLOCK).enumerate() {
		let mut block = [0u8; 1024];
		// Preserve whatever trailing bytes already exist on a partial last block.
		if chunk.len() < PER_BLOCK {
			cache.read(BGDT_BLOCK + chunk_idx as u64, &mut block)?;
		}
		for (i, g) in chunk.iter().enumerate() {
			let off = i * core::mem::size_of::<GroupDesc>();
			unsafe { write_struct(g, &mut block[off..off + core::mem::size_of::<GroupDesc>()]) };
		}
		cache.write(BGDT_BLOCK + chunk_idx as u64, &block)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn size_is_exact() {
		assert_eq!(core::mem::size_of::<GroupDesc>(), 32);
	}
}
