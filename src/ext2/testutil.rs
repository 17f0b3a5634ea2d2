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

//! A minimal in-memory mkfs, used only by tests (and by anything built with the
//! `std` feature). Lays out one primary superblock/BGDT copy in group 0, a
//! block and inode bitmap plus inode table per group, and a root directory
//! with `.`/`..` already populated. Not a general-purpose mkfs: backup
//! superblock/BGDT copies and sparse-group layouts are out of scope.

use super::group::GroupDesc;
use super::inode::Inode;
use super::superblock::{Superblock, BLOCK_SIZE, EXT2_MAGIC, FS_STATE_CLEAN};
use super::{write_struct, FileType, Fs, ROOT_INODE};
use crate::device::{BlockDevice, MemoryBlockDevice};
use alloc::vec;
use alloc::vec::Vec;

fn set_bit(buf: &mut [u8], bit: u32) {
	buf[(bit / 8) as usize] |= 1 << (bit % 8);
}

fn write_dirent(buf: &mut [u8], off: usize, inode: u32, rec_len: u16, name: &[u8], file_type: u8) {
	buf[off..off + 4].copy_from_slice(&inode.to_le_bytes());
	buf[off + 4..off + 6].copy_from_slice(&rec_len.to_le_bytes());
	buf[off + 6] = name.len() as u8;
	buf[off + 7] = file_type;
	buf[off + 8..off + 8 + name.len()].copy_from_slice(name);
}

/// Builds and mounts a fresh filesystem of `block_count` 1024-byte blocks,
/// `blocks_per_group` blocks per group and `inodes_per_group` inodes per
/// group, with the default 64-entry cache. The root directory (inode 2) is
/// ready to use.
pub fn format(block_count: u64, blocks_per_group: u32, inodes_per_group: u32) -> Fs<MemoryBlockDevice> {
	format_with_cache(block_count, blocks_per_group, inodes_per_group, 64)
}

/// Like [`format`], but with an explicit cache capacity — for tests that need to
/// force eviction at a known size.
pub fn format_with_cache(
	block_count: u64,
	blocks_per_group: u32,
	inodes_per_group: u32,
	cache_capacity: usize,
) -> Fs<MemoryBlockDevice> {
	let mut device = MemoryBlockDevice::new(BLOCK_SIZE, block_count);
	let blocks_count = block_count as u32;
	let num_groups = (blocks_count + blocks_per_group - 1) / blocks_per_group;
	let inode_table_blocks = (inodes_per_group as u64 * 128).div_ceil(BLOCK_SIZE as u64) as u32;
	let bgdt_blocks = ((num_groups as u64 * 32).div_ceil(BLOCK_SIZE as u64)) as u32;
	let first_data_block = 1u32;

	struct Layout {
		block_bitmap: u32,
		inode_bitmap: u32,
		inode_table: u32,
		group_start: u32,
		overhead: u32,
	}
	let mut layouts = Vec::with_capacity(num_groups as usize);
	for g in 0..num_groups {
		let group_start = first_data_block + g * blocks_per_group;
		let (block_bitmap, inode_bitmap, inode_table, overhead) = if g == 0 {
			let bgdt_start = group_start + 1;
			let block_bitmap = bgdt_start + bgdt_blocks;
			let inode_bitmap = block_bitmap + 1;
			let inode_table = inode_bitmap + 1;
			(block_bitmap, inode_bitmap, inode_table, 1 + bgdt_blocks + 1 + 1 + inode_table_blocks)
		} else {
			let block_bitmap = group_start;
			let inode_bitmap = block_bitmap + 1;
			let inode_table = inode_bitmap + 1;
			(block_bitmap, inode_bitmap, inode_table, 1 + 1 + inode_table_blocks)
		};
		layouts.push(Layout {
			block_bitmap,
			inode_bitmap,
			inode_table,
			group_start,
			overhead,
		});
	}
	let root_block = layouts[0].group_start + layouts[0].overhead;

	// Block + inode bitmaps, and zeroed inode tables.
	let mut group_descs = Vec::with_capacity(num_groups as usize);
	for (g, l) in layouts.iter().enumerate() {
		let mut bbitmap = vec![0u8; BLOCK_SIZE];
		for bit in 0..l.overhead {
			set_bit(&mut bbitmap, bit);
		}
		let group_blocks = blocks_per_group.min(blocks_count - l.group_start);
		let mut reserved_inodes = 0u32;
		if g == 0 {
			// bit 0 = inode 1 (reserved), bit 1 = inode 2 (root).
			set_bit(&mut bbitmap, l.overhead); // root data block, right after overhead
			reserved_inodes = 2;
		}
		device.write_block(l.block_bitmap as u64, &bbitmap).unwrap();

		let mut ibitmap = vec![0u8; BLOCK_SIZE];
		for bit in 0..reserved_inodes {
			set_bit(&mut ibitmap, bit);
		}
		device.write_block(l.inode_bitmap as u64, &ibitmap).unwrap();

		for tb in 0..inode_table_blocks {
			device.write_block(l.inode_table as u64 + tb as u64, &vec![0u8; BLOCK_SIZE]).unwrap();
		}

		let used_blocks = l.overhead + if g == 0 { 1 } else { 0 };
		let free_blocks = (group_blocks - used_blocks) as u16;
		let free_inodes = (inodes_per_group - reserved_inodes) as u16;
		group_descs.push(GroupDesc {
			block_bitmap: l.block_bitmap,
			inode_bitmap: l.inode_bitmap,
			inode_table: l.inode_table,
			free_blocks_count: free_blocks,
			free_inodes_count: free_inodes,
			used_dirs_count: if g == 0 { 1 } else { 0 },
			_padding: [0; 14],
		});
	}

	// Root inode (#2), in group 0's inode table at index 1 (inode_size=128).
	let mut root_inode = Inode::new_dir(0o755, 0);
	root_inode.set_block_ptr(0, root_block);
	root_inode.size = BLOCK_SIZE as u32;
	root_inode.blocks = (BLOCK_SIZE / 512) as u32;
	let mut inode_table_block0 = vec![0u8; BLOCK_SIZE];
	unsafe { write_struct(&root_inode, &mut inode_table_block0[128..256]) };
	device.write_block(layouts[0].inode_table as u64, &inode_table_block0).unwrap();

	// Root directory content: "." and "..", both pointing at inode 2.
	let mut root_dir = vec![0u8; BLOCK_SIZE];
	write_dirent(&mut root_dir, 0, ROOT_INODE, 12, b".", FileType::Directory as u8);
	write_dirent(
		&mut root_dir,
		12,
		ROOT_INODE,
		(BLOCK_SIZE - 12) as u16,
		b"..",
		FileType::Directory as u8,
	);
	device.write_block(root_block as u64, &root_dir).unwrap();

	// BGDT.
	let mut bgdt_buf = vec![0u8; BLOCK_SIZE];
	for (i, gd) in group_descs.iter().enumerate() {
		let off = i * core::mem::size_of::<GroupDesc>();
		unsafe { write_struct(gd, &mut bgdt_buf[off..off + core::mem::size_of::<GroupDesc>()]) };
	}
	device.write_block(2, &bgdt_buf).unwrap();

	// Superblock.
	let free_blocks_count: u32 = group_descs.iter().map(|g| g.free_blocks_count as u32).sum();
	let free_inodes_count: u32 = group_descs.iter().map(|g| g.free_inodes_count as u32).sum();
	let sb = Superblock {
		inodes_count: num_groups * inodes_per_group,
		blocks_count,
		r_blocks_count: 0,
		free_blocks_count,
		free_inodes_count,
		first_data_block,
		log_block_size: 0,
		log_frag_size: 0,
		blocks_per_group,
		frags_per_group: blocks_per_group,
		inodes_per_group,
		mtime: 0,
		wtime: 0,
		mnt_count: 0,
		max_mnt_count: 0xffff,
		magic: EXT2_MAGIC,
		state: FS_STATE_CLEAN,
		errors: 1,
		minor_rev_level: 0,
		lastcheck: 0,
		checkinterval: 0,
		creator_os: 0,
		rev_level: 0,
		def_resuid: 0,
		def_resgid: 0,
		first_ino: 11,
		inode_size: 128,
		block_group_nr: 0,
		feature_compat: 0,
		feature_incompat: 0,
		feature_ro_compat: 0,
		uuid: [0; 16],
		volume_name: [0; 16],
		last_mounted: [0; 64],
		algo_bitmap: 0,
		prealloc_blocks: 0,
		prealloc_dir_blocks: 0,
		_reserved_gdt: 0,
		journal_uuid: [0; 16],
		journal_inum: 0,
		journal_dev: 0,
		last_orphan: 0,
		_reserved: [0; 788],
	};
	let mut sb_buf = vec![0u8; BLOCK_SIZE];
	unsafe { write_struct(&sb, &mut sb_buf) };
	device.write_block(1, &sb_buf).unwrap();

	Fs::mount(device, cache_capacity).unwrap()
}
