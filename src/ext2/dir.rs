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

//! Directory entries: variable-length, 4-byte-aligned records packed into a
//! directory's data blocks. No entry straddles a block boundary; the last
//! entry of a block carries `rec_len` out to the block end.

use super::inode::Inode;
use super::{FileType, Fs};
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use alloc::vec;
use alloc::vec::Vec;

/// Rounds `n` up to the next multiple of 4.
fn align4(n: usize) -> usize {
	(n + 3) & !3
}

struct RawEntry {
	inode: u32,
	rec_len: u16,
	name_len: u8,
	file_type: u8,
}

fn read_raw_entry(buf: &[u8], off: usize) -> RawEntry {
	RawEntry {
		inode: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
		rec_len: u16::from_le_bytes(buf[off + 4..off + 6].try_into().unwrap()),
		name_len: buf[off + 6],
		file_type: buf[off + 7],
	}
}

fn write_raw_entry(
	buf: &mut [u8],
	off: usize,
	inode: u32,
	rec_len: u16,
	name_len: u8,
	file_type: u8,
	name: &[u8],
) {
	buf[off..off + 4].copy_from_slice(&inode.to_le_bytes());
	buf[off + 4..off + 6].copy_from_slice(&rec_len.to_le_bytes());
	buf[off + 6] = name_len;
	buf[off + 7] = file_type;
	buf[off + 8..off + 8 + name.len()].copy_from_slice(name);
}

/// A decoded directory entry, as returned by [`Fs::readdir`].
pub struct DirEntry {
	pub inode: u32,
	pub name: Vec<u8>,
	pub file_type: FileType,
}

impl<D: BlockDevice> Fs<D> {
	fn dir_blocks(&self, inode: &Inode) -> u64 {
		let block_size = self.block_size() as u64;
		({ inode.size } as u64 + block_size - 1) / block_size
	}

	/// Resolves `name` within directory `parent`, returning its inode number.
	pub fn lookup(&mut self, parent: u32, name: &[u8]) -> FsResult<u32> {
		let inode = self.read_inode(parent)?;
		let block_size = self.block_size();
		let num_blocks = self.dir_blocks(&inode);
		let mut buf = vec![0u8; block_size];
		for fb in 0..num_blocks {
			let block_num = self.get_block_num(&inode, fb)?;
			if block_num == 0 {
				continue;
			}
			self.cache.read(block_num, &mut buf)?;
			let mut off = 0usize;
			while off < block_size {
				let e = read_raw_entry(&buf, off);
				if e.rec_len == 0 {
					break;
				}
				if e.inode != 0
					&& e.name_len as usize == name.len()
					&& &buf[off + 8..off + 8 + name.len()] == name
				{
					return Ok(e.inode);
				}
				off += e.rec_len as usize;
			}
		}
		Err(Error::NotFound)
	}

	/// Returns the `index`-th live entry (0-based, counting only entries with a
	/// nonzero inode) of directory `ino`.
	pub fn readdir(&mut self, ino: u32, index: usize) -> FsResult<DirEntry> {
		let inode = self.read_inode(ino)?;
		let block_size = self.block_size();
		let num_blocks = self.dir_blocks(&inode);
		let mut buf = vec![0u8; block_size];
		let mut ordinal = 0usize;
		for fb in 0..num_blocks {
			let block_num = self.get_block_num(&inode, fb)?;
			if block_num == 0 {
				continue;
			}
			self.cache.read(block_num, &mut buf)?;
			let mut off = 0usize;
			while off < block_size {
				let e = read_raw_entry(&buf, off);
				if e.rec_len == 0 {
					break;
				}
				if e.inode != 0 {
					if ordinal == index {
						let name = buf[off + 8..off + 8 + e.name_len as usize].to_vec();
						return Ok(DirEntry {
							inode: e.inode,
							name,
							file_type: FileType::from_raw(e.file_type),
						});
					}
					ordinal += 1;
				}
				off += e.rec_len as usize;
			}
		}
		Err(Error::NotFound)
	}

	/// Packs a `{ino, file_type, name}` entry into `parent`'s data, reusing a
	/// tombstone or splitting a live entry's trailing slack where possible,
	/// else growing the directory by one block.
	fn add_entry(&mut self, parent: &mut Inode, name: &[u8], ino: u32, file_type: FileType) -> FsResult<()> {
		if name.len() > u8::MAX as usize {
			return Err(Error::Invalid);
		}
		let block_size = self.block_size();
		let needed = align4(8 + name.len());
		if needed > block_size {
			return Err(Error::Invalid);
		}
		let num_blocks = self.dir_blocks(parent);
		let mut buf = vec![0u8; block_size];
		for fb in 0..num_blocks {
			let block_num = self.get_block_num(parent, fb)?;
			if block_num == 0 {
				continue;
			}
			self.cache.read(block_num, &mut buf)?;
			let mut off = 0usize;
			while off < block_size {
				let e = read_raw_entry(&buf, off);
				if e.rec_len == 0 {
					break;
				}
				let actual_len = if e.inode == 0 {
					0
				} else {
					align4(8 + e.name_len as usize)
				};
				let available = e.rec_len as usize - actual_len;
				if available >= needed {
					if actual_len > 0 {
						let existing_name = buf[off + 8..off + 8 + e.name_len as usize].to_vec();
						write_raw_entry(
							&mut buf,
							off,
							e.inode,
							actual_len as u16,
							e.name_len,
							e.file_type,
							&existing_name,
						);
					}
					let new_off = off + actual_len;
					let new_rec_len = e.rec_len - actual_len as u16;
					write_raw_entry(
						&mut buf,
						new_off,
						ino,
						new_rec_len,
						name.len() as u8,
						file_type as u8,
						name,
					);
					self.cache.write(block_num, &buf)?;
					return Ok(());
				}
				off += e.rec_len as usize;
			}
		}
		// No existing block had room: grow the directory by one block.
		let new_block = self.alloc_block()?;
		if let Err(e) = self.set_block_num(parent, num_blocks, new_block) {
			let _ = self.free_block(new_block);
			return Err(e);
		}
		let mut buf = vec![0u8; block_size];
		write_raw_entry(&mut buf, 0, ino, block_size as u16, name.len() as u8, file_type as u8, name);
		self.cache.write(new_block, &buf)?;
		parent.size += block_size as u32;
		Ok(())
	}

	/// Zeroes the `inode` field of the entry named `name` in `parent`, so it is
	/// unreachable from [`Fs::lookup`]/[`Fs::readdir`] while its `rec_len` span
	/// stays reusable by a later [`Fs::create`]/[`Fs::mkdir`].
	fn tombstone_entry(&mut self, parent: u32, name: &[u8]) -> FsResult<()> {
		let inode = self.read_inode(parent)?;
		let block_size = self.block_size();
		let num_blocks = self.dir_blocks(&inode);
		let mut buf = vec![0u8; block_size];
		for fb in 0..num_blocks {
			let block_num = self.get_block_num(&inode, fb)?;
			if block_num == 0 {
				continue;
			}
			self.cache.read(block_num, &mut buf)?;
			let mut off = 0usize;
			while off < block_size {
				let e = read_raw_entry(&buf, off);
				if e.rec_len == 0 {
					break;
				}
				if e.inode != 0
					&& e.name_len as usize == name.len()
					&& &buf[off + 8..off + 8 + name.len()] == name
				{
					buf[off..off + 4].copy_from_slice(&0u32.to_le_bytes());
					self.cache.write(block_num, &buf)?;
					return Ok(());
				}
				off += e.rec_len as usize;
			}
		}
		Err(Error::NotFound)
	}

	fn bump_used_dirs(&mut self, ino: u32) {
		let inodes_per_group = { self.sb.inodes_per_group };
		let group = ((ino - 1) / inodes_per_group) as usize;
		if group < self.groups.len() {
			self.groups[group].used_dirs_count += 1;
			self.mark_dirty();
		}
	}

	/// Creates a regular file named `name` in `parent`. Rolls back the freshly
	/// allocated inode if linking it into `parent` fails.
	pub fn create(&mut self, parent_ino: u32, name: &[u8], perm: u16, now: u32) -> FsResult<u32> {
		let ino = self.alloc_inode()?;
		let inode = Inode::new_file(perm, now);
		if let Err(e) = self.write_inode(ino, &inode) {
			let _ = self.free_inode(ino);
			return Err(e);
		}
		let mut parent = self.read_inode(parent_ino)?;
		if let Err(e) = self.add_entry(&mut parent, name, ino, FileType::Regular) {
			let _ = self.free_inode(ino);
			return Err(e);
		}
		self.write_inode(parent_ino, &parent)?;
		Ok(ino)
	}

	/// Creates a subdirectory named `name` in `parent`, with `.` and `..`
	/// entries already populated. Rolls back the freshly allocated block and
	/// inode on any failure before the new entry is linked in.
	pub fn mkdir(&mut self, parent_ino: u32, name: &[u8], perm: u16, now: u32) -> FsResult<u32> {
		let ino = self.alloc_inode()?;
		let block = match self.alloc_block() {
			Ok(b) => b,
			Err(e) => {
				let _ = self.free_inode(ino);
				return Err(e);
			}
		};
		let block_size = self.block_size();
		let mut buf = vec![0u8; block_size];
		write_raw_entry(&mut buf, 0, ino, 12, 1, FileType::Directory as u8, b".");
		write_raw_entry(
			&mut buf,
			12,
			parent_ino,
			(block_size - 12) as u16,
			2,
			FileType::Directory as u8,
			b"..",
		);
		if let Err(e) = self.cache.write(block, &buf) {
			let _ = self.free_block(block);
			let _ = self.free_inode(ino);
			return Err(e);
		}
		let mut inode = Inode::new_dir(perm, now);
		inode.set_block_ptr(0, block as u32);
		inode.size = block_size as u32;
		inode.blocks = (block_size / 512) as u32;
		if let Err(e) = self.write_inode(ino, &inode) {
			let _ = self.free_block(block);
			let _ = self.free_inode(ino);
			return Err(e);
		}
		let mut parent = self.read_inode(parent_ino)?;
		if let Err(e) = self.add_entry(&mut parent, name, ino, FileType::Directory) {
			let _ = self.free_block(block);
			let _ = self.free_inode(ino);
			return Err(e);
		}
		parent.links_count += 1;
		self.write_inode(parent_ino, &parent)?;
		self.bump_used_dirs(ino);
		Ok(ino)
	}

	/// Removes `name` from `parent`. If the target's link count drops to zero,
	/// its direct/indirect/double-indirect block pointers are freed and the
	/// inode itself is freed. The directory entry is always tombstoned.
	pub fn unlink(&mut self, parent_ino: u32, name: &[u8]) -> FsResult<()> {
		let ino = self.lookup(parent_ino, name)?;
		let mut inode = self.read_inode(ino)?;
		let links = { inode.links_count };
		if links <= 1 {
			self.free_inode_blocks(&inode)?;
			self.free_inode(ino)?;
		} else {
			inode.links_count = links - 1;
			self.write_inode(ino, &inode)?;
		}
		self.tombstone_entry(parent_ino, name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ext2::testutil::format;

	#[test]
	fn root_has_dot_and_dotdot() {
		let mut fs = format(64, 8192, 128);
		let dot = fs.readdir(crate::ext2::ROOT_INODE, 0).unwrap();
		assert_eq!(dot.inode, crate::ext2::ROOT_INODE);
		assert_eq!(dot.name, b".");
		let dotdot = fs.readdir(crate::ext2::ROOT_INODE, 1).unwrap();
		assert_eq!(dotdot.inode, crate::ext2::ROOT_INODE);
		assert_eq!(dotdot.name, b"..");
		assert!(fs.readdir(crate::ext2::ROOT_INODE, 2).is_err());
	}

	#[test]
	fn create_then_lookup_then_unlink() {
		let mut fs = format(64, 8192, 128);
		let ino = fs.create(crate::ext2::ROOT_INODE, b"test.txt", 0o644, 1000).unwrap();
		assert_eq!(fs.lookup(crate::ext2::ROOT_INODE, b"test.txt").unwrap(), ino);
		fs.unlink(crate::ext2::ROOT_INODE, b"test.txt").unwrap();
		assert!(matches!(
			fs.lookup(crate::ext2::ROOT_INODE, b"test.txt"),
			Err(Error::NotFound)
		));
	}

	#[test]
	fn mkdir_consistency() {
		let mut fs = format(64, 8192, 128);
		let root_before = fs.read_inode(crate::ext2::ROOT_INODE).unwrap();
		let links_before = { root_before.links_count };
		let ino = fs.mkdir(crate::ext2::ROOT_INODE, b"mydir", 0o755, 1000).unwrap();
		assert_eq!(fs.lookup(ino, b".").unwrap(), ino);
		assert_eq!(fs.lookup(ino, b"..").unwrap(), crate::ext2::ROOT_INODE);
		let root_after = fs.read_inode(crate::ext2::ROOT_INODE).unwrap();
		assert_eq!({ root_after.links_count }, links_before + 1);
	}

	#[test]
	fn create_rejects_name_longer_than_255_bytes() {
		let mut fs = format(64, 8192, 128);
		let name = alloc::vec![b'a'; 256];
		assert!(matches!(
			fs.create(crate::ext2::ROOT_INODE, &name, 0o644, 1000),
			Err(Error::Invalid)
		));
	}

	#[test]
	fn directory_grows_when_entry_does_not_fit() {
		let mut fs = format(64, 8192, 128);
		// Exhaust the first directory block with long names so the next create
		// is forced to allocate a second block.
		for i in 0..40 {
			let name = alloc::format!("file-with-a-long-name-{i:03}");
			fs.create(crate::ext2::ROOT_INODE, name.as_bytes(), 0o644, 1000).unwrap();
		}
		let root = fs.read_inode(crate::ext2::ROOT_INODE).unwrap();
		assert!({ root.size } as usize > fs.block_size());
	}
}
