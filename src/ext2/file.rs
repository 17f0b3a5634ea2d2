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

//! Byte-range read and write over an inode's data blocks, with on-demand
//! allocation and sparse-hole zero-fill.

use super::inode::Inode;
use super::Fs;
use crate::device::BlockDevice;
use crate::error::FsResult;
use alloc::vec;

impl<D: BlockDevice> Fs<D> {
	/// Reads up to `dst.len()` bytes starting at `offset`, clamped to
	/// `inode.size`. Returns the number of bytes actually read (a short read if
	/// the range would otherwise run past the end of the file). A hole (a
	/// logical block with no backing disk block) reads as zeros.
	pub fn read_file(&mut self, inode: &Inode, offset: u64, dst: &mut [u8]) -> FsResult<usize> {
		let size = { inode.size } as u64;
		if offset >= size {
			return Ok(0);
		}
		let to_read = (dst.len() as u64).min(size - offset) as usize;
		let block_size = self.block_size();
		let mut buf = vec![0u8; block_size];
		let mut done = 0usize;
		while done < to_read {
			let pos = offset + done as u64;
			let file_block = pos / block_size as u64;
			let intra = (pos % block_size as u64) as usize;
			let chunk = (block_size - intra).min(to_read - done);
			let block_num = self.get_block_num(inode, file_block)?;
			if block_num == 0 {
				dst[done..done + chunk].fill(0);
			} else {
				self.cache.read(block_num, &mut buf)?;
				dst[done..done + chunk].copy_from_slice(&buf[intra..intra + chunk]);
			}
			done += chunk;
		}
		Ok(done)
	}

	/// Writes `src` starting at `offset`, allocating data blocks (and any
	/// intermediate indirect blocks) on demand. Extends `inode.size` if the
	/// write runs past the current end of file, and updates `inode.mtime` and
	/// `inode.blocks`. Marks the filesystem dirty. The caller is responsible for
	/// writing the inode back with [`Fs::write_inode`].
	///
	/// `now` is the current Unix timestamp, supplied by the caller since this
	/// engine has no clock of its own.
	pub fn write_file(
		&mut self,
		inode: &mut Inode,
		offset: u64,
		src: &[u8],
		now: u32,
	) -> FsResult<usize> {
		if src.is_empty() {
			return Ok(0);
		}
		let block_size = self.block_size();
		let sectors_per_block = (block_size / 512) as u32;
		let mut buf = vec![0u8; block_size];
		let mut done = 0usize;
		while done < src.len() {
			let pos = offset + done as u64;
			let file_block = pos / block_size as u64;
			let intra = (pos % block_size as u64) as usize;
			let chunk = (block_size - intra).min(src.len() - done);
			let mut block_num = self.get_block_num(inode, file_block)?;
			if block_num == 0 {
				let new_block = self.alloc_block()?;
				match self.set_block_num(inode, file_block, new_block) {
					Ok(extra_indirect) => {
						inode.blocks += (1 + extra_indirect) * sectors_per_block;
						block_num = new_block;
					}
					Err(e) => {
						let _ = self.free_block(new_block);
						return Err(e);
					}
				}
			}
			if chunk == block_size {
				buf[..chunk].copy_from_slice(&src[done..done + chunk]);
				self.cache.write(block_num, &buf)?;
			} else {
				self.cache.read(block_num, &mut buf)?;
				buf[intra..intra + chunk].copy_from_slice(&src[done..done + chunk]);
				self.cache.write(block_num, &buf)?;
			}
			done += chunk;
		}
		let end = offset + done as u64;
		if end > { inode.size } as u64 {
			inode.size = end as u32;
		}
		inode.mtime = now;
		self.mark_dirty();
		Ok(done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ext2::inode::Inode;
	use crate::ext2::testutil::format;

	#[test]
	fn write_then_read_round_trips() {
		let mut fs = format(64, 8192, 128);
		let mut inode = Inode::new_file(0o644, 1000);
		let data = b"Hello from ext2 filesystem!\n";
		let n = fs.write_file(&mut inode, 0, data, 1000).unwrap();
		assert_eq!(n, data.len());
		assert_eq!({ inode.size } as usize, data.len());
		let mut out = vec![0u8; data.len()];
		let read = fs.read_file(&inode, 0, &mut out).unwrap();
		assert_eq!(read, data.len());
		assert_eq!(&out, data);
	}

	#[test]
	fn sparse_read_at_hole_is_zero() {
		let mut fs = format(64, 8192, 128);
		let mut inode = Inode::new_file(0o644, 1000);
		fs.write_file(&mut inode, 2048, b"end", 1000).unwrap();
		let mut out = [0xffu8; 16];
		let read = fs.read_file(&inode, 0, &mut out).unwrap();
		assert_eq!(read, 16);
		assert_eq!(out, [0u8; 16]);
	}

	#[test]
	fn write_spans_direct_to_indirect_boundary() {
		let mut fs = format(64, 8192, 128);
		let mut inode = Inode::new_file(0o644, 1000);
		let data = vec![0xabu8; 1024 * 15];
		fs.write_file(&mut inode, 0, &data, 1000).unwrap();
		assert_ne!(inode.block_ptr(12), 0);
		// 15 data blocks + 1 indirect block, 2 sectors each.
		assert_eq!({ inode.blocks }, 16 * 2);
		let mut out = vec![0u8; data.len()];
		fs.read_file(&inode, 0, &mut out).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn partial_block_write_preserves_neighbors() {
		let mut fs = format(64, 8192, 128);
		let mut inode = Inode::new_file(0o644, 1000);
		fs.write_file(&mut inode, 0, &[1u8; 1024], 1000).unwrap();
		fs.write_file(&mut inode, 100, &[2u8; 10], 1000).unwrap();
		let mut out = [0u8; 1024];
		fs.read_file(&inode, 0, &mut out).unwrap();
		assert_eq!(&out[0..100], &[1u8; 100][..]);
		assert_eq!(&out[100..110], &[2u8; 10][..]);
		assert_eq!(&out[110..1024], &[1u8; 914][..]);
	}
}
