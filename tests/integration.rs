//! End-to-end scenarios over the public API, built on the in-memory test
//! filesystem builder. Run with `cargo test --features std`.

use ext2fs::error::Error;
use ext2fs::ext2::inode::Inode;
use ext2fs::ext2::testutil::{format, format_with_cache};
use ext2fs::ext2::ROOT_INODE;

#[test]
fn mount_empty_image_lists_dot_and_dotdot() {
	let mut fs = format(16384, 8192, 128);
	let dot = fs.readdir(ROOT_INODE, 0).unwrap();
	assert_eq!(dot.inode, ROOT_INODE);
	assert_eq!(dot.name, b".");
	let dotdot = fs.readdir(ROOT_INODE, 1).unwrap();
	assert_eq!(dotdot.inode, ROOT_INODE);
	assert_eq!(dotdot.name, b"..");
	assert!(matches!(fs.readdir(ROOT_INODE, 2), Err(Error::NotFound)));
}

#[test]
fn create_write_lookup_read_back() {
	let mut fs = format(16384, 8192, 128);
	let ino = fs.create(ROOT_INODE, b"test.txt", 0o644, 1_700_000_000).unwrap();
	let mut inode = fs.read_inode(ino).unwrap();
	let data = b"Hello from ext2 filesystem!\n";
	fs.write_file(&mut inode, 0, data, 1_700_000_000).unwrap();
	fs.write_inode(ino, &inode).unwrap();

	let found = fs.lookup(ROOT_INODE, b"test.txt").unwrap();
	assert_eq!(found, ino);
	let inode = fs.read_inode(found).unwrap();
	assert_eq!({ inode.size }, data.len() as u32);
	let mut out = vec![0u8; data.len()];
	let n = fs.read_file(&inode, 0, &mut out).unwrap();
	assert_eq!(n, data.len());
	assert_eq!(&out, data);
}

#[test]
fn mkdir_consistency() {
	let mut fs = format(16384, 8192, 128);
	let links_before = { fs.read_inode(ROOT_INODE).unwrap().links_count };
	let dirs_before = fs.groups()[0].used_dirs_count;

	let new_ino = fs.mkdir(ROOT_INODE, b"mydir", 0o755, 1_700_000_000).unwrap();
	assert_eq!(fs.lookup(new_ino, b".").unwrap(), new_ino);
	assert_eq!(fs.lookup(new_ino, b"..").unwrap(), ROOT_INODE);

	let links_after = { fs.read_inode(ROOT_INODE).unwrap().links_count };
	assert_eq!(links_after, links_before + 1);
	let dirs_after = fs.groups()[0].used_dirs_count;
	assert_eq!(dirs_after, dirs_before + 1);
}

#[test]
fn large_file_spans_single_indirect_block() {
	let mut fs = format(16384, 8192, 128);
	let ino = fs.create(ROOT_INODE, b"big.bin", 0o644, 1_700_000_000).unwrap();
	let mut inode = fs.read_inode(ino).unwrap();
	let data = vec![0xab_u8; 1024 * 15];
	let n = fs.write_file(&mut inode, 0, &data, 1_700_000_000).unwrap();
	assert_eq!(n, data.len());
	fs.write_inode(ino, &inode).unwrap();

	assert_ne!(inode.block_ptr(12), 0);
	// 15 data blocks + 1 indirect block, 2 sectors (1024 B) each.
	assert_eq!({ inode.blocks }, (15 + 1) * 2);

	let mut out = vec![0u8; data.len()];
	fs.read_file(&inode, 0, &mut out).unwrap();
	assert_eq!(out, data);
}

#[test]
fn cache_eviction_is_lru_and_stats_match_calls() {
	// Capacity 4, spec.md §8 scenario 5: reading 5 distinct blocks never seen
	// before forces exactly 5 misses and 0 hits, and the 5th read evicts the
	// 1st (LRU), so re-reading it is a 6th forced miss. `read_inode` is used to
	// touch 5 distinct, never-before-read inode-table blocks through the public
	// API rather than reaching into the cache directly: inode numbers 1, 9, 17,
	// 25, 33 land 8 inodes apart, and `inode_size * 8 / block_size == 1`, so
	// each one is the first inode of a fresh inode-table block.
	let mut fs = format_with_cache(16384, 8192, 128, 4);
	let (h0, m0) = fs.cache_stats();
	let inos = [1u32, 9, 17, 25, 33];
	for ino in inos {
		fs.read_inode(ino).unwrap();
	}
	let (hits, misses) = fs.cache_stats();
	assert_eq!(hits, h0);
	assert_eq!(misses, m0 + 5);

	// The cache holds only the last 4 of the 5 blocks now; re-reading the first
	// one is a forced miss.
	fs.read_inode(inos[0]).unwrap();
	let (hits, misses) = fs.cache_stats();
	assert_eq!(hits, h0);
	assert_eq!(misses, m0 + 6);
}

#[test]
fn flush_preserves_dirty_on_write_failure() {
	let mut fs = format(4096, 4096, 128);
	let ino = fs.create(ROOT_INODE, b"f", 0o644, 1_700_000_000).unwrap();
	let mut inode = fs.read_inode(ino).unwrap();
	fs.write_file(&mut inode, 0, b"abc", 1_700_000_000).unwrap();

	fs.device_mut().fail_next_writes(1);
	let failures = fs.sync().unwrap();
	assert!(failures >= 1);
	assert!(fs.is_dirty());

	let failures = fs.sync().unwrap();
	assert_eq!(failures, 0);
	assert!(!fs.is_dirty());
}

#[test]
fn unlink_then_lookup_not_found() {
	let mut fs = format(16384, 8192, 128);
	fs.create(ROOT_INODE, b"gone.txt", 0o644, 1_700_000_000).unwrap();
	fs.unlink(ROOT_INODE, b"gone.txt").unwrap();
	assert!(matches!(
		fs.lookup(ROOT_INODE, b"gone.txt"),
		Err(Error::NotFound)
	));
}

#[test]
fn sparse_read_returns_zeros() {
	let mut fs = format(16384, 8192, 128);
	let ino = fs.create(ROOT_INODE, b"sparse.bin", 0o644, 1_700_000_000).unwrap();
	let mut inode = fs.read_inode(ino).unwrap();
	fs.write_file(&mut inode, 4096, b"tail", 1_700_000_000).unwrap();

	let mut out = [0xffu8; 16];
	fs.read_file(&inode, 0, &mut out).unwrap();
	assert_eq!(out, [0u8; 16]);
}

#[test]
fn alloc_then_free_block_returns_bitmap_to_prior_state() {
	let mut fs = format(4096, 4096, 128);
	let free_before = fs.groups()[0].free_blocks_count;
	let block = fs.alloc_block().unwrap();
	assert_eq!(fs.groups()[0].free_blocks_count, free_before - 1);
	fs.free_block(block).unwrap();
	assert_eq!(fs.groups()[0].free_blocks_count, free_before);
}

#[test]
fn inode_out_of_range_is_invalid() {
	let mut fs = format(4096, 4096, 128);
	assert!(matches!(fs.read_inode(0), Err(Error::Invalid)));
	assert!(matches!(fs.read_inode(u32::MAX), Err(Error::Invalid)));
	let _ = Inode::new_file(0o644, 0); // constructible without a mounted fs
}
