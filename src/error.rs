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

//! Error codes surfaced by the storage engine.
//!
//! Every public operation returns [`FsResult`]. Nothing in this crate panics on a
//! reachable error path; retry policy is left entirely to the caller.

/// Result type returned by every public operation of this crate.
pub type FsResult<T> = Result<T, Error>;

/// An error surfaced by the block cache, metadata engine, or namespace engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// Malformed input: an out-of-range inode or block number, inode 0, or a
	/// directory entry that fails its `rec_len`/`name_len` invariants.
	#[error("invalid argument")]
	Invalid,
	/// A lookup or `readdir` ordinal did not resolve to a live entry.
	#[error("not found")]
	NotFound,
	/// No free block or inode remains in any block group.
	#[error("out of space")]
	NoMemory,
	/// No cache slot could be freed because the write-back of its dirty victim
	/// failed.
	#[error("resource busy")]
	Busy,
	/// Rejected by the adapter layer above this engine.
	#[error("permission denied")]
	Permission,
	/// The underlying block device failed to service a read or write.
	#[error("I/O error")]
	Io,
}
