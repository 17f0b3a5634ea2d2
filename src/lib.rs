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

//! The ext2 storage engine: block cache, metadata engine, and namespace engine
//! for a small kernel's filesystem layer.
//!
//! This crate owns everything below the VFS: turning a [`device::BlockDevice`]
//! into a mounted [`ext2::Fs`] that resolves names to inodes and inodes to
//! bytes. It does not implement a VFS itself — no pathname resolution, no
//! file-descriptor table, no mount table — those stay above this layer, which
//! only exposes the per-inode operations a VFS adapter calls into.
#![no_std]

extern crate alloc;

pub mod cache;
pub mod device;
pub mod error;
pub mod ext2;

pub use cache::BlockCache;
pub use device::BlockDevice;
pub use error::{Error, FsResult};
pub use ext2::Fs;
