//! scalefs: the scalable metadata and journaling core of a multicore
//! filesystem.
//!
//! This crate separates an in-memory object graph (the mnode graph, [`mnode`])
//! from the on-disk inode/block representation ([`inode_disk`]), coupling the
//! two through a per-cpu logical log of metadata operations ([`logical_log`])
//! and a single physical journal of disk-block writes ([`journal`]) that
//! drives a two-phase commit to storage ([`block`], [`bitmap`]). The
//! [`interface`] module is the seam between them.
//!
//! Out of scope, treated as external collaborators: the block device driver
//! beyond [`block::BlockDevice`], the page allocator, the kernel scheduler,
//! the VFS syscall layer, and the boot loader.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::needless_lifetimes)]

extern crate alloc;

#[macro_use]
pub mod diagnostics;

pub mod param;

pub mod error;

pub mod lock;

pub mod block;

pub mod bitmap;

pub mod inode_disk;

pub mod mnode;

pub mod journal;

pub mod logical_log;

pub mod interface;

#[cfg(test)]
pub mod test_support;

pub use error::{FsError, FsResult};
