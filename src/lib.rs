//! tux3-commit: the delta/rollup commit engine of a copy-on-write,
//! block-based filesystem.
//!
//! This crate turns in-memory modifications made by frontend operations
//! into a consistent, crash-recoverable on-disk state. It owns the
//! atomic unit of durability (the delta), the outer reclamation cycle
//! (the rollup), the redo log of block-allocator intents, the
//! deferred-free stash, and the reader/writer concurrency contract that
//! guards a commit.
//!
//! The b-tree implementation, block allocator, buffered block cache,
//! regular-file inode writeback, and on-disk directory/atom tables are
//! external collaborators, consumed through the narrow traits in
//! [`device`], [`btree`], [`blockcache`], [`inode`], and [`orphan`].

#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

pub mod blockcache;
pub mod btree;
pub mod delta;
pub mod device;
pub mod error;
pub mod inode;
pub mod log;
pub mod orphan;
pub mod param;
pub mod policy;
pub mod rollup;
pub mod stash;
pub mod superblock;
pub mod writeback;

pub use delta::{Collaborators, DeltaController, RollupMode};
pub use error::{CommitError, Result};
pub use param::Params;
pub use superblock::{Superblock, SuperblockState};
