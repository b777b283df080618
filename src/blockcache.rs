//! Block-cache interface consumed by the writeback coordinator and the
//! volume-map (leaf/bnode) flush step (§6).
//!
//! This crate never allocates cache buffers itself; it asks the cache for a
//! buffer, reads/writes the bytes behind it, and returns it.

use crate::device::BlockAddr;
use crate::error::Result;

/// Which direction a cache I/O goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rw {
    Read,
    Write,
}

/// A cached block buffer. Associated type so hosts can use a refcounted
/// handle, a raw pointer, or a guard type as they see fit.
pub trait BlockCache {
    /// Identifies a mapping (an inode's data space) within the cache.
    type Mapping;
    /// A handle to one cached block.
    type Buffer;

    /// Get (or allocate) the buffer at `index` within `mapping`.
    fn get(&self, mapping: &Self::Mapping, index: u64) -> Result<Self::Buffer>;

    /// Borrow the raw bytes behind a buffer.
    fn data<'b>(&self, buffer: &'b mut Self::Buffer) -> &'b mut [u8];

    /// Perform I/O for `buffer` at the given on-disk address.
    fn io(&self, rw: Rw, buffer: &mut Self::Buffer, addr: BlockAddr) -> Result<()>;

    /// Release a buffer handle obtained from `get`.
    fn put(&self, buffer: Self::Buffer);

    /// Mark a buffer dirty (it will be written back on the next flush of
    /// its owning inode).
    fn mark_dirty(&self, buffer: &Self::Buffer);
}
