//! Inode dirty-state tracking (§3 "Inode dirty state", §4.6).
//!
//! An inode's dirty bits decide whether it sits on the superblock's
//! `dirty_inodes` list; the bitmap and volume-map inodes are tracked the
//! same way but are flushed by the rollup and leaf-write steps instead of
//! by `sync_inodes`.

use bitflags::bitflags;

/// Identifies an inode. Kept as a bare `u64` (not a newtype with derived
/// traits beyond `Copy`/`Ord`) because it is used as a `BTreeMap` key
/// throughout and as the orphan table's payload.
pub type InodeNum = u64;

bitflags! {
    /// Mirrors the source's `I_DIRTY_SYNC | I_DIRTY_DATASYNC | I_DIRTY_PAGES`.
    pub struct DirtyState: u8 {
        /// Inode attributes (size, mtime, link count, ...) changed.
        const SYNC = 0b001;
        /// A data-integrity-relevant attribute changed (distinct from
        /// SYNC so a future writeback policy can fsync one without the
        /// other; the engine itself treats them identically at flush time,
        /// per §4.6 step 3).
        const DATASYNC = 0b010;
        /// The inode's data pages (buffers) are dirty.
        const PAGES = 0b100;
    }
}

impl DirtyState {
    /// Bits that require an inode-record flush (`write_inode`).
    pub const RECORD: Self = Self::from_bits_truncate(Self::SYNC.bits | Self::DATASYNC.bits);
}

/// Minimal in-memory inode record the commit engine tracks. The actual
/// inode contents (b-tree, attributes, ...) belong to the itable/otable
/// layer outside this crate; this struct only carries what the writeback
/// coordinator needs to decide what and when to flush.
#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub inum: InodeNum,
    pub state: DirtyState,
}

impl Inode {
    pub fn new(inum: InodeNum) -> Self {
        Self {
            inum,
            state: DirtyState::empty(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.state.is_empty()
    }
}

/// Reserved inode numbers for the two inodes `sync_inodes` must skip
/// (§4.6): they are flushed by the rollup and leaf-write steps instead.
pub const BITMAP_INO: InodeNum = 1;
pub const VOLMAP_INO: InodeNum = 2;

/// Capability the host filesystem supplies to actually persist an inode's
/// record and data pages (§6 "Inode-flush interface").
pub trait InodeFlush {
    /// Write the inode's on-disk record (attributes etc.).
    fn write_inode(&self, inum: InodeNum) -> crate::error::Result<()>;

    /// Flush the dirty data-page buffers belonging to this inode's
    /// mapping.
    fn flush_buffers(&self, inum: InodeNum) -> crate::error::Result<()>;
}
