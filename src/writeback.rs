//! Writeback coordinator (§4.6): dirty tracking and the fixed flush order
//! that skips the bitmap and volume-map inodes (they are flushed by the
//! rollup and leaf-write steps instead).

use crate::error::Result;
use crate::inode::{DirtyState, InodeFlush, InodeNum, BITMAP_INO, VOLMAP_INO};
use crate::superblock::SuperblockState;

/// ORs `flags` into `inum`'s state and places it on the dirty list if it
/// wasn't already present (`__mark_inode_dirty`).
///
/// Takes only `&SuperblockState`: a frontend thread calls this while
/// holding `delta_lock` shared (between `begin_change`/`end_change`), not
/// exclusive, so the underlying tracking is its own fine-grained lock
/// rather than riding on the coarse `delta_lock` (§5).
pub fn mark_inode_dirty(sb: &SuperblockState, inum: InodeNum, flags: DirtyState) {
    let was_clean = sb.with_inode_mut(inum, |inode| {
        let was_clean = inode.state.is_empty();
        inode.state |= flags;
        was_clean
    });
    if was_clean {
        sb.dirty_inodes.lock().push(inum);
    }
}

/// Marks the owning inode's page-dirty flag (`mark_buffer_dirty`).
pub fn mark_buffer_dirty(sb: &SuperblockState, owning_inode: InodeNum) {
    mark_inode_dirty(sb, owning_inode, DirtyState::PAGES);
}

/// Flush one inode: clear its dirty bits before flushing (so a concurrent
/// re-dirty is captured for the next delta), flush data pages if
/// `DIRTY_PAGES` was set, then the inode record if `DIRTY_SYNC` or
/// `DIRTY_DATASYNC` was set.
pub(crate) fn flush_inode(sb: &SuperblockState, inum: InodeNum, flusher: &impl InodeFlush) -> Result<()> {
    let dirty = sb.with_inode_mut(inum, |inode| {
        let dirty = inode.state;
        inode.state = DirtyState::empty();
        dirty
    });
    if dirty.contains(DirtyState::PAGES) {
        flusher.flush_buffers(inum)?;
    }
    if dirty.intersects(DirtyState::RECORD) {
        flusher.write_inode(inum)?;
    }
    Ok(())
}

/// Detach the dirty list, flush every non-special inode on it, and return.
/// On error, splices the untraversed remainder back onto the head of
/// `dirty_inodes` so nothing is forgotten.
///
/// The bitmap and volume-map inodes are deliberately skipped here even if
/// they appear on the dirty list (flushing an inode can dirty the bitmap,
/// which is expected and handled by the rollup step, not by this
/// function).
pub fn sync_inodes(sb: &SuperblockState, flusher: &impl InodeFlush) -> Result<()> {
    let working: Vec<InodeNum> = std::mem::take(&mut *sb.dirty_inodes.lock());
    for (i, inum) in working.iter().enumerate() {
        if *inum == BITMAP_INO || *inum == VOLMAP_INO {
            continue;
        }
        if let Err(e) = flush_inode(sb, *inum, flusher) {
            // Splice the untraversed remainder back onto the head of the
            // dirty list (it was emptied by the `mem::take` above).
            let mut guard = sb.dirty_inodes.lock();
            let mut remainder = working[i + 1..].to_vec();
            remainder.append(&mut guard);
            *guard = remainder;
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Params;
    use crate::superblock::Superblock;
    use std::cell::RefCell;

    fn blank_sb() -> SuperblockState {
        SuperblockState::new(
            Superblock {
                blockbits: 12,
                volblocks: 0,
                freeblocks: 0,
                nextalloc: 0,
                atomdictsize: 0,
                atomgen: 0,
                freeatom: 0,
                iroot: 0,
                oroot: 0,
                logchain: 0,
                logcount: 0,
            },
            Params::default(),
        )
    }

    struct FakeFlusher {
        inode_writes: RefCell<Vec<InodeNum>>,
        buffer_flushes: RefCell<Vec<InodeNum>>,
    }

    impl InodeFlush for FakeFlusher {
        fn write_inode(&self, inum: InodeNum) -> Result<()> {
            self.inode_writes.borrow_mut().push(inum);
            Ok(())
        }
        fn flush_buffers(&self, inum: InodeNum) -> Result<()> {
            self.buffer_flushes.borrow_mut().push(inum);
            Ok(())
        }
    }

    #[test]
    fn sync_inodes_skips_bitmap_and_volmap() {
        let sb = blank_sb();
        mark_inode_dirty(&sb, 10, DirtyState::SYNC);
        mark_inode_dirty(&sb, BITMAP_INO, DirtyState::SYNC);
        mark_inode_dirty(&sb, VOLMAP_INO, DirtyState::PAGES);
        let flusher = FakeFlusher {
            inode_writes: RefCell::new(vec![]),
            buffer_flushes: RefCell::new(vec![]),
        };
        sync_inodes(&sb, &flusher).unwrap();
        assert_eq!(*flusher.inode_writes.borrow(), vec![10]);
        assert!(flusher.buffer_flushes.borrow().is_empty());
        // Bitmap/volmap stay "dirty" in-memory; they're cleared by the
        // rollup/leaf steps instead.
        assert!(sb.inode_is_dirty(BITMAP_INO));
        assert!(sb.inode_is_dirty(VOLMAP_INO));
    }

    #[test]
    fn mark_dirty_only_enqueues_once() {
        let sb = blank_sb();
        mark_inode_dirty(&sb, 5, DirtyState::SYNC);
        mark_inode_dirty(&sb, 5, DirtyState::PAGES);
        assert_eq!(*sb.dirty_inodes.lock(), vec![5]);
        sb.with_inode_mut(5, |inode| {
            assert_eq!(inode.state, DirtyState::SYNC | DirtyState::PAGES);
        });
    }
}
