//! Rollup controller (§4.4): the outer cycle that flushes the allocation
//! bitmap snapshot, reconciles accumulated orphan changes, and rotates the
//! log so everything before it can be reclaimed.

use crate::error::Result;
use crate::inode::{InodeFlush, BITMAP_INO};
use crate::log::LogEntry;
use crate::orphan::{OrphanLists, OrphanTable};
use crate::stash::Stash;
use crate::superblock::SuperblockState;
use crate::writeback::flush_inode;

/// Capability for flushing the "pinned" b-tree internal-node buffers held
/// aside so the rollup can write them out together with the bitmap
/// (GLOSSARY "Pinned buffers").
pub trait PinnedBuffers {
    fn flush_pinned(&self) -> Result<()>;
}

/// Run one rollup under the caller's already-held exclusive `delta_lock`.
///
/// Steps follow §4.4 exactly, including the two re-logging passes (frontend
/// `defree` is re-logged but not drained; `derollup` is drained, re-logged,
/// and re-inserted into `defree` so those blocks are freed at *this*
/// delta's commit point) and the orphan table's delete-before-insert
/// ordering.
pub fn run(
    sb: &mut SuperblockState,
    inode_flush: &impl InodeFlush,
    orphan_table: &impl OrphanTable,
    pinned: &impl PinnedBuffers,
) -> Result<()> {
    let block_size = sb.params.block_size as usize;

    // 1. Snapshot and clear the frontend-visible orphan lists.
    let lists = OrphanLists {
        add: std::mem::take(&mut *sb.orphan_add.lock()),
        del: std::mem::take(&mut *sb.orphan_del.lock()),
    };

    // 2. Start a new log cycle: old logs are about to be obsoleted.
    sb.disk.logcount = 0;

    // 3. Append a ROLLUP marker.
    sb.log_stage.lock().append(LogEntry::Rollup, block_size)?;

    // 4. Append a FREEBLOCKS snapshot to seed bitmap recovery.
    sb.log_stage
        .lock()
        .append(LogEntry::FreeBlocks { free: sb.disk.freeblocks }, block_size)?;

    // 5. Re-log frontend-deferred frees without draining `defree`: they
    //    will still be applied at this delta's commit.
    let mut relog_entries = Vec::new();
    sb.defree.lock().walk(|e| relog_entries.push(e));
    for e in relog_entries {
        sb.log_stage.lock().append(
            LogEntry::BfreeRelog {
                block: e.block,
                count: e.count,
            },
            block_size,
        )?;
    }

    // 6. Re-log and drain cross-rollup frees, re-inserting them into
    //    `defree` so they are applied at this delta's commit point.
    let mut drained = Stash::new();
    std::mem::swap(&mut drained, &mut sb.derollup.lock());
    let mut carry_forward = Vec::new();
    drained.walk(|e| carry_forward.push(e));
    for e in carry_forward {
        sb.log_stage.lock().append(
            LogEntry::BfreeRelog {
                block: e.block,
                count: e.count,
            },
            block_size,
        )?;
        sb.defree.lock().push(e.block, e.count);
    }

    // 7. Flush pinned b-tree node buffers.
    pinned.flush_pinned()?;

    // 8. Flush the bitmap inode. This may (re)dirty further bitmap
    //    blocks; those belong to the *next* rollup cycle by design.
    flush_inode(sb, BITMAP_INO, inode_flush)?;

    // 9. Apply orphan_del before orphan_add: the same inode number can
    //    appear in both, and insertion must win.
    lists.reconcile(orphan_table)?;

    // 10. Advance the rollup counter.
    sb.rollup += 1;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeNum;
    use crate::param::Params;
    use crate::superblock::Superblock;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    fn blank_sb() -> SuperblockState {
        SuperblockState::new(
            Superblock {
                blockbits: 12,
                volblocks: 0,
                freeblocks: 777,
                nextalloc: 0,
                atomdictsize: 0,
                atomgen: 0,
                freeatom: 0,
                iroot: 0,
                oroot: 0,
                logchain: 0,
                logcount: 3,
            },
            Params::default(),
        )
    }

    struct NoopFlusher;
    impl InodeFlush for NoopFlusher {
        fn write_inode(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
        fn flush_buffers(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
    }

    struct NoopPinned;
    impl PinnedBuffers for NoopPinned {
        fn flush_pinned(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeOrphanTable(RefCell<BTreeSet<InodeNum>>);
    impl OrphanTable for FakeOrphanTable {
        fn apply_add(&self, inum: InodeNum) -> Result<()> {
            self.0.borrow_mut().insert(inum);
            Ok(())
        }
        fn apply_del(&self, inum: InodeNum) -> Result<()> {
            self.0.borrow_mut().remove(&inum);
            Ok(())
        }
    }

    #[test]
    fn rollup_resets_logcount_and_bumps_counter() {
        let mut sb = blank_sb();
        run(&mut sb, &NoopFlusher, &FakeOrphanTable(RefCell::new(BTreeSet::new())), &NoopPinned).unwrap();
        assert_eq!(sb.rollup, 1);
        // logcount was reset to 0 then the rollup's own log entries were
        // staged (not yet flushed to disk, so disk.logcount stays 0 until
        // write_log runs).
        assert_eq!(sb.disk.logcount, 0);
        assert!(!sb.log_stage.lock().is_empty());
    }

    #[test]
    fn derollup_entries_move_to_defree_and_are_relogged() {
        let mut sb = blank_sb();
        sb.derollup.lock().push(0x55, 1);
        run(&mut sb, &NoopFlusher, &FakeOrphanTable(RefCell::new(BTreeSet::new())), &NoopPinned).unwrap();
        assert!(sb.derollup.lock().is_empty());
        assert_eq!(sb.defree.lock().len(), 1);
        sb.defree.lock().walk(|e| assert_eq!(e.block, 0x55));
    }

    #[test]
    fn orphan_collision_survives_as_present() {
        let mut sb = blank_sb();
        sb.orphan_add.lock().push(42);
        sb.orphan_del.lock().push(42);
        let table = FakeOrphanTable(RefCell::new(BTreeSet::new()));
        run(&mut sb, &NoopFlusher, &table, &NoopPinned).unwrap();
        assert!(table.0.borrow().contains(&42));
        assert!(sb.orphan_add.lock().is_empty());
        assert!(sb.orphan_del.lock().is_empty());
    }
}
