//! Delta controller (§4.1) and the reader/writer concurrency contract that
//! surrounds it (§5).
//!
//! `DeltaController` owns the single `delta_lock` per mounted volume. A
//! frontend mutator holds it shared for one user-visible change
//! (`begin_change`/`end_change`); the committer holds it exclusive for the
//! duration of `do_commit`. `end_change`'s promotion protocol follows the
//! snapshot-release-reacquire-recheck pattern of §5 rather than a lock
//! upgrade, per Design Note §9.

use log::{debug, trace};
use spin::{Mutex, RwLock, RwLockReadGuard};

use crate::device::{BlockAllocator, BlockDevice};
use crate::error::Result;
use crate::inode::{InodeFlush, VOLMAP_INO};
use crate::log::LogEntry;
use crate::orphan::OrphanTable;
use crate::param::Params;
use crate::policy::CommitPolicy;
use crate::rollup::{self, PinnedBuffers};
use crate::superblock::SuperblockState;
use crate::writeback::{self, flush_inode};

/// How `do_commit` should treat the optional nested rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupMode {
    /// Never rollup this delta.
    NoRollup,
    /// Rollup this delta if the rollup policy fires.
    AllowRollup,
    /// Always rollup this delta, regardless of policy.
    ForceRollup,
}

/// The external collaborators a commit needs: the narrow interfaces of §6,
/// bundled so call sites don't thread five parameters through every
/// function. Stands in for the source's weak-symbol test stubs (Design
/// Note §9: "re-architect as an explicit capability interface injected at
/// construction time").
/// `+ Sync` on every trait object: §5's concurrency model has multiple
/// frontend threads holding `delta_lock` shared at once, each able to call
/// into these collaborators concurrently, so a `&Collaborators` must
/// itself be shareable across threads.
pub struct Collaborators<'a> {
    pub device: &'a (dyn BlockDevice + Sync),
    pub allocator: &'a (dyn BlockAllocator + Sync),
    pub inode_flush: &'a (dyn InodeFlush + Sync),
    pub orphan_table: &'a (dyn OrphanTable + Sync),
    pub pinned: &'a (dyn PinnedBuffers + Sync),
}

/// Owns one mounted volume's commit state and its `delta_lock`.
pub struct DeltaController {
    state: RwLock<SuperblockState>,
    policy: Mutex<CommitPolicy>,
}

impl DeltaController {
    pub fn new(state: SuperblockState) -> Self {
        let policy = CommitPolicy::new(&state.params);
        Self {
            state: RwLock::new(state),
            policy: Mutex::new(policy),
        }
    }

    /// Acquire `delta_lock` shared for the duration of one frontend change.
    pub fn begin_change(&self) -> RwLockReadGuard<'_, SuperblockState> {
        self.state.read()
    }

    /// Read-only access to the in-memory superblock state, for tests and
    /// callers that only want to inspect counters between commits.
    pub fn inspect<R>(&self, f: impl FnOnce(&SuperblockState) -> R) -> R {
        f(&self.state.read())
    }

    /// Complete one frontend change, promoting to committer if the
    /// commit-frequency policy says this is the call that should trigger a
    /// delta (§5 "Promotion protocol").
    ///
    /// Never upgrades a lock: it releases the shared hold before
    /// acquiring exclusive, then re-checks that no other thread already
    /// committed in the gap.
    pub fn end_change(
        &self,
        guard: RwLockReadGuard<'_, SuperblockState>,
        collab: &Collaborators<'_>,
    ) -> Result<()> {
        let fire = self.policy.lock().need_delta();
        if !fire {
            drop(guard);
            return Ok(());
        }
        let snapshot = guard.delta;
        drop(guard);

        let mut write_guard = self.state.write();
        if write_guard.delta == snapshot {
            self.do_commit(&mut write_guard, RollupMode::AllowRollup, collab)
        } else {
            // Another thread's end_change already committed this delta.
            Ok(())
        }
    }

    /// Force a rollup-carrying commit regardless of policy (the source's
    /// `force_rollup`).
    pub fn force_rollup(&self, collab: &Collaborators<'_>) -> Result<()> {
        let mut guard = self.state.write();
        self.do_commit(&mut guard, RollupMode::ForceRollup, collab)
    }

    /// Force a commit with no rollup regardless of policy (the source's
    /// `force_delta`).
    pub fn force_delta(&self, collab: &Collaborators<'_>) -> Result<()> {
        let mut guard = self.state.write();
        self.do_commit(&mut guard, RollupMode::NoRollup, collab)
    }

    /// Run one delta to completion under exclusive hold of `delta_lock`.
    /// Follows §4.1's six steps in order; the superblock write (step 6) is
    /// the atomic commit point.
    fn do_commit(
        &self,
        sb: &mut SuperblockState,
        mode: RollupMode,
        collab: &Collaborators<'_>,
    ) -> Result<()> {
        let delta = sb.delta;
        sb.delta += 1;
        trace!("commit delta {delta} begin (mode={mode:?})");
        let block_size = sb.params.block_size as usize;

        // 1. Ordering landmark.
        sb.log_stage.lock().append(LogEntry::Delta, block_size)?;

        // 2. Stage delta: flush non-bitmap, non-volmap dirty inodes before
        //    any optional rollup, so this delta's modifications merge with
        //    the rollup's bitmap work and b-tree cursor-redirect invariants
        //    hold.
        writeback::sync_inodes(sb, collab.inode_flush)?;

        // 3. Conditional rollup.
        let do_rollup = match mode {
            RollupMode::ForceRollup => true,
            RollupMode::NoRollup => false,
            RollupMode::AllowRollup => self.policy.lock().need_rollup(),
        };
        if do_rollup {
            rollup::run(sb, collab.inode_flush, collab.orphan_table, collab.pinned)?;
            sb.log_stage.lock().append(LogEntry::Delta, block_size)?;
        }

        // 4. Write leaves: flush the volume-map inode through the block
        //    cache.
        flush_inode(sb, VOLMAP_INO, collab.inode_flush)?;

        // 5. Write log: allocate addresses for every staged block, write
        //    them, and thread logchain/logcount.
        let written = sb.log_stage.lock().flush(
            block_size,
            &mut sb.disk.logchain,
            &mut sb.derollup.lock(),
            collab.allocator,
            collab.device,
        )?;
        sb.disk.logcount += written;

        // 6. Commit delta: the superblock write is the atomic commit
        //    point. Only after it succeeds do we actually free the
        //    blocks staged in `defree`.
        sb.disk.save(collab.device)?;
        sb.defree
            .lock()
            .drain(|e| collab.allocator.free(e.block, e.count as u32))?;

        debug!("commit delta {delta} done (rollup={do_rollup})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::device::BlockAddr;
    use crate::inode::InodeNum;
    use crate::param::Params;
    use crate::superblock::Superblock;

    // `std::sync::Mutex` rather than `RefCell`: these fakes are shared
    // through `Collaborators`' `+ Sync` trait objects.
    struct FakeDevice(StdMutex<HashMap<BlockAddr, Vec<u8>>>);
    impl BlockDevice for FakeDevice {
        fn read(&self, addr: BlockAddr, buf: &mut [u8]) -> Result<()> {
            let map = self.0.lock().unwrap();
            let data = map
                .get(&addr)
                .ok_or(crate::error::CommitError::Invariant("read of unwritten block"))?;
            buf.copy_from_slice(&data[..buf.len()]);
            Ok(())
        }
        fn write(&self, addr: BlockAddr, buf: &[u8]) -> Result<()> {
            self.0.lock().unwrap().insert(addr, buf.to_vec());
            Ok(())
        }
    }

    struct FakeAllocator(StdMutex<u64>);
    impl BlockAllocator for FakeAllocator {
        fn allocate(&self, _count: u32) -> Result<BlockAddr> {
            let mut next = self.0.lock().unwrap();
            *next += 1;
            Ok(*next)
        }
        fn free(&self, _addr: BlockAddr, _count: u32) -> Result<()> {
            Ok(())
        }
    }

    struct FakeFlusher;
    impl InodeFlush for FakeFlusher {
        fn write_inode(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
        fn flush_buffers(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
    }

    struct FakeOrphanTable;
    impl OrphanTable for FakeOrphanTable {
        fn apply_add(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
        fn apply_del(&self, _inum: InodeNum) -> Result<()> {
            Ok(())
        }
    }

    struct FakePinned;
    impl PinnedBuffers for FakePinned {
        fn flush_pinned(&self) -> Result<()> {
            Ok(())
        }
    }

    fn blank_controller(delta_period: u32, rollup_period: u32) -> DeltaController {
        let disk = Superblock {
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
        };
        let params = Params {
            delta_period,
            rollup_period,
            ..Params::default()
        };
        DeltaController::new(SuperblockState::new(disk, params))
    }

    fn collab<'a>(
        device: &'a FakeDevice,
        allocator: &'a FakeAllocator,
        flusher: &'a FakeFlusher,
        orphans: &'a FakeOrphanTable,
        pinned: &'a FakePinned,
    ) -> Collaborators<'a> {
        Collaborators {
            device,
            allocator,
            inode_flush: flusher,
            orphan_table: orphans,
            pinned,
        }
    }

    #[test]
    fn end_change_only_commits_on_the_period_th_call() {
        let controller = blank_controller(2, 100);
        let device = FakeDevice(StdMutex::new(HashMap::new()));
        let allocator = FakeAllocator(StdMutex::new(0));
        let flusher = FakeFlusher;
        let orphans = FakeOrphanTable;
        let pinned = FakePinned;
        let c = collab(&device, &allocator, &flusher, &orphans, &pinned);

        let guard = controller.begin_change();
        controller.end_change(guard, &c).unwrap();
        assert_eq!(controller.inspect(|sb| sb.delta), 0);

        let guard = controller.begin_change();
        controller.end_change(guard, &c).unwrap();
        assert_eq!(controller.inspect(|sb| sb.delta), 1);
    }

    #[test]
    fn force_delta_commits_regardless_of_policy() {
        let controller = blank_controller(1000, 1000);
        let device = FakeDevice(StdMutex::new(HashMap::new()));
        let allocator = FakeAllocator(StdMutex::new(0));
        let flusher = FakeFlusher;
        let orphans = FakeOrphanTable;
        let pinned = FakePinned;
        let c = collab(&device, &allocator, &flusher, &orphans, &pinned);

        controller.force_delta(&c).unwrap();
        assert_eq!(controller.inspect(|sb| sb.delta), 1);
        assert_eq!(controller.inspect(|sb| sb.rollup), 0);
    }

    #[test]
    fn force_rollup_always_rolls_up() {
        let controller = blank_controller(1000, 1000);
        let device = FakeDevice(StdMutex::new(HashMap::new()));
        let allocator = FakeAllocator(StdMutex::new(0));
        let flusher = FakeFlusher;
        let orphans = FakeOrphanTable;
        let pinned = FakePinned;
        let c = collab(&device, &allocator, &flusher, &orphans, &pinned);

        controller.force_rollup(&c).unwrap();
        assert_eq!(controller.inspect(|sb| sb.rollup), 1);
    }

    #[test]
    fn marking_an_inode_dirty_while_holding_the_shared_guard_does_not_deadlock() {
        let controller = blank_controller(1000, 1000);
        let guard = controller.begin_change();
        crate::writeback::mark_inode_dirty(&guard, 42, crate::inode::DirtyState::SYNC);
        assert!(guard.inode_is_dirty(42));
        drop(guard);
    }
}
