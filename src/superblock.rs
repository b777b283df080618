//! The on-disk superblock record and the in-memory superblock state that
//! mirrors it (§3 "Superblock", "In-memory superblock state").
//!
//! The on-disk layout is fixed-length, big-endian, and lives at a fixed
//! byte offset (§6). We encode it as a `zerocopy`-derived plain byte
//! struct (the teacher crate already leans on `zerocopy::{AsBytes,
//! FromBytes}` for disk records in `fs/ufs/inode.rs`) with every
//! multi-byte field stored pre-swapped to big-endian, so a `save_sb`/
//! `load_sb` pair is a straight byte-copy plus per-field swaps at the
//! boundary -- mirroring `commit.c`'s explicit `cpu_to_be64`/`be64_to_cpu`
//! calls.

use std::collections::BTreeMap;

use spin::Mutex;
use zerocopy::{AsBytes, FromBytes};

use crate::device::{BlockAddr, BlockDevice};
use crate::error::{CommitError, Result};
use crate::inode::{Inode, InodeNum};
use crate::log::{LogEntry, LogStage};
use crate::param::{Params, SB_LEN, SB_LOC, TUX3_MAGIC};
use crate::stash::Stash;

/// Raw, byte-exact on-disk superblock record. Every multi-byte field is
/// stored big-endian; use [`Superblock::encode`]/[`Superblock::decode`] to
/// convert to/from the host-endian [`Superblock`].
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
struct RawSuperblock {
    magic: [u8; 16],
    blockbits: [u8; 2],
    volblocks: [u8; 8],
    freeblocks: [u8; 8],
    nextalloc: [u8; 8],
    atomdictsize: [u8; 8],
    atomgen: [u8; 4],
    freeatom: [u8; 4],
    iroot: [u8; 8],
    oroot: [u8; 8],
    logchain: [u8; 8],
    logcount: [u8; 4],
    // Padding out to SB_LEN so the record has a fixed, future-proof size.
    _reserved: [u8; SB_LEN
        - (16 + 2 + 8 + 8 + 8 + 8 + 4 + 4 + 8 + 8 + 8 + 4)],
}

/// The on-disk superblock fields, in host-endian form. This is the payload
/// that survives a `save_sb`/`load_sb` round trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub blockbits: u16,
    pub volblocks: u64,
    pub freeblocks: u64,
    pub nextalloc: u64,
    pub atomdictsize: u64,
    pub atomgen: u32,
    pub freeatom: u32,
    pub iroot: u64,
    pub oroot: u64,
    pub logchain: BlockAddr,
    pub logcount: u32,
}

impl Superblock {
    /// Encode into the fixed-length on-disk byte record.
    fn encode(&self) -> [u8; SB_LEN] {
        let raw = RawSuperblock {
            magic: TUX3_MAGIC,
            blockbits: self.blockbits.to_be_bytes(),
            volblocks: self.volblocks.to_be_bytes(),
            freeblocks: self.freeblocks.to_be_bytes(),
            nextalloc: self.nextalloc.to_be_bytes(),
            atomdictsize: self.atomdictsize.to_be_bytes(),
            atomgen: self.atomgen.to_be_bytes(),
            freeatom: self.freeatom.to_be_bytes(),
            iroot: self.iroot.to_be_bytes(),
            oroot: self.oroot.to_be_bytes(),
            logchain: self.logchain.to_be_bytes(),
            logcount: self.logcount.to_be_bytes(),
            _reserved: [0; SB_LEN - (16 + 2 + 8 + 8 + 8 + 8 + 4 + 4 + 8 + 8 + 8 + 4)],
        };
        let mut out = [0u8; SB_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode from the fixed-length on-disk byte record. Fails if the
    /// magic does not match (§7 "Corruption").
    fn decode(bytes: &[u8; SB_LEN]) -> Result<Self> {
        let raw = RawSuperblock::read_from(bytes.as_slice())
            .expect("RawSuperblock is a plain byte struct sized exactly SB_LEN");
        if raw.magic != TUX3_MAGIC {
            return Err(CommitError::Corruption {
                expected: u64::from_be_bytes(TUX3_MAGIC[0..8].try_into().unwrap()),
                found: u64::from_be_bytes(raw.magic[0..8].try_into().unwrap()),
            });
        }
        Ok(Superblock {
            blockbits: u16::from_be_bytes(raw.blockbits),
            volblocks: u64::from_be_bytes(raw.volblocks),
            freeblocks: u64::from_be_bytes(raw.freeblocks),
            nextalloc: u64::from_be_bytes(raw.nextalloc),
            atomdictsize: u64::from_be_bytes(raw.atomdictsize),
            atomgen: u32::from_be_bytes(raw.atomgen),
            freeatom: u32::from_be_bytes(raw.freeatom),
            iroot: u64::from_be_bytes(raw.iroot),
            oroot: u64::from_be_bytes(raw.oroot),
            logchain: u64::from_be_bytes(raw.logchain),
            logcount: u32::from_be_bytes(raw.logcount),
        })
    }

    /// Read and validate the superblock from `device` at its fixed
    /// location (`load_sb`).
    pub fn load(device: &impl BlockDevice) -> Result<Self> {
        let mut bytes = [0u8; SB_LEN];
        device.read(SB_LOC, &mut bytes)?;
        Self::decode(&bytes)
    }

    /// Write the superblock to `device` at its fixed location (`save_sb`).
    /// This is the atomic commit point for a delta: once this call
    /// returns, the delta is durable.
    pub fn save(&self, device: &impl BlockDevice) -> Result<()> {
        let bytes = self.encode();
        device.write(SB_LOC, &bytes)
    }
}

/// The full in-memory superblock state (§3 "In-memory superblock state"):
/// the on-disk fields plus everything the commit engine tracks between
/// commits.
///
/// Inodes are owned here in a simple arena keyed by inode number (Design
/// Note §9's recommendation, simplified from the teacher's unsafe
/// pointer-pool `Arena` to a `BTreeMap` since nothing here needs the
/// teacher's no-allocator-after-boot constraint). Dirty/alloc/orphan
/// tracking is expressed as sets of inode numbers resolved through this
/// map, never as stored references, so there is no reference cycle to
/// reason about.
pub struct SuperblockState {
    pub disk: Superblock,

    /// Monotonic counter of committed deltas.
    pub delta: u64,
    /// Monotonic counter of completed rollups.
    pub rollup: u64,

    /// Log blocks staged so far this delta. Behind its own lock, like
    /// `defree`/`derollup`: §4.3 names the bitmap allocator, orphan
    /// tracker, and free-tracker as log-producing callers during any
    /// delta, not just inside `do_commit`'s fixed steps, so a frontend
    /// thread holding `delta_lock` only shared must still be able to
    /// stage an entry (§5).
    pub log_stage: Mutex<LogStage>,

    /// Frees generated this delta; applied right after this delta's
    /// superblock write.
    pub defree: Mutex<Stash>,
    /// Frees of log blocks, applied only after the *next* rollup.
    pub derollup: Mutex<Stash>,

    /// Inodes this volume knows about, keyed by inode number. Behind its
    /// own lock (rather than requiring exclusive `delta_lock`) because a
    /// frontend operation only holds `delta_lock` shared while it marks an
    /// inode dirty (§5).
    inodes: Mutex<BTreeMap<InodeNum, Inode>>,
    /// Inode numbers currently on the dirty list (§3 "An inode is on the
    /// dirty_inodes list iff any of these bits is set").
    pub dirty_inodes: Mutex<Vec<InodeNum>>,
    /// Orphan inodes pending insertion into the orphan table.
    pub orphan_add: Mutex<Vec<InodeNum>>,
    /// Orphan inodes pending removal from the orphan table.
    pub orphan_del: Mutex<Vec<InodeNum>>,

    pub params: Params,
}

impl SuperblockState {
    /// Build the in-memory state from a freshly loaded on-disk superblock.
    pub fn new(disk: Superblock, params: Params) -> Self {
        Self {
            disk,
            delta: 0,
            rollup: 0,
            log_stage: Mutex::new(LogStage::new()),
            defree: Mutex::new(Stash::new()),
            derollup: Mutex::new(Stash::new()),
            inodes: Mutex::new(BTreeMap::new()),
            dirty_inodes: Mutex::new(Vec::new()),
            orphan_add: Mutex::new(Vec::new()),
            orphan_del: Mutex::new(Vec::new()),
            params,
        }
    }

    /// Run `f` against the in-memory record for `inum`, creating it on
    /// first use. Takes only `&self`: a frontend holding `delta_lock`
    /// shared can still mark its own inode dirty without contending with
    /// unrelated inodes (§5).
    pub fn with_inode_mut<R>(&self, inum: InodeNum, f: impl FnOnce(&mut Inode) -> R) -> R {
        let mut inodes = self.inodes.lock();
        let inode = inodes.entry(inum).or_insert_with(|| Inode::new(inum));
        f(inode)
    }

    /// True if `inum`'s in-memory record has any dirty bit set.
    pub fn inode_is_dirty(&self, inum: InodeNum) -> bool {
        self.inodes
            .lock()
            .get(&inum)
            .map(Inode::is_dirty)
            .unwrap_or(false)
    }

    /// Record a deferred free generated during this delta (§3 "Deferred-free
    /// stash", §4.3's free-tracker log-producing caller): stash it into
    /// `defree` for the post-commit `bfree` drain, and append a `BFREE`
    /// entry so the intent survives a crash even if the bitmap inode isn't
    /// persisted again until the next rollup (`rollup::run` only re-logs
    /// frees that already crossed a commit boundary, as `BFREE_RELOG`; this
    /// is the first time this free becomes durable-intent).
    ///
    /// Takes only `&self`: a frontend thread calls this while holding
    /// `delta_lock` shared, not exclusive, mirroring `mark_inode_dirty`
    /// (§5).
    pub fn record_deferred_free(&self, block: u64, count: u16) -> Result<()> {
        self.defree.lock().push(block, count);
        self.log_stage
            .lock()
            .append(LogEntry::Bfree { block, count }, self.params.block_size as usize)
    }
}
