//! Redo-log record generation, staging, and flushing (§3 "Log block",
//! "Log entry kinds", §4.3).
//!
//! Log blocks are built up in memory during a delta (`LogStage`) and
//! written out as one of the last steps of `do_commit`. Each on-disk log
//! block begins with a magic and a `logchain` back-pointer to the
//! previously-written log block, forming a singly linked reverse chain
//! whose head lives in the superblock.

use arrayvec::ArrayVec;
use static_assertions::const_assert;

use crate::device::{BlockAddr, BlockAllocator, BlockDevice};
use crate::error::{CommitError, Result};
use crate::param::{LOGSIZE, TUX3_MAGIC_LOG};
use crate::stash::Stash;

/// One-byte type tag leading every on-disk log entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Delta = 1,
    Rollup = 2,
    FreeBlocks = 3,
    Bfree = 4,
    BfreeRelog = 5,
}

impl Tag {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Tag::Delta,
            2 => Tag::Rollup,
            3 => Tag::FreeBlocks,
            4 => Tag::Bfree,
            5 => Tag::BfreeRelog,
            _ => return None,
        })
    }
}

/// A single redo-log record. Encoding/decoding are pure functions on
/// `(kind, payload)`, per Design Note §9: new kinds extend the variant
/// without touching existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntry {
    /// Marker inserted at the start of each delta (debug aid, ordering
    /// landmark).
    Delta,
    /// Marker inserted at the start of each new rollup cycle.
    Rollup,
    /// Snapshot of the free-block count, emitted once per rollup to seed
    /// bitmap recovery.
    FreeBlocks { free: u64 },
    /// A deferred-free intent newly recorded this delta.
    Bfree { block: u64, count: u16 },
    /// A deferred-free intent re-emitted across a rollup boundary.
    BfreeRelog { block: u64, count: u16 },
}

impl LogEntry {
    /// Worst-case encoded size of any entry kind, used to decide whether a
    /// new entry fits in the block currently being staged.
    pub const MAX_ENCODED_LEN: usize = 1 + 8 + 2;

    fn tag(&self) -> Tag {
        match self {
            LogEntry::Delta => Tag::Delta,
            LogEntry::Rollup => Tag::Rollup,
            LogEntry::FreeBlocks { .. } => Tag::FreeBlocks,
            LogEntry::Bfree { .. } => Tag::Bfree,
            LogEntry::BfreeRelog { .. } => Tag::BfreeRelog,
        }
    }

    /// Append this entry's encoding to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        match *self {
            LogEntry::Delta | LogEntry::Rollup => {}
            LogEntry::FreeBlocks { free } => buf.extend_from_slice(&free.to_be_bytes()),
            LogEntry::Bfree { block, count } | LogEntry::BfreeRelog { block, count } => {
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(&count.to_be_bytes());
            }
        }
    }

    /// Decode one entry from the front of `buf`, returning it and the
    /// number of bytes consumed. Returns `None` on a zero tag byte (the
    /// zero-padding written by `log_finish`) or truncated input.
    pub fn decode_one(buf: &[u8]) -> Option<(LogEntry, usize)> {
        let (&tag_byte, rest) = buf.split_first()?;
        if tag_byte == 0 {
            return None;
        }
        let tag = Tag::from_byte(tag_byte)?;
        match tag {
            Tag::Delta => Some((LogEntry::Delta, 1)),
            Tag::Rollup => Some((LogEntry::Rollup, 1)),
            Tag::FreeBlocks => {
                let bytes: [u8; 8] = rest.get(0..8)?.try_into().ok()?;
                Some((
                    LogEntry::FreeBlocks {
                        free: u64::from_be_bytes(bytes),
                    },
                    1 + 8,
                ))
            }
            Tag::Bfree | Tag::BfreeRelog => {
                let block_bytes: [u8; 8] = rest.get(0..8)?.try_into().ok()?;
                let count_bytes: [u8; 2] = rest.get(8..10)?.try_into().ok()?;
                let block = u64::from_be_bytes(block_bytes);
                let count = u16::from_be_bytes(count_bytes);
                let entry = if tag == Tag::Bfree {
                    LogEntry::Bfree { block, count }
                } else {
                    LogEntry::BfreeRelog { block, count }
                };
                Some((entry, 1 + 8 + 2))
            }
        }
    }
}

/// Fixed header every on-disk log block begins with: a magic and the
/// back-pointer to the previous log block in the chain.
const HEADER_LEN: usize = 2 + 8;
const_assert!(HEADER_LEN < 512);

/// One log block as staged in memory: a growing byte buffer that will
/// eventually be padded to `block_size` and written to an allocated
/// address.
#[derive(Debug, Clone)]
struct LogBlock {
    body: Vec<u8>,
    finished: bool,
}

impl LogBlock {
    fn new() -> Self {
        Self {
            body: Vec::new(),
            finished: false,
        }
    }

    fn remaining(&self, block_size: usize) -> usize {
        block_size.saturating_sub(HEADER_LEN + self.body.len())
    }

    fn finish(&mut self, block_size: usize) {
        if self.finished {
            return;
        }
        self.body.resize(block_size - HEADER_LEN, 0);
        self.finished = true;
    }

    /// Render the on-disk bytes for this block, given the `logchain`
    /// back-pointer it should carry.
    fn render(&self, block_size: usize, logchain: BlockAddr) -> Vec<u8> {
        let mut out = Vec::with_capacity(block_size);
        out.extend_from_slice(&TUX3_MAGIC_LOG.to_be_bytes());
        out.extend_from_slice(&logchain.to_be_bytes());
        out.extend_from_slice(&self.body);
        out.resize(block_size, 0);
        out
    }
}

/// The in-memory log staging area: `logmap`/`lognext` of the base spec.
/// Owned by the superblock state; mutated only under `delta_lock`.
#[derive(Debug, Clone)]
pub struct LogStage {
    blocks: ArrayVec<LogBlock, LOGSIZE>,
}

impl LogStage {
    pub fn new() -> Self {
        Self {
            blocks: ArrayVec::new(),
        }
    }

    /// Number of blocks staged so far this delta (`lognext`).
    pub fn staged_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append `entry` to the currently open block, opening a fresh one if
    /// it doesn't fit (or if none is open yet).
    pub fn append(&mut self, entry: LogEntry, block_size: usize) -> Result<()> {
        let needs_new_block = match self.blocks.last() {
            Some(b) => b.finished || b.remaining(block_size) < LogEntry::MAX_ENCODED_LEN,
            None => true,
        };
        if needs_new_block {
            self.blocks
                .try_push(LogBlock::new())
                .map_err(|_| CommitError::Allocation("log staging area exhausted".into()))?;
        }
        let block = self.blocks.last_mut().expect("just ensured one exists");
        entry.encode(&mut block.body);
        Ok(())
    }

    /// Close the currently open block (zero-pad, finalize) so that
    /// `staged_len()` blocks are ready to write. Idempotent.
    pub fn finish(&mut self, block_size: usize) {
        if let Some(block) = self.blocks.last_mut() {
            block.finish(block_size);
        }
    }

    /// Allocate disk addresses for every staged block, write them in
    /// order, and thread `logchain` through them. On success, stashes a
    /// deferred free of each written block into `derollup` (log blocks
    /// live for one extra rollup) and returns the number of blocks
    /// finalized this delta (`log_finish_cycle`'s return value), clearing
    /// the stage.
    ///
    /// On a write failure partway through, the just-allocated block for
    /// the failing index is freed again before the error propagates, and
    /// blocks not yet processed remain staged (their caller-visible state
    /// is as if flush had not been called for them) -- mirroring
    /// `write_log`'s per-index free-on-failure in the source.
    pub fn flush(
        &mut self,
        block_size: usize,
        logchain: &mut BlockAddr,
        derollup: &mut Stash,
        allocator: &impl BlockAllocator,
        device: &impl BlockDevice,
    ) -> Result<u32> {
        self.finish(block_size);
        let mut written = 0u32;
        for block in &self.blocks {
            let addr = allocator.allocate(1)?;
            // Guard the allocation so a write failure frees it again; a
            // successful write defuses the guard by unwrapping it.
            let addr = scopeguard::guard(addr, |addr| {
                let _ = allocator.free(addr, 1);
            });
            let bytes = block.render(block_size, *logchain);
            device.write(*addr, &bytes)?;
            let addr = scopeguard::ScopeGuard::into_inner(addr);
            derollup.push(addr, 1);
            *logchain = addr;
            written += 1;
        }
        self.blocks.clear();
        Ok(written)
    }
}

impl Default for LogStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode every entry in one on-disk log block's body (the bytes after the
/// fixed header), stopping at the first zero-padding byte.
pub fn decode_block_entries(body: &[u8]) -> Vec<LogEntry> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while cursor < body.len() {
        match LogEntry::decode_one(&body[cursor..]) {
            Some((entry, consumed)) => {
                out.push(entry);
                cursor += consumed;
            }
            None => break,
        }
    }
    out
}

/// Split the header of a log block read from disk into `(magic, logchain)`.
pub fn decode_header(block: &[u8]) -> Option<(u16, BlockAddr)> {
    let magic = u16::from_be_bytes(block.get(0..2)?.try_into().ok()?);
    let logchain = u64::from_be_bytes(block.get(2..10)?.try_into().ok()?);
    Some((magic, logchain))
}
