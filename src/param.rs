//! Tunable constants and the [`Params`] configuration bundle.
//!
//! The original source hardcodes most of these (`SB_LOC`, `SB_LEN`,
//! `LOGSIZE`-equivalent staging capacity). We keep the free constants for
//! on-disk layout, which cannot vary per volume, and move the two policy
//! thresholds into [`Params`] so tests can instantiate independent volumes
//! (Design Note §9: "re-architect as fields of the superblock").

/// Fixed byte offset of the superblock on disk.
pub const SB_LOC: u64 = 4096;

/// Fixed length in bytes of the encoded superblock record.
pub const SB_LEN: usize = 96;

/// 16-byte magic stamped at the start of the on-disk superblock.
pub const TUX3_MAGIC: [u8; 16] = *b"tux3_commit_v0\0\0";

/// Magic stamped at the start of every on-disk log block.
pub const TUX3_MAGIC_LOG: u16 = 0xc0de;

/// Maximum number of log blocks staged in memory during a single delta.
///
/// Corresponds to the teacher's `LOGSIZE` (`MAXOPBLOCKS * 3`): enough room
/// for the blocks a handful of concurrent frontend operations can dirty
/// before the committer drains them.
pub const LOGSIZE: usize = 30;

/// Per-volume tunables that are not part of the fixed on-disk layout.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Block size in bytes. Must match the volume the superblock was
    /// formatted with.
    pub block_size: u32,

    /// Number of `end_change` calls between delta commits, consumed by the
    /// stub `need_delta` policy.
    pub delta_period: u32,

    /// Number of delta commits between rollups, consumed by the stub
    /// `need_rollup` policy.
    pub rollup_period: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            block_size: 4096,
            delta_period: 10,
            rollup_period: 3,
        }
    }
}
