//! Orphan table reconciliation (§4.4 step 9, GLOSSARY "Orphan").
//!
//! An orphan is an inode whose link count has reached zero but which still
//! has open references; it lives in a dedicated on-disk table until final
//! deletion. This crate only drives the two-phase apply (`del` before
//! `add`, because the same inode can appear in both lists); the table
//! itself is consumed through this trait.

use crate::error::Result;
use crate::inode::InodeNum;

/// Narrow cut of the on-disk orphan table the rollup controller needs.
pub trait OrphanTable {
    /// Insert `inum` into the orphan table.
    fn apply_add(&self, inum: InodeNum) -> Result<()>;

    /// Remove `inum` from the orphan table. Removing an inode not present
    /// is not an error (it may have been finally deleted by a prior
    /// rollup).
    fn apply_del(&self, inum: InodeNum) -> Result<()>;
}

/// Snapshot-and-clear working lists for one rollup's orphan reconciliation.
///
/// `OrphanLists::take` detaches the frontend-visible lists so new
/// `orphan_add`/`orphan_del` entries recorded during the rollup itself
/// belong to the *next* cycle, matching `rollup_log`'s
/// `list_splice_init(&sb->orphan_add, &orphan_add)`.
#[derive(Debug, Default)]
pub struct OrphanLists {
    pub add: Vec<InodeNum>,
    pub del: Vec<InodeNum>,
}

impl OrphanLists {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }

    /// Apply `del` before `add`: an inode present in both lists must end up
    /// present in the table (§4.4 step 9, base-spec boundary behavior).
    pub fn reconcile(mut self, table: &impl OrphanTable) -> Result<()> {
        for inum in self.del.drain(..) {
            table.apply_del(inum)?;
        }
        for inum in self.add.drain(..) {
            table.apply_add(inum)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    struct FakeTable(RefCell<BTreeSet<InodeNum>>);

    impl OrphanTable for FakeTable {
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
    fn collision_deletes_before_inserting() {
        let table = FakeTable(RefCell::new(BTreeSet::new()));
        let lists = OrphanLists {
            add: vec![42],
            del: vec![42],
        };
        lists.reconcile(&table).unwrap();
        assert!(table.0.borrow().contains(&42));
    }
}
