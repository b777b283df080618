//! Commit-frequency policy (§4.2).
//!
//! `need_delta`/`need_rollup` must be deterministic functions of in-memory
//! counters for test reproducibility. The source keeps these as
//! module-local statics (`static unsigned crudehack`); Design Note §9
//! flags that as something to re-architect so independent volumes don't
//! cross-contaminate in tests. Here they are plain fields of
//! [`CommitPolicy`], one instance per volume.

use crate::param::Params;

/// Stub commit-frequency policy: fires every `delta_period` `end_change`
/// calls, and every `rollup_period` delta commits. A real policy would
/// hook dirty-byte budgets or a timer instead; the state machine only
/// depends on these two predicates being pure and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct CommitPolicy {
    delta_period: u32,
    rollup_period: u32,
    end_change_count: u32,
    delta_commit_count: u32,
}

impl CommitPolicy {
    pub fn new(params: &Params) -> Self {
        Self {
            delta_period: params.delta_period.max(1),
            rollup_period: params.rollup_period.max(1),
            end_change_count: 0,
            delta_commit_count: 0,
        }
    }

    /// Called once per `end_change`. Returns whether this call should
    /// trigger a delta commit.
    pub fn need_delta(&mut self) -> bool {
        self.end_change_count += 1;
        self.end_change_count % self.delta_period == 0
    }

    /// Called once per completed delta commit. Returns whether this commit
    /// should also perform a rollup.
    pub fn need_rollup(&mut self) -> bool {
        self.delta_commit_count += 1;
        self.delta_commit_count % self.rollup_period == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_delta_fires_every_period_calls() {
        let params = Params {
            delta_period: 3,
            ..Params::default()
        };
        let mut policy = CommitPolicy::new(&params);
        let fired: Vec<bool> = (0..6).map(|_| policy.need_delta()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn independent_policies_do_not_share_state() {
        let params = Params::default();
        let mut a = CommitPolicy::new(&params);
        let mut b = CommitPolicy::new(&params);
        for _ in 0..params.delta_period - 1 {
            assert!(!a.need_delta());
        }
        // `a` is one call away from firing; a fresh policy `b` must not
        // have inherited any of that progress.
        assert!(!b.need_delta());
    }
}
