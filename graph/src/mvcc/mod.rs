//! Multi-version concurrency control.
//!
//! The engine issues monotonically increasing transaction ids and gives every
//! transaction a snapshot: the set of transaction ids that were active when it
//! began. Writers never block readers and readers never block writers; record
//! visibility is decided entirely from the snapshot and the
//! [`CommitLog`](commit_log::CommitLog), a lock-free bitset of per-transaction
//! outcomes.
//!
//! For example, with two ongoing transactions at T=2 and T=5:
//!
//! Active set: [2, 5]
//!
//! * T5 does not see anything T2 wrote, even though 2 < 5, because version 2
//!   is in its active-set snapshot.
//! * T2 sees its own writes, but none of T5's.
//! * T2 commits by flipping its committed bit and leaving the active set. A
//!   transaction T6 beginning afterwards sees T2's writes; T5 still does not,
//!   because 2 stays in the snapshot it took at begin.
//!
//! The engine comes in two variants: [`engine::SingleNodeEngine`] is the
//! authoritative id issuer, and [`engine_master::MasterEngine`] additionally
//! serves the engine operations over a reactor connector so that
//! [`engine_worker::WorkerEngine`] peers participate in the same id space.

pub mod commit_log;
pub mod engine;
pub mod engine_master;
pub mod engine_worker;
pub mod rpc;
pub mod wal;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::mvcc::commit_log::CommitLog;

/// A transaction id. Monotonically increasing, starting at 1, never reused
/// within a process lifetime. 0 is reserved and never issued.
pub type TransactionId = u64;

/// A command counter within a single transaction, advanced between the
/// commands of a multi-command transaction.
pub type CommandId = u64;

/// The set of transaction ids that were active at some instant, immutable
/// once taken. A transaction's snapshot defines its view of the world.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    active: BTreeSet<TransactionId>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: TransactionId) {
        self.active.insert(id);
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.active.contains(&id)
    }

    /// The smallest id in the snapshot, if any.
    pub fn first(&self) -> Option<TransactionId> {
        self.active.iter().next().copied()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.active.iter().copied()
    }
}

impl FromIterator<TransactionId> for Snapshot {
    fn from_iter<I: IntoIterator<Item = TransactionId>>(iter: I) -> Self {
        Snapshot { active: iter.into_iter().collect() }
    }
}

/// A running transaction, as handed out by an engine.
///
/// Carries the commit log it was issued against, so that record visibility
/// checks stay lock-free and local to the calling thread.
pub struct Transaction {
    /// The transaction id.
    pub id: TransactionId,

    /// The current command id, starting at 1. Advanced through the engine.
    pub cid: CommandId,

    /// The ids that were active when this transaction began. Their writes are
    /// invisible to this transaction even once they commit.
    pub snapshot: Snapshot,

    clog: Arc<CommitLog>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, snapshot: Snapshot, clog: Arc<CommitLog>) -> Self {
        debug_assert!(snapshot.iter().all(|s| s < id), "snapshot id not below transaction id");
        Transaction { id, cid: 1, snapshot, clog }
    }

    /// True if `id` committed before this transaction began.
    pub fn committed_before(&self, id: TransactionId) -> bool {
        id < self.id && self.clog.is_committed(id) && !self.snapshot.contains(id)
    }

    /// The MVCC visibility predicate: whether a version created by `created`
    /// and expired by `expired` (0 when not expired) is visible here. A
    /// transaction sees its own writes and removals immediately.
    pub fn visible(&self, created: TransactionId, expired: TransactionId) -> bool {
        let sees_created = created == self.id || self.committed_before(created);
        let sees_expired = expired != 0 && (expired == self.id || self.committed_before(expired));
        sees_created && !sees_expired
    }

    pub(crate) fn commit_log(&self) -> &CommitLog {
        &self.clog
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("cid", &self.cid)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::CResult;

    /// Generates common tests for any Engine implementation.
    macro_rules! test_engine {
        ($setup:expr) => {
            use crate::error::CResult;
            use crate::mvcc::engine::Engine as _;

            #[test]
            fn begin_issues_monotonic_ids_and_snapshots() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                let t2 = engine.begin()?;
                let t3 = engine.begin()?;
                assert!(t1.id < t2.id && t2.id < t3.id);

                // A snapshot holds exactly the transactions active at begin,
                // never the transaction itself.
                assert!(!t1.snapshot.contains(t1.id));
                assert!(t2.snapshot.contains(t1.id));
                assert!(t3.snapshot.contains(t1.id) && t3.snapshot.contains(t2.id));
                Ok(())
            }

            #[test]
            fn commit_leaves_the_active_set() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                let t2 = engine.begin()?;
                engine.commit(t1.id)?;

                // A transaction begun before the commit keeps t1 in its
                // snapshot; a fresh one no longer sees it as active.
                assert!(t2.snapshot.contains(t1.id));
                let t3 = engine.begin()?;
                assert!(!t3.snapshot.contains(t1.id));

                // Commit outcomes are observable through visibility checks.
                assert!(t3.committed_before(t1.id));
                assert!(!t2.committed_before(t1.id));
                Ok(())
            }

            #[test]
            fn abort_leaves_the_active_set() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                engine.abort(t1.id)?;

                let t2 = engine.begin()?;
                assert!(!t2.snapshot.contains(t1.id));
                assert!(!t2.committed_before(t1.id));
                Ok(())
            }

            #[test]
            fn finalizing_twice_errors() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                engine.commit(t1.id)?;
                assert!(engine.commit(t1.id).is_err());
                assert!(engine.abort(t1.id).is_err());
                Ok(())
            }

            #[test]
            fn advance_bumps_the_command_id() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                assert_eq!(t1.cid, 1);
                assert_eq!(engine.advance(t1.id)?, 2);
                assert_eq!(engine.advance(t1.id)?, 3);
                engine.commit(t1.id)?;
                assert!(engine.advance(t1.id).is_err());
                Ok(())
            }

            #[test]
            fn snapshot_reports_the_active_set() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                let t2 = engine.begin()?;
                let active = engine.snapshot()?;
                assert!(active.contains(t1.id) && active.contains(t2.id));

                engine.commit(t1.id)?;
                let active = engine.snapshot()?;
                assert!(!active.contains(t1.id) && active.contains(t2.id));
                Ok(())
            }

            #[test]
            fn snapshot_of_serves_stored_snapshots() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                let t2 = engine.begin()?;
                assert_eq!(engine.snapshot_of(t2.id)?, t2.snapshot);
                assert!(engine.snapshot_of(t2.id)?.contains(t1.id));
                engine.commit(t2.id)?;
                assert!(engine.snapshot_of(t2.id).is_err());
                Ok(())
            }

            #[test]
            fn global_last_tracks_issued_ids() -> CResult<()> {
                let engine = $setup;

                let t1 = engine.begin()?;
                assert_eq!(engine.global_last()?, t1.id);
                let t2 = engine.begin()?;
                engine.abort(t2.id)?;
                // Aborting never recycles an id.
                assert_eq!(engine.global_last()?, t2.id);
                Ok(())
            }
        };
    }
    pub(crate) use test_engine;

    #[test]
    fn visibility_follows_snapshot_and_commit_log() -> CResult<()> {
        let clog = Arc::new(CommitLog::new());
        let snapshot: Snapshot = [2, 5].into_iter().collect();
        let tx = Transaction::new(7, snapshot, clog.clone());

        // Own writes are visible, own removals are not.
        assert!(tx.visible(7, 0));
        assert!(!tx.visible(7, 7));

        // Uncommitted creators are invisible.
        assert!(!tx.visible(3, 0));
        clog.set_committed(3);
        assert!(tx.visible(3, 0));

        // Committed but in the snapshot: still invisible.
        clog.set_committed(5);
        assert!(!tx.visible(5, 0));

        // Expiry by an aborted transaction does not hide the version.
        clog.set_aborted(4);
        assert!(tx.visible(3, 4));

        // Expiry by a committed transaction outside the snapshot hides it,
        // inside the snapshot does not.
        clog.set_committed(6);
        assert!(!tx.visible(3, 6));
        assert!(tx.visible(3, 5));

        // Later transactions are invisible regardless of their outcome.
        clog.set_committed(9);
        assert!(!tx.visible(9, 0));
        assert!(tx.visible(3, 9));
        Ok(())
    }

    #[test]
    fn snapshot_first_and_iteration_are_ordered() {
        let snapshot: Snapshot = [9, 3, 7].into_iter().collect();
        assert_eq!(snapshot.first(), Some(3));
        assert_eq!(snapshot.iter().collect::<Vec<_>>(), vec![3, 7, 9]);
        assert_eq!(snapshot.len(), 3);
    }
}
