use std::ptr::{null_mut, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::error::{CResult, Error};
use crate::mvcc::commit_log::CommitLog;
use crate::mvcc::{Transaction, TransactionId};
use super::Gid;

/// One version in a record's chain: the payload, the transaction that created
/// it, and the transaction that expired it (0 while unexpired). `next` points
/// to the previous, older version.
pub struct Version<T> {
    created: TransactionId,
    expired: AtomicU64,
    next: AtomicPtr<Version<T>>,
    data: T,
}

impl<T> Version<T> {
    fn boxed(created: TransactionId, data: T) -> Box<Self> {
        Box::new(Version {
            created,
            expired: AtomicU64::new(0),
            next: AtomicPtr::new(null_mut()),
            data,
        })
    }

    pub fn created(&self) -> TransactionId {
        self.created
    }

    pub fn expired(&self) -> TransactionId {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn data(&self) -> &T {
        &self.data
    }
}

/// The stable identity of a record, owning its version chain through an
/// atomic head pointer. Readers walk the chain lock-free; writers race on
/// two compare-and-swaps: the expiry slot of the visible version (the
/// serialization gate) and then the head.
///
/// Versions are only freed by [`VersionList::gc`] (which requires exclusive
/// access through the owning graph) or by dropping the list, so a reader
/// never observes a dangling `next` pointer.
pub struct VersionList<T> {
    head: AtomicPtr<Version<T>>,
    gid: Gid,
}

unsafe impl<T: Send> Send for VersionList<T> {}
unsafe impl<T: Send + Sync> Sync for VersionList<T> {}

impl<T> VersionList<T> {
    /// A fresh record whose first version is created by `tx`.
    pub fn new(gid: Gid, tx: &Transaction, data: T) -> Self {
        VersionList {
            head: AtomicPtr::new(Box::into_raw(Version::boxed(tx.id, data))),
            gid,
        }
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// The version visible to `tx`, walking the chain newest first. At most
    /// one version is visible per transaction.
    pub fn find(&self, tx: &Transaction) -> Option<NonNull<Version<T>>> {
        let mut current = self.head.load(Ordering::SeqCst);
        while let Some(version) = unsafe { current.as_ref() } {
            if tx.visible(version.created, version.expired()) {
                return NonNull::new(current);
            }
            current = version.next.load(Ordering::SeqCst);
        }
        None
    }

    /// The payload visible to `tx`, if any.
    pub fn read(&self, tx: &Transaction) -> Option<&T> {
        self.find(tx).map(|version| unsafe { &(*version.as_ptr()).data })
    }

    /// Runs `f` over the payload `tx` may write through, performing
    /// copy-on-write: a version `tx` created itself is written in place,
    /// otherwise the visible version is expired and a fresh copy becomes the
    /// new head. Fails with [`Error::Serialization`] when no version is
    /// visible or another transaction got to the expiry first.
    pub fn write<R>(&self, tx: &Transaction, f: impl FnOnce(&mut T) -> R) -> CResult<R>
    where
        T: Clone,
    {
        let mut version = self.update(tx)?;
        // The version belongs to `tx`: it is either freshly installed or was
        // created by `tx` earlier, and stays invisible to every other
        // transaction at least until `tx` commits.
        Ok(f(unsafe { &mut version.as_mut().data }))
    }

    /// The copy-on-write step of [`VersionList::write`], returning the
    /// version `tx` owns.
    pub fn update(&self, tx: &Transaction) -> CResult<NonNull<Version<T>>>
    where
        T: Clone,
    {
        let visible = self.find(tx).ok_or(Error::Serialization)?;
        let current = unsafe { visible.as_ref() };
        if current.created == tx.id {
            return Ok(visible);
        }
        Self::lock_expiry(current, tx)?;

        let new = Box::into_raw(Version::boxed(tx.id, current.data.clone()));
        let mut head = self.head.load(Ordering::SeqCst);
        loop {
            unsafe { (*new).next.store(head, Ordering::SeqCst) };
            match self.head.compare_exchange(head, new, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }
        // Box::into_raw never returns null.
        Ok(unsafe { NonNull::new_unchecked(new) })
    }

    /// Expires the visible version under `tx`. No new version is created;
    /// the record simply has none visible past `tx`.
    pub fn remove(&self, tx: &Transaction) -> CResult<()> {
        let visible = self.find(tx).ok_or(Error::Serialization)?;
        Self::lock_expiry(unsafe { visible.as_ref() }, tx)
    }

    /// Claims the expiry slot of `version` for `tx`. The compare-and-swap is
    /// the serialization gate: losing it to a transaction that is still
    /// active or has committed is a conflict. An expiry left behind by an
    /// aborted transaction is taken over.
    fn lock_expiry(version: &Version<T>, tx: &Transaction) -> CResult<()> {
        let mut expired = version.expired.load(Ordering::SeqCst);
        loop {
            if expired == tx.id {
                return Ok(());
            }
            if expired != 0 && !tx.commit_log().is_aborted(expired) {
                return Err(Error::Serialization);
            }
            match version.expired.compare_exchange(
                expired,
                tx.id,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => expired = actual,
            }
        }
    }

    /// Reclaims versions no current or future transaction can reach:
    /// versions created by aborted transactions, everything below the newest
    /// version whose creator committed before `horizon`, and the whole chain
    /// once every remaining version is expired below the horizon. Requires
    /// exclusive access, which the owning graph guarantees. Returns the
    /// number of versions freed.
    pub fn gc(&mut self, horizon: TransactionId, clog: &CommitLog) -> usize {
        let mut freed = 0;

        unsafe {
            // Unlink versions created by aborted transactions.
            let mut prev: *mut Version<T> = null_mut();
            let mut current = self.head.load(Ordering::SeqCst);
            while !current.is_null() {
                let next = (*current).next.load(Ordering::SeqCst);
                if clog.is_aborted((*current).created) {
                    if prev.is_null() {
                        self.head.store(next, Ordering::SeqCst);
                    } else {
                        (*prev).next.store(next, Ordering::SeqCst);
                    }
                    drop(Box::from_raw(current));
                    freed += 1;
                } else {
                    prev = current;
                }
                current = next;
            }

            // Every walk stops at the newest version committed below the
            // horizon or above it; whatever lies below that version is
            // unreachable.
            let mut current = self.head.load(Ordering::SeqCst);
            while !current.is_null() {
                let created = (*current).created;
                if clog.is_committed(created) && created < horizon {
                    let mut dead = (*current).next.swap(null_mut(), Ordering::SeqCst);
                    while !dead.is_null() {
                        let next = (*dead).next.load(Ordering::SeqCst);
                        drop(Box::from_raw(dead));
                        freed += 1;
                        dead = next;
                    }
                    break;
                }
                current = (*current).next.load(Ordering::SeqCst);
            }

            // A chain whose every version is expired below the horizon is
            // dead as a whole.
            let mut all_dead = true;
            let mut current = self.head.load(Ordering::SeqCst);
            while !current.is_null() {
                let expired = (*current).expired.load(Ordering::SeqCst);
                if expired == 0 || expired >= horizon || !clog.is_committed(expired) {
                    all_dead = false;
                    break;
                }
                current = (*current).next.load(Ordering::SeqCst);
            }
            if all_dead {
                let mut current = self.head.swap(null_mut(), Ordering::SeqCst);
                while !current.is_null() {
                    let next = (*current).next.load(Ordering::SeqCst);
                    drop(Box::from_raw(current));
                    freed += 1;
                    current = next;
                }
            }
        }

        freed
    }

    /// True once garbage collection has emptied the chain.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }
}

impl<T> Drop for VersionList<T> {
    fn drop(&mut self) {
        let mut current = self.head.swap(null_mut(), Ordering::SeqCst);
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::SeqCst) };
            drop(unsafe { Box::from_raw(current) });
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mvcc::engine::{Engine, SingleNodeEngine};

    fn chain_len<T>(list: &VersionList<T>) -> usize {
        let mut len = 0;
        let mut current = list.head.load(Ordering::SeqCst);
        while let Some(version) = unsafe { current.as_ref() } {
            len += 1;
            current = version.next.load(Ordering::SeqCst);
        }
        len
    }

    #[test]
    fn uncommitted_records_are_invisible_to_others() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let writer = engine.begin()?;
        let list = VersionList::new(1, &writer, "a".to_string());
        assert_eq!(list.read(&writer), Some(&"a".to_string()));

        let reader = engine.begin()?;
        assert_eq!(list.read(&reader), None);

        // Commit makes it visible to fresh transactions, not to the one that
        // overlapped the writer.
        engine.commit(writer.id)?;
        assert_eq!(list.read(&reader), None);
        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&"a".to_string()));
        Ok(())
    }

    #[test]
    fn writes_copy_and_leave_the_readers_view_alone() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let list = VersionList::new(1, &t1, "a".to_string());
        engine.commit(t1.id)?;

        let reader = engine.begin()?;
        let writer = engine.begin()?;
        list.write(&writer, |data| data.push('b'))?;
        assert_eq!(chain_len(&list), 2);

        // The writer sees its copy, the reader the original, in any order.
        assert_eq!(list.read(&writer), Some(&"ab".to_string()));
        assert_eq!(list.read(&reader), Some(&"a".to_string()));

        engine.commit(writer.id)?;
        assert_eq!(list.read(&reader), Some(&"a".to_string()));
        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&"ab".to_string()));
        Ok(())
    }

    #[test]
    fn same_transaction_writes_in_place() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let tx = engine.begin()?;
        let list = VersionList::new(1, &tx, "a".to_string());
        list.write(&tx, |data| data.push('b'))?;
        list.write(&tx, |data| data.push('c'))?;

        assert_eq!(chain_len(&list), 1);
        assert_eq!(list.read(&tx), Some(&"abc".to_string()));
        Ok(())
    }

    #[test]
    fn concurrent_writers_conflict() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        let t2 = engine.begin()?;
        let t3 = engine.begin()?;
        list.write(&t2, |data| *data += 1)?;
        assert_eq!(list.write(&t3, |data| *data += 10), Err(Error::Serialization));

        // Losing the race is fatal for t3 even after t2 commits.
        engine.commit(t2.id)?;
        assert_eq!(list.write(&t3, |data| *data += 10), Err(Error::Serialization));
        engine.abort(t3.id)?;

        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&1));
        Ok(())
    }

    #[test]
    fn aborted_expiries_are_taken_over() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        let t2 = engine.begin()?;
        list.write(&t2, |data| *data = 2)?;
        engine.abort(t2.id)?;

        // The abort left an expiry and a dangling version behind; a later
        // writer takes both in stride.
        let t3 = engine.begin()?;
        assert_eq!(list.read(&t3), Some(&0));
        list.write(&t3, |data| *data = 3)?;
        engine.commit(t3.id)?;

        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&3));
        Ok(())
    }

    #[test]
    fn removal_hides_the_record_going_forward() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        let reader = engine.begin()?;
        let remover = engine.begin()?;
        list.remove(&remover)?;

        // Invisible to the remover immediately, to others after commit.
        assert_eq!(list.read(&remover), None);
        assert_eq!(list.read(&reader), Some(&0));
        engine.commit(remover.id)?;
        assert_eq!(list.read(&reader), Some(&0));
        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), None);

        // Removing an invisible record is a conflict.
        assert_eq!(list.remove(&fresh), Err(Error::Serialization));
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn contended_writers_settle_on_one_winner() -> CResult<()> {
        let engine = Arc::new(SingleNodeEngine::new());

        let t0 = engine.begin()?;
        let list = Arc::new(VersionList::new(1, &t0, 0u64));
        engine.commit(t0.id)?;

        // Begin every writer before any of them runs, so they all contend for
        // the same base version.
        let txs = (0..8).map(|_| engine.begin()).collect::<CResult<Vec<_>>>()?;
        let threads: Vec<_> = txs
            .into_iter()
            .map(|tx| {
                let engine = engine.clone();
                let list = list.clone();
                std::thread::spawn(move || -> CResult<bool> {
                    match list.write(&tx, |data| *data += 1) {
                        Ok(_) => {
                            engine.commit(tx.id)?;
                            Ok(true)
                        }
                        Err(Error::Serialization) => {
                            engine.abort(tx.id)?;
                            Ok(false)
                        }
                        Err(err) => Err(err),
                    }
                })
            })
            .collect();

        let mut winners = 0;
        for thread in threads {
            if thread.join().expect("writer panicked")? {
                winners += 1;
            }
        }

        // All writers ran against the same base version: exactly one of them
        // can expire it.
        assert_eq!(winners, 1);
        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&1));
        Ok(())
    }

    #[test]
    fn gc_reclaims_unreachable_versions() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let mut list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        // An aborted write and two committed rewrites pile up versions.
        let t2 = engine.begin()?;
        list.write(&t2, |data| *data = 2)?;
        engine.abort(t2.id)?;
        for value in [3, 4] {
            let tx = engine.begin()?;
            list.write(&tx, |data| *data = value)?;
            engine.commit(tx.id)?;
        }
        assert_eq!(chain_len(&list), 4);

        // With no one active, everything but the newest version goes.
        let freed = list.gc(engine.gc_horizon()?, engine.commit_log());
        assert_eq!(freed, 3);
        assert_eq!(chain_len(&list), 1);

        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), Some(&4));
        engine.abort(fresh.id)?;
        Ok(())
    }

    #[test]
    fn gc_respects_the_horizon() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let mut list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        // A reader pins the base version while a writer replaces it.
        let reader = engine.begin()?;
        let writer = engine.begin()?;
        list.write(&writer, |data| *data = 1)?;
        engine.commit(writer.id)?;

        let freed = list.gc(engine.gc_horizon()?, engine.commit_log());
        assert_eq!(freed, 0);
        assert_eq!(list.read(&reader), Some(&0));

        engine.commit(reader.id)?;
        let freed = list.gc(engine.gc_horizon()?, engine.commit_log());
        assert_eq!(freed, 1);
        Ok(())
    }

    #[test]
    fn gc_drops_fully_dead_chains() -> CResult<()> {
        let engine = SingleNodeEngine::new();

        let t1 = engine.begin()?;
        let mut list = VersionList::new(1, &t1, 0u64);
        engine.commit(t1.id)?;

        let t2 = engine.begin()?;
        list.remove(&t2)?;
        engine.commit(t2.id)?;

        let freed = list.gc(engine.gc_horizon()?, engine.commit_log());
        assert_eq!(freed, 1);
        assert!(list.is_empty());

        let fresh = engine.begin()?;
        assert_eq!(list.read(&fresh), None);
        Ok(())
    }
}
