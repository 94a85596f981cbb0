use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use super::TransactionId;

/// Bits per segment of the log.
const SEGMENT_BITS: u64 = 32768;
/// 64-bit words per segment.
const SEGMENT_WORDS: usize = (SEGMENT_BITS / 64) as usize;
/// Slots in the fixed segment table. Bounds the log at
/// `SEGMENT_SLOTS * SEGMENT_BITS / 2` transactions per process lifetime.
const SEGMENT_SLOTS: usize = 8192;

/// The two status bits of one transaction: `00` active, `01` committed,
/// `10` aborted. Transitions are monotone; there is no way back from a
/// terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Info(u8);

impl Info {
    pub fn is_active(&self) -> bool {
        self.0 == 0
    }

    pub fn is_committed(&self) -> bool {
        self.0 & 1 != 0
    }

    pub fn is_aborted(&self) -> bool {
        self.0 & 2 != 0
    }

    pub fn flags(&self) -> u8 {
        self.0
    }
}

struct Segment {
    words: [AtomicU64; SEGMENT_WORDS],
}

impl Segment {
    fn new() -> Box<Self> {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Box::new(Segment { words: [ZERO; SEGMENT_WORDS] })
    }
}

/// A concurrent append-only record of transaction outcomes, two bits per
/// transaction id.
///
/// This structure is lock free. No lock is acquired on any call, and no call
/// blocks: statuses live in a segmented bitset whose segments are installed
/// on demand with a compare-and-swap. Since bits only ever flip 0 to 1, a
/// read racing a write yields either the prior or the new status, never a
/// spurious one. Reads of ids the log has no segment for return the zero
/// state, active; double finalization of an id is caller error the log
/// cannot detect.
pub struct CommitLog {
    segments: Vec<AtomicPtr<Segment>>,
}

impl CommitLog {
    pub fn new() -> Self {
        CommitLog { segments: (0..SEGMENT_SLOTS).map(|_| AtomicPtr::new(null_mut())).collect() }
    }

    pub fn is_active(&self, id: TransactionId) -> bool {
        self.fetch_info(id).is_active()
    }

    pub fn is_committed(&self, id: TransactionId) -> bool {
        self.fetch_info(id).is_committed()
    }

    pub fn is_aborted(&self, id: TransactionId) -> bool {
        self.fetch_info(id).is_aborted()
    }

    pub fn set_committed(&self, id: TransactionId) {
        self.set(2 * id);
    }

    pub fn set_aborted(&self, id: TransactionId) {
        self.set(2 * id + 1);
    }

    /// Reads both status bits of `id` in a single atomic load. The bits
    /// share a word: bit `2 * id` is even, so `2 * id + 1` never crosses a
    /// word boundary.
    pub fn fetch_info(&self, id: TransactionId) -> Info {
        let bit = 2 * id;
        let segment = match self.segment(bit) {
            Some(segment) => segment,
            None => return Info(0),
        };
        let word = segment.words[(bit % SEGMENT_BITS / 64) as usize].load(Ordering::SeqCst);
        Info((word >> (bit % 64) & 0b11) as u8)
    }

    fn segment(&self, bit: u64) -> Option<&Segment> {
        let slot = self.segments.get((bit / SEGMENT_BITS) as usize)?;
        unsafe { slot.load(Ordering::Acquire).as_ref() }
    }

    fn set(&self, bit: u64) {
        let index = (bit / SEGMENT_BITS) as usize;
        assert!(index < SEGMENT_SLOTS, "commit log capacity exceeded");

        let slot = &self.segments[index];
        let mut segment = slot.load(Ordering::Acquire);
        if segment.is_null() {
            // Install a fresh segment; lose the race and use the winner's.
            let fresh = Box::into_raw(Segment::new());
            match slot.compare_exchange(null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => segment = fresh,
                Err(winner) => {
                    unsafe { drop(Box::from_raw(fresh)) };
                    segment = winner;
                }
            }
        }

        let segment = unsafe { &*segment };
        segment.words[(bit % SEGMENT_BITS / 64) as usize]
            .fetch_or(1 << (bit % 64), Ordering::SeqCst);
    }
}

impl Default for CommitLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        for slot in &self.segments {
            let segment = slot.load(Ordering::Acquire);
            if !segment.is_null() {
                unsafe { drop(Box::from_raw(segment)) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use super::*;

    #[test]
    fn statuses_start_active_and_transition_monotonically() {
        let log = CommitLog::new();

        assert!(log.is_active(1));
        log.set_committed(1);
        assert!(log.is_committed(1));
        assert!(!log.is_active(1));
        assert!(!log.is_aborted(1));

        assert!(log.is_active(2));
        log.set_aborted(2);
        assert!(log.is_aborted(2));
        assert!(!log.is_committed(2));
    }

    #[test]
    fn out_of_range_reads_return_active() {
        let log = CommitLog::new();

        // Ids the log never allocated a segment for read as active, including
        // ids far beyond the segment table.
        assert!(log.is_active(123_456));
        assert!(log.fetch_info(u64::MAX / 2).is_active());
    }

    #[test]
    fn ids_spanning_segments_are_independent() {
        let log = CommitLog::new();

        // Neighbours of a committed id across a segment boundary stay active.
        let boundary = SEGMENT_BITS / 2;
        for id in [boundary - 1, boundary, boundary + 1] {
            assert!(log.is_active(id));
        }
        log.set_committed(SEGMENT_BITS / 2);
        assert!(log.is_active(SEGMENT_BITS / 2 - 1));
        assert!(log.is_committed(SEGMENT_BITS / 2));
        assert!(log.is_active(SEGMENT_BITS / 2 + 1));
    }

    #[test]
    #[serial]
    fn concurrent_commits_land_exactly() {
        let log = Arc::new(CommitLog::new());
        let threads: u64 = 8;
        let per_thread: u64 = 125;

        // 1000 transactions commit concurrently, forcing racy segment
        // installs. After quiescence exactly those ids read committed.
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        log.set_committed(1 + t * per_thread + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(log.is_active(0));
        for id in 1..=threads * per_thread {
            assert!(log.is_committed(id), "id {} not committed", id);
        }
        assert!(log.is_active(threads * per_thread + 1));
    }

    #[test]
    #[serial]
    fn concurrent_mixed_finalization() {
        let log = Arc::new(CommitLog::new());

        // Committers and aborters over disjoint id ranges, interleaved.
        let committer = {
            let log = log.clone();
            std::thread::spawn(move || (1u64..500).step_by(2).for_each(|id| log.set_committed(id)))
        };
        let aborter = {
            let log = log.clone();
            std::thread::spawn(move || (2u64..500).step_by(2).for_each(|id| log.set_aborted(id)))
        };
        committer.join().unwrap();
        aborter.join().unwrap();

        for id in 1..500 {
            let info = log.fetch_info(id);
            if id % 2 == 1 {
                assert!(info.is_committed() && !info.is_aborted());
            } else {
                assert!(info.is_aborted() && !info.is_committed());
            }
        }
    }
}
