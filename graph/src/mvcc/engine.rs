use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::error::{CResult, Error};
use super::commit_log::CommitLog;
use super::wal::{FileWal, Wal, WalRecord};
use super::{CommandId, Snapshot, Transaction, TransactionId};

/// The transaction engine interface, shared by the authoritative single-node
/// engine and the worker engine that delegates over RPC.
pub trait Engine: Send + Sync {
    /// Begins a transaction: allocates the next id and captures a snapshot of
    /// the currently active set.
    fn begin(&self) -> CResult<Transaction>;

    /// Advances the command counter of an active transaction, returning the
    /// new command id.
    fn advance(&self, id: TransactionId) -> CResult<CommandId>;

    /// Commits an active transaction.
    fn commit(&self, id: TransactionId) -> CResult<()>;

    /// Aborts an active transaction.
    fn abort(&self, id: TransactionId) -> CResult<()>;

    /// A snapshot of the currently active set.
    fn snapshot(&self) -> CResult<Snapshot>;

    /// The snapshot an active transaction was begun with.
    fn snapshot_of(&self, id: TransactionId) -> CResult<Snapshot>;

    /// The highest transaction id ever issued.
    fn global_last(&self) -> CResult<TransactionId>;
}

struct ActiveTransaction {
    snapshot: Snapshot,
    cid: CommandId,
}

struct EngineState {
    /// The highest id issued so far.
    last: TransactionId,

    /// The currently active transactions, with the snapshot each was begun
    /// with. Kept so snapshots can be served to peers after the fact.
    active: HashMap<TransactionId, ActiveTransaction>,

    /// Optional durability sink, appended to while the engine lock is held so
    /// that a replayed prefix is always consistent with the id counter.
    wal: Option<Box<dyn Wal>>,
}

/// The authoritative transaction engine of a single process.
///
/// A single coarse mutex protects the id counter, the active set, and WAL
/// append ordering; the critical section is tiny. The commit log is not under
/// the mutex: it is written inside the critical section but read lock-free by
/// snapshots and record visibility checks on any thread.
pub struct SingleNodeEngine {
    state: Mutex<EngineState>,
    clog: Arc<CommitLog>,
}

impl SingleNodeEngine {
    pub fn new() -> Self {
        Self::with_wal_opt(None)
    }

    /// An engine that writes every transaction state change to `wal`.
    pub fn with_wal(wal: Box<dyn Wal>) -> Self {
        Self::with_wal_opt(Some(wal))
    }

    fn with_wal_opt(wal: Option<Box<dyn Wal>>) -> Self {
        SingleNodeEngine {
            state: Mutex::new(EngineState { last: 0, active: HashMap::new(), wal }),
            clog: Arc::new(CommitLog::new()),
        }
    }

    /// Recovers an engine from a write-ahead log: the id counter resumes
    /// above the highest replayed id, and the commit log is rebuilt from the
    /// replayed outcomes. Transactions that began but never finalized are
    /// marked aborted. The engine keeps appending to the same file.
    pub fn recover(mut wal: FileWal) -> CResult<Self> {
        let records = wal.replay()?;
        let engine = Self::with_wal(Box::new(wal));
        {
            let mut state = engine.state.lock()?;
            let mut begun = Vec::new();
            for record in &records {
                state.last = state.last.max(record.id());
                match record {
                    WalRecord::Begin(id) => begun.push(*id),
                    WalRecord::Commit(id) => {
                        engine.clog.set_committed(*id);
                        begun.retain(|b| b != id);
                    }
                    WalRecord::Abort(id) => {
                        engine.clog.set_aborted(*id);
                        begun.retain(|b| b != id);
                    }
                }
            }
            if !begun.is_empty() {
                info!("Aborting {} unfinished transactions found in wal replay", begun.len());
                for id in begun {
                    engine.clog.set_aborted(id);
                }
            }
        }
        Ok(engine)
    }

    /// The commit log this engine issues transactions against.
    pub fn commit_log(&self) -> &Arc<CommitLog> {
        &self.clog
    }

    /// The id below which no active transaction, nor any transaction in an
    /// active snapshot, can still be running. Versions expired by a committed
    /// transaction below this horizon are unreachable for every current and
    /// future transaction and may be reclaimed.
    pub fn gc_horizon(&self) -> CResult<TransactionId> {
        let state = self.state.lock()?;
        let horizon = state
            .active
            .iter()
            .map(|(id, active)| active.snapshot.first().unwrap_or(*id))
            .min()
            .unwrap_or(state.last + 1);
        Ok(horizon)
    }
}

impl Default for SingleNodeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for SingleNodeEngine {
    fn begin(&self) -> CResult<Transaction> {
        let mut state = self.state.lock()?;
        let id = state.last + 1;
        state.last = id;

        let snapshot: Snapshot = state.active.keys().copied().collect();
        // The id is born active: the commit log's zero state. The WAL record
        // must land under the same lock as the id allocation.
        if let Some(wal) = state.wal.as_mut() {
            wal.tx_begin(id)?;
        }
        state
            .active
            .insert(id, ActiveTransaction { snapshot: snapshot.clone(), cid: 1 });
        debug!("Began transaction {}", id);
        Ok(Transaction::new(id, snapshot, self.clog.clone()))
    }

    fn advance(&self, id: TransactionId) -> CResult<CommandId> {
        let mut state = self.state.lock()?;
        let active = state
            .active
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("transaction {} is not active", id)))?;
        active.cid += 1;
        Ok(active.cid)
    }

    fn commit(&self, id: TransactionId) -> CResult<()> {
        let mut state = self.state.lock()?;
        if state.active.remove(&id).is_none() {
            return Err(Error::Internal(format!("transaction {} is not active", id)));
        }
        if let Some(wal) = state.wal.as_mut() {
            wal.tx_commit(id)?;
        }
        self.clog.set_committed(id);
        debug!("Committed transaction {}", id);
        Ok(())
    }

    fn abort(&self, id: TransactionId) -> CResult<()> {
        let mut state = self.state.lock()?;
        if state.active.remove(&id).is_none() {
            return Err(Error::Internal(format!("transaction {} is not active", id)));
        }
        if let Some(wal) = state.wal.as_mut() {
            wal.tx_abort(id)?;
        }
        self.clog.set_aborted(id);
        debug!("Aborted transaction {}", id);
        Ok(())
    }

    fn snapshot(&self) -> CResult<Snapshot> {
        let state = self.state.lock()?;
        Ok(state.active.keys().copied().collect())
    }

    fn snapshot_of(&self, id: TransactionId) -> CResult<Snapshot> {
        let state = self.state.lock()?;
        state
            .active
            .get(&id)
            .map(|active| active.snapshot.clone())
            .ok_or_else(|| Error::Internal(format!("transaction {} is not active", id)))
    }

    fn global_last(&self) -> CResult<TransactionId> {
        Ok(self.state.lock()?.last)
    }
}
