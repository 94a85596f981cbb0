use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{CResult, Error};
use crate::reactor::Reactor;
use super::commit_log::CommitLog;
use super::engine::Engine;
use super::rpc::{TxRequest, TxRequestMessage, TxResponse, TxResponseMessage, TX_ENGINE_CONNECTOR};
use super::{CommandId, Snapshot, Transaction, TransactionId};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// A worker-side transaction engine. Never issues ids itself: every operation
/// is delegated to the master serving [`TX_ENGINE_CONNECTOR`] on the reactor.
///
/// Record visibility checks must stay local and lock-free, so the worker
/// mirrors acknowledged commit and abort outcomes into its own commit log;
/// transactions it begins are issued against that mirror. An outcome not yet
/// mirrored reads as active, which MVCC treats like an in-flight transaction.
///
/// Calls block waiting for the reply, so they must not be made from the
/// reactor's own dispatch thread.
pub struct WorkerEngine {
    reactor: Reactor,
    clog: Arc<CommitLog>,
    timeout: Duration,
}

impl WorkerEngine {
    pub fn new(reactor: Reactor) -> Self {
        Self::with_timeout(reactor, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(reactor: Reactor, timeout: Duration) -> Self {
        WorkerEngine { reactor, clog: Arc::new(CommitLog::new()), timeout }
    }

    /// The local commit log mirror worker transactions read from.
    pub fn commit_log(&self) -> &Arc<CommitLog> {
        &self.clog
    }

    /// One request/reply round trip: opens an anonymous reply connector,
    /// sends the request to the engine connector, and blocks for the reply.
    fn call(&self, request: TxRequest) -> CResult<TxResponse> {
        let (stream, _reply_channel) = self.reactor.open_anonymous();
        let reply_to = stream.connector_name().to_string();

        let slot: Arc<(Mutex<Option<TxResponse>>, Condvar)> =
            Arc::new((Mutex::new(None), Condvar::new()));
        let filler = slot.clone();
        let subscription = stream.on::<TxResponseMessage, _>(move |message, _| {
            let (response, cvar) = &*filler;
            if let Ok(mut response) = response.lock() {
                *response = Some(message.response.clone());
            }
            cvar.notify_all();
        });

        // No early returns below: the reply connector must be torn down on
        // every path.
        let response = match self.reactor.find_channel(TX_ENGINE_CONNECTOR) {
            Some(server) => {
                server.send(TxRequestMessage { reply_to, request });
                let (lock, cvar) = &*slot;
                lock.lock()
                    .ok()
                    .and_then(|guard| {
                        cvar.wait_timeout_while(guard, self.timeout, |response| response.is_none())
                            .ok()
                    })
                    .and_then(|(mut response, _timed_out)| response.take())
                    .ok_or_else(|| {
                        Error::RemoteUnavailable("transaction engine did not answer".to_string())
                    })
            }
            None => {
                Err(Error::RemoteUnavailable("no transaction engine registered".to_string()))
            }
        };

        subscription.unsubscribe();
        stream.close();

        match response? {
            TxResponse::Error(err) => Err(err),
            response => Ok(response),
        }
    }
}

fn unexpected(response: TxResponse) -> Error {
    Error::Internal(format!("unexpected engine response {:?}", response))
}

impl Engine for WorkerEngine {
    fn begin(&self) -> CResult<Transaction> {
        match self.call(TxRequest::Begin)? {
            TxResponse::Begun { id, snapshot } => {
                Ok(Transaction::new(id, snapshot, self.clog.clone()))
            }
            response => Err(unexpected(response)),
        }
    }

    fn advance(&self, id: TransactionId) -> CResult<CommandId> {
        match self.call(TxRequest::Advance(id))? {
            TxResponse::Advanced(cid) => Ok(cid),
            response => Err(unexpected(response)),
        }
    }

    fn commit(&self, id: TransactionId) -> CResult<()> {
        match self.call(TxRequest::Commit(id))? {
            TxResponse::Committed(id) => {
                self.clog.set_committed(id);
                Ok(())
            }
            response => Err(unexpected(response)),
        }
    }

    fn abort(&self, id: TransactionId) -> CResult<()> {
        match self.call(TxRequest::Abort(id))? {
            TxResponse::Aborted(id) => {
                self.clog.set_aborted(id);
                Ok(())
            }
            response => Err(unexpected(response)),
        }
    }

    fn snapshot(&self) -> CResult<Snapshot> {
        match self.call(TxRequest::Snapshot)? {
            TxResponse::Snapshot(snapshot) => Ok(snapshot),
            response => Err(unexpected(response)),
        }
    }

    fn snapshot_of(&self, id: TransactionId) -> CResult<Snapshot> {
        match self.call(TxRequest::SnapshotOf(id))? {
            TxResponse::Snapshot(snapshot) => Ok(snapshot),
            response => Err(unexpected(response)),
        }
    }

    fn global_last(&self) -> CResult<TransactionId> {
        match self.call(TxRequest::GlobalLast)? {
            TxResponse::GlobalLast(id) => Ok(id),
            response => Err(unexpected(response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::JoinHandle;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mvcc::engine_master::MasterEngine;

    /// A worker wired to a served master, with the dispatch loop on its own
    /// thread. Closing the connectors on drop shuts the loop down.
    struct Fixture {
        worker: WorkerEngine,
        master: MasterEngine,
        reactor: Reactor,
        loop_thread: Option<JoinHandle<()>>,
    }

    impl Fixture {
        fn new() -> Self {
            let reactor = Reactor::new("master-node");
            let master = MasterEngine::new();
            master.serve(&reactor).expect("engine connector free");

            let dispatcher = reactor.clone();
            let loop_thread = Some(std::thread::spawn(move || dispatcher.run_event_loop()));

            let worker = WorkerEngine::new(reactor.clone());
            Fixture { worker, master, reactor, loop_thread }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.reactor.close_all_connectors();
            if let Some(loop_thread) = self.loop_thread.take() {
                loop_thread.join().ok();
            }
        }
    }

    impl Engine for Fixture {
        fn begin(&self) -> CResult<Transaction> {
            self.worker.begin()
        }
        fn advance(&self, id: TransactionId) -> CResult<CommandId> {
            self.worker.advance(id)
        }
        fn commit(&self, id: TransactionId) -> CResult<()> {
            self.worker.commit(id)
        }
        fn abort(&self, id: TransactionId) -> CResult<()> {
            self.worker.abort(id)
        }
        fn snapshot(&self) -> CResult<Snapshot> {
            self.worker.snapshot()
        }
        fn snapshot_of(&self, id: TransactionId) -> CResult<Snapshot> {
            self.worker.snapshot_of(id)
        }
        fn global_last(&self) -> CResult<TransactionId> {
            self.worker.global_last()
        }
    }

    crate::mvcc::tests::test_engine!(Fixture::new());

    #[test]
    fn worker_and_master_share_one_id_space() -> CResult<()> {
        let fixture = Fixture::new();

        let t1 = fixture.master.begin()?;
        let t2 = fixture.worker.begin()?;
        let t3 = fixture.master.begin()?;
        assert_eq!((t1.id + 1, t2.id + 1), (t2.id, t3.id));

        // The worker transaction is active on the master too.
        assert!(fixture.master.snapshot()?.contains(t2.id));
        fixture.worker.commit(t2.id)?;
        assert!(!fixture.master.snapshot()?.contains(t2.id));
        Ok(())
    }

    #[test]
    fn worker_mirrors_outcomes_locally() -> CResult<()> {
        let fixture = Fixture::new();

        let t1 = fixture.worker.begin()?;
        fixture.worker.commit(t1.id)?;
        let t2 = fixture.worker.begin()?;
        assert!(t2.committed_before(t1.id));
        assert!(fixture.worker.commit_log().is_committed(t1.id));

        // The master committed it as well; the mirror is not authoritative.
        assert!(fixture.master.commit_log().is_committed(t1.id));
        Ok(())
    }

    #[test]
    fn calls_without_a_master_are_remote_unavailable() {
        let reactor = Reactor::new("lonely");
        let worker = WorkerEngine::new(reactor);

        match worker.begin() {
            Err(Error::RemoteUnavailable(_)) => {}
            other => panic!("expected RemoteUnavailable, got {:?}", other.map(|tx| tx.id)),
        }
    }

    #[test]
    fn calls_time_out_when_nobody_dispatches() {
        // The connector exists, but no thread runs the event loop.
        let reactor = Reactor::new("stalled");
        let master = MasterEngine::new();
        master.serve(&reactor).expect("engine connector free");

        let worker = WorkerEngine::with_timeout(reactor, Duration::from_millis(50));
        match worker.begin() {
            Err(Error::RemoteUnavailable(_)) => {}
            other => panic!("expected RemoteUnavailable, got {:?}", other.map(|tx| tx.id)),
        }
    }
}
