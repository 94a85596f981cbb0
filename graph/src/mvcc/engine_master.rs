use std::sync::Arc;

use log::debug;

use crate::error::CResult;
use crate::reactor::{Reactor, Subscription};
use super::commit_log::CommitLog;
use super::engine::{Engine, SingleNodeEngine};
use super::rpc::{TxRequest, TxRequestMessage, TxResponse, TxResponseMessage, TX_ENGINE_CONNECTOR};
use super::wal::Wal;
use super::{CommandId, Snapshot, Transaction, TransactionId};

/// The distributed master transaction engine. Has complete single-node
/// functionality, and serves the engine operations on a reactor connector so
/// worker peers participate in the same id space.
pub struct MasterEngine {
    inner: Arc<SingleNodeEngine>,
}

impl MasterEngine {
    pub fn new() -> Self {
        Self::from_engine(SingleNodeEngine::new())
    }

    /// A master that writes transaction state changes to `wal`, atomically
    /// with id allocation.
    pub fn with_wal(wal: Box<dyn Wal>) -> Self {
        Self::from_engine(SingleNodeEngine::with_wal(wal))
    }

    /// Wraps an existing engine, e.g. one recovered from a WAL.
    pub fn from_engine(engine: SingleNodeEngine) -> Self {
        MasterEngine { inner: Arc::new(engine) }
    }

    pub fn commit_log(&self) -> &Arc<CommitLog> {
        self.inner.commit_log()
    }

    pub fn gc_horizon(&self) -> CResult<TransactionId> {
        self.inner.gc_horizon()
    }

    /// Registers the request handler on `reactor` under the well-known
    /// [`TX_ENGINE_CONNECTOR`] name. Requests are answered through the reply
    /// connector each of them names; replies to vanished connectors are
    /// dropped.
    pub fn serve(&self, reactor: &Reactor) -> CResult<Subscription> {
        let (stream, _channel) = reactor.open(TX_ENGINE_CONNECTOR)?;
        let engine = self.inner.clone();
        let reactor = reactor.clone();
        Ok(stream.on::<TxRequestMessage, _>(move |message, _| {
            let response = handle(&engine, &message.request);
            match reactor.find_channel(&message.reply_to) {
                Some(reply) => reply.send(TxResponseMessage { response }),
                None => debug!("Dropping engine reply to vanished connector {}", message.reply_to),
            }
        }))
    }
}

impl Default for MasterEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn handle(engine: &SingleNodeEngine, request: &TxRequest) -> TxResponse {
    match request {
        TxRequest::Begin => engine
            .begin()
            .map(|tx| TxResponse::Begun { id: tx.id, snapshot: tx.snapshot })
            .unwrap_or_else(TxResponse::Error),
        TxRequest::Advance(id) => {
            engine.advance(*id).map(TxResponse::Advanced).unwrap_or_else(TxResponse::Error)
        }
        TxRequest::Commit(id) => {
            engine.commit(*id).map(|_| TxResponse::Committed(*id)).unwrap_or_else(TxResponse::Error)
        }
        TxRequest::Abort(id) => {
            engine.abort(*id).map(|_| TxResponse::Aborted(*id)).unwrap_or_else(TxResponse::Error)
        }
        TxRequest::Snapshot => {
            engine.snapshot().map(TxResponse::Snapshot).unwrap_or_else(TxResponse::Error)
        }
        TxRequest::SnapshotOf(id) => {
            engine.snapshot_of(*id).map(TxResponse::Snapshot).unwrap_or_else(TxResponse::Error)
        }
        TxRequest::GlobalLast => {
            engine.global_last().map(TxResponse::GlobalLast).unwrap_or_else(TxResponse::Error)
        }
    }
}

impl Engine for MasterEngine {
    fn begin(&self) -> CResult<Transaction> {
        self.inner.begin()
    }

    fn advance(&self, id: TransactionId) -> CResult<CommandId> {
        self.inner.advance(id)
    }

    fn commit(&self, id: TransactionId) -> CResult<()> {
        self.inner.commit(id)
    }

    fn abort(&self, id: TransactionId) -> CResult<()> {
        self.inner.abort(id)
    }

    fn snapshot(&self) -> CResult<Snapshot> {
        self.inner.snapshot()
    }

    fn snapshot_of(&self, id: TransactionId) -> CResult<Snapshot> {
        self.inner.snapshot_of(id)
    }

    fn global_last(&self) -> CResult<TransactionId> {
        self.inner.global_last()
    }
}
