use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use super::{CommandId, Snapshot, TransactionId};

/// The well-known connector name the master engine serves requests on.
pub const TX_ENGINE_CONNECTOR: &str = "tx-engine";

/// Transaction engine operations, as requested by worker peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TxRequest {
    Begin,
    Advance(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
    Snapshot,
    SnapshotOf(TransactionId),
    GlobalLast,
}

/// The outcomes, mirroring [`TxRequest`] arm for arm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TxResponse {
    Begun { id: TransactionId, snapshot: Snapshot },
    Advanced(CommandId),
    Committed(TransactionId),
    Aborted(TransactionId),
    Snapshot(Snapshot),
    GlobalLast(TransactionId),
    Error(Error),
}

/// A request envelope. `reply_to` names the connector the response should be
/// sent to; the worker opens it before sending and closes it afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxRequestMessage {
    pub reply_to: String,
    pub request: TxRequest,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxResponseMessage {
    pub response: TxResponse,
}
