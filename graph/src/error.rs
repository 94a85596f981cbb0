use serde_derive::{Deserialize, Serialize};

/// All errors returned by this crate, through the crate-wide [`CResult`]
/// alias. The enum is serializable because engine errors cross the
/// transaction RPC boundary between workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Another transaction finalized a conflicting write first. The caller
    /// must abort its transaction, and may retry it from the start.
    Serialization,

    /// A connector with this name is already registered on the reactor.
    NameInUse(String),

    /// A remote worker did not answer, or an address points at a worker this
    /// process cannot reach. The caller decides whether to retry or abort.
    RemoteUnavailable(String),

    /// Invalid on-disk or wire data.
    InvalidData(String),

    /// An io error.
    IO(String),

    /// An unexpected internal state.
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Serialization => write!(f, "serialization conflict, retry transaction"),
            Error::NameInUse(name) => write!(f, "connector name {} already in use", name),
            Error::RemoteUnavailable(detail) => write!(f, "remote unavailable: {}", detail),
            Error::InvalidData(detail) => write!(f, "invalid data: {}", detail),
            Error::IO(detail) => write!(f, "io error: {}", detail),
            Error::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Internal("mutex poisoned".to_string())
    }
}

/// A crate-wide Result alias.
pub type CResult<T> = std::result::Result<T, Error>;
