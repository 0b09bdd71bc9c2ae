pub mod peer;
pub mod protocol;
pub mod server;

use geocube_common::error::GeocubeError;
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;

/// Error type for the worker process: everything between a connection
/// accept and a dispatched [`crate::messages::Message`] reply.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("engine error: {0}")]
    Engine(#[from] GeocubeError),

    #[error("network error: {0}")]
    Net(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    WireProtocol(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("the connected peer reported an error: {0}")]
    PeerError(String),

    #[error("operation was cancelled because of an application shutdown")]
    ServerShutdown,

    #[error("no tree has been installed yet")]
    NoTree,

    #[error("unknown peer worker: {0}")]
    UnknownPeer(String),
}
