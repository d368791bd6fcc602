use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] kvdb_core::ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] kvdb_core::TransportError),

    #[error("connection closed while a command was still in flight")]
    ConnectionClosed,

    #[error("command id {0} is already awaiting a result")]
    DuplicateCommandId(u32),

    #[error("server reported failure for this command")]
    ServerError,

    #[error("timed out waiting for a result")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ClientError>;
