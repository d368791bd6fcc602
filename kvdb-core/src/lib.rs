//! Shared wire protocol, framed transport and persistent storage for kvdb.
//!
//! This crate has no networking or process entry points of its own; it is
//! linked by both `kvdb-server` and `kvdb-client` so the two sides of the
//! protocol can never drift apart.

pub mod protocol;
pub mod store;
pub mod transport;

pub use protocol::{
    CommandId, CommandMessage, CommandType, LimitedString, MessageHeader, ProtocolError, ResultCode,
    ResultMessage, HEADER_SIZE, MAGIC, MAX_KEY_LEN, MAX_VALUE_LEN,
};
pub use store::{MapError, PersistentMap, Stat};
pub use transport::{FrameReceiver, FrameSender, TransportError, DEFAULT_RECEIVE_TIMEOUT};
