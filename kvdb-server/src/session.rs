//! Per-connection server session: reads framed commands, dispatches them to
//! the [`CommandProcessor`], and writes back framed results.

use std::sync::Arc;

use kvdb_core::{CommandMessage, FrameReceiver, FrameSender, TransportError};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::processor::CommandProcessor;

/// Drives a single accepted connection until the peer closes it or a
/// transport error occurs.
pub struct ServerSession {
    peer_addr: String,
    receiver: FrameReceiver<tokio::net::tcp::OwnedReadHalf>,
    sender: FrameSender,
    processor: Arc<CommandProcessor>,
}

impl ServerSession {
    pub fn new(stream: TcpStream, processor: Arc<CommandProcessor>, receive_timeout: std::time::Duration) -> Self {
        let peer_addr = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        let receiver = FrameReceiver::new(read_half).with_data_timeout(receive_timeout);
        let sender = FrameSender::spawn(write_half);
        ServerSession { peer_addr, receiver, sender, processor }
    }

    /// Address of the connected peer, used for structured logging exactly
    /// as the original implementation's `ServerSession::Address()`.
    pub fn address(&self) -> &str {
        &self.peer_addr
    }

    /// Runs the session's receive/process/respond loop to completion.
    pub async fn run(mut self) {
        info!(peer = %self.address(), "session started");
        loop {
            let payload = match self.receiver.recv().await {
                Ok(payload) => payload,
                Err(TransportError::Closed) => {
                    debug!(peer = %self.address(), "peer closed connection");
                    break;
                }
                Err(TransportError::DataTimeout) => {
                    warn!(peer = %self.address(), "timed out waiting for command payload");
                    break;
                }
                Err(e) => {
                    warn!(peer = %self.address(), error = ?e, "transport error receiving command");
                    break;
                }
            };

            let command = match CommandMessage::decode(&payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!(peer = %self.address(), error = ?e, "malformed command frame");
                    continue;
                }
            };

            let result = self.processor.process(command);
            if let Err(e) = self.sender.send(result.encode()).await {
                warn!(peer = %self.address(), error = ?e, "failed to queue result frame");
                break;
            }
        }
        info!(peer = %self.address(), "session closed");
    }
}
