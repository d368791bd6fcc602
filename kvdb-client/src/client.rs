//! One connection to a kvdb server: sends commands and demultiplexes
//! results back to their originating caller by command id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kvdb_core::{CommandId, CommandMessage, FrameReceiver, FrameSender, ResultMessage, TransportError};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Default timeout a caller waits for a command's result before giving up.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<CommandId, oneshot::Sender<ResultMessage>>>>;

/// An open connection to a kvdb server.
///
/// Dropping a [`ClientSession`] stops its background receive loop; any
/// commands still awaiting a result resolve to [`ClientError::ConnectionClosed`].
pub struct ClientSession {
    sender: FrameSender,
    pending: PendingMap,
    next_id: AtomicU32,
    recv_task: tokio::task::JoinHandle<()>,
}

impl ClientSession {
    /// Resolves and connects to `addr` (e.g. `"127.0.0.1:1524"`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!(%addr, "connected");
        let (read_half, write_half) = stream.into_split();
        let sender = FrameSender::spawn(write_half);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let recv_task = tokio::spawn(Self::receive_loop(FrameReceiver::new(read_half), pending.clone()));

        Ok(ClientSession { sender, pending, next_id: AtomicU32::new(1), recv_task })
    }

    async fn receive_loop(mut receiver: FrameReceiver<tokio::net::tcp::OwnedReadHalf>, pending: PendingMap) {
        loop {
            let payload = match receiver.recv().await {
                Ok(payload) => payload,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    warn!(error = ?e, "transport error receiving result");
                    break;
                }
            };
            let result = match ResultMessage::decode(&payload) {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = ?e, "malformed result frame");
                    continue;
                }
            };
            if let Some(callback) = pending.lock().remove(&result.command_id) {
                let _ = callback.send(result);
            }
        }
        // Connection is gone: wake every still-pending caller with a closed error
        // by simply dropping their sender halves.
        pending.lock().clear();
    }

    fn allocate_id(&self) -> CommandId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_and_await(&self, command: CommandMessage, timeout: Duration) -> Result<ResultMessage> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&command.id) {
                return Err(ClientError::DuplicateCommandId(command.id));
            }
            pending.insert(command.id, tx);
        }

        if let Err(e) = self.sender.send(command.encode()).await {
            self.pending.lock().remove(&command.id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&command.id);
                Err(ClientError::Timeout)
            }
        }
    }

    pub async fn insert(&self, key: &str, value: &str) -> Result<ResultMessage> {
        let id = self.allocate_id();
        let command = CommandMessage::insert(id, key, value)?;
        self.send_and_await(command, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn update(&self, key: &str, value: &str) -> Result<ResultMessage> {
        let id = self.allocate_id();
        let command = CommandMessage::update(id, key, value)?;
        self.send_and_await(command, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn get(&self, key: &str) -> Result<ResultMessage> {
        let id = self.allocate_id();
        let command = CommandMessage::get(id, key)?;
        self.send_and_await(command, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn delete(&self, key: &str) -> Result<ResultMessage> {
        let id = self.allocate_id();
        let command = CommandMessage::delete(id, key)?;
        self.send_and_await(command, DEFAULT_COMMAND_TIMEOUT).await
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
