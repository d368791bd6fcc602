//! Framed transport built on top of [`crate::protocol`]: a FIFO-queued
//! sender and a timeout-bounded receive loop, generic over any
//! `AsyncRead`/`AsyncWrite` half so the same code drives both the server's
//! accepted sockets and the client's outbound connection.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::{MessageHeader, ProtocolError, HEADER_SIZE};

/// How long the receiver waits for a frame's payload after its header has
/// arrived, mirroring the original's `scReceiveDataTOutMs`.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Depth of the outbound send queue before [`FrameSender::send`] applies
/// backpressure.
pub const SEND_QUEUE_DEPTH: usize = 256;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer closed the connection")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting for frame payload")]
    DataTimeout,
    #[error("frame payload of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u32),
}

/// Largest payload this implementation will allocate a buffer for, a
/// defensive bound on top of the protocol's own key/value length limits.
pub const MAX_FRAME_LEN: u32 = 2 * 1024 * 1024;

/// A queued, FIFO-ordered frame sender half.
///
/// Frames handed to [`FrameSender::send`] are queued and written out by a
/// background task in submission order; writing never blocks the caller
/// beyond the bounded channel filling up. If the background writer exits
/// (peer closed, write error) the queue silently drains without delivering
/// further frames, matching the original `MessageSender`'s behavior on a
/// transport-closed error.
#[derive(Clone)]
pub struct FrameSender {
    queue: mpsc::Sender<bytes::BytesMut>,
}

impl FrameSender {
    /// Spawns the background writer task over `writer` and returns a handle
    /// to enqueue frames onto it.
    pub fn spawn<W>(mut writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<bytes::BytesMut>(SEND_QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let header = MessageHeader::for_payload(payload.len() as u32);
                if let Err(e) = writer.write_all(&header.encode()).await {
                    tracing::debug!(error = ?e, "write half closed, dropping send queue");
                    break;
                }
                if let Err(e) = writer.write_all(&payload).await {
                    tracing::debug!(error = ?e, "write half closed, dropping send queue");
                    break;
                }
            }
        });
        FrameSender { queue: tx }
    }

    /// Queues `payload` for sending. Returns [`TransportError::Closed`] if
    /// the writer task has already exited.
    pub async fn send(&self, payload: bytes::BytesMut) -> Result<(), TransportError> {
        self.queue.send(payload).await.map_err(|_| TransportError::Closed)
    }
}

/// Reads frames off `reader`, validating the header magic and bounding each
/// payload's arrival by `data_timeout`. Returns the next decoded payload,
/// or an error if the connection closed or a frame failed validation.
///
/// A header with a bad magic is treated as a resynchronization point: per
/// the original `MessageReceiver`, an invalid magic restarts the header
/// read rather than closing the connection outright.
pub struct FrameReceiver<R> {
    reader: R,
    data_timeout: Duration,
}

impl<R> FrameReceiver<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        FrameReceiver { reader, data_timeout: DEFAULT_RECEIVE_TIMEOUT }
    }

    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    /// Reads and returns the next frame's payload bytes.
    pub async fn recv(&mut self) -> Result<bytes::BytesMut, TransportError> {
        loop {
            let mut header_buf = [0u8; HEADER_SIZE];
            match self.reader.read_exact(&mut header_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(TransportError::Closed),
                Err(e) => return Err(TransportError::Io(e)),
            }
            let header = MessageHeader::decode(&header_buf);
            if !header.is_valid() {
                tracing::warn!(magic = header.magic, "invalid frame magic, resynchronizing");
                continue;
            }
            if header.len > MAX_FRAME_LEN {
                return Err(TransportError::FrameTooLarge(header.len));
            }

            let mut payload = bytes::BytesMut::zeroed(header.len as usize);
            let read = tokio::time::timeout(self.data_timeout, self.reader.read_exact(&mut payload));
            match read.await {
                Ok(Ok(_)) => return Ok(payload),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(TransportError::Closed),
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_) => return Err(TransportError::DataTimeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn sender_receiver_round_trip() {
        let (client, server) = duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let sender = FrameSender::spawn(client);

        let mut receiver = FrameReceiver::new(server_read);
        sender.send(bytes::BytesMut::from(&b"hello"[..])).await.unwrap();
        let payload = receiver.recv().await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn receiver_skips_invalid_magic_header() {
        let (mut client, server) = duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut receiver = FrameReceiver::new(server_read);

        // Bogus header (wrong magic) followed by a valid frame.
        client.write_all(&[0xFFu8; HEADER_SIZE]).await.unwrap();
        let good_header = MessageHeader::for_payload(2);
        client.write_all(&good_header.encode()).await.unwrap();
        client.write_all(b"ok").await.unwrap();

        let payload = receiver.recv().await.unwrap();
        assert_eq!(&payload[..], b"ok");
    }

    #[tokio::test]
    async fn receiver_reports_closed_on_eof() {
        let (client, server) = duplex(4096);
        drop(client);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut receiver = FrameReceiver::new(server_read);
        assert!(matches!(receiver.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn receiver_times_out_on_slow_payload() {
        let (mut client, server) = duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut receiver = FrameReceiver::new(server_read).with_data_timeout(Duration::from_millis(20));

        let header = MessageHeader::for_payload(5);
        client.write_all(&header.encode()).await.unwrap();
        // Never write the payload.
        let result = receiver.recv().await;
        assert!(matches!(result, Err(TransportError::DataTimeout)));
    }
}
