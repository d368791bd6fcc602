//! Accepts inbound TCP connections and spawns a [`ServerSession`] for each,
//! tracking all live sessions in a [`tokio::task::JoinSet`] so a shutdown
//! signal can wait for them to drain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::processor::CommandProcessor;
use crate::session::ServerSession;

/// Backlog/concurrent-session soft limit, mirroring the original's
/// `scMaxConnections`.
pub const MAX_CONNECTIONS: usize = 100;

pub struct Acceptor {
    listener: TcpListener,
    processor: Arc<CommandProcessor>,
    receive_timeout: Duration,
}

impl Acceptor {
    pub async fn bind(host: &str, port: u16, processor: Arc<CommandProcessor>, receive_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening");
        Ok(Acceptor { listener, processor, receive_timeout })
    }

    /// The address actually bound, useful when `port` was 0 and the OS
    /// picked one.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr().expect("listener is always bound")
    }

    /// Accepts connections until `shutdown` resolves, then waits for all
    /// in-flight sessions to finish before returning.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        let mut sessions: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            if sessions.len() >= MAX_CONNECTIONS {
                                warn!("connection limit reached, rejecting new connection");
                                continue;
                            }
                            let session = ServerSession::new(stream, self.processor.clone(), self.receive_timeout);
                            sessions.spawn(session.run());
                        }
                        Err(e) => warn!(error = ?e, "accept failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, draining sessions");
                    break;
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("all sessions drained");
    }
}
