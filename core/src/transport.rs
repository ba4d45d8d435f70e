// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Identity-addressed async transport over TCP.
//!
//! The scheduler's API and system channels both need the same
//! contract: many short-lived or long-lived peers connect in, each
//! exchange is addressed by the peer's connection identity rather than
//! by an explicit session handshake, and the server side must be able
//! to both drain whatever arrived without blocking (`recv_nonblocking`)
//! and wait efficiently when there is nothing to do (`poll`). Frames
//! are a 4-byte big-endian length prefix followed by a JSON-encoded
//! [`Message`](crate::message::Message).

use crate::message::Message;
use crate::types::{SchedulerError, SchedulerResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, msg: &Message) -> SchedulerResult<()> {
    let body = serde_json::to_vec(msg)?;
    let len = u32::try_from(body.len())
        .map_err(|_| SchedulerError::Transport("frame too large to encode".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(SchedulerError::ChildProcess)?;
    writer.write_all(&body).await.map_err(SchedulerError::ChildProcess)?;
    writer.flush().await.map_err(SchedulerError::ChildProcess)?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> SchedulerResult<Message> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(SchedulerError::ChildProcess)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(SchedulerError::Transport(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_BYTES}"
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(SchedulerError::ChildProcess)?;
    let msg = serde_json::from_slice(&body)?;
    Ok(msg)
}

/// The server half of the transport: accepts many connections, each
/// addressed by a string identity, and multiplexes their frames into
/// one inbound queue.
pub struct TransportServer {
    inbound_rx: mpsc::UnboundedReceiver<(String, Message)>,
    outbound: Arc<DashMap<String, mpsc::UnboundedSender<Message>>>,
    notify: Arc<Notify>,
    next_id: AtomicU64,
    local_addr: std::net::SocketAddr,
}

impl TransportServer {
    /// Bind a listener on `addr` and start accepting connections in
    /// the background. Each connection gets its own reader/writer task
    /// so a slow peer never blocks another's frames.
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let outbound: Arc<DashMap<String, mpsc::UnboundedSender<Message>>> = Arc::new(DashMap::new());
        let notify = Arc::new(Notify::new());

        let accept_outbound = outbound.clone();
        let accept_notify = notify.clone();
        tokio::spawn(async move {
            let mut next = 0u64;
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "transport accept failed");
                        continue;
                    }
                };
                next += 1;
                let identity = format!("{peer}#{next}");
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                accept_outbound.insert(identity.clone(), out_tx);
                let inbound_tx = inbound_tx.clone();
                let outbound_table = accept_outbound.clone();
                let conn_notify = accept_notify.clone();
                tokio::spawn(handle_connection(socket, identity, inbound_tx, out_rx, outbound_table, conn_notify));
            }
        });

        Ok(Self {
            inbound_rx,
            outbound,
            notify,
            next_id: AtomicU64::new(0),
            local_addr,
        })
    }

    /// The address this server actually bound to (useful when `addr`
    /// passed to [`Self::bind`] used port `0`).
    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Drain one already-received `(identity, message)` pair without
    /// waiting, or return `None` if nothing has arrived. This is the
    /// non-blocking half of the event loop's "check everything, then
    /// act" step.
    pub fn recv_nonblocking(&mut self) -> Option<(String, Message)> {
        self.inbound_rx.try_recv().ok()
    }

    /// Send `msg` to a previously seen identity. Silently a no-op if
    /// the peer has since disconnected — the next heartbeat or report
    /// from that identity will simply never arrive, which the
    /// scheduler's reap logic already tolerates.
    pub fn send(&self, identity: &str, msg: Message) -> SchedulerResult<()> {
        match self.outbound.get(identity) {
            Some(sender) => sender
                .send(msg)
                .map_err(|_| SchedulerError::Transport(format!("peer {identity} gone"))),
            None => Err(SchedulerError::Transport(format!("unknown peer {identity}"))),
        }
    }

    /// Wait up to `timeout` for at least one frame to become
    /// available, without consuming it — callers still drain with
    /// [`Self::recv_nonblocking`] afterward. Returns `true` if a frame
    /// arrived (or was already waiting); `false` on timeout. Used by
    /// the scheduler's main loop in place of busy-polling.
    pub async fn poll(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
    }

    /// A fresh numeric id, handed out to connections that need one
    /// beyond their transport identity (e.g. a client's own outbound
    /// request correlation id).
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn handle_connection(
    socket: TcpStream,
    identity: String,
    inbound_tx: mpsc::UnboundedSender<(String, Message)>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    outbound_table: Arc<DashMap<String, mpsc::UnboundedSender<Message>>>,
    notify: Arc<Notify>,
) {
    let (mut read_half, mut write_half) = socket.into_split();
    let reader_identity = identity.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(msg) => {
                    if inbound_tx.send((reader_identity.clone(), msg)).is_err() {
                        break;
                    }
                    notify.notify_one();
                }
                Err(_) => break,
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if write_frame(&mut write_half, &msg).await.is_err() {
                break;
            }
        }
    });

    let _ = reader.await;
    writer.abort();
    outbound_table.remove(&identity);
}

/// The client half of the transport: a single persistent connection
/// used for strict request/reply exchanges, the shape every worker and
/// CLI-bridge call makes.
pub struct TransportClient {
    stream: TcpStream,
}

impl TransportClient {
    /// Connect to a server bound with [`TransportServer::bind`].
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Send `msg` and wait for exactly one reply. Callers that need a
    /// non-reply flow (`worker_available` legitimately blocks for an
    /// arbitrary time until a task shows up) just use a long or
    /// infinite `tokio::time::timeout` wrapper around this.
    pub async fn request(&mut self, msg: Message) -> SchedulerResult<Message> {
        write_frame(&mut self.stream, &msg).await?;
        read_frame(&mut self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ack_message, MessageType};

    #[tokio::test]
    async fn request_reply_round_trip() {
        let server = TransportServer::bind("127.0.0.1:0").await.unwrap();
        let local_addr = {
            // Rebind is awkward since `bind` hides the listener; spin
            // up a second listener here purely to learn a free port,
            // then bind the real server on it.
            drop(server);
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = probe.local_addr().unwrap();
            drop(probe);
            addr
        };

        let mut server = TransportServer::bind(local_addr).await.unwrap();
        let mut client = TransportClient::connect(local_addr).await.unwrap();

        client.request(ack_message()).await.ok();
        // give the server's background accept+reader tasks a tick
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (identity, msg) = loop {
            if let Some(pair) = server.recv_nonblocking() {
                break pair;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(msg.msg_type, MessageType::Ack);
        server.send(&identity, ack_message()).unwrap();
    }
}
