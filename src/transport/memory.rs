//! In-process connector
//!
//! Every successful dial yields a pair of queues: the client's half is
//! handed to the transport, the other half is delivered to whoever calls
//! [`MemoryConnector::accept`] as a [`MemoryPeer`]. Dropping the peer drops
//! the connection. Dial failures can be injected to exercise the
//! reconnect loop.

use super::{Connection, Connector, FrameReader, FrameWriter};
use crate::codec;
use crate::error::{BusError, Result};
use crate::messages::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use url::Url;

const PEER_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_CAPACITY: usize = 64;

struct Shared {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    peers_tx: mpsc::Sender<MemoryPeer>,
    peers_rx: Mutex<mpsc::Receiver<MemoryPeer>>,
}

/// Connector whose connections live entirely in memory
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::channel(16);
        Self {
            shared: Arc::new(Shared {
                failures: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                peers_tx,
                peers_rx: Mutex::new(peers_rx),
            }),
        }
    }

    /// Make the next `count` dials fail
    pub fn fail_next_dials(&self, count: usize) {
        self.shared.failures.store(count, Ordering::SeqCst);
    }

    /// Total dials attempted so far, failed ones included
    pub fn dial_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next successful dial and return its remote end
    pub async fn accept(&self) -> Result<MemoryPeer> {
        let mut peers = self.shared.peers_rx.lock().await;
        match timeout(PEER_TIMEOUT, peers.recv()).await {
            Ok(Some(peer)) => Ok(peer),
            Ok(None) => Err(BusError::Shutdown),
            Err(_) => Err(BusError::Connection("No connection was dialed".into())),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn dial(&self, endpoint: &Url) -> Result<Connection> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BusError::Connection(format!("{}: connection refused", endpoint)));
        }

        let (to_client, from_peer) = mpsc::channel(FRAME_CAPACITY);
        let (to_peer, from_client) = mpsc::channel(FRAME_CAPACITY);

        self.shared
            .peers_tx
            .send(MemoryPeer {
                from_client,
                to_client,
            })
            .await
            .map_err(|_| BusError::Connection("Memory listener closed".into()))?;

        Ok(Connection::new(
            MemoryReader { rx: from_peer },
            MemoryWriter { tx: Some(to_peer) },
        ))
    }
}

struct MemoryReader {
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<String>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| BusError::Transport("Connection closed".into()))?;
        tx.send(frame)
            .await
            .map_err(|_| BusError::Transport("Peer went away".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Remote end of an in-memory connection
pub struct MemoryPeer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl MemoryPeer {
    /// Next frame the client wrote
    pub async fn recv_frame(&mut self) -> Result<String> {
        match timeout(PEER_TIMEOUT, self.from_client.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(BusError::Transport("Client closed the connection".into())),
            Err(_) => Err(BusError::Transport("No frame received".into())),
        }
    }

    /// Next frame the client wrote, decoded
    pub async fn recv_message(&mut self) -> Result<Message> {
        let frame = self.recv_frame().await?;
        codec::decode(&frame)
    }

    /// A frame the client already wrote, without waiting
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub async fn send_frame(&self, frame: impl Into<String>) -> Result<()> {
        self.to_client
            .send(frame.into())
            .await
            .map_err(|_| BusError::Transport("Client closed the connection".into()))
    }

    pub async fn send_message(&self, message: &Message) -> Result<()> {
        self.send_frame(codec::encode(message)?).await
    }
}
