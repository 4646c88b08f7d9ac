//! Connection ownership and the reconnect loop
//!
//! ```text
//! Disconnected ──► Dialing ──► Connected ──► (reading ∥ writing)
//!      ▲              │                              │
//!      └── delay ◄────┘                              │
//!      └──────────────── any failure ◄───────────────┘
//! ```
//!
//! Dial failures are retried after a fixed delay, forever. Once connected,
//! the writer drains the outbound queue and the reader feeds the dispatch
//! tree; whichever fails first tears the connection down and the loop
//! dials again.

pub mod memory;
pub mod websocket;

use crate::codec;
use crate::error::{BusError, Result};
use crate::messages::Message;
use crate::registry::DefinitionRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

pub use memory::{MemoryConnector, MemoryPeer};
pub use websocket::WebSocketConnector;

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; waiting to dial
    Disconnected,
    /// Dial and handshake in progress
    Dialing,
    /// Connected and exchanging frames
    Connected,
}

/// Receiving half of an established connection
#[async_trait]
pub trait FrameReader: Send {
    /// Next text frame, or `None` once the peer has closed the connection
    async fn read_frame(&mut self) -> Result<Option<String>>;
}

/// Sending half of an established connection
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An established connection, split so both halves can run concurrently
pub struct Connection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

impl Connection {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens connections to a bus endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection and complete the protocol handshake
    async fn dial(&self, endpoint: &Url) -> Result<Connection>;
}

/// Why a connection stopped being served
enum Teardown {
    /// Every producer of the outbound queue is gone
    Shutdown,
    /// The connection failed; dial again
    Lost(BusError),
}

/// Owns the physical connection for one client
pub struct Transport<C> {
    connector: C,
    endpoint: Url,
    reconnect_delay: Duration,
    replay_on_reconnect: bool,
    outbound: mpsc::Receiver<Message>,
    inbound: mpsc::Sender<Message>,
    registry: Arc<DefinitionRegistry>,
    state: watch::Sender<ConnectionState>,
}

impl<C: Connector> Transport<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: C,
        endpoint: Url,
        reconnect_delay: Duration,
        replay_on_reconnect: bool,
        outbound: mpsc::Receiver<Message>,
        inbound: mpsc::Sender<Message>,
        registry: Arc<DefinitionRegistry>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            reconnect_delay,
            replay_on_reconnect,
            outbound,
            inbound,
            registry,
            state,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    /// Dial, serve, and redial until the outbound queue is closed
    pub async fn run(mut self) {
        let mut established = 0u64;

        loop {
            let connection = self.dial().await;
            established += 1;
            self.set_state(ConnectionState::Connected);
            info!(endpoint = %self.endpoint, connection = established, "Connected");

            let replay = established > 1 && self.replay_on_reconnect;
            match self.serve(connection, replay).await {
                Teardown::Shutdown => {
                    info!("Outbound queue closed, stopping transport");
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Teardown::Lost(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "Connection lost, redialing");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    async fn dial(&self) -> Connection {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            self.set_state(ConnectionState::Dialing);
            debug!(endpoint = %self.endpoint, attempt, "Dialing");

            match self.connector.dial(&self.endpoint).await {
                Ok(connection) => return connection,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %e, "Dial failed");
                    self.set_state(ConnectionState::Disconnected);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    async fn serve(&mut self, connection: Connection, replay: bool) -> Teardown {
        let Connection {
            mut reader,
            mut writer,
        } = connection;

        let teardown = if let Err(e) = self.replay(writer.as_mut(), replay).await {
            Teardown::Lost(e)
        } else {
            let writing = write_loop(writer.as_mut(), &mut self.outbound);
            let reading = read_loop(reader.as_mut(), &self.inbound);
            tokio::select! {
                teardown = writing => teardown,
                teardown = reading => teardown,
            }
        };

        if let Err(e) = writer.close().await {
            debug!(error = %e, "Error closing connection");
        }
        teardown
    }

    async fn replay(&self, writer: &mut dyn FrameWriter, replay: bool) -> Result<()> {
        if !replay {
            return Ok(());
        }
        let messages = self.registry.replay_messages();
        debug!(count = messages.len(), "Replaying local state");
        for message in messages {
            writer.write_frame(codec::encode(&message)?).await?;
        }
        Ok(())
    }
}

async fn write_loop(writer: &mut dyn FrameWriter, outbound: &mut mpsc::Receiver<Message>) -> Teardown {
    while let Some(message) = outbound.recv().await {
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = %message.kind(), error = %e, "Failed to encode message");
                continue;
            }
        };
        if let Err(e) = writer.write_frame(frame).await {
            return Teardown::Lost(e);
        }
    }
    Teardown::Shutdown
}

async fn read_loop(reader: &mut dyn FrameReader, inbound: &mpsc::Sender<Message>) -> Teardown {
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Teardown::Lost(BusError::Connection("Connection closed by peer".into())),
            Err(e) => return Teardown::Lost(e),
        };

        let message = match codec::decode(&frame) {
            Ok(message) => message,
            Err(BusError::UnknownMessageType(tag)) => {
                warn!(tag = %tag, "Dropping envelope with unknown type");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Failed to decode frame");
                continue;
            }
        };

        if inbound.send(message).await.is_err() {
            return Teardown::Shutdown;
        }
    }
}
