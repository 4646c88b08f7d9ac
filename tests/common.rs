#![allow(dead_code)]

use busline::{BusClient, BusConfig, Data, Event, Message, MemoryConnector, MemoryPeer};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> BusConfig {
    BusConfig::new("ws://memory/bus").reconnect_delay(Duration::from_millis(10))
}

pub async fn memory_client(connector: &MemoryConnector) -> BusClient {
    BusClient::with_connector(test_config(), connector.clone())
        .await
        .unwrap()
}

pub fn data(key: &str, value: serde_json::Value) -> Data {
    let mut data = Data::new();
    data.insert(key.into(), value);
    data
}

/// Minimal stand-in for the bus server on one connection
///
/// Records every message the client sends and echoes events back for
/// identifiers the client subscribed to. Messages can also be injected as if
/// another client had published them.
pub struct MockBus {
    seen: mpsc::Receiver<Message>,
    inject: mpsc::Sender<Message>,
}

impl MockBus {
    pub async fn accept(connector: &MemoryConnector) -> Self {
        let peer = connector.accept().await.unwrap();
        Self::serve(peer)
    }

    pub fn serve(mut peer: MemoryPeer) -> Self {
        let (seen_tx, seen) = mpsc::channel(256);
        let (inject, mut inject_rx) = mpsc::channel::<Message>(64);

        tokio::spawn(async move {
            let mut subscribed = HashSet::new();
            loop {
                tokio::select! {
                    received = peer.recv_message() => {
                        let Ok(message) = received else { break };
                        match &message {
                            Message::Subscription(s) => {
                                subscribed.insert(s.identifier.clone());
                            }
                            Message::Unsubscription(u) => {
                                subscribed.remove(&u.identifier);
                            }
                            Message::Event(e) if subscribed.contains(&e.identifier) => {
                                if peer.send_message(&message).await.is_err() {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        if seen_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    injected = inject_rx.recv() => {
                        // Dropping the MockBus drops the connection
                        let Some(message) = injected else { break };
                        if peer.send_message(&message).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { seen, inject }
    }

    /// Next message the client sent to the bus
    pub async fn next(&mut self) -> Message {
        timeout(WAIT, self.seen.recv())
            .await
            .expect("bus received nothing")
            .expect("bus connection closed")
    }

    /// Next message sent to the bus, skipping events and actions
    pub async fn next_control(&mut self) -> Message {
        loop {
            match self.next().await {
                Message::Event(_) | Message::Action(_) => continue,
                other => return other,
            }
        }
    }

    /// Assert nothing else arrives before a marker event
    pub async fn expect_marker(&mut self, client: &BusClient, marker: &str) {
        client.send_event(marker, Data::new()).await.unwrap();
        assert_eq!(self.next().await, Message::Event(Event::new(marker, Data::new())));
    }

    pub async fn publish(&self, message: impl Into<Message>) {
        self.inject.send(message.into()).await.unwrap();
    }
}
