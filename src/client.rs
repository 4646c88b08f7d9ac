//! Bus client implementation

use crate::config::BusConfig;
use crate::dispatch::{DispatchTree, RoutedKind};
use crate::error::{BusError, Result};
use crate::messages::{Action, Category, Data, Definition, Event, Message, UnDefinition};
use crate::registry::DefinitionRegistry;
use crate::router::Router;
use crate::transport::{ConnectionState, Connector, Transport, WebSocketConnector};

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Internal client state
struct ClientInner {
    registry: Arc<DefinitionRegistry>,
    outbound: mpsc::Sender<Message>,
    tree: DispatchTree,
    state_rx: watch::Receiver<ConnectionState>,
}

/// Client for a publish/subscribe capability bus
///
/// Keeps one connection to the bus alive in the background, announces
/// local definitions and routes incoming messages to registered callbacks.
/// This struct is cheaply cloneable as it uses an internal Arc.
///
/// Callbacks run on their own task, one message at a time, in arrival
/// order. Returning `false` from a callback unregisters it.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<ClientInner>,
}

impl BusClient {
    /// Connect to a bus over WebSocket
    ///
    /// Returns as soon as the client is wired up; the connection itself is
    /// established (and re-established) in the background. Fails only if
    /// `config` is invalid.
    pub async fn connect(config: BusConfig) -> Result<Self> {
        Self::with_connector(config, WebSocketConnector).await
    }

    /// Like [`BusClient::connect`], with a caller-supplied connector
    pub async fn with_connector<C: Connector>(config: BusConfig, connector: C) -> Result<Self> {
        let endpoint = config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let registry = Arc::new(DefinitionRegistry::new(outbound_tx.clone()));
        let tree = DispatchTree::new(inbound_rx, registry.clone(), &config).await?;

        let transport = Transport::new(
            connector,
            endpoint.clone(),
            config.reconnect_delay,
            config.replay_on_reconnect,
            outbound_rx,
            inbound_tx,
            registry.clone(),
            state_tx,
        );
        tokio::spawn(transport.run());
        info!(endpoint = %endpoint, "Bus client started");

        Ok(Self {
            inner: Arc::new(ClientInner {
                registry,
                outbound: outbound_tx,
                tree,
                state_rx,
            }),
        })
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Announce a local definition to the bus
    ///
    /// Returns `false` if the same category and identifier was already announced.
    pub async fn add_local_definition(&self, def: Definition) -> Result<bool> {
        self.inner.registry.add_local(def).await
    }

    /// Withdraw a local definition. Returns `false` if it was never announced.
    pub async fn remove_local_definition(&self, category: Category, identifier: &str) -> Result<bool> {
        self.inner.registry.remove_local(category, identifier).await
    }

    pub fn local_definitions(&self) -> Vec<Definition> {
        self.inner.registry.local_definitions()
    }

    /// Definition announced on the bus by another client
    pub fn remote_definition(&self, category: Category, identifier: &str) -> Result<Definition> {
        self.inner.registry.lookup_remote(category, identifier)
    }

    pub fn remote_definitions(&self, category: Category) -> Vec<Definition> {
        self.inner.registry.remote_definitions(category)
    }

    /// Queue any message for the bus
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.inner
            .outbound
            .send(message.into())
            .await
            .map_err(|_| BusError::Shutdown)
    }

    pub async fn send_event(&self, identifier: impl Into<String>, data: Data) -> Result<()> {
        self.send(Event::new(identifier, data)).await
    }

    pub async fn send_action(&self, identifier: impl Into<String>, data: Data) -> Result<()> {
        self.send(Action::new(identifier, data)).await
    }

    async fn listen_named<T, F>(&self, kind: RoutedKind, identifier: &str, callback: F) -> Result<()>
    where
        T: TryFrom<Message> + 'static,
        F: FnMut(T) -> bool + Send + 'static,
    {
        let router = self.inner.tree.named(kind, identifier).await?;
        listen(&router, callback).await
    }

    /// Call `callback` for every definition announced on the bus
    pub async fn on_definition<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Definition) -> bool + Send + 'static,
    {
        listen(self.inner.tree.typed(RoutedKind::Definition), callback).await
    }

    pub async fn on_named_definition<F>(&self, identifier: &str, callback: F) -> Result<()>
    where
        F: FnMut(Definition) -> bool + Send + 'static,
    {
        self.listen_named(RoutedKind::Definition, identifier, callback).await
    }

    /// Call `callback` for every definition withdrawn on the bus
    pub async fn on_undefinition<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(UnDefinition) -> bool + Send + 'static,
    {
        listen(self.inner.tree.typed(RoutedKind::UnDefinition), callback).await
    }

    pub async fn on_named_undefinition<F>(&self, identifier: &str, callback: F) -> Result<()>
    where
        F: FnMut(UnDefinition) -> bool + Send + 'static,
    {
        self.listen_named(RoutedKind::UnDefinition, identifier, callback).await
    }

    /// Call `callback` for every event that reaches this client
    ///
    /// This does not subscribe to anything on the bus; use
    /// [`BusClient::on_named_event`] to ask the bus for an identifier.
    pub async fn on_event<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Event) -> bool + Send + 'static,
    {
        listen(self.inner.tree.typed(RoutedKind::Event), callback).await
    }

    /// Call `callback` for events on `identifier`
    ///
    /// The first callback for an identifier subscribes to it on the bus;
    /// when the last one unregisters, the client unsubscribes.
    pub async fn on_named_event<F>(&self, identifier: &str, callback: F) -> Result<()>
    where
        F: FnMut(Event) -> bool + Send + 'static,
    {
        self.listen_named(RoutedKind::Event, identifier, callback).await
    }

    /// Call `callback` for every action that reaches this client
    pub async fn on_action<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(Action) -> bool + Send + 'static,
    {
        listen(self.inner.tree.typed(RoutedKind::Action), callback).await
    }

    pub async fn on_named_action<F>(&self, identifier: &str, callback: F) -> Result<()>
    where
        F: FnMut(Action) -> bool + Send + 'static,
    {
        self.listen_named(RoutedKind::Action, identifier, callback).await
    }
}

/// Attach a callback that only sees messages convertible to `T`
async fn listen<T, F>(router: &Router, mut callback: F) -> Result<()>
where
    T: TryFrom<Message> + 'static,
    F: FnMut(T) -> bool + Send + 'static,
{
    router
        .attach(move |message| match T::try_from(message) {
            Ok(typed) => callback(typed),
            Err(_) => true,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FieldType, Subscription};
    use crate::transport::MemoryConnector;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn client() -> (BusClient, MemoryConnector) {
        let connector = MemoryConnector::new();
        let config = BusConfig::new("ws://memory/").reconnect_delay(Duration::from_millis(10));
        let client = BusClient::with_connector(config, connector.clone()).await.unwrap();
        (client, connector)
    }

    #[tokio::test]
    async fn test_invalid_endpoint_aborts_construction() {
        let result = BusClient::with_connector(BusConfig::new("not a url"), MemoryConnector::new()).await;
        assert!(matches!(result, Err(BusError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_zero_capacity_aborts_construction() {
        let config = BusConfig::new("ws://memory/").queue_capacity(0);
        let connector = MemoryConnector::new();
        let result = BusClient::with_connector(config, connector.clone()).await;

        assert!(matches!(result, Err(BusError::InvalidConfig(_))));
        assert_eq!(connector.dial_attempts(), 0);
    }

    #[cfg(not(feature = "tls"))]
    #[tokio::test]
    async fn test_wss_without_tls_aborts_construction() {
        let result = BusClient::connect(BusConfig::new("wss://localhost/")).await;
        assert!(matches!(result, Err(BusError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_state_receiver_reaches_connected() {
        let (client, connector) = client().await;
        let _peer = connector.accept().await.unwrap();

        let mut state = client.state_receiver();
        timeout(Duration::from_secs(2), state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_send_event_without_subscribers_goes_to_bus() {
        let (client, connector) = client().await;
        let mut peer = connector.accept().await.unwrap();

        let mut data = Data::new();
        data.insert("value".into(), json!(120));
        client.send_event("altitude", data.clone()).await.unwrap();

        assert_eq!(
            peer.recv_message().await.unwrap(),
            Message::Event(Event::new("altitude", data))
        );
    }

    #[tokio::test]
    async fn test_add_local_definition_announces_once() {
        let (client, connector) = client().await;
        let mut peer = connector.accept().await.unwrap();
        let def = Definition::new("battery", Category::Event).field("level", FieldType::Number, "%");

        assert!(client.add_local_definition(def.clone()).await.unwrap());
        assert!(!client.add_local_definition(def.clone()).await.unwrap());
        client.send_action("marker", Data::new()).await.unwrap();

        assert_eq!(peer.recv_message().await.unwrap(), Message::Definition(def.clone()));
        assert_eq!(peer.recv_message().await.unwrap().identifier(), "marker");
        assert_eq!(client.local_definitions(), vec![def]);
    }

    #[tokio::test]
    async fn test_remote_definition_lookup() {
        let (client, connector) = client().await;
        let peer = connector.accept().await.unwrap();

        assert!(matches!(
            client.remote_definition(Category::Event, "gps"),
            Err(BusError::NotFound { .. })
        ));

        let def = Definition::new("gps", Category::Event).field("lat", FieldType::Number, "deg");
        peer.send_message(&Message::Definition(def.clone())).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while client.remote_definition(Category::Event, "gps").is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(client.remote_definition(Category::Event, "gps").unwrap(), def);
        assert_eq!(client.remote_definitions(Category::Event), vec![def]);
    }

    #[tokio::test]
    async fn test_on_named_event_subscribes_on_bus() {
        let (client, connector) = client().await;
        let mut peer = connector.accept().await.unwrap();

        client.on_named_event("altitude", |_| true).await.unwrap();
        client.on_named_event("altitude", |_| true).await.unwrap();

        assert_eq!(
            peer.recv_message().await.unwrap(),
            Message::Subscription(Subscription {
                identifier: "altitude".into()
            })
        );
        client.send_event("marker", Data::new()).await.unwrap();
        assert_eq!(peer.recv_message().await.unwrap().identifier(), "marker");
    }

    #[tokio::test]
    async fn test_on_event_does_not_subscribe() {
        let (client, connector) = client().await;
        let mut peer = connector.accept().await.unwrap();

        client.on_event(|_| true).await.unwrap();
        client.on_named_action("land", |_| true).await.unwrap();
        client.send_event("marker", Data::new()).await.unwrap();

        assert_eq!(peer.recv_message().await.unwrap().identifier(), "marker");
    }
}
