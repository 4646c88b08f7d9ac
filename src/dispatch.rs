//! Two-level dispatch tree
//!
//! ```text
//!                  ┌── definitions ──┬── "gps"
//!                  │                 └── ...
//!  inbound ── root ├── undefinitions ── ...
//!                  ├── events ────────┬── "altitude"   (sub/unsub hooks)
//!                  │                  └── ...
//!                  └── actions ─────── ...
//! ```
//!
//! The root passes everything; typed routers keep one message kind; named
//! routers keep one identifier and are created lazily on first use. Named
//! routers are kept for the lifetime of the client once created.

use crate::config::BusConfig;
use crate::error::Result;
use crate::messages::{Definition, Message, MessageKind, UnDefinition};
use crate::registry::DefinitionRegistry;
use crate::router::{pass_all, Filter, Hooks, Router};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// The four message kinds that get their own typed router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutedKind {
    Definition,
    UnDefinition,
    Event,
    Action,
}

impl RoutedKind {
    fn message_kind(self) -> MessageKind {
        match self {
            RoutedKind::Definition => MessageKind::Definition,
            RoutedKind::UnDefinition => MessageKind::UnDefinition,
            RoutedKind::Event => MessageKind::Event,
            RoutedKind::Action => MessageKind::Action,
        }
    }
}

fn kind_filter(kind: MessageKind) -> Filter {
    Arc::new(move |message: Message| (message.kind() == kind).then_some(message))
}

fn identifier_filter(identifier: String) -> Filter {
    Arc::new(move |message: Message| (message.identifier() == identifier).then_some(message))
}

/// Hooks that turn the first/last local listener of an event identifier
/// into a bus-level subscribe/unsubscribe
fn subscription_hooks(registry: Arc<DefinitionRegistry>, identifier: &str) -> Hooks {
    let first = {
        let registry = registry.clone();
        let identifier = identifier.to_string();
        move || {
            let registry = registry.clone();
            let identifier = identifier.clone();
            async move {
                if let Err(e) = registry.subscribe(&identifier).await {
                    warn!(identifier = %identifier, error = %e, "failed to enqueue subscription");
                }
            }
            .boxed()
        }
    };
    let last = {
        let identifier = identifier.to_string();
        move || {
            let registry = registry.clone();
            let identifier = identifier.clone();
            async move {
                if let Err(e) = registry.unsubscribe(&identifier).await {
                    warn!(identifier = %identifier, error = %e, "failed to enqueue unsubscription");
                }
            }
            .boxed()
        }
    };

    Hooks {
        on_first: Some(Box::new(first)),
        on_last: Some(Box::new(last)),
    }
}

async fn attach_typed(root: &Router, kind: RoutedKind, config: &BusConfig) -> Result<Router> {
    let (tx, rx) = mpsc::channel(config.router_capacity);
    let router = Router::spawn(
        rx,
        kind_filter(kind.message_kind()),
        Hooks::default(),
        config.control_capacity,
        config.subscriber_capacity,
    );
    root.attach_raw(tx).await?;
    Ok(router)
}

/// Per-client memo of identifier routers, one map per kind
#[derive(Default)]
struct NamedRouters {
    definitions: Mutex<HashMap<String, Router>>,
    undefinitions: Mutex<HashMap<String, Router>>,
    events: Mutex<HashMap<String, Router>>,
    actions: Mutex<HashMap<String, Router>>,
}

impl NamedRouters {
    fn cache(&self, kind: RoutedKind) -> &Mutex<HashMap<String, Router>> {
        match kind {
            RoutedKind::Definition => &self.definitions,
            RoutedKind::UnDefinition => &self.undefinitions,
            RoutedKind::Event => &self.events,
            RoutedKind::Action => &self.actions,
        }
    }
}

pub struct DispatchTree {
    root: Router,
    definitions: Router,
    undefinitions: Router,
    events: Router,
    actions: Router,
    named: NamedRouters,
    registry: Arc<DefinitionRegistry>,
    router_capacity: usize,
    control_capacity: usize,
    subscriber_capacity: usize,
}

impl DispatchTree {
    /// Wire up the root and typed routers, reading decoded messages from `inbound`
    pub async fn new(
        inbound: mpsc::Receiver<Message>,
        registry: Arc<DefinitionRegistry>,
        config: &BusConfig,
    ) -> Result<Self> {
        let root = Router::spawn(
            inbound,
            pass_all(),
            Hooks::default(),
            config.control_capacity,
            config.subscriber_capacity,
        );
        let definitions = attach_typed(&root, RoutedKind::Definition, config).await?;
        let undefinitions = attach_typed(&root, RoutedKind::UnDefinition, config).await?;
        let events = attach_typed(&root, RoutedKind::Event, config).await?;
        let actions = attach_typed(&root, RoutedKind::Action, config).await?;

        let observer = registry.clone();
        definitions
            .attach(move |message| {
                if let Ok(def) = Definition::try_from(message) {
                    debug!(identifier = %def.identifier, category = %def.category, "remote definition");
                    observer.add_remote(def);
                }
                true
            })
            .await?;

        let observer = registry.clone();
        undefinitions
            .attach(move |message| {
                if let Ok(undef) = UnDefinition::try_from(message) {
                    debug!(identifier = %undef.identifier, category = %undef.category, "remote undefinition");
                    observer.remove_remote(undef.category, &undef.identifier);
                }
                true
            })
            .await?;

        Ok(Self {
            root,
            definitions,
            undefinitions,
            events,
            actions,
            named: NamedRouters::default(),
            registry,
            router_capacity: config.router_capacity,
            control_capacity: config.control_capacity,
            subscriber_capacity: config.subscriber_capacity,
        })
    }

    pub fn root(&self) -> &Router {
        &self.root
    }

    /// Router carrying every message of one kind
    pub fn typed(&self, kind: RoutedKind) -> &Router {
        match kind {
            RoutedKind::Definition => &self.definitions,
            RoutedKind::UnDefinition => &self.undefinitions,
            RoutedKind::Event => &self.events,
            RoutedKind::Action => &self.actions,
        }
    }

    /// Router carrying messages of one kind for one identifier, created on first use
    pub async fn named(&self, kind: RoutedKind, identifier: &str) -> Result<Router> {
        let mut routers = self.named.cache(kind).lock().await;
        if let Some(router) = routers.get(identifier) {
            return Ok(router.clone());
        }

        let hooks = match kind {
            RoutedKind::Event => subscription_hooks(self.registry.clone(), identifier),
            _ => Hooks::default(),
        };

        let (tx, rx) = mpsc::channel(self.router_capacity);
        let router = Router::spawn(
            rx,
            identifier_filter(identifier.to_string()),
            hooks,
            self.control_capacity,
            self.subscriber_capacity,
        );
        self.typed(kind).attach_raw(tx).await?;
        debug!(?kind, identifier, "created named router");

        routers.insert(identifier.to_string(), router.clone());
        Ok(router)
    }
}
