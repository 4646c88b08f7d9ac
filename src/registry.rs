//! Local and remote definition bookkeeping
//!
//! Local definitions are what this client announces to the bus; remote
//! definitions are what it has learned from `def`/`undef` traffic. The
//! registry also remembers which event identifiers this client is
//! subscribed to, so that both can be replayed after a reconnect.

use crate::error::{BusError, Result};
use crate::messages::{Category, Definition, Message, Subscription, UnDefinition, Unsubscription};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::debug;

type DefinitionTable = HashMap<Category, HashMap<String, Definition>>;

#[derive(Default)]
struct RegistryState {
    local: DefinitionTable,
    remote: DefinitionTable,
    subscriptions: BTreeSet<String>,
}

fn insert(table: &mut DefinitionTable, def: Definition) -> bool {
    let entries = table.entry(def.category).or_default();
    if entries.contains_key(&def.identifier) {
        return false;
    }
    entries.insert(def.identifier.clone(), def);
    true
}

fn remove(table: &mut DefinitionTable, category: Category, identifier: &str) -> Option<Definition> {
    table.get_mut(&category)?.remove(identifier)
}

/// Concurrent store of local and remote definitions
///
/// The lock is only held for map operations; enqueueing onto the outbound
/// queue always happens after it is released.
pub struct DefinitionRegistry {
    state: Mutex<RegistryState>,
    outbound: mpsc::Sender<Message>,
}

impl DefinitionRegistry {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            outbound,
        }
    }

    async fn enqueue(&self, message: Message) -> Result<()> {
        self.outbound.send(message).await.map_err(|_| BusError::Shutdown)
    }

    /// Announce a local definition
    ///
    /// Returns `false` without sending anything if a definition with the
    /// same category and identifier is already registered.
    pub async fn add_local(&self, def: Definition) -> Result<bool> {
        let inserted = insert(&mut self.state.lock().local, def.clone());
        if !inserted {
            debug!(identifier = %def.identifier, category = %def.category, "local definition already registered");
            return Ok(false);
        }
        self.enqueue(Message::Definition(def)).await?;
        Ok(true)
    }

    /// Withdraw a local definition. Returns `false` if it was not registered.
    pub async fn remove_local(&self, category: Category, identifier: &str) -> Result<bool> {
        let removed = remove(&mut self.state.lock().local, category, identifier);
        match removed {
            Some(def) => {
                self.enqueue(Message::UnDefinition(UnDefinition::from(def))).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record a definition learned from the bus
    pub fn add_remote(&self, def: Definition) -> bool {
        insert(&mut self.state.lock().remote, def)
    }

    /// Forget a definition withdrawn on the bus
    pub fn remove_remote(&self, category: Category, identifier: &str) -> bool {
        remove(&mut self.state.lock().remote, category, identifier).is_some()
    }

    pub fn lookup_remote(&self, category: Category, identifier: &str) -> Result<Definition> {
        self.state
            .lock()
            .remote
            .get(&category)
            .and_then(|entries| entries.get(identifier))
            .cloned()
            .ok_or_else(|| BusError::NotFound {
                category,
                identifier: identifier.to_string(),
            })
    }

    pub fn local_definitions(&self) -> Vec<Definition> {
        let state = self.state.lock();
        state.local.values().flat_map(|entries| entries.values().cloned()).collect()
    }

    pub fn remote_definitions(&self, category: Category) -> Vec<Definition> {
        let state = self.state.lock();
        state
            .remote
            .get(&category)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ask the bus for events on `identifier`
    pub async fn subscribe(&self, identifier: &str) -> Result<()> {
        self.state.lock().subscriptions.insert(identifier.to_string());
        debug!(identifier, "subscribing");
        self.enqueue(Message::Subscription(Subscription {
            identifier: identifier.to_string(),
        }))
        .await
    }

    /// Tell the bus to stop sending events on `identifier`
    pub async fn unsubscribe(&self, identifier: &str) -> Result<()> {
        self.state.lock().subscriptions.remove(identifier);
        debug!(identifier, "unsubscribing");
        self.enqueue(Message::Unsubscription(Unsubscription {
            identifier: identifier.to_string(),
        }))
        .await
    }

    /// Messages that re-establish this client's announcements on a fresh connection
    pub fn replay_messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        let definitions = state
            .local
            .values()
            .flat_map(|entries| entries.values().cloned())
            .map(Message::Definition);
        let subscriptions = state.subscriptions.iter().map(|identifier| {
            Message::Subscription(Subscription {
                identifier: identifier.clone(),
            })
        });
        definitions.chain(subscriptions).collect()
    }
}
