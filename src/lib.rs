//! Busline - client for a publish/subscribe capability bus
//!
//! Keeps a persistent, self-healing connection to a bus endpoint, announces
//! the capabilities ("definitions") this process offers, learns the ones
//! other clients announce, and routes events and actions between the wire
//! and application callbacks.
//!
//! # Example
//!
//! ```no_run
//! use busline::{BusClient, BusConfig, Category, Data, Definition, FieldType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BusClient::connect(BusConfig::new("ws://localhost:8080/bus")).await?;
//!
//!     // Announce what we publish
//!     let def = Definition::new("altitude", Category::Event).field("value", FieldType::Number, "m");
//!     client.add_local_definition(def).await?;
//!
//!     // Ask the bus for another client's events
//!     client.on_named_event("battery", |event| {
//!         println!("battery: {:?}", event.data);
//!         true
//!     }).await?;
//!
//!     let mut data = Data::new();
//!     data.insert("value".into(), serde_json::json!(120));
//!     client.send_event("altitude", data).await?;
//!
//!     Ok(())
//! }
//! ```

mod client;
pub mod codec;
mod config;
pub mod dispatch;
mod error;
pub mod messages;
pub mod registry;
pub mod router;
pub mod transport;

pub use client::BusClient;
pub use config::BusConfig;
pub use error::{BusError, Result};
pub use messages::{
    Action, Category, Data, Definition, Event, FieldDefinition, FieldType, Message, MessageKind, Subscription,
    UnDefinition, Unsubscription,
};
pub use router::{Hooks, Router, SubscriberId};
pub use transport::{ConnectionState, Connector, MemoryConnector, MemoryPeer, WebSocketConnector};
