//! Error types for the bus client

use crate::messages::Category;
use thiserror::Error;

/// Errors that can occur when using the bus client
#[derive(Error, Debug)]
pub enum BusError {
    /// The configured endpoint could not be parsed or has an unsupported scheme
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A configuration value would make the client unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dialing or handshaking with the bus failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reading or writing on an established connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failed to serialize/deserialize an envelope or payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An envelope carried a type tag this client does not know
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// No remote definition is known for this category and identifier
    #[error("No {category} definition for '{identifier}'")]
    NotFound {
        category: Category,
        identifier: String,
    },

    /// A queue or router loop this call depends on has gone away
    #[error("Client shut down")]
    Shutdown,

    /// The client was constructed outside of a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
