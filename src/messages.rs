//! Message types for the bus protocol
//!
//! Six concrete kinds travel on the wire. [`Message`] is the sum of all of
//! them and is what flows through routers and queues inside the client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload carried by events and actions
pub type Data = serde_json::Map<String, serde_json::Value>;

/// Which side of the bus a definition describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Event,
    Action,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Event => f.write_str("event"),
            Category::Action => f.write_str("action"),
        }
    }
}

/// Primitive type of a definition field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

/// One entry in a definition's field schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub units: String,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type,
            units: units.into(),
        }
    }
}

/// A declared capability: an event or action identifier and its field schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub identifier: String,
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl Definition {
    pub fn new(identifier: impl Into<String>, category: Category) -> Self {
        Self {
            identifier: identifier.into(),
            category,
            fields: Vec::new(),
        }
    }

    /// Append a field to the schema
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType, units: impl Into<String>) -> Self {
        self.fields.push(FieldDefinition::new(name, field_type, units));
        self
    }
}

/// Notice that a previously announced definition is withdrawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnDefinition {
    pub identifier: String,
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl From<Definition> for UnDefinition {
    fn from(def: Definition) -> Self {
        Self {
            identifier: def.identifier,
            category: def.category,
            fields: def.fields,
        }
    }
}

/// Something that happened on a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub identifier: String,
    #[serde(default)]
    pub data: Data,
}

impl Event {
    pub fn new(identifier: impl Into<String>, data: Data) -> Self {
        Self {
            identifier: identifier.into(),
            data,
        }
    }
}

/// Something a device is asked to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub identifier: String,
    #[serde(default)]
    pub data: Data,
}

impl Action {
    pub fn new(identifier: impl Into<String>, data: Data) -> Self {
        Self {
            identifier: identifier.into(),
            data,
        }
    }
}

/// Ask the bus to start forwarding events for an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub identifier: String,
}

/// Ask the bus to stop forwarding events for an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unsubscription {
    pub identifier: String,
}

/// Discriminant of [`Message`], carried on the wire as the envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    Action,
    Definition,
    UnDefinition,
    Subscription,
    Unsubscription,
}

impl MessageKind {
    /// Envelope type tag for this kind
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Event => "event",
            MessageKind::Action => "action",
            MessageKind::Definition => "def",
            MessageKind::UnDefinition => "undef",
            MessageKind::Subscription => "sub",
            MessageKind::Unsubscription => "unsub",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "event" => Some(MessageKind::Event),
            "action" => Some(MessageKind::Action),
            "def" => Some(MessageKind::Definition),
            "undef" => Some(MessageKind::UnDefinition),
            "sub" => Some(MessageKind::Subscription),
            "unsub" => Some(MessageKind::Unsubscription),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Any message that can travel on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event(Event),
    Action(Action),
    Definition(Definition),
    UnDefinition(UnDefinition),
    Subscription(Subscription),
    Unsubscription(Unsubscription),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Event(_) => MessageKind::Event,
            Message::Action(_) => MessageKind::Action,
            Message::Definition(_) => MessageKind::Definition,
            Message::UnDefinition(_) => MessageKind::UnDefinition,
            Message::Subscription(_) => MessageKind::Subscription,
            Message::Unsubscription(_) => MessageKind::Unsubscription,
        }
    }

    /// Identifier every message kind is addressed by
    pub fn identifier(&self) -> &str {
        match self {
            Message::Event(m) => &m.identifier,
            Message::Action(m) => &m.identifier,
            Message::Definition(m) => &m.identifier,
            Message::UnDefinition(m) => &m.identifier,
            Message::Subscription(m) => &m.identifier,
            Message::Unsubscription(m) => &m.identifier,
        }
    }
}

macro_rules! message_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(inner: $variant) -> Self {
                    Message::$variant(inner)
                }
            }

            impl TryFrom<Message> for $variant {
                type Error = Message;

                fn try_from(message: Message) -> std::result::Result<Self, Message> {
                    match message {
                        Message::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

message_variant!(Event, Action, Definition, UnDefinition, Subscription, Unsubscription);
