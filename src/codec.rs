//! Envelope framing
//!
//! Every frame on the wire is a JSON envelope:
//!
//! ```text
//! {"type": "event"|"action"|"def"|"undef"|"sub"|"unsub", "payload": {...}}
//! ```
//!
//! Decoding is two-step so that an unknown type tag is reported as
//! [`BusError::UnknownMessageType`] instead of a generic parse failure.

use crate::error::{BusError, Result};
use crate::messages::{Message, MessageKind};
use serde::{Deserialize, Serialize};

/// Envelope as read off the wire, payload not yet interpreted
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a T,
}

fn envelope<T: Serialize>(kind: MessageKind, payload: &T) -> Result<String> {
    let frame = serde_json::to_string(&EnvelopeRef {
        kind: kind.tag(),
        payload,
    })?;
    Ok(frame)
}

/// Wrap a message in an envelope and serialize it to one text frame
pub fn encode(message: &Message) -> Result<String> {
    let kind = message.kind();
    match message {
        Message::Event(m) => envelope(kind, m),
        Message::Action(m) => envelope(kind, m),
        Message::Definition(m) => envelope(kind, m),
        Message::UnDefinition(m) => envelope(kind, m),
        Message::Subscription(m) => envelope(kind, m),
        Message::Unsubscription(m) => envelope(kind, m),
    }
}

/// Parse one text frame back into a typed message
pub fn decode(frame: &str) -> Result<Message> {
    let Envelope { kind, payload } = serde_json::from_str(frame)?;
    let kind = MessageKind::from_tag(&kind).ok_or(BusError::UnknownMessageType(kind))?;

    let message = match kind {
        MessageKind::Event => Message::Event(serde_json::from_value(payload)?),
        MessageKind::Action => Message::Action(serde_json::from_value(payload)?),
        MessageKind::Definition => Message::Definition(serde_json::from_value(payload)?),
        MessageKind::UnDefinition => Message::UnDefinition(serde_json::from_value(payload)?),
        MessageKind::Subscription => Message::Subscription(serde_json::from_value(payload)?),
        MessageKind::Unsubscription => Message::Unsubscription(serde_json::from_value(payload)?),
    };
    Ok(message)
}
