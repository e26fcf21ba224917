//! Decoded dispatch events

use cord_core::EventType;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One dispatch (op 0) received by a session
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Shard that received the event
    pub shard_id: u32,
    /// Sequence number assigned by the gateway
    pub sequence: u64,
    /// Raw `t` field, e.g. `MESSAGE_CREATE`
    pub name: String,
    /// Raw `d` field
    pub data: Value,
}

impl DispatchEvent {
    pub fn new(shard_id: u32, sequence: u64, name: impl Into<String>, data: Value) -> Self {
        Self {
            shard_id,
            sequence,
            name: name.into(),
            data,
        }
    }

    /// Known event type, if the name is one
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_str(&self.name)
    }

    /// Decode the payload into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Message {
        content: String,
    }

    #[test]
    fn test_event_type_and_decode() {
        let event = DispatchEvent::new(
            0,
            4,
            "MESSAGE_CREATE",
            serde_json::json!({"content": "hello", "id": "1"}),
        );
        assert_eq!(event.event_type(), Some(EventType::MessageCreate));
        assert_eq!(event.decode::<Message>().unwrap().content, "hello");
    }

    #[test]
    fn test_unknown_event_keeps_name() {
        let event = DispatchEvent::new(0, 1, "SOMETHING_NEW", Value::Null);
        assert_eq!(event.event_type(), None);
        assert_eq!(event.name, "SOMETHING_NEW");
    }
}
