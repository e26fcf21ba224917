//! Gateway frame format

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway frame
///
/// Every frame sent or received over the WebSocket connection has this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(default)]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn new(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d,
        }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(op, Some(serde_json::to_value(payload)?)))
    }

    // === Client frames ===

    /// Heartbeat (op=1) carrying the last sequence received, or null
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
        )
    }

    /// Identify (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Identify, payload)
    }

    /// Presence Update (op=3)
    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::PresenceUpdate, payload)
    }

    /// Voice State Update (op=4)
    pub fn voice_state_update(
        payload: &VoiceStateUpdatePayload,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::VoiceStateUpdate, payload)
    }

    /// Resume (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::Resume, payload)
    }

    /// Request Guild Members (op=8)
    pub fn request_guild_members(
        payload: &RequestGuildMembersPayload,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(OpCode::RequestGuildMembers, payload)
    }

    // === Server frames ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Hello (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::new(
            OpCode::Hello,
            Some(serde_json::json!({ "heartbeat_interval": heartbeat_interval })),
        )
    }

    /// Heartbeat ACK (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, None)
    }

    /// Reconnect (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, None)
    }

    /// Invalid Session (op=9); `resumable` says whether Resume may be retried
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Some(Value::Bool(resumable)))
    }

    // === Parsing ===

    /// Hello payload, if this is op=10
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| HelloPayload::deserialize(d).ok())
    }

    /// Resumable flag, if this is op=9
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// READY payload, if this is the READY dispatch
    pub fn as_ready(&self) -> Option<Result<ReadyPayload, serde_json::Error>> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        Some(ReadyPayload::deserialize(self.d.as_ref().unwrap_or(&Value::Null)))
    }

    /// Identify payload, if this is op=2
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.d.as_ref().and_then(|d| IdentifyPayload::deserialize(d).ok())
    }

    /// Resume payload, if this is op=6
    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        self.d.as_ref().and_then(|d| ResumePayload::deserialize(d).ok())
    }

    /// Sequence carried by a heartbeat, if this is op=1
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IdentifyProperties;
    use cord_core::{Intents, Snowflake};

    #[test]
    fn test_heartbeat_carries_sequence_or_null() {
        let json = GatewayMessage::heartbeat(Some(41)).to_json().unwrap();
        assert_eq!(json, r#"{"op":1,"d":41}"#);

        let json = GatewayMessage::heartbeat(None).to_json().unwrap();
        assert_eq!(json, r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn test_identify_frame() {
        let payload = IdentifyPayload {
            token: "token".to_string(),
            intents: Intents::GUILDS,
            properties: IdentifyProperties::default(),
            shard: [0, 2],
            large_threshold: 250,
            compress: false,
            presence: Some(PresenceUpdatePayload::new("idle")),
        };
        let msg = GatewayMessage::identify(&payload).unwrap();
        assert_eq!(msg.op, OpCode::Identify);

        let parsed = GatewayMessage::from_json(&msg.to_json().unwrap())
            .unwrap()
            .as_identify()
            .unwrap();
        assert_eq!(parsed.shard, [0, 2]);
        assert_eq!(parsed.large_threshold, 250);
        assert_eq!(parsed.presence.map(|p| p.status), Some("idle".to_string()));
    }

    #[test]
    fn test_request_guild_members_frame() {
        let mut payload = RequestGuildMembersPayload::by_query(Snowflake::new(7), "", 0);
        payload.nonce = Some("n1".to_string());
        let msg = GatewayMessage::request_guild_members(&payload).unwrap();
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["op"], 8);
        assert_eq!(json["d"]["guild_id"], "7");
        assert_eq!(json["d"]["nonce"], "n1");
    }

    #[test]
    fn test_parse_hello() {
        let msg = GatewayMessage::from_json(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#)
            .unwrap();
        assert_eq!(msg.as_hello().map(|h| h.heartbeat_interval), Some(45_000));
        assert!(GatewayMessage::heartbeat_ack().as_hello().is_none());
    }

    #[test]
    fn test_parse_server_dispatch_with_nulls() {
        let msg = GatewayMessage::from_json(
            r#"{"op":0,"t":"MESSAGE_CREATE","s":5,"d":{"content":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(msg.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(msg.s, Some(5));

        let ack = GatewayMessage::from_json(r#"{"op":11,"t":null,"s":null,"d":null}"#).unwrap();
        assert_eq!(ack.op, OpCode::HeartbeatAck);
        assert!(ack.s.is_none());
    }

    #[test]
    fn test_parse_invalid_session() {
        assert_eq!(GatewayMessage::invalid_session(true).as_invalid_session(), Some(true));
        let msg = GatewayMessage::from_json(r#"{"op":9,"d":false}"#).unwrap();
        assert_eq!(msg.as_invalid_session(), Some(false));
        assert_eq!(GatewayMessage::reconnect().as_invalid_session(), None);
    }

    #[test]
    fn test_parse_ready() {
        let msg = GatewayMessage::dispatch(
            "READY",
            1,
            serde_json::json!({
                "v": 10,
                "session_id": "s1",
                "resume_gateway_url": "wss://r",
                "guilds": []
            }),
        );
        let ready = msg.as_ready().unwrap().unwrap();
        assert_eq!(ready.session_id, "s1");

        let other = GatewayMessage::dispatch("RESUMED", 2, Value::Null);
        assert!(other.as_ready().is_none());
    }

    #[test]
    fn test_message_display() {
        let dispatch = GatewayMessage::dispatch("MESSAGE_CREATE", 5, serde_json::json!({}));
        let display = dispatch.to_string();
        assert!(display.contains("MESSAGE_CREATE"));
        assert!(display.contains("s=5"));
        assert!(GatewayMessage::hello(1).to_string().contains("Hello"));
    }
}
