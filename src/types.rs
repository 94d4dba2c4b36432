//! Core relay types: roles, wire envelopes, and polling/health payloads
//!
//! Envelopes are tagged JSON objects (`{"type": "JOIN_ROOM", "code": "4821"}`).
//! Polling and health payloads use camelCase JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which slot of a session a connection occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

impl Role {
    /// The peer on the other side of the session
    pub fn other(self) -> Role {
        match self {
            Role::Host => Role::Client,
            Role::Client => Role::Host,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound envelope sent by a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Open a new session and become its host
    CreateRoom,
    /// Join an existing session as its client
    JoinRoom { code: String },
    /// Forward an opaque payload to the other peer
    Relay {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Leave the current session
    Leave,
}

impl ClientMessage {
    /// Decode a text frame, mapping failures to `MalformedInput`
    pub fn decode(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::RelayError::MalformedInput(e.to_string()))
    }
}

/// Outbound envelope delivered to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Reply to `CREATE_ROOM`
    RoomCreated { code: String },
    /// Reply to a successful `JOIN_ROOM`
    Joined { code: String },
    /// Host notice: a client attached
    PlayerJoined,
    /// Payload forwarded verbatim from the other peer
    Relay { data: serde_json::Value },
    /// Client notice: the host left and the session is gone
    HostLeft,
    /// Host notice: the client left, the session stays open
    PlayerLeft,
    /// The session was removed by the relay (idle sweep or admin close)
    RoomClosed { reason: String },
    /// Structured error reply to the originating connection
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encode for a text frame
    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Response to a polled `create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub code: String,
}

/// Response to a polled `join`, `send` or `leave`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub ok: bool,
}

/// Body of a polled `send`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub role: Role,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Body of a polled `leave`, also the query of a `poll`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub role: Role,
}

/// Messages drained by a `poll`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// Queued messages for the polling role, oldest first
    pub messages: Vec<ServerMessage>,

    /// Whether the other role's slot is currently occupied
    pub partner_present: bool,
}

/// Process-wide session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Active sessions
    pub sessions: usize,

    /// Attached peers across all sessions
    pub peers: usize,
}

/// Health endpoint payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub peers: usize,
    /// Seconds between liveness probes
    pub probe_interval_secs: u64,
    /// Seconds of silence before a session or polled peer is dropped
    pub idle_timeout_secs: u64,
    /// RFC3339 timestamp of the check
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_other() {
        assert_eq!(Role::Host.other(), Role::Client);
        assert_eq!(Role::Client.other(), Role::Host);
        assert_eq!(Role::Client.to_string(), "client");
    }

    #[test]
    fn test_decode_client_messages() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"CREATE_ROOM"}"#).unwrap(),
            ClientMessage::CreateRoom
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":"JOIN_ROOM","code":"4821"}"#).unwrap(),
            ClientMessage::JoinRoom {
                code: "4821".to_string()
            }
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":"RELAY","data":{"x":1}}"#).unwrap(),
            ClientMessage::Relay { data: json!({"x": 1}) }
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":"LEAVE"}"#).unwrap(),
            ClientMessage::Leave
        );
    }

    #[test]
    fn test_decode_malformed() {
        let err = ClientMessage::decode("not json").unwrap_err();
        assert!(matches!(err, crate::RelayError::MalformedInput(_)));

        let err = ClientMessage::decode(r#"{"type":"TELEPORT"}"#).unwrap_err();
        assert!(matches!(err, crate::RelayError::MalformedInput(_)));

        // JOIN_ROOM without a code
        assert!(ClientMessage::decode(r#"{"type":"JOIN_ROOM"}"#).is_err());
    }

    #[test]
    fn test_encode_server_messages() {
        let msg = ServerMessage::RoomCreated {
            code: "4821".to_string(),
        };
        assert_eq!(msg.encode().unwrap(), r#"{"type":"ROOM_CREATED","code":"4821"}"#);

        assert_eq!(
            ServerMessage::PlayerJoined.encode().unwrap(),
            r#"{"type":"PLAYER_JOINED"}"#
        );
        assert_eq!(
            ServerMessage::HostLeft.encode().unwrap(),
            r#"{"type":"HOST_LEFT"}"#
        );

        let relay = ServerMessage::Relay { data: json!([1, "a", null]) };
        let value: serde_json::Value = serde_json::from_str(&relay.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "RELAY");
        assert_eq!(value["data"], json!([1, "a", null]));
    }

    #[test]
    fn test_poll_response_camel_case() {
        let resp = PollResponse {
            messages: vec![ServerMessage::PlayerJoined],
            partner_present: true,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["partnerPresent"], true);
        assert_eq!(json["messages"][0]["type"], "PLAYER_JOINED");
    }

    #[test]
    fn test_send_request_role_lowercase() {
        let req: SendRequest =
            serde_json::from_str(r#"{"role":"host","data":{"move":"e4"}}"#).unwrap();
        assert_eq!(req.role, Role::Host);
        assert_eq!(req.data["move"], "e4");
    }
}
