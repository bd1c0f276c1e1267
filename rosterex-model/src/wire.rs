//! Serde model of the gateway wire protocol.
//!
//! The gateway speaks JSON frames with small integer opcodes; dispatch frames
//! (`op = 0`) additionally carry an event type string and an event-specific
//! payload. Only the frames the scraper sends or consumes are modeled here —
//! everything else is skipped at the session layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{GuildId, UserId};

/// Gateway opcodes.
pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const REQUEST_MEMBERS: u8 = 8;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Dispatch event types the scraper cares about.
pub mod event {
    pub const READY: &str = "READY";
    pub const GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";
}

/// One gateway frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayFrame {
    pub fn identify(payload: &IdentifyPayload) -> Self {
        GatewayFrame {
            op: op::IDENTIFY,
            t: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    pub fn heartbeat() -> Self {
        GatewayFrame {
            op: op::HEARTBEAT,
            t: None,
            d: Some(Value::Null),
        }
    }

    pub fn request_members(payload: &RequestMembersPayload) -> Self {
        GatewayFrame {
            op: op::REQUEST_MEMBERS,
            t: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Whether this is a dispatch frame of the given event type.
    pub fn is_event(&self, event_type: &str) -> bool {
        self.op == op::DISPATCH && self.t.as_deref() == Some(event_type)
    }
}

/// Client properties sent with identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        ClientProperties {
            os: std::env::consts::OS.to_string(),
            browser: "rosterex".to_string(),
            device: "rosterex".to_string(),
        }
    }
}

/// Payload of the identify frame (`op = 2`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: ClientProperties,
    pub capabilities: u32,
}

impl IdentifyPayload {
    /// Minimal capability flags: we want member chunks, nothing else.
    pub const MINIMAL_CAPABILITIES: u32 = 0;

    pub fn new(token: impl Into<String>) -> Self {
        IdentifyPayload {
            token: token.into(),
            properties: ClientProperties::default(),
            capabilities: Self::MINIMAL_CAPABILITIES,
        }
    }
}

/// Payload of the request-members-by-prefix frame (`op = 8`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMembersPayload {
    pub guild_id: GuildId,
    pub query: String,
    pub limit: u32,
    pub presences: bool,
    pub nonce: String,
}

/// Payload of the hello frame (`op = 10`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat period in milliseconds.
    pub heartbeat_interval: u64,
}

/// Payload of a `GUILD_MEMBERS_CHUNK` dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberChunkPayload {
    #[serde(default)]
    pub members: Vec<WireMember>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// A member object as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMember {
    pub user: WireUser,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUser {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}
