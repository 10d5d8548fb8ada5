// Socket wire protocol: JSON frames shaped {"type", "chatroom_id"?, "data"}.

use serde::{Deserialize, Serialize};

use crate::hub::Scope;
use crate::ids::now_ts;
use crate::models::{Message, MessageWithStatus, ReadStatusEntry};

/// Frame emitted by the server. `data` is frame-type specific.
#[derive(Debug, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatroom_id: Option<String>,
    pub data: serde_json::Value,
}

impl ServerFrame {
    fn new(kind: &'static str, chatroom_id: Option<String>, data: serde_json::Value) -> Self {
        ServerFrame {
            kind,
            chatroom_id,
            data,
        }
    }

    pub fn connected(user_id: u64, scope: &Scope) -> Self {
        let mut data = serde_json::json!({
            "user_id": user_id,
            "scope": scope.as_str(),
        });
        if let Some(room_id) = scope.room_id() {
            data["room_id"] = serde_json::Value::String(room_id.to_string());
        }
        ServerFrame::new("connected", scope.room_id().map(String::from), data)
    }

    pub fn pong() -> Self {
        ServerFrame::new("pong", None, serde_json::json!({ "timestamp": now_ts() }))
    }

    pub fn heartbeat_ack() -> Self {
        ServerFrame::new(
            "heartbeat_ack",
            None,
            serde_json::json!({ "timestamp": now_ts() }),
        )
    }

    pub fn new_message(message: &MessageWithStatus) -> Self {
        ServerFrame::new(
            "new_message",
            Some(message.message.room_id.clone()),
            serde_json::to_value(message).unwrap_or_default(),
        )
    }

    pub fn message_read(
        room_id: &str,
        message_id: &str,
        user_id: u64,
        read_status: &[ReadStatusEntry],
    ) -> Self {
        ServerFrame::new(
            "message_read",
            Some(room_id.to_string()),
            serde_json::json!({
                "message_id": message_id,
                "user_id": user_id,
                "read_status": read_status,
            }),
        )
    }

    pub fn message_updated(message: &Message) -> Self {
        ServerFrame::new(
            "message_updated",
            Some(message.room_id.clone()),
            serde_json::to_value(message).unwrap_or_default(),
        )
    }

    pub fn message_deleted(room_id: &str, message_id: &str) -> Self {
        ServerFrame::new(
            "message_deleted",
            Some(room_id.to_string()),
            serde_json::json!({
                "message_id": message_id,
                "chatroom_id": room_id,
            }),
        )
    }

    pub fn unread_count_update(room_id: &str, unread_count: i64) -> Self {
        ServerFrame::new(
            "unread_count_update",
            Some(room_id.to_string()),
            serde_json::json!({
                "chatroom_id": room_id,
                "unread_count": unread_count,
            }),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frame accepted from a client, parsed into a closed variant. Anything that
/// doesn't deserialize (unknown type, missing fields) is ignored upstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Heartbeat,
    ChatMessage {
        chatroom_id: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}
