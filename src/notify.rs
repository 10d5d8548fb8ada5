// Notification bridge: turns successful mutations into hub broadcasts and
// best-effort push dispatches. Called by the REST handlers after commit;
// nothing here may fail the parent operation.

use std::sync::Arc;

use crate::adapters::Adapters;
use crate::db::Db;
use crate::frames::ServerFrame;
use crate::hub::Hub;
use crate::models::{Membership, Message, MessageKind, MessageWithStatus};
use crate::routes::read_status::{read_status_entries, unread_count};

const PUSH_BODY_MAX_CHARS: usize = 100;

/// After a message insert: `new_message` to the room, `unread_count_update`
/// to every other member's sidebar, and a detached push dispatch.
pub async fn message_sent(
    hub: &Arc<Hub>,
    db: &Db,
    adapters: &Adapters,
    room_name: &str,
    members: &[Membership],
    msg: &Message,
) {
    let entries = {
        let conn = db.conn.lock().unwrap();
        read_status_entries(&conn, adapters.directory.as_ref(), &msg.id)
    };
    let with_status = MessageWithStatus {
        message: msg.clone(),
        read_status: entries,
    };
    hub.publish_room(&msg.room_id, &ServerFrame::new_message(&with_status).to_json())
        .await;

    for member in members.iter().filter(|m| m.user_id != msg.sender_id) {
        let unread = {
            let conn = db.conn.lock().unwrap();
            unread_count(&conn, &msg.room_id, member.user_id)
        };
        hub.publish_user(
            member.user_id,
            &ServerFrame::unread_count_update(&msg.room_id, unread).to_json(),
        )
        .await;
    }

    let recipients: Vec<u64> = members
        .iter()
        .map(|m| m.user_id)
        .filter(|id| *id != msg.sender_id)
        .collect();
    let tokens = adapters.directory.active_tokens_for(&recipients);
    if !tokens.is_empty() {
        let push = adapters.push.clone();
        let title = format!("New message in {room_name}");
        let body = push_body(&msg.sender_name, msg.text.as_deref(), msg.kind);
        let data = serde_json::json!({
            "room_id": msg.room_id,
            "sender_id": msg.sender_id,
            "type": "new_message",
        });
        tokio::spawn(async move {
            push.notify(&tokens, &title, &body, data).await;
        });
    }
}

/// After mark-read transitions: one `message_read` per affected message to
/// the room, one `unread_count_update` per room member's sidebar.
pub async fn messages_read(
    hub: &Arc<Hub>,
    db: &Db,
    adapters: &Adapters,
    room_id: &str,
    message_ids: &[String],
    reader_id: u64,
    members: &[Membership],
) {
    for message_id in message_ids {
        let entries = {
            let conn = db.conn.lock().unwrap();
            read_status_entries(&conn, adapters.directory.as_ref(), message_id)
        };
        hub.publish_room(
            room_id,
            &ServerFrame::message_read(room_id, message_id, reader_id, &entries).to_json(),
        )
        .await;
    }

    for member in members {
        let unread = {
            let conn = db.conn.lock().unwrap();
            unread_count(&conn, room_id, member.user_id)
        };
        hub.publish_user(
            member.user_id,
            &ServerFrame::unread_count_update(room_id, unread).to_json(),
        )
        .await;
    }
}

pub async fn message_updated(hub: &Arc<Hub>, msg: &Message) {
    hub.publish_room(&msg.room_id, &ServerFrame::message_updated(msg).to_json())
        .await;
}

pub async fn message_deleted(hub: &Arc<Hub>, room_id: &str, message_id: &str) {
    hub.publish_room(room_id, &ServerFrame::message_deleted(room_id, message_id).to_json())
        .await;
}

/// Push body: `"<sender>: <text or media label>"`, capped at 100 chars with
/// an ellipsis.
pub fn push_body(sender_name: &str, text: Option<&str>, kind: MessageKind) -> String {
    let content = match text {
        Some(t) if !t.trim().is_empty() => t.trim(),
        _ => kind.media().map(|f| f.label()).unwrap_or("📎 Media"),
    };
    truncate_chars(format!("{sender_name}: {content}"), PUSH_BODY_MAX_CHARS)
}

fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
