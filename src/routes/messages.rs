use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rusqlite::{Connection, params};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::adapters::{Adapters, UserDirectory};
use crate::auth::AuthUser;
use crate::db::Db;
use crate::hub::Hub;
use crate::ids::{generate_object_id, now_ts};
use crate::models::*;
use crate::notify;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::routes::read_status::unread_count;
use crate::routes::rooms::fetch_members;

use super::{ApiError, ClientIp, api_error};

const MAX_TEXT_CHARS: usize = 10_000;
const MAX_MEDIA_URL_CHARS: usize = 2_000;
/// Recent read messages included alongside the unread backlog on the smart
/// initial load.
const SMART_LOAD_READ_TAIL: i64 = 20;

pub(crate) const MESSAGE_COLS: &str =
    "id, room_id, sender_id, sender_name, kind, text_content, media_url, sent_at, edited, edited_at";
/// Same columns qualified with the `m` alias, for joins against read_status.
pub(crate) const MESSAGE_COLS_M: &str =
    "m.id, m.room_id, m.sender_id, m.sender_name, m.kind, m.text_content, m.media_url, m.sent_at, m.edited, m.edited_at";

pub(crate) fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get::<_, i64>(2)? as u64,
        sender_name: row.get(3)?,
        kind: MessageKind::parse(&kind_str).unwrap_or(MessageKind::Text),
        text: row.get(5)?,
        media_url: row.get(6)?,
        sent_at: row.get(7)?,
        edited: row.get::<_, i64>(8)? != 0,
        edited_at: row.get(9)?,
    })
}

/// Attach each message's read records with one batched query.
pub(crate) fn attach_read_status(
    conn: &Connection,
    directory: &dyn UserDirectory,
    messages: Vec<Message>,
) -> Vec<MessageWithStatus> {
    if messages.is_empty() {
        return Vec::new();
    }
    let placeholders: Vec<String> = (1..=messages.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, recipient_id, is_read, read_at FROM read_status
         WHERE message_id IN ({}) ORDER BY recipient_id",
        placeholders.join(",")
    );
    let mut by_message: HashMap<String, Vec<(u64, bool, Option<String>)>> = HashMap::new();
    if let Ok(mut stmt) = conn.prepare(&sql) {
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = messages
            .iter()
            .map(|m| &m.id as &dyn rusqlite::types::ToSql)
            .collect();
        if let Ok(rows) = stmt.query_map(params_refs.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, Option<String>>(3)?,
            ))
        }) {
            for (message_id, recipient_id, is_read, read_at) in rows.filter_map(|r| r.ok()) {
                by_message
                    .entry(message_id)
                    .or_default()
                    .push((recipient_id, is_read, read_at));
            }
        }
    }

    let user_ids: Vec<u64> = by_message
        .values()
        .flatten()
        .map(|(id, _, _)| *id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let usernames = directory.lookup_many(&user_ids);

    messages
        .into_iter()
        .map(|message| {
            let read_status = by_message
                .remove(&message.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(user_id, is_read, read_at)| ReadStatusEntry {
                    username: usernames.get(&user_id).cloned().unwrap_or_default(),
                    user_id,
                    is_read,
                    read_at,
                })
                .collect();
            MessageWithStatus {
                message,
                read_status,
            }
        })
        .collect()
}

#[post("/api/v1/rooms/<room_id>/messages", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub async fn send_message(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    user: AuthUser,
    room_id: &str,
    body: Json<SendMessage>,
) -> Result<Json<Message>, ApiError> {
    let rl = rate_limiter.check_with_info(
        &format!("send_msg:{}", ip.0),
        rate_config.messages_max,
        rate_config.messages_window_secs,
    );
    if !rl.allowed {
        return Err(api_error(
            Status::TooManyRequests,
            &format!("Rate limited: max {} messages per minute", rate_config.messages_max),
        ));
    }

    let text = body
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);
    let media_url = body
        .media_url
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from);

    if let Err(msg) = body.kind.validate(text.as_deref(), media_url.as_deref()) {
        return Err(api_error(Status::BadRequest, msg));
    }
    if text.as_deref().is_some_and(|t| t.chars().count() > MAX_TEXT_CHARS) {
        return Err(api_error(Status::BadRequest, "Text must be at most 10000 characters"));
    }
    if media_url.as_deref().is_some_and(|m| m.len() > MAX_MEDIA_URL_CHARS) {
        return Err(api_error(Status::BadRequest, "Media URL is too long"));
    }

    let (msg, room_name, members) = {
        let conn = db.conn.lock().unwrap();

        if !Db::room_exists(&conn, room_id) {
            return Err(api_error(Status::NotFound, "Room not found"));
        }
        if !Db::is_member(&conn, room_id, user.user_id) {
            return Err(api_error(Status::Forbidden, "You are not a member of this room"));
        }

        let room_name: String = conn
            .query_row(
                "SELECT name FROM rooms WHERE id = ?1",
                params![room_id],
                |r| r.get(0),
            )
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let members = fetch_members(&conn, room_id);

        let id = generate_object_id();
        let now = now_ts();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, sender_name, kind, text_content, media_url, sent_at, edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                &id,
                room_id,
                user.user_id as i64,
                &user.username,
                body.kind.as_str(),
                &text,
                &media_url,
                &now
            ],
        )
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

        // One read record per recipient, created with the message. Best
        // effort: a failed insert shows up as an unread-count undercount,
        // never as a failed send.
        for member in members.iter().filter(|m| m.user_id != user.user_id) {
            let result = conn.execute(
                "INSERT INTO read_status (id, message_id, room_id, sender_id, recipient_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    generate_object_id(),
                    &id,
                    room_id,
                    user.user_id as i64,
                    member.user_id as i64,
                    &now
                ],
            );
            if let Err(e) = result {
                eprintln!(
                    "⚠️ Read-record insert failed for message {id} recipient {}: {e}",
                    member.user_id
                );
            }
        }

        let msg = Message {
            id,
            room_id: room_id.to_string(),
            sender_id: user.user_id,
            sender_name: user.username.clone(),
            kind: body.kind,
            text,
            media_url,
            sent_at: now,
            edited: false,
            edited_at: None,
        };
        (msg, room_name, members)
    };

    notify::message_sent(hub, db, adapters, &room_name, &members, &msg).await;

    Ok(Json(msg))
}

#[get("/api/v1/rooms/<room_id>/messages?<limit>")]
pub fn get_messages(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
    limit: Option<i64>,
) -> Result<Json<Vec<MessageWithStatus>>, ApiError> {
    let limit = limit.unwrap_or(100).clamp(1, 500);
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages WHERE room_id = ?1 ORDER BY sent_at ASC, id ASC LIMIT ?2"
        ))
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    let messages: Vec<Message> = stmt
        .query_map(params![room_id, limit], message_from_row)
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(attach_read_status(
        &conn,
        adapters.directory.as_ref(),
        messages,
    )))
}

/// Cursor-paginated history. The first load after reopening a room pulls the
/// whole unread backlog (plus a short read tail) when the backlog would not
/// fit in one page; otherwise a plain DESC window, returned ascending.
#[get("/api/v1/rooms/<room_id>/messages/page?<limit>&<before>&<after>")]
pub fn page_messages(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
    limit: Option<i64>,
    before: Option<&str>,
    after: Option<&str>,
) -> Result<Json<PageResponse>, ApiError> {
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let total_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
            params![room_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let unread = unread_count(&conn, room_id, user.user_id);

    let (messages, has_more, next_cursor) = if before.is_none() && after.is_none() && unread > limit
    {
        // Smart initial load: the full unread backlog plus up to 20 of the
        // most recent already-read messages, merged ascending.
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLS_M} FROM messages m
                 JOIN read_status rs ON rs.message_id = m.id
                 WHERE m.room_id = ?1 AND rs.recipient_id = ?2 AND rs.is_read = 0
                 ORDER BY m.sent_at ASC, m.id ASC"
            ))
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let mut merged: Vec<Message> = stmt
            .query_map(params![room_id, user.user_id as i64], message_from_row)
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 WHERE m.room_id = ?1 AND m.id NOT IN (
                     SELECT message_id FROM read_status
                     WHERE room_id = ?1 AND recipient_id = ?2 AND is_read = 0
                 )
                 ORDER BY m.sent_at DESC, m.id DESC LIMIT ?3"
            ))
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let read_tail: Vec<Message> = stmt
            .query_map(
                params![room_id, user.user_id as i64, SMART_LOAD_READ_TAIL],
                message_from_row,
            )
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        merged.extend(read_tail);
        merged.sort_by(|a, b| (&a.sent_at, &a.id).cmp(&(&b.sent_at, &b.id)));

        let has_more = (merged.len() as i64) < total_count;
        let cursor = merged.first().map(|m| m.sent_at.clone());
        (merged, has_more, cursor)
    } else {
        let mut sql = format!("SELECT {MESSAGE_COLS} FROM messages WHERE room_id = ?1");
        let mut param_values: Vec<String> = vec![room_id.to_string()];
        let mut idx = 2;
        if let Some(before_val) = before {
            sql.push_str(&format!(" AND sent_at < ?{idx}"));
            param_values.push(before_val.to_string());
            idx += 1;
        }
        if let Some(after_val) = after {
            sql.push_str(&format!(" AND sent_at > ?{idx}"));
            param_values.push(after_val.to_string());
            idx += 1;
        }
        sql.push_str(&format!(" ORDER BY sent_at DESC, id DESC LIMIT ?{idx}"));
        param_values.push((limit + 1).to_string());

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values
            .iter()
            .map(|v| v as &dyn rusqlite::types::ToSql)
            .collect();
        let mut messages: Vec<Message> = stmt
            .query_map(params_refs.as_slice(), message_from_row)
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        let has_more = messages.len() as i64 > limit;
        messages.truncate(limit as usize);
        messages.reverse();
        let cursor = if has_more {
            messages.first().map(|m| m.sent_at.clone())
        } else {
            None
        };
        (messages, has_more, cursor)
    };

    Ok(Json(PageResponse {
        messages: attach_read_status(&conn, adapters.directory.as_ref(), messages),
        has_more,
        next_cursor,
        unread_count: unread,
        total_count,
    }))
}

#[put("/api/v1/rooms/<room_id>/messages/<message_id>", format = "json", data = "<body>")]
pub async fn edit_message(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
    message_id: &str,
    body: Json<EditMessage>,
) -> Result<Json<Message>, ApiError> {
    let msg = {
        let conn = db.conn.lock().unwrap();

        let current = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1 AND room_id = ?2"),
                params![message_id, room_id],
                message_from_row,
            )
            .map_err(|_| api_error(Status::NotFound, "Message not found"))?;

        if current.sender_id != user.user_id {
            return Err(api_error(
                Status::Forbidden,
                "You can only edit your own messages",
            ));
        }

        // Absent fields keep the current value; an empty string clears it.
        let text = match body.text.as_deref() {
            None => current.text.clone(),
            Some(t) => {
                let t = t.trim();
                if t.is_empty() { None } else { Some(t.to_string()) }
            }
        };
        let media_url = match body.media_url.as_deref() {
            None => current.media_url.clone(),
            Some(m) => {
                let m = m.trim();
                if m.is_empty() { None } else { Some(m.to_string()) }
            }
        };

        if text.as_deref().is_some_and(|t| t.chars().count() > MAX_TEXT_CHARS) {
            return Err(api_error(Status::BadRequest, "Text must be at most 10000 characters"));
        }
        if media_url.as_deref().is_some_and(|m| m.len() > MAX_MEDIA_URL_CHARS) {
            return Err(api_error(Status::BadRequest, "Media URL is too long"));
        }

        let kind = match body.kind {
            Some(kind) => kind,
            None => {
                MessageKind::derive_for_edit(current.kind, text.is_some(), media_url.is_some())
                    .map_err(|msg| api_error(Status::BadRequest, msg))?
            }
        };
        if let Err(msg) = kind.validate(text.as_deref(), media_url.as_deref()) {
            return Err(api_error(Status::BadRequest, msg));
        }

        // Replaced or removed media is deleted from blob storage first.
        if media_url != current.media_url
            && let Some(old_url) = current.media_url.as_deref()
            && let Err(e) = adapters.blobs.delete(old_url)
        {
            eprintln!("⚠️ Blob delete failed for {old_url}: {e}");
        }

        let now = now_ts();
        conn.execute(
            "UPDATE messages SET kind = ?1, text_content = ?2, media_url = ?3, edited = 1, edited_at = ?4 WHERE id = ?5",
            params![kind.as_str(), &text, &media_url, &now, message_id],
        )
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

        Message {
            kind,
            text,
            media_url,
            edited: true,
            edited_at: Some(now),
            ..current
        }
    };

    notify::message_updated(hub, &msg).await;

    Ok(Json(msg))
}

#[delete("/api/v1/rooms/<room_id>/messages/<message_id>")]
pub async fn delete_message(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
    message_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    {
        let conn = db.conn.lock().unwrap();

        let (sender_id, media_url): (i64, Option<String>) = conn
            .query_row(
                "SELECT sender_id, media_url FROM messages WHERE id = ?1 AND room_id = ?2",
                params![message_id, room_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| api_error(Status::NotFound, "Message not found"))?;

        if sender_id as u64 != user.user_id {
            return Err(api_error(
                Status::Forbidden,
                "You can only delete your own messages",
            ));
        }

        if let Some(url) = media_url.as_deref()
            && let Err(e) = adapters.blobs.delete(url)
        {
            eprintln!("⚠️ Blob delete failed for {url}: {e}");
        }

        // Read records cascade with the message row.
        conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    }

    notify::message_deleted(hub, room_id, message_id).await;

    Ok(Json(serde_json::json!({"deleted": true})))
}

#[get("/api/v1/rooms/<room_id>/media?<limit>")]
pub fn list_media(
    db: &State<Db>,
    user: AuthUser,
    room_id: &str,
    limit: Option<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = limit.unwrap_or(100).clamp(1, 500);
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE room_id = ?1 AND media_url IS NOT NULL
             ORDER BY sent_at DESC, id DESC LIMIT ?2"
        ))
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    let messages: Vec<Message> = stmt
        .query_map(params![room_id, limit], message_from_row)
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(messages))
}
