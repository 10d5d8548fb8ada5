// The read-status engine: per-(message, recipient) records, aggregated
// views, and the monotone per-room read cursor.

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::{Adapters, UserDirectory};
use crate::auth::AuthUser;
use crate::db::Db;
use crate::hub::Hub;
use crate::ids::now_ts;
use crate::models::*;
use crate::notify;
use crate::routes::messages::{MESSAGE_COLS, MESSAGE_COLS_M, attach_read_status, message_from_row};
use crate::routes::rooms::fetch_members;

use super::{ApiError, api_error};

/// Unread records for a user in a room.
pub(crate) fn unread_count(conn: &Connection, room_id: &str, user_id: u64) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM read_status WHERE room_id = ?1 AND recipient_id = ?2 AND is_read = 0",
        params![room_id, user_id as i64],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

/// A message's read records joined to the user directory for display.
pub(crate) fn read_status_entries(
    conn: &Connection,
    directory: &dyn UserDirectory,
    message_id: &str,
) -> Vec<ReadStatusEntry> {
    let mut stmt = match conn.prepare(
        "SELECT recipient_id, is_read, read_at FROM read_status WHERE message_id = ?1 ORDER BY recipient_id",
    ) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let rows: Vec<(u64, bool, Option<String>)> = stmt
        .query_map(params![message_id], |row| {
            Ok((
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? != 0,
                row.get(2)?,
            ))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();

    let user_ids: Vec<u64> = rows.iter().map(|(id, _, _)| *id).collect();
    let usernames = directory.lookup_many(&user_ids);

    rows.into_iter()
        .map(|(user_id, is_read, read_at)| ReadStatusEntry {
            username: usernames.get(&user_id).cloned().unwrap_or_default(),
            user_id,
            is_read,
            read_at,
        })
        .collect()
}

/// Mark one record read and advance the caller's room cursor. Returns the
/// record's room and whether this call performed the unread→read transition.
fn mark_one(
    conn: &Connection,
    message_id: &str,
    user_id: u64,
    now: &str,
) -> Result<(String, bool), &'static str> {
    let (room_id, is_read): (String, bool) = conn
        .query_row(
            "SELECT room_id, is_read FROM read_status WHERE message_id = ?1 AND recipient_id = ?2",
            params![message_id, user_id as i64],
            |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .map_err(|_| "No read record for this message")?;

    let transitioned = if is_read {
        false
    } else {
        conn.execute(
            "UPDATE read_status SET is_read = 1, read_at = ?1
             WHERE message_id = ?2 AND recipient_id = ?3 AND is_read = 0",
            params![now, message_id, user_id as i64],
        )
        .unwrap_or(0)
            > 0
    };

    advance_cursor(conn, &room_id, user_id, message_id, now);
    Ok((room_id, transitioned))
}

/// Upsert the (room, user) cursor to `message_id`, never regressing: the
/// new message's sent_at must be at least the current cursor message's.
/// A cursor pointing at a deleted message never blocks advancement.
/// Best-effort: failures here don't fail the mark.
fn advance_cursor(conn: &Connection, room_id: &str, user_id: u64, message_id: &str, now: &str) {
    let sent_at: String = match conn.query_row(
        "SELECT sent_at FROM messages WHERE id = ?1",
        params![message_id],
        |r| r.get(0),
    ) {
        Ok(s) => s,
        Err(_) => return,
    };

    let current: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT ulr.message_id, m.sent_at FROM user_last_read ulr
             LEFT JOIN messages m ON m.id = ulr.message_id
             WHERE ulr.room_id = ?1 AND ulr.user_id = ?2",
            params![room_id, user_id as i64],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok();

    let advance = match current {
        None => true,
        // Already there: repeated marks leave the cursor row untouched.
        Some((ref cursor_msg, _)) if cursor_msg == message_id => false,
        Some((_, None)) => true,
        Some((_, Some(ref cursor_sent))) => sent_at >= *cursor_sent,
    };
    if advance {
        let result = conn.execute(
            "INSERT INTO user_last_read (room_id, user_id, message_id, read_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(room_id, user_id) DO UPDATE SET
               message_id = excluded.message_id,
               read_at = excluded.read_at,
               updated_at = excluded.updated_at",
            params![room_id, user_id as i64, message_id, now],
        );
        if let Err(e) = result {
            eprintln!("⚠️ Cursor upsert failed for room {room_id} user {user_id}: {e}");
        }
    }
}

#[post("/api/v1/messages/<message_id>/read")]
pub async fn mark_read(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    user: AuthUser,
    message_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = now_ts();
    let (room_id, transitioned, members) = {
        let conn = db.conn.lock().unwrap();
        let (room_id, transitioned) = mark_one(&conn, message_id, user.user_id, &now)
            .map_err(|msg| api_error(Status::NotFound, msg))?;
        let members = fetch_members(&conn, &room_id);
        (room_id, transitioned, members)
    };

    // Repeating an already-read mark is a no-op: no extra broadcasts.
    if transitioned {
        notify::messages_read(
            hub,
            db,
            adapters,
            &room_id,
            &[message_id.to_string()],
            user.user_id,
            &members,
        )
        .await;
    }

    Ok(Json(serde_json::json!({
        "message_id": message_id,
        "is_read": true,
    })))
}

#[post("/api/v1/messages/read", format = "json", data = "<body>")]
pub async fn mark_read_bulk(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    user: AuthUser,
    body: Json<MarkReadBulk>,
) -> Result<Json<BulkReadResponse>, ApiError> {
    let now = now_ts();
    let mut ok_count = 0;
    let mut errors: Vec<BulkError> = Vec::new();
    let mut affected: HashMap<String, Vec<String>> = HashMap::new();
    let mut members_by_room: HashMap<String, Vec<Membership>> = HashMap::new();

    {
        let conn = db.conn.lock().unwrap();
        for message_id in &body.message_ids {
            match mark_one(&conn, message_id, user.user_id, &now) {
                Ok((room_id, transitioned)) => {
                    ok_count += 1;
                    if transitioned {
                        affected.entry(room_id).or_default().push(message_id.clone());
                    }
                }
                Err(msg) => errors.push(BulkError {
                    message_id: message_id.clone(),
                    error: msg.to_string(),
                }),
            }
        }
        for room_id in affected.keys() {
            members_by_room.insert(room_id.clone(), fetch_members(&conn, room_id));
        }
    }

    for (room_id, message_ids) in &affected {
        let members = members_by_room.get(room_id).cloned().unwrap_or_default();
        notify::messages_read(hub, db, adapters, room_id, message_ids, user.user_id, &members)
            .await;
    }

    Ok(Json(BulkReadResponse {
        ok_count,
        err_count: errors.len(),
        errors,
    }))
}

#[post("/api/v1/rooms/<room_id>/read-all")]
pub async fn mark_all_read(
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = now_ts();
    let (affected, members) = {
        let conn = db.conn.lock().unwrap();

        if !Db::room_exists(&conn, room_id) {
            return Err(api_error(Status::NotFound, "Room not found"));
        }
        if !Db::is_member(&conn, room_id, user.user_id) {
            return Err(api_error(Status::Forbidden, "You are not a member of this room"));
        }

        let mut stmt = conn
            .prepare(
                "SELECT rs.message_id FROM read_status rs
                 JOIN messages m ON m.id = rs.message_id
                 WHERE rs.room_id = ?1 AND rs.recipient_id = ?2 AND rs.is_read = 0
                 ORDER BY m.sent_at ASC, m.id ASC",
            )
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let affected: Vec<String> = stmt
            .query_map(params![room_id, user.user_id as i64], |row| row.get(0))
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        conn.execute(
            "UPDATE read_status SET is_read = 1, read_at = ?1
             WHERE room_id = ?2 AND recipient_id = ?3 AND is_read = 0",
            params![&now, room_id, user.user_id as i64],
        )
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

        // Cursor jumps to the latest message in the room, if any.
        if let Ok(latest_id) = conn.query_row(
            "SELECT id FROM messages WHERE room_id = ?1 ORDER BY sent_at DESC, id DESC LIMIT 1",
            params![room_id],
            |r| r.get::<_, String>(0),
        ) {
            advance_cursor(&conn, room_id, user.user_id, &latest_id, &now);
        }

        (affected, fetch_members(&conn, room_id))
    };

    if !affected.is_empty() {
        notify::messages_read(hub, db, adapters, room_id, &affected, user.user_id, &members).await;
    }

    Ok(Json(serde_json::json!({
        "marked_count": affected.len(),
        "message_ids": affected,
    })))
}

#[get("/api/v1/messages/<message_id>/read-status")]
pub fn get_read_status(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
    message_id: &str,
) -> Result<Json<ReadStatusResponse>, ApiError> {
    let conn = db.conn.lock().unwrap();

    let room_id: String = conn
        .query_row(
            "SELECT room_id FROM messages WHERE id = ?1",
            params![message_id],
            |r| r.get(0),
        )
        .map_err(|_| api_error(Status::NotFound, "Message not found"))?;
    if !Db::is_member(&conn, &room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let entries = read_status_entries(&conn, adapters.directory.as_ref(), message_id);
    Ok(Json(ReadStatusResponse {
        message_id: message_id.to_string(),
        tick: tick_state(&entries).to_string(),
        read_status: entries,
    }))
}

#[get("/api/v1/messages/<message_id>/read-by")]
pub fn get_read_by(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
    message_id: &str,
) -> Result<Json<ReadByResponse>, ApiError> {
    let conn = db.conn.lock().unwrap();

    let room_id: String = conn
        .query_row(
            "SELECT room_id FROM messages WHERE id = ?1",
            params![message_id],
            |r| r.get(0),
        )
        .map_err(|_| api_error(Status::NotFound, "Message not found"))?;
    if !Db::is_member(&conn, &room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let (read_by, unread_by) = read_status_entries(&conn, adapters.directory.as_ref(), message_id)
        .into_iter()
        .partition(|e| e.is_read);
    Ok(Json(ReadByResponse {
        message_id: message_id.to_string(),
        read_by,
        unread_by,
    }))
}

/// Unread counts for every room the caller belongs to, zero-unread rooms
/// included. One grouped query; never a per-room fan-out.
#[get("/api/v1/unread")]
pub fn get_unread(db: &State<Db>, user: AuthUser) -> Result<Json<UnreadResponse>, ApiError> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT rm.room_id, r.name, COUNT(rs.id) as unread_count
             FROM room_members rm
             JOIN rooms r ON r.id = rm.room_id
             LEFT JOIN read_status rs
               ON rs.room_id = rm.room_id AND rs.recipient_id = rm.user_id AND rs.is_read = 0
             WHERE rm.user_id = ?1
             GROUP BY rm.room_id
             ORDER BY r.name",
        )
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

    let rooms: Vec<UnreadInfo> = stmt
        .query_map(params![user.user_id as i64], |row| {
            Ok(UnreadInfo {
                room_id: row.get(0)?,
                room_name: row.get(1)?,
                unread_count: row.get(2)?,
            })
        })
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    let total_unread: i64 = rooms.iter().map(|r| r.unread_count).sum();
    Ok(Json(UnreadResponse {
        rooms,
        total_unread,
    }))
}

/// Latest message per member room, with read status attached.
#[get("/api/v1/rooms/latest")]
pub fn latest_per_room(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
) -> Result<Json<Vec<LatestPerRoomEntry>>, ApiError> {
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT rm.room_id, r.name,
                    (SELECT id FROM messages WHERE room_id = rm.room_id
                     ORDER BY sent_at DESC, id DESC LIMIT 1) as latest_id
             FROM room_members rm
             JOIN rooms r ON r.id = rm.room_id
             WHERE rm.user_id = ?1
             ORDER BY r.name",
        )
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    let rooms: Vec<(String, String, Option<String>)> = stmt
        .query_map(params![user.user_id as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);

    let latest_ids: Vec<&String> = rooms.iter().filter_map(|(_, _, id)| id.as_ref()).collect();
    let mut latest_by_id: HashMap<String, MessageWithStatus> = HashMap::new();
    if !latest_ids.is_empty() {
        let placeholders: Vec<String> = (1..=latest_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages WHERE id IN ({})",
            placeholders.join(",")
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = latest_ids
            .iter()
            .map(|id| *id as &dyn rusqlite::types::ToSql)
            .collect();
        let messages: Vec<Message> = stmt
            .query_map(params_refs.as_slice(), message_from_row)
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        for with_status in attach_read_status(&conn, adapters.directory.as_ref(), messages) {
            latest_by_id.insert(with_status.message.id.clone(), with_status);
        }
    }

    let entries = rooms
        .into_iter()
        .map(|(room_id, room_name, latest_id)| LatestPerRoomEntry {
            room_id,
            room_name,
            message: latest_id.and_then(|id| latest_by_id.remove(&id)),
        })
        .collect();
    Ok(Json(entries))
}

/// Earliest message strictly after the caller's cursor; earliest in the room
/// when no cursor exists; absent when there is nothing newer.
#[get("/api/v1/rooms/<room_id>/first-unread")]
pub fn first_unread(
    db: &State<Db>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let cursor_sent: Option<Option<String>> = conn
        .query_row(
            "SELECT m.sent_at FROM user_last_read ulr
             LEFT JOIN messages m ON m.id = ulr.message_id
             WHERE ulr.room_id = ?1 AND ulr.user_id = ?2",
            params![room_id, user.user_id as i64],
            |r| r.get(0),
        )
        .ok();

    let message: Option<Message> = match cursor_sent {
        Some(Some(cursor_sent)) => conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE room_id = ?1 AND sent_at > ?2
                     ORDER BY sent_at ASC, id ASC LIMIT 1"
                ),
                params![room_id, &cursor_sent],
                message_from_row,
            )
            .ok(),
        _ => conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS} FROM messages WHERE room_id = ?1
                     ORDER BY sent_at ASC, id ASC LIMIT 1"
                ),
                params![room_id],
                message_from_row,
            )
            .ok(),
    };

    Ok(Json(serde_json::json!({
        "chatroom_id": room_id,
        "message": message,
    })))
}

/// The caller's unread messages in a room, oldest first.
#[get("/api/v1/rooms/<room_id>/unread")]
pub fn unread_in_room(
    db: &State<Db>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MESSAGE_COLS_M} FROM messages m
             JOIN read_status rs ON rs.message_id = m.id
             WHERE m.room_id = ?1 AND rs.recipient_id = ?2 AND rs.is_read = 0
             ORDER BY m.sent_at ASC, m.id ASC"
        ))
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    let messages: Vec<Message> = stmt
        .query_map(params![room_id, user.user_id as i64], message_from_row)
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(messages))
}

/// The caller's last-read cursor for a room.
#[get("/api/v1/rooms/<room_id>/cursor")]
pub fn get_cursor(
    db: &State<Db>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<UserRoomCursor>, ApiError> {
    let conn = db.conn.lock().unwrap();

    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    if !Db::is_member(&conn, room_id, user.user_id) {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }

    conn.query_row(
        "SELECT room_id, user_id, message_id, read_at, updated_at
         FROM user_last_read WHERE room_id = ?1 AND user_id = ?2",
        params![room_id, user.user_id as i64],
        |row| {
            Ok(UserRoomCursor {
                room_id: row.get(0)?,
                user_id: row.get::<_, i64>(1)? as u64,
                message_id: row.get(2)?,
                read_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )
    .map(Json)
    .map_err(|_| api_error(Status::NotFound, "No read cursor for this room"))
}
