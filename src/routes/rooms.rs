use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rusqlite::{Connection, params};

use crate::adapters::Adapters;
use crate::auth::{self, AuthUser};
use crate::db::{Db, generate_room_code};
use crate::ids::{generate_object_id, now_ts};
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimiter};

use super::{ApiError, ClientIp, api_error};

const ROOM_CODE_ATTEMPTS: usize = 10;

pub(crate) fn fetch_members(conn: &Connection, room_id: &str) -> Vec<Membership> {
    let mut stmt = match conn.prepare(
        "SELECT user_id, username, joined_at FROM room_members WHERE room_id = ?1 ORDER BY joined_at ASC, user_id ASC",
    ) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    stmt.query_map(params![room_id], |row| {
        Ok(Membership {
            user_id: row.get::<_, i64>(0)? as u64,
            username: row.get(1)?,
            joined_at: row.get(2)?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub(crate) fn fetch_room(conn: &Connection, room_id: &str) -> Option<Room> {
    let (id, name, room_code, password_hash, created_by, created_at) = conn
        .query_row(
            "SELECT id, name, room_code, password_hash, created_by, created_at FROM rooms WHERE id = ?1",
            params![room_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)? as u64,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .ok()?;
    let members = fetch_members(conn, &id);
    Some(Room {
        id,
        name,
        room_code,
        has_password: password_hash.is_some(),
        created_by,
        created_at,
        members,
    })
}

#[post("/api/v1/rooms", format = "json", data = "<body>")]
pub fn create_room(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    user: AuthUser,
    body: Json<CreateRoom>,
) -> Result<Json<Room>, ApiError> {
    let rl = rate_limiter.check_with_info(
        &format!("create_room:{}", ip.0),
        rate_config.rooms_max,
        rate_config.rooms_window_secs,
    );
    if !rl.allowed {
        return Err(api_error(
            Status::TooManyRequests,
            &format!("Rate limited: max {} rooms per hour", rate_config.rooms_max),
        ));
    }

    let name = body.name.trim().to_string();
    if name.len() < 3 || name.len() > 100 {
        return Err(api_error(
            Status::BadRequest,
            "Room name must be 3-100 characters",
        ));
    }
    let password_hash = match body.password.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => Some(auth::hash_password(p)),
        _ => None,
    };

    let conn = db.conn.lock().unwrap();

    // Room codes collide rarely; retry a bounded number of times.
    let mut room_code = generate_room_code();
    let mut attempts = 1;
    loop {
        let taken: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM rooms WHERE room_code = ?1",
                params![&room_code],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false);
        if !taken {
            break;
        }
        if attempts >= ROOM_CODE_ATTEMPTS {
            return Err(api_error(
                Status::InternalServerError,
                "Could not allocate a unique room code",
            ));
        }
        room_code = generate_room_code();
        attempts += 1;
    }

    let id = generate_object_id();
    let now = now_ts();

    match conn.execute(
        "INSERT INTO rooms (id, name, room_code, password_hash, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &name, &room_code, &password_hash, user.user_id as i64, &now],
    ) {
        Ok(_) => {}
        Err(e) if e.to_string().contains("UNIQUE") => {
            return Err(api_error(
                Status::Conflict,
                &format!("Room '{name}' already exists"),
            ));
        }
        Err(e) => {
            return Err(api_error(Status::InternalServerError, &e.to_string()));
        }
    }

    // The creator is the first member.
    conn.execute(
        "INSERT INTO room_members (room_id, user_id, username, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, user.user_id as i64, &user.username, &now],
    )
    .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

    Ok(Json(Room {
        id,
        name,
        room_code,
        has_password: password_hash.is_some(),
        created_by: user.user_id,
        created_at: now.clone(),
        members: vec![Membership {
            user_id: user.user_id,
            username: user.username,
            joined_at: now,
        }],
    }))
}

#[get("/api/v1/rooms")]
pub fn list_rooms(db: &State<Db>, user: AuthUser) -> Json<Vec<RoomWithStats>> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.name, r.room_code, r.password_hash, r.created_by, r.created_at,
                    (SELECT COUNT(*) FROM room_members WHERE room_id = r.id) as member_count,
                    (SELECT COUNT(*) FROM messages WHERE room_id = r.id) as message_count,
                    (SELECT MAX(sent_at) FROM messages WHERE room_id = r.id) as last_activity
             FROM rooms r
             JOIN room_members rm ON rm.room_id = r.id AND rm.user_id = ?1
             ORDER BY last_activity IS NULL, last_activity DESC, r.name",
        )
        .unwrap();
    let rooms = stmt
        .query_map(params![user.user_id as i64], |row| {
            let password_hash: Option<String> = row.get(3)?;
            Ok(RoomWithStats {
                id: row.get(0)?,
                name: row.get(1)?,
                room_code: row.get(2)?,
                has_password: password_hash.is_some(),
                created_by: row.get::<_, i64>(4)? as u64,
                created_at: row.get(5)?,
                member_count: row.get(6)?,
                message_count: row.get(7)?,
                last_activity: row.get(8)?,
            })
        })
        .unwrap()
        .filter_map(|r| r.ok())
        .collect();
    Json(rooms)
}

#[get("/api/v1/rooms/<room_id>", rank = 2)]
pub fn get_room(db: &State<Db>, _user: AuthUser, room_id: &str) -> Result<Json<Room>, ApiError> {
    let conn = db.conn.lock().unwrap();
    fetch_room(&conn, room_id)
        .map(Json)
        .ok_or_else(|| api_error(Status::NotFound, "Room not found"))
}

#[post("/api/v1/rooms/<room_id>/join")]
pub fn join_room(db: &State<Db>, user: AuthUser, room_id: &str) -> Result<Json<Room>, ApiError> {
    let conn = db.conn.lock().unwrap();
    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    insert_membership(&conn, room_id, &user)?;
    fetch_room(&conn, room_id)
        .map(Json)
        .ok_or_else(|| api_error(Status::InternalServerError, "Failed to fetch joined room"))
}

#[post("/api/v1/rooms/join", format = "json", data = "<body>")]
pub fn join_by_code(
    db: &State<Db>,
    user: AuthUser,
    body: Json<JoinByCode>,
) -> Result<Json<Room>, ApiError> {
    let code = body.room_code.trim().to_uppercase();
    let conn = db.conn.lock().unwrap();

    let (room_id, password_hash): (String, Option<String>) = conn
        .query_row(
            "SELECT id, password_hash FROM rooms WHERE room_code = ?1",
            params![&code],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| api_error(Status::NotFound, "No room with that code"))?;

    if let Some(ref hash) = password_hash {
        let given = body.password.as_deref().unwrap_or("");
        if !auth::verify_password(given, hash) {
            return Err(api_error(Status::Forbidden, "Wrong room password"));
        }
    }

    insert_membership(&conn, &room_id, &user)?;
    fetch_room(&conn, &room_id)
        .map(Json)
        .ok_or_else(|| api_error(Status::InternalServerError, "Failed to fetch joined room"))
}

fn insert_membership(conn: &Connection, room_id: &str, user: &AuthUser) -> Result<(), ApiError> {
    if Db::is_member(conn, room_id, user.user_id) {
        return Err(api_error(Status::Conflict, "You are already a member of this room"));
    }
    conn.execute(
        "INSERT INTO room_members (room_id, user_id, username, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![room_id, user.user_id as i64, &user.username, now_ts()],
    )
    .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
    Ok(())
}

#[post("/api/v1/rooms/<room_id>/leave")]
pub fn leave_room(
    db: &State<Db>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn.lock().unwrap();
    if !Db::room_exists(&conn, room_id) {
        return Err(api_error(Status::NotFound, "Room not found"));
    }
    let removed = conn
        .execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user.user_id as i64],
        )
        .unwrap_or(0);
    if removed == 0 {
        return Err(api_error(Status::Forbidden, "You are not a member of this room"));
    }
    Ok(Json(serde_json::json!({"left": true})))
}

/// Destroy a room. Creator only. Media blobs are deleted first (failures
/// logged and ignored); the row delete then cascades to messages, read
/// records, memberships and cursors.
#[delete("/api/v1/rooms/<room_id>")]
pub fn destroy_room(
    db: &State<Db>,
    adapters: &State<Adapters>,
    user: AuthUser,
    room_id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn.lock().unwrap();

    let created_by: i64 = conn
        .query_row(
            "SELECT created_by FROM rooms WHERE id = ?1",
            params![room_id],
            |r| r.get(0),
        )
        .map_err(|_| api_error(Status::NotFound, "Room not found"))?;

    if created_by as u64 != user.user_id {
        return Err(api_error(
            Status::Forbidden,
            "Only the room creator can destroy this room",
        ));
    }

    let media_urls: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT media_url FROM messages WHERE room_id = ?1 AND media_url IS NOT NULL")
            .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;
        stmt.query_map(params![room_id], |row| row.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    };
    for url in &media_urls {
        if let Err(e) = adapters.blobs.delete(url) {
            eprintln!("⚠️ Blob delete failed for {url}: {e}");
        }
    }

    conn.execute("DELETE FROM rooms WHERE id = ?1", params![room_id])
        .map_err(|e| api_error(Status::InternalServerError, &e.to_string()))?;

    Ok(Json(serde_json::json!({
        "deleted": true,
        "media_deleted": media_urls.len(),
    })))
}
