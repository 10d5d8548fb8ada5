use rusqlite::{Connection, params};
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a shareable room code: 6 chars from [A-Z0-9].
/// Uniqueness is enforced by the caller (retry on collision).
pub fn generate_room_code() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(ROOM_CODE_LEN)
        .map(|b| ROOM_CODE_CHARS[(*b as usize) % ROOM_CODE_CHARS.len()] as char)
        .collect()
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                password_hash TEXT,
                role TEXT DEFAULT 'user',
                status TEXT DEFAULT 'active',
                is_login INTEGER NOT NULL DEFAULT 0,
                last_login_at TEXT,
                heartbeat TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS push_tokens (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token TEXT NOT NULL UNIQUE CHECK (LENGTH(token) <= 1000),
                platform TEXT NOT NULL DEFAULT 'unknown',
                device_info TEXT DEFAULT '{}',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_push_tokens_user ON push_tokens(user_id, is_active);

            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                room_code TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rooms_code ON rooms(room_code);

            CREATE TABLE IF NOT EXISTS room_members (
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_room_members_user ON room_members(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL,
                sender_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                text_content TEXT,
                media_url TEXT,
                sent_at TEXT NOT NULL,
                edited INTEGER NOT NULL DEFAULT 0,
                edited_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room_sent ON messages(room_id, sent_at);

            CREATE TABLE IF NOT EXISTS read_status (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                read_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (message_id, recipient_id)
            );
            CREATE INDEX IF NOT EXISTS idx_read_status_unread ON read_status(room_id, recipient_id, is_read);
            CREATE INDEX IF NOT EXISTS idx_read_status_message ON read_status(message_id);

            CREATE TABLE IF NOT EXISTS user_last_read (
                room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                read_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );",
        )
        .expect("Failed to run migrations");
    }

    /// True if the user is a member of the room.
    pub fn is_member(conn: &Connection, room_id: &str, user_id: u64) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id as i64],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false)
    }

    /// True if the room exists.
    pub fn room_exists(conn: &Connection, room_id: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE id = ?1",
            params![room_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false)
    }
}
