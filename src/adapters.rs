// External collaborators behind trait seams: blob storage, push delivery and
// the user/credential directory. The core only depends on these contracts.

use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ids::now_ts;

/// Content-addressed media storage. Uploads happen on an external path; the
/// core only ever deletes media as a cleanup side effect.
pub trait BlobStore: Send + Sync {
    fn upload(&self, data: &[u8], kind: &str) -> Result<String, String>;
    fn delete(&self, url: &str) -> Result<(), String>;
}

/// Push-notification sink. Delivery is best-effort; callers spawn and forget.
#[rocket::async_trait]
pub trait PushSink: Send + Sync {
    async fn notify(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value);
}

/// Read-side view of the external user store.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, user_id: u64) -> Option<String>;
    fn lookup_many(&self, user_ids: &[u64]) -> HashMap<u64, String>;
    fn active_tokens_for(&self, user_ids: &[u64]) -> Vec<String>;
}

/// The adapter bundle handed to Rocket as managed state.
pub struct Adapters {
    pub blobs: Arc<dyn BlobStore>,
    pub push: Arc<dyn PushSink>,
    pub directory: Arc<dyn UserDirectory>,
}

impl Adapters {
    pub fn defaults(db_path: &str) -> Self {
        Adapters {
            blobs: Arc::new(NoopBlobStore),
            push: push_sink_from_env(),
            directory: Arc::new(SqliteDirectory::open(db_path)),
        }
    }
}

// --- Blob store impls ---

/// Default blob store: media lives on an external CDN this process cannot
/// reach, so deletes are logged and reported as done.
pub struct NoopBlobStore;

impl BlobStore for NoopBlobStore {
    fn upload(&self, _data: &[u8], kind: &str) -> Result<String, String> {
        Err(format!("No blob backend configured for {kind} upload"))
    }

    fn delete(&self, url: &str) -> Result<(), String> {
        println!("🗑️ blob delete (noop): {url}");
        Ok(())
    }
}

/// Test double that records every deleted URL.
#[derive(Default)]
pub struct RecordingBlobStore {
    pub deleted: Mutex<Vec<String>>,
}

impl BlobStore for RecordingBlobStore {
    fn upload(&self, _data: &[u8], _kind: &str) -> Result<String, String> {
        Err("uploads are not part of this surface".to_string())
    }

    fn delete(&self, url: &str) -> Result<(), String> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Ok(())
    }
}

// --- Push sink impls ---

/// Choose the push sink from `PUSH_GATEWAY_URL`; without one, pushes are
/// logged and dropped.
pub fn push_sink_from_env() -> Arc<dyn PushSink> {
    match std::env::var("PUSH_GATEWAY_URL") {
        Ok(url) if !url.is_empty() => Arc::new(HttpPushSink::new(url)),
        _ => Arc::new(LogPushSink),
    }
}

/// Forwards pushes to an HTTP gateway that talks to the OS vendors.
pub struct HttpPushSink {
    url: String,
    client: reqwest::Client,
}

impl HttpPushSink {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        HttpPushSink { url, client }
    }
}

#[rocket::async_trait]
impl PushSink for HttpPushSink {
    async fn notify(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value) {
        if tokens.is_empty() {
            return;
        }
        let payload = serde_json::json!({
            "tokens": tokens,
            "title": title,
            "body": body,
            "data": data,
        });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                eprintln!("⚠️ Push gateway returned HTTP {}", resp.status());
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("⚠️ Push dispatch error: {e}");
            }
        }
    }
}

pub struct LogPushSink;

#[rocket::async_trait]
impl PushSink for LogPushSink {
    async fn notify(&self, tokens: &[String], title: &str, _body: &str, _data: serde_json::Value) {
        if !tokens.is_empty() {
            println!("📱 push (no gateway configured): '{title}' to {} tokens", tokens.len());
        }
    }
}

/// Test double that records every dispatched push.
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[derive(Default)]
pub struct RecordingPushSink {
    pub sent: Mutex<Vec<PushRecord>>,
}

#[rocket::async_trait]
impl PushSink for RecordingPushSink {
    async fn notify(&self, tokens: &[String], title: &str, body: &str, data: serde_json::Value) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PushRecord {
                tokens: tokens.to_vec(),
                title: title.to_string(),
                body: body.to_string(),
                data,
            });
    }
}

// --- User directory ---

/// SQLite-backed directory over the users/push_tokens tables. Opens its own
/// connection so directory reads never contend with the request path's lock.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    pub fn open(db_path: &str) -> Self {
        let conn = Connection::open(db_path).expect("Directory: failed to open DB");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        SqliteDirectory {
            conn: Mutex::new(conn),
        }
    }

    /// Seed or update a user row. The real system writes these from the
    /// external auth service; tests call this directly.
    pub fn insert_user(&self, user_id: u64, username: &str) {
        let now = now_ts();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username, updated_at = excluded.updated_at",
            params![user_id as i64, username, &now],
        )
        .expect("Directory: failed to insert user");
    }

    /// Register an active push token for a user.
    pub fn insert_push_token(&self, user_id: u64, token: &str, platform: &str) {
        let now = now_ts();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO push_tokens (id, user_id, token, platform, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, is_active = 1, updated_at = excluded.updated_at",
            params![
                crate::ids::generate_object_id(),
                user_id as i64,
                token,
                platform,
                &now
            ],
        )
        .expect("Directory: failed to insert push token");
    }
}

impl UserDirectory for SqliteDirectory {
    fn lookup(&self, user_id: u64) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT username FROM users WHERE id = ?1",
            params![user_id as i64],
            |r| r.get(0),
        )
        .ok()
    }

    fn lookup_many(&self, user_ids: &[u64]) -> HashMap<u64, String> {
        if user_ids.is_empty() {
            return HashMap::new();
        }
        let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT id, username FROM users WHERE id IN ({})",
            placeholders.join(",")
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return HashMap::new(),
        };
        let param_values: Vec<i64> = user_ids.iter().map(|id| *id as i64).collect();
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values
            .iter()
            .map(|v| v as &dyn rusqlite::types::ToSql)
            .collect();
        stmt.query_map(params_refs.as_slice(), |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    fn active_tokens_for(&self, user_ids: &[u64]) -> Vec<String> {
        if user_ids.is_empty() {
            return Vec::new();
        }
        let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT token FROM push_tokens WHERE is_active = 1 AND user_id IN ({})",
            placeholders.join(",")
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let param_values: Vec<i64> = user_ids.iter().map(|id| *id as i64).collect();
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values
            .iter()
            .map(|v| v as &dyn rusqlite::types::ToSql)
            .collect();
        stmt.query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }
}
