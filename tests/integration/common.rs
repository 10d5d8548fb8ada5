use rocket::http::{ContentType, Header};
use rocket::local::blocking::Client;
use std::sync::Arc;

use roomcast::adapters::{Adapters, RecordingBlobStore, RecordingPushSink, SqliteDirectory};
use roomcast::auth::{AuthSecret, issue_token};
use roomcast::rate_limit::RateLimitConfig;

/// Wrapper around Client that auto-deletes the temp DB on drop, plus typed
/// handles to the recording adapters for assertions.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
    pub blobs: Arc<RecordingBlobStore>,
    pub push: Arc<RecordingPushSink>,
    pub directory: Arc<SqliteDirectory>,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        // Drop client first to release SQLite connections (WAL mode holds the file)
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

/// Default test client: generous rate limits, recording blob/push adapters.
pub fn test_client() -> TestClient {
    test_client_with_rate_limits(RateLimitConfig {
        messages_max: 10_000,
        messages_window_secs: 60,
        rooms_max: 1_000,
        rooms_window_secs: 3600,
    })
}

pub fn test_client_with_rate_limits(config: RateLimitConfig) -> TestClient {
    // Unique temp DB for each test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/roomcast_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let blobs = Arc::new(RecordingBlobStore::default());
    let push = Arc::new(RecordingPushSink::default());
    let directory = Arc::new(SqliteDirectory::open(&db_path));
    let adapters = Adapters {
        blobs: blobs.clone(),
        push: push.clone(),
        directory: directory.clone(),
    };

    let rocket = roomcast::rocket_with_adapters(&db_path, adapters, config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
        blobs,
        push,
        directory,
    }
}

/// Seed a user row and return a bearer header for it.
pub fn seed_user(tc: &TestClient, user_id: u64, username: &str) -> Header<'static> {
    tc.directory.insert_user(user_id, username);
    auth_header(tc, user_id)
}

pub fn auth_header(tc: &TestClient, user_id: u64) -> Header<'static> {
    let secret = &tc
        .rocket()
        .state::<AuthSecret>()
        .expect("auth secret managed")
        .0;
    Header::new(
        "Authorization",
        format!("Bearer {}", issue_token(secret, user_id)),
    )
}

/// Helper: create a room as the given user and return its id.
pub fn create_test_room(tc: &TestClient, auth: &Header<'static>, name: &str) -> String {
    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(auth.clone())
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Helper: join a room by id.
pub fn join_room(tc: &TestClient, auth: &Header<'static>, room_id: &str) {
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/join"))
        .header(auth.clone())
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok);
}

/// Helper: send a text message and return its id. Sleeps briefly first so
/// consecutive sends get distinct millisecond timestamps.
pub fn send_text(tc: &TestClient, auth: &Header<'static>, room_id: &str, text: &str) -> String {
    std::thread::sleep(std::time::Duration::from_millis(2));
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(auth.clone())
        .body(format!(r#"{{"kind": "text", "text": "{text}"}}"#))
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Helper: mark one message read.
pub fn mark_read(tc: &TestClient, auth: &Header<'static>, message_id: &str) {
    let res = tc
        .post(format!("/api/v1/messages/{message_id}/read"))
        .header(auth.clone())
        .dispatch();
    assert_eq!(res.status(), rocket::http::Status::Ok);
}
