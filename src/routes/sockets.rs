// Per-socket connection workers. Both endpoints require a bearer token
// (query parameter — browsers cannot set headers on websocket upgrades);
// the sidebar user id comes from the token, never from the client.

use rocket::futures::StreamExt;
use rocket::http::Status;
use rocket::{State, get};
use rocket_ws as ws;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::auth::{self, AuthSecret};
use crate::db::Db;
use crate::frames::{ClientFrame, ServerFrame};
use crate::hub::{Hub, Scope, SocketConn};

use super::{ApiError, api_error};

/// Keepalive PING cadence on every live socket.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[get("/ws/rooms/<room_id>?<token>")]
pub fn room_socket(
    ws_up: ws::WebSocket,
    room_id: &str,
    token: Option<&str>,
    db: &State<Db>,
    hub: &State<Arc<Hub>>,
    secret: &State<AuthSecret>,
) -> Result<ws::Channel<'static>, ApiError> {
    let user_id = admit_token(token, secret)?;

    {
        let conn = db.conn.lock().unwrap();
        if !Db::room_exists(&conn, room_id) {
            return Err(api_error(Status::NotFound, "Room not found"));
        }
        if !Db::is_member(&conn, room_id, user_id) {
            return Err(api_error(Status::Forbidden, "You are not a member of this room"));
        }
    }

    // Gate before the upgrade: a rejected client gets a plain 429.
    if hub.admit(user_id).is_err() {
        return Err(api_error(
            Status::TooManyRequests,
            "Socket registered too recently, slow down",
        ));
    }

    let hub = hub.inner().clone();
    let scope = Scope::Room(room_id.to_string());
    Ok(ws_up.channel(move |stream| {
        Box::pin(async move {
            run_worker(stream, hub, user_id, scope).await;
            Ok(())
        })
    }))
}

#[get("/ws/sidebar?<token>")]
pub fn sidebar_socket(
    ws_up: ws::WebSocket,
    token: Option<&str>,
    hub: &State<Arc<Hub>>,
    secret: &State<AuthSecret>,
) -> Result<ws::Channel<'static>, ApiError> {
    let user_id = admit_token(token, secret)?;

    if hub.admit(user_id).is_err() {
        return Err(api_error(
            Status::TooManyRequests,
            "Socket registered too recently, slow down",
        ));
    }

    let hub = hub.inner().clone();
    Ok(ws_up.channel(move |stream| {
        Box::pin(async move {
            run_worker(stream, hub, user_id, Scope::Sidebar).await;
            Ok(())
        })
    }))
}

fn admit_token(token: Option<&str>, secret: &AuthSecret) -> Result<u64, ApiError> {
    let token = token.ok_or_else(|| api_error(Status::Unauthorized, "Missing bearer token"))?;
    auth::validate_token(&secret.0, token)
        .ok_or_else(|| api_error(Status::Unauthorized, "Invalid bearer token"))
}

/// Unregisters the socket when the worker exits, on any path (including a
/// panicking task body: the drop still runs during unwind).
struct UnregisterGuard {
    hub: Arc<Hub>,
    conn: Arc<SocketConn>,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.conn);
    }
}

async fn run_worker(stream: ws::stream::DuplexStream, hub: Arc<Hub>, user_id: u64, scope: Scope) {
    let (sink, mut source) = stream.split();
    let conn = SocketConn::new(user_id, scope.clone(), Box::new(sink));
    hub.register(conn.clone()).await;
    let _guard = UnregisterGuard {
        hub: hub.clone(),
        conn: conn.clone(),
    };

    conn.send_text(&ServerFrame::connected(user_id, &scope).to_json())
        .await;

    // Writer task: low-level PING every 30s under the socket's send mutex.
    let keepalive_conn = conn.clone();
    let keepalive = tokio::spawn(async move {
        let mut tick = interval(KEEPALIVE_INTERVAL);
        tick.tick().await; // first tick fires immediately
        loop {
            tick.tick().await;
            if !keepalive_conn.send_ping().await {
                break;
            }
        }
    });

    while let Some(inbound) = source.next().await {
        match inbound {
            Ok(ws::Message::Text(text)) => handle_client_frame(&hub, &conn, &text).await,
            Ok(ws::Message::Close(_)) => break,
            Ok(_) => {} // binary / ping / pong: nothing to do
            Err(_) => break,
        }
        if conn.is_closed() {
            // displaced by a newer registration
            break;
        }
    }

    keepalive.abort();
}

async fn handle_client_frame(hub: &Arc<Hub>, conn: &Arc<SocketConn>, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping) => {
            conn.send_text(&ServerFrame::pong().to_json()).await;
        }
        Ok(ClientFrame::Heartbeat) => {
            conn.send_text(&ServerFrame::heartbeat_ack().to_json()).await;
        }
        Ok(ClientFrame::ChatMessage { chatroom_id, .. }) => {
            // Rebroadcast only; persistence flows through the REST path.
            // Repeated raw frames for a room are dropped.
            if conn.scope.room_id().is_some() && hub.dedup_check(&chatroom_id, text.as_bytes()) {
                hub.publish_room(&chatroom_id, text).await;
            }
        }
        Err(_) => {} // unknown or malformed frame types are ignored
    }
}
