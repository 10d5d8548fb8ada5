// Process-local fan-out hub: live-socket registry indexed by user and by
// room, with thread-safe broadcast. Injected into handlers as managed state,
// never reached through module-level globals.

use rocket::futures::SinkExt;
use rocket::futures::stream::SplitSink;
use rocket_ws as ws;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Minimum spacing between two socket registrations for the same user.
pub const REGISTER_MIN_INTERVAL: Duration = Duration::from_millis(500);
/// How often the background sweep clears stale registration stamps.
pub const STAMP_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// A room's dedup set is reset once it grows past this many entries.
pub const DEDUP_MAX_ENTRIES: usize = 1000;

/// Scope of a live socket: user-wide sidebar push, or a single room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Sidebar,
    Room(String),
}

impl Scope {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Scope::Sidebar => None,
            Scope::Room(id) => Some(id),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Sidebar => "sidebar",
            Scope::Room(_) => "room",
        }
    }
}

/// Write half of a socket. Abstract so the hub is testable without a real
/// websocket; the only production impl is the split tungstenite sink.
#[rocket::async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, payload: String) -> ws::result::Result<()>;
    async fn send_ping(&mut self) -> ws::result::Result<()>;
    async fn close(&mut self) -> ws::result::Result<()>;
}

#[rocket::async_trait]
impl FrameSink for SplitSink<ws::stream::DuplexStream, ws::Message> {
    async fn send_text(&mut self, payload: String) -> ws::result::Result<()> {
        self.send(ws::Message::Text(payload)).await
    }

    async fn send_ping(&mut self) -> ws::result::Result<()> {
        self.send(ws::Message::Ping(Vec::new())).await
    }

    async fn close(&mut self) -> ws::result::Result<()> {
        SinkExt::close(self).await
    }
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A live socket wrapped with its send mutex. All writes go through this
/// wrapper; a frame write holds the mutex for exactly one frame.
pub struct SocketConn {
    pub id: u64,
    pub user_id: u64,
    pub scope: Scope,
    writer: tokio::sync::Mutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
}

impl SocketConn {
    pub fn new(user_id: u64, scope: Scope, sink: Box<dyn FrameSink>) -> Arc<SocketConn> {
        Arc::new(SocketConn {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            scope,
            writer: tokio::sync::Mutex::new(sink),
            closed: AtomicBool::new(false),
        })
    }

    /// Write one text frame. Returns false (and marks the socket closed) on
    /// failure; the caller is responsible for unregistering.
    pub async fn send_text(&self, payload: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut writer = self.writer.lock().await;
        match writer.send_text(payload.to_string()).await {
            Ok(()) => true,
            Err(_) => {
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Low-level keepalive PING.
    pub async fn send_ping(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut writer = self.writer.lock().await;
        match writer.send_ping().await {
            Ok(()) => true,
            Err(_) => {
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum HubError {
    RateLimited,
}

#[derive(Default)]
struct HubInner {
    by_user: HashMap<u64, Vec<Arc<SocketConn>>>,
    by_room: HashMap<String, Vec<Arc<SocketConn>>>,
    register_stamps: HashMap<u64, Instant>,
    dedup: HashMap<String, HashSet<Vec<u8>>>,
}

impl HubInner {
    fn remove_conn(&mut self, conn: &SocketConn) {
        if let Some(list) = self.by_user.get_mut(&conn.user_id) {
            list.retain(|c| c.id != conn.id);
            if list.is_empty() {
                self.by_user.remove(&conn.user_id);
            }
        }
        if let Some(room_id) = conn.scope.room_id()
            && let Some(list) = self.by_room.get_mut(room_id)
        {
            list.retain(|c| c.id != conn.id);
            if list.is_empty() {
                self.by_room.remove(room_id);
                // No sockets left in the room: its dedup set goes with it.
                self.dedup.remove(room_id);
            }
        }
    }
}

/// The fan-out hub. Indices live behind one rw-guard that is never held
/// across a socket write.
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Hub {
            inner: RwLock::new(HubInner::default()),
        }
    }

    /// Gate a registration attempt for a user. Checked before the websocket
    /// upgrade so a rejected client gets a plain 429, not a dead socket.
    /// The stamp is written on success only.
    pub fn admit(&self, user_id: u64) -> Result<(), HubError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(prev) = inner.register_stamps.get(&user_id)
            && now.duration_since(*prev) < REGISTER_MIN_INTERVAL
        {
            return Err(HubError::RateLimited);
        }
        inner.register_stamps.insert(user_id, now);
        Ok(())
    }

    /// Install a socket. A room-scoped registration closes every existing
    /// socket of that user (any scope); a sidebar registration closes only
    /// the user's previous sidebar socket. Net policy: at most one
    /// room-scoped and one sidebar-scoped socket per user.
    pub async fn register(&self, conn: Arc<SocketConn>) {
        let displaced: Vec<Arc<SocketConn>> = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let victims: Vec<Arc<SocketConn>> = match &conn.scope {
                Scope::Room(_) => inner
                    .by_user
                    .get(&conn.user_id)
                    .cloned()
                    .unwrap_or_default(),
                Scope::Sidebar => inner
                    .by_user
                    .get(&conn.user_id)
                    .map(|list| {
                        list.iter()
                            .filter(|c| c.scope == Scope::Sidebar)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            for victim in &victims {
                inner.remove_conn(victim);
            }
            inner
                .by_user
                .entry(conn.user_id)
                .or_default()
                .push(conn.clone());
            if let Some(room_id) = conn.scope.room_id() {
                inner
                    .by_room
                    .entry(room_id.to_string())
                    .or_default()
                    .push(conn.clone());
            }
            victims
        };
        for victim in displaced {
            victim.close().await;
        }
    }

    /// Remove a socket from both indices. Idempotent.
    pub fn unregister(&self, conn: &SocketConn) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove_conn(conn);
    }

    /// Write `payload` to every socket currently in the room. Sockets whose
    /// write fails are unregistered before this call returns. Returns the
    /// number of successful deliveries.
    pub async fn publish_room(&self, room_id: &str, payload: &str) -> usize {
        let conns: Vec<Arc<SocketConn>> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.by_room.get(room_id).cloned().unwrap_or_default()
        };
        self.deliver(conns, payload).await
    }

    /// Write `payload` to every socket of the user (room and sidebar scoped).
    pub async fn publish_user(&self, user_id: u64, payload: &str) -> usize {
        let conns: Vec<Arc<SocketConn>> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.by_user.get(&user_id).cloned().unwrap_or_default()
        };
        self.deliver(conns, payload).await
    }

    async fn deliver(&self, conns: Vec<Arc<SocketConn>>, payload: &str) -> usize {
        let mut delivered = 0;
        for conn in conns {
            if conn.send_text(payload).await {
                delivered += 1;
            } else {
                self.unregister(&conn);
            }
        }
        delivered
    }

    /// Users with a live socket in the room.
    pub fn connected_in_room(&self, room_id: &str) -> HashSet<u64> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_room
            .get(room_id)
            .map(|list| list.iter().map(|c| c.user_id).collect())
            .unwrap_or_default()
    }

    /// Record a raw inbound frame for the room. Returns true when the frame
    /// is fresh, false when the same bytes were recently seen (drop it).
    pub fn dedup_check(&self, room_id: &str, raw: &[u8]) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let set = inner.dedup.entry(room_id.to_string()).or_default();
        if set.contains(raw) {
            return false;
        }
        set.insert(raw.to_vec());
        if set.len() > DEDUP_MAX_ENTRIES {
            set.clear();
        }
        true
    }

    /// Drop registration stamps older than the gate window.
    pub fn sweep_stamps(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        inner
            .register_stamps
            .retain(|_, stamp| now.duration_since(*stamp) < REGISTER_MIN_INTERVAL);
    }
}

/// Background sweep of the register rate-limit stamps, every 5 minutes.
pub fn spawn_stamp_sweeper(hub: Arc<Hub>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STAMP_SWEEP_INTERVAL);
        tick.tick().await; // first tick fires immediately
        loop {
            tick.tick().await;
            hub.sweep_stamps();
        }
    });
}
