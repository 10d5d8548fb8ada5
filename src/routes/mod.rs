// Route module decomposition — each domain area in its own file.
// Shared types (request guards, error shape) live here; route functions in
// submodules.

pub mod messages;
pub mod read_status;
pub mod rooms;
pub mod sockets;
pub mod system;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use messages::{delete_message, edit_message, get_messages, list_media, page_messages, send_message};
pub use read_status::{
    first_unread, get_cursor, get_read_by, get_read_status, get_unread, latest_per_room,
    mark_all_read, mark_read, mark_read_bulk, unread_in_room,
};
pub use rooms::{create_room, destroy_room, get_room, join_by_code, join_room, leave_room, list_rooms};
pub use sockets::{room_socket, sidebar_socket};
pub use system::{health, not_found, stats, too_many_requests, unauthorized, unprocessable};

// --- Shared error shape ---

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;

/// Every failing route answers `{"error": "<message>"}` with a status from
/// the taxonomy: 400 validation, 401 unauthenticated, 403 forbidden,
/// 404 not found, 409 conflict, 429 rate limited, 500 internal.
pub type ApiError = (Status, Json<serde_json::Value>);

pub fn api_error(status: Status, message: &str) -> ApiError {
    (status, Json(serde_json::json!({ "error": message })))
}

// --- Shared request guards ---

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}
