use chrono::{SecondsFormat, Utc};

/// Generate an opaque 96-bit object id rendered as 24 lowercase hex chars.
/// Used for room, message and read-record ids.
pub fn generate_object_id() -> String {
    // Top 96 bits of a v4 UUID.
    format!("{:024x}", uuid::Uuid::new_v4().as_u128() >> 32)
}

/// Current UTC instant as RFC 3339 with millisecond precision.
/// Fixed width, so stored values compare lexicographically in time order.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Quick shape check for a 24-hex object id.
pub fn is_object_id(s: &str) -> bool {
    s.len() == 24
        && s.bytes()
            .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
