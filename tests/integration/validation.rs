use rocket::http::{ContentType, Header, Status};

use crate::common::{
    create_test_room, seed_user, send_text, test_client, test_client_with_rate_limits,
};
use roomcast::rate_limit::RateLimitConfig;

// --- Health & stats ---

#[test]
fn test_health() {
    let tc = test_client();
    let res = tc.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "roomcast");
}

#[test]
fn test_stats() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "stats-room");
    send_text(&tc, &alice, &room_id, "hello");

    let res = tc.get("/api/v1/stats").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["rooms"], 1);
    assert_eq!(body["messages"], 1);
    assert_eq!(body["users"], 1);
}

// --- Authentication ---

#[test]
fn test_protected_routes_require_token() {
    let tc = test_client();

    let res = tc.get("/api/v1/rooms").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].is_string());

    let res = tc.get("/api/v1/unread").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_invalid_token_rejected() {
    let tc = test_client();

    let res = tc
        .get("/api/v1/rooms")
        .header(Header::new("Authorization", "Bearer 1.deadbeef"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_token_for_unknown_user_rejected() {
    let tc = test_client();
    // Valid signature, but no such user row in the directory
    let auth = crate::common::auth_header(&tc, 777);
    let res = tc.get("/api/v1/rooms").header(auth).dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

// --- Rate limits ---

#[test]
fn test_room_creation_rate_limit() {
    let tc = test_client_with_rate_limits(RateLimitConfig {
        messages_max: 100,
        messages_window_secs: 60,
        rooms_max: 2,
        rooms_window_secs: 3600,
    });
    let alice = seed_user(&tc, 1, "alice");

    create_test_room(&tc, &alice, "rl-room-1");
    create_test_room(&tc, &alice, "rl-room-2");

    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"name": "rl-room-3"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
}

#[test]
fn test_message_send_rate_limit() {
    let tc = test_client_with_rate_limits(RateLimitConfig {
        messages_max: 2,
        messages_window_secs: 60,
        rooms_max: 10,
        rooms_window_secs: 3600,
    });
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "rl-msgs");

    send_text(&tc, &alice, &room_id, "one");
    send_text(&tc, &alice, &room_id, "two");

    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"kind": "text", "text": "three"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("Rate limited"));
}

// --- Content limits & malformed bodies ---

#[test]
fn test_text_length_limit() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "len-room");

    let long = "x".repeat(10_001);
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(alice)
        .body(format!(r#"{{"kind": "text", "text": "{long}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_unknown_kind_is_malformed() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "bad-kind-room");

    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"kind": "gif", "media_url": "u"}"#)
        .dispatch();
    // Unknown variants fail body parsing; the catcher keeps the error shape
    assert_eq!(res.status(), Status::UnprocessableEntity);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].is_string());
}

#[test]
fn test_error_shape_is_consistent() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");

    let res = tc
        .get("/api/v1/rooms/000000000000000000000000")
        .header(alice)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "Room not found");
}
