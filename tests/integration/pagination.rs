use rocket::http::Status;

use crate::common::{create_test_room, join_room, mark_read, seed_user, send_text, test_client};

fn page(
    tc: &crate::common::TestClient,
    auth: &rocket::http::Header<'static>,
    room_id: &str,
    query: &str,
) -> serde_json::Value {
    let res = tc
        .get(format!("/api/v1/rooms/{room_id}/messages/page{query}"))
        .header(auth.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

fn texts(body: &serde_json::Value) -> Vec<String> {
    body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_standard_pagination_window() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "page-room");

    for i in 0..10 {
        send_text(&tc, &alice, &room_id, &format!("m{i}"));
    }

    // Newest `limit` messages, ascending
    let body = page(&tc, &alice, &room_id, "?limit=5");
    assert_eq!(texts(&body), vec!["m5", "m6", "m7", "m8", "m9"]);
    assert_eq!(body["has_more"], true);
    assert_eq!(body["total_count"], 10);
    let cursor = body["next_cursor"].as_str().unwrap().to_string();
    assert_eq!(
        cursor,
        body["messages"].as_array().unwrap()[0]["sent_at"]
            .as_str()
            .unwrap()
    );

    // Follow the cursor backwards
    let body = page(&tc, &alice, &room_id, &format!("?limit=5&before={cursor}"));
    assert_eq!(texts(&body), vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(body["has_more"], false);
    assert!(body.get("next_cursor").is_none() || body["next_cursor"].is_null());
}

#[test]
fn test_pagination_cursor_absent_when_everything_fits() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "fits-room");

    for i in 0..3 {
        send_text(&tc, &alice, &room_id, &format!("m{i}"));
    }

    let body = page(&tc, &alice, &room_id, "?limit=50");
    assert_eq!(texts(&body), vec!["m0", "m1", "m2"]);
    assert_eq!(body["has_more"], false);
    assert!(body.get("next_cursor").is_none() || body["next_cursor"].is_null());
}

#[test]
fn test_pagination_after_filter() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let room_id = create_test_room(&tc, &alice, "after-room");

    send_text(&tc, &alice, &room_id, "m0");
    let body = page(&tc, &alice, &room_id, "?limit=50");
    let pivot = body["messages"].as_array().unwrap()[0]["sent_at"]
        .as_str()
        .unwrap()
        .to_string();

    send_text(&tc, &alice, &room_id, "m1");
    send_text(&tc, &alice, &room_id, "m2");

    let body = page(&tc, &alice, &room_id, &format!("?after={pivot}"));
    assert_eq!(texts(&body), vec!["m1", "m2"]);
}

#[test]
fn test_smart_load_returns_full_unread_backlog() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "smart-room");
    join_room(&tc, &bob, &room_id);

    // 30 read messages...
    for i in 0..30 {
        send_text(&tc, &alice, &room_id, &format!("read{i}"));
    }
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/read-all"))
        .header(bob.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // ...then 60 unread ones
    for i in 0..60 {
        send_text(&tc, &alice, &room_id, &format!("unread{i}"));
    }

    let body = page(&tc, &alice, &room_id, "");
    // Alice sees the plain window: she has no unread records of her own
    assert_eq!(body["messages"].as_array().unwrap().len(), 50);

    let body = page(&tc, &bob, &room_id, "");
    assert_eq!(body["unread_count"], 60);
    assert_eq!(body["total_count"], 90);

    // All 60 unread plus a 20-message read tail, ascending
    let msgs = body["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 80);
    let got = texts(&body);
    assert_eq!(got[0], "read10");
    assert_eq!(got[19], "read29");
    assert_eq!(got[20], "unread0");
    assert_eq!(got[79], "unread59");

    let sent_ats: Vec<&str> = msgs.iter().map(|m| m["sent_at"].as_str().unwrap()).collect();
    let mut sorted = sent_ats.clone();
    sorted.sort();
    assert_eq!(sent_ats, sorted);

    assert_eq!(body["has_more"], true);
    assert_eq!(body["next_cursor"].as_str().unwrap(), sent_ats[0]);
}

#[test]
fn test_smart_load_skipped_when_backlog_fits() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "no-smart-room");
    join_room(&tc, &bob, &room_id);

    for i in 0..10 {
        send_text(&tc, &alice, &room_id, &format!("m{i}"));
    }

    // 10 unread ≤ limit: plain newest-window pagination
    let body = page(&tc, &bob, &room_id, "?limit=50");
    assert_eq!(body["unread_count"], 10);
    assert_eq!(body["messages"].as_array().unwrap().len(), 10);
    assert_eq!(body["has_more"], false);
}

#[test]
fn test_smart_load_with_small_limit() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "small-limit-room");
    join_room(&tc, &bob, &room_id);

    for i in 0..4 {
        send_text(&tc, &alice, &room_id, &format!("r{i}"));
    }
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/read-all"))
        .header(bob.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    for i in 0..8 {
        send_text(&tc, &alice, &room_id, &format!("u{i}"));
    }

    // 8 unread > limit=5 triggers the smart load: whole backlog + read tail
    let body = page(&tc, &bob, &room_id, "?limit=5");
    let got = texts(&body);
    assert_eq!(got, vec!["r0", "r1", "r2", "r3", "u0", "u1", "u2", "u3", "u4", "u5", "u6", "u7"]);
    assert_eq!(body["has_more"], false);

    // Marking some unread messages read mid-history keeps the merge sorted
    let unread_ids: Vec<String> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["text"].as_str().unwrap().starts_with('u'))
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    mark_read(&tc, &bob, &unread_ids[2]);

    let body = page(&tc, &bob, &room_id, "?limit=5");
    assert_eq!(body["unread_count"], 7);
    let got = texts(&body);
    // u2 is now part of the read set but still lands in timestamp order
    assert_eq!(got, vec!["r0", "r1", "r2", "r3", "u0", "u1", "u2", "u3", "u4", "u5", "u6", "u7"]);
}

#[test]
fn test_page_requires_membership() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let mallory = seed_user(&tc, 9, "mallory");

    let room_id = create_test_room(&tc, &alice, "page-authz");
    let res = tc
        .get(format!("/api/v1/rooms/{room_id}/messages/page"))
        .header(mallory)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_page_messages_carry_read_status() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "page-status-room");
    join_room(&tc, &bob, &room_id);
    let msg_id = send_text(&tc, &alice, &room_id, "hello");
    mark_read(&tc, &bob, &msg_id);

    let body = page(&tc, &alice, &room_id, "");
    let entries = body["messages"].as_array().unwrap()[0]["read_status"]
        .as_array()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["username"], "bob");
    assert_eq!(entries[0]["is_read"], true);
}
