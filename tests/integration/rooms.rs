use rocket::http::{ContentType, Status};

use crate::common::{create_test_room, join_room, seed_user, send_text, test_client};

#[test]
fn test_create_room_returns_code_and_creator_membership() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");

    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice.clone())
        .body(r#"{"name": "general"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();

    assert_eq!(body["name"], "general");
    assert_eq!(body["created_by"], 1);
    assert_eq!(body["has_password"], false);
    let code = body["room_code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["user_id"], 1);
    assert_eq!(members[0]["username"], "alice");

    // Opaque 24-hex id
    let id = body["id"].as_str().unwrap();
    assert_eq!(id.len(), 24);
}

#[test]
fn test_create_room_name_length() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");

    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice.clone())
        .body(r#"{"name": "ab"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let long = "x".repeat(101);
    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice)
        .body(format!(r#"{{"name": "{long}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_create_duplicate_room_name() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");

    create_test_room(&tc, &alice, "dup-room");
    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"name": "dup-room"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_join_by_id_and_duplicate_join() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "join-test");

    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/join"))
        .header(bob.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["members"].as_array().unwrap().len(), 2);

    // Joining twice conflicts
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/join"))
        .header(bob)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_join_nonexistent_room() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let res = tc
        .post("/api/v1/rooms/000000000000000000000000/join")
        .header(alice)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_join_by_code_with_password() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let res = tc
        .post("/api/v1/rooms")
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"name": "secret-room", "password": "hunter2"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["has_password"], true);
    let code = body["room_code"].as_str().unwrap().to_string();

    // Wrong password
    let res = tc
        .post("/api/v1/rooms/join")
        .header(ContentType::JSON)
        .header(bob.clone())
        .body(format!(r#"{{"room_code": "{code}", "password": "wrong"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // Missing password
    let res = tc
        .post("/api/v1/rooms/join")
        .header(ContentType::JSON)
        .header(bob.clone())
        .body(format!(r#"{{"room_code": "{code}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // Correct password
    let res = tc
        .post("/api/v1/rooms/join")
        .header(ContentType::JSON)
        .header(bob)
        .body(format!(r#"{{"room_code": "{code}", "password": "hunter2"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["members"].as_array().unwrap().len(), 2);
}

#[test]
fn test_join_by_unknown_code() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let res = tc
        .post("/api/v1/rooms/join")
        .header(ContentType::JSON)
        .header(alice)
        .body(r#"{"room_code": "ZZZZZZ"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_list_rooms_only_membership() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let a_room = create_test_room(&tc, &alice, "alice-room");
    create_test_room(&tc, &bob, "bob-room");

    let res = tc.get("/api/v1/rooms").header(alice).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let rooms: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["id"], a_room.as_str());
    assert_eq!(rooms[0]["member_count"], 1);
    assert_eq!(rooms[0]["message_count"], 0);
}

#[test]
fn test_leave_room() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "leave-test");
    join_room(&tc, &bob, &room_id);

    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/leave"))
        .header(bob.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // No longer a member
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/leave"))
        .header(bob.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // Room no longer shows in bob's list
    let res = tc.get("/api/v1/rooms").header(bob).dispatch();
    let rooms: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(rooms.is_empty());
}

#[test]
fn test_destroy_requires_creator() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "destroy-auth-test");
    join_room(&tc, &bob, &room_id);

    let res = tc
        .delete(format!("/api/v1/rooms/{room_id}"))
        .header(bob)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = tc
        .delete(format!("/api/v1/rooms/{room_id}"))
        .header(alice)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_destroy_cascades_and_deletes_media() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "destroy-cascade-test");
    join_room(&tc, &bob, &room_id);

    // m1 carries media, m2 and m3 are text
    let res = tc
        .post(format!("/api/v1/rooms/{room_id}/messages"))
        .header(ContentType::JSON)
        .header(alice.clone())
        .body(r#"{"kind": "picture", "media_url": "https://blobs/cat.png"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    send_text(&tc, &alice, &room_id, "m2");
    send_text(&tc, &alice, &room_id, "m3");

    let res = tc
        .delete(format!("/api/v1/rooms/{room_id}"))
        .header(alice.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Exactly one blob delete, for m1's url
    let deleted = tc.blobs.deleted.lock().unwrap().clone();
    assert_eq!(deleted, vec!["https://blobs/cat.png".to_string()]);

    // Room and its contents are gone
    let res = tc
        .get(format!("/api/v1/rooms/{room_id}"))
        .header(alice.clone())
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let res = tc
        .get(format!("/api/v1/rooms/{room_id}/messages"))
        .header(alice.clone())
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // Bob's unread view no longer mentions the room
    let res = tc.get("/api/v1/unread").header(bob).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(
        body["rooms"]
            .as_array()
            .unwrap()
            .iter()
            .all(|r| r["chatroom_id"] != room_id.as_str())
    );
}

#[test]
fn test_get_room_includes_members() {
    let tc = test_client();
    let alice = seed_user(&tc, 1, "alice");
    let bob = seed_user(&tc, 2, "bob");

    let room_id = create_test_room(&tc, &alice, "get-room-test");
    join_room(&tc, &bob, &room_id);

    let res = tc
        .get(format!("/api/v1/rooms/{room_id}"))
        .header(alice)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let members = body["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let names: Vec<&str> = members
        .iter()
        .map(|m| m["username"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"alice"));
    assert!(names.contains(&"bob"));
}
