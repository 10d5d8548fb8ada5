pub mod adapters;
pub mod auth;
pub mod db;
pub mod frames;
pub mod hub;
pub mod ids;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod routes;

use adapters::Adapters;
use auth::AuthSecret;
use db::Db;
use hub::Hub;
use rate_limit::{RateLimitConfig, RateLimiter};
use rocket_cors::CorsOptions;
use std::env;
use std::sync::Arc;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/chat.db".to_string());
    rocket_with_db(&db_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let adapters = Adapters::defaults(db_path);
    build_rocket(db_path, adapters, RateLimitConfig::from_env())
}

/// Builder with injectable adapters and rate limits, for tests and embeddings.
pub fn rocket_with_adapters(
    db_path: &str,
    adapters: Adapters,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, adapters, rate_config)
}

fn build_rocket(
    db_path: &str,
    adapters: Adapters,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let hub = Arc::new(Hub::new());
    let sweeper_hub = hub.clone();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    rocket::build()
        .manage(db)
        .manage(hub)
        .manage(adapters)
        .manage(rate_config)
        .manage(RateLimiter::new())
        .manage(AuthSecret::from_env())
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::unauthorized,
                routes::not_found,
                routes::unprocessable,
                routes::too_many_requests
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::create_room,
                routes::list_rooms,
                routes::get_room,
                routes::join_room,
                routes::join_by_code,
                routes::leave_room,
                routes::destroy_room,
                routes::send_message,
                routes::get_messages,
                routes::page_messages,
                routes::edit_message,
                routes::delete_message,
                routes::list_media,
                routes::mark_read,
                routes::mark_read_bulk,
                routes::mark_all_read,
                routes::get_read_status,
                routes::get_read_by,
                routes::get_unread,
                routes::latest_per_room,
                routes::first_unread,
                routes::unread_in_room,
                routes::get_cursor,
                routes::room_socket,
                routes::sidebar_socket,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Hub Stamp Sweeper",
            move |_rocket| {
                Box::pin(async move {
                    hub::spawn_stamp_sweeper(sweeper_hub);
                    println!("🧹 Hub stamp sweeper started");
                })
            },
        ))
}
