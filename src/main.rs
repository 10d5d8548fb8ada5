#[rocket::launch]
fn rocket() -> _ {
    roomcast::rocket()
}
