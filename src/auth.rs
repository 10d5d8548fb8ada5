use hmac::{Hmac, Mac};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use sha2::{Digest, Sha256};
use std::env;

type HmacSha256 = Hmac<Sha256>;

/// Server-side secret for bearer-token validation. Token issuance lives in
/// the external auth service; this side only needs the shared secret.
pub struct AuthSecret(pub String);

impl AuthSecret {
    pub fn from_env() -> Self {
        AuthSecret(env::var("AUTH_SECRET").unwrap_or_else(|_| "dev-secret".to_string()))
    }
}

/// Mint a bearer token for a user id: `<user_id>.<hex hmac>`.
/// Mirrors what the external auth service issues; used by tests and tooling.
pub fn issue_token(secret: &str, user_id: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(user_id.to_string().as_bytes());
    format!("{}.{}", user_id, hex::encode(mac.finalize().into_bytes()))
}

/// Validate a bearer token and return the user id it names.
pub fn validate_token(secret: &str, token: &str) -> Option<u64> {
    let (id_part, mac_part) = token.split_once('.')?;
    let user_id: u64 = id_part.parse().ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(id_part.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    if expected == mac_part {
        Some(user_id)
    } else {
        None
    }
}

/// One-way hash for room passwords.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password) == stored_hash
}

/// Request guard: authenticated caller, resolved against the user directory.
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = match req
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };

        let secret = match req.rocket().state::<AuthSecret>() {
            Some(s) => s,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let user_id = match validate_token(&secret.0, token) {
            Some(id) => id,
            None => return Outcome::Error((Status::Unauthorized, ())),
        };

        let directory = match req.rocket().state::<crate::adapters::Adapters>() {
            Some(a) => &a.directory,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        match directory.lookup(user_id) {
            Some(username) => Outcome::Success(AuthUser { user_id, username }),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
