use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account. `motto` holds AES-256-GCM ciphertext, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub motto: Option<String>,
}

/// Insert payload for the user store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub motto: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(length(min = 1, max = 64))]
    pub username: String,

    #[garde(length(min = 8, max = 128))]
    pub password: String,

    #[garde(length(max = 500))]
    pub motto: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(length(min = 1, max = 64))]
    pub username: String,

    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Profile view with the motto decrypted.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub username: String,
    pub motto: Option<String>,
}
