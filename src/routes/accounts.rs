use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::user::{
    LoginRequest, LoginResponse, NewUser, ProfileResponse, RegisterRequest, RegisterResponse,
};
use crate::routes::extract::AuthUser;
use crate::services::auth;

/// POST /api/v1/register: create an account and return an access token.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    request.validate()?;

    let password = request.password;
    let password_hash =
        tokio::task::spawn_blocking(move || auth::hash_password(&password)).await??;

    let motto = request
        .motto
        .as_deref()
        .map(|m| state.cipher.encrypt_motto(m))
        .transpose()?;

    let user = state
        .users
        .create(NewUser {
            username: request.username,
            password_hash,
            motto,
        })
        .await?;

    tracing::info!(user_id = %user.id, "User registered");

    let token = state.tokens.issue(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            token,
        }),
    ))
}

/// POST /api/v1/login: exchange credentials for an access token.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    request.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());
    let user = state
        .users
        .find_by_username(&request.username)
        .await?
        .ok_or_else(invalid)?;

    let password = request.password;
    let password_hash = user.password_hash.clone();
    let valid =
        tokio::task::spawn_blocking(move || auth::verify_password(&password, &password_hash))
            .await??;
    if !valid {
        return Err(invalid());
    }

    Ok(Json(LoginResponse {
        token: state.tokens.issue(user.id)?,
    }))
}

/// GET /api/v1/user: the caller's profile with the motto decrypted.
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let motto = match user.motto.as_deref() {
        Some(stored) => match state.cipher.decrypt_motto(stored) {
            Ok(motto) => Some(motto),
            Err(e) => {
                // Typically a motto written under a previous process's ephemeral key.
                tracing::warn!(user_id = %user_id, error = %e, "Stored motto is unreadable");
                None
            }
        },
        None => None,
    };

    Ok(Json(ProfileResponse {
        username: user.username,
        motto,
    }))
}
