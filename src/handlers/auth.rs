use axum::{extract::State, http::StatusCode, response::Response, Extension, Json};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    handlers::respond,
    models::{
        session::{AuthSession, SessionInfo},
        user::User,
    },
    services::auth as auth_service,
    state::AppState,
    validation::{auth::username_charset, validate},
};

/// The request payload for user registration.
#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(length(min = 3, max = 50), custom(username_charset))]
    pub username: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 6, max = 128))]
    pub password: String,
}

/// The request payload for user login.
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

/// Returned by register and login.
#[derive(Serialize)]
struct AuthResponse<'a> {
    message: &'static str,
    token: &'a str,
    user: &'a User,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct MeResponse {
    user: User,
    session: Option<SessionInfo>,
}

/// Handles user registration.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response> {
    tracing::info!("📝 Register attempt for: {}", payload.username);
    validate(&payload)?;

    let user = auth_service::create_user(
        state.db.as_ref(),
        payload.username,
        payload.email.trim().to_string(),
        payload.password,
        state.config.password_hashing,
    )
    .await?;

    let token = state.sessions.mint(user.id)?;
    state.sessions.issue(user.id, &token).await?;

    respond(
        StatusCode::CREATED,
        &AuthResponse {
            message: "Registration successful",
            token: &token,
            user: &user,
        },
    )
}

/// Handles user login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt for: {}", payload.email);
    validate(&payload)?;

    let user =
        auth_service::authenticate_user(state.db.as_ref(), payload.email.trim(), payload.password)
            .await?;

    let token = state.sessions.mint(user.id)?;
    state.sessions.issue(user.id, &token).await?;

    respond(
        StatusCode::OK,
        &AuthResponse {
            message: "Login successful",
            token: &token,
            user: &user,
        },
    )
}

/// Handles user logout by revoking the presented token.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Response> {
    state.sessions.revoke(&auth.token).await?;
    tracing::info!("✅ User logged out: {}", auth.user_id);
    respond(StatusCode::OK, &MessageResponse { message: "Logged out" })
}

/// Revokes the presented token and clears the user's session aggregate.
#[axum::debug_handler]
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Response> {
    state.sessions.revoke(&auth.token).await?;
    state.sessions.revoke_all(auth.user_id).await?;
    respond(
        StatusCode::OK,
        &MessageResponse {
            message: "Logged out everywhere",
        },
    )
}

/// Returns the caller and their latest session metadata.
#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Response> {
    let user = state
        .db
        .find_user_by_id(auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("User no longer exists".to_string()))?;

    let session = state
        .sessions
        .user_session(auth.user_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ Could not read session aggregate: {}", e);
            None
        })
        .as_ref()
        .map(SessionInfo::from);

    respond(StatusCode::OK, &MeResponse { user, session })
}
