use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, models::session::AuthSession, state::AppState};

/// Extracts the bearer token from the `Authorization` header.
///
/// # Arguments
///
/// * `request` - The incoming request.
///
/// # Returns
///
/// An `Option` containing the token if the header is a well-formed bearer credential.
fn extract_bearer_token(request: &Request<Body>) -> Option<String> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// A middleware that requires a valid session to be present.
///
/// On success the caller is available to handlers as `Extension<AuthSession>`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!("🔐 Checking authentication...");

    let Some(token) = extract_bearer_token(&request) else {
        tracing::debug!("❌ No bearer token on request");
        return AppError::Unauthenticated("Authorization header required".to_string())
            .into_response();
    };

    let session = match state.sessions.validate(&token).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(AuthSession {
        user_id: session.user_id,
        token,
    });

    next.run(request).await
}
