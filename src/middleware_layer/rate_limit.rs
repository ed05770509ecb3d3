use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::{
    config::{IdentityKey, RateScope},
    error::AppError,
    models::session::AuthSession,
    services::rate_limit::Decision,
    state::AppState,
};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Extracts the real IP address from the request extensions.
///
/// # Arguments
///
/// * `req` - The incoming request.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The identity a scope counts against for this request.
fn identity_for(req: &Request<Body>, key_by: IdentityKey) -> String {
    let user = req.extensions().get::<AuthSession>().map(|s| s.user_id);
    match (key_by, user) {
        (IdentityKey::Ip, _) | (_, None) => extract_real_ip(req),
        (IdentityKey::UserOrIp | IdentityKey::User, Some(user_id)) => format!("user:{}", user_id),
    }
}

async fn enforce(state: &AppState, scope: &RateScope, req: Request<Body>, next: Next) -> Response {
    let identity = identity_for(&req, scope.key_by);
    let decision = state.limiter.admit(&identity, scope).await;

    if !decision.allowed {
        return AppError::RateLimited {
            retry_after: decision.retry_after_secs(),
        }
        .into_response();
    }

    let mut response = next.run(req).await;
    apply_headers(&mut response, &decision);
    response
}

/// Inner scopes run closer to the handler, so the most specific quota that
/// already wrote its headers keeps them.
fn apply_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    if headers.contains_key(LIMIT_HEADER) {
        return;
    }
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

/// A middleware that applies the global per-IP quota to every route.
pub async fn rate_limit_global(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let scope = state.config.rate_limits.global.clone();
    enforce(&state, &scope, req, next).await
}

/// A middleware that applies the API quota. Runs after `require_auth` where
/// the route is authenticated, so it can key on the user.
pub async fn rate_limit_api(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let scope = state.config.rate_limits.api.clone();
    enforce(&state, &scope, req, next).await
}

/// A middleware that applies the AI chat quota on top of the API quota.
pub async fn rate_limit_ai_chat(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let scope = state.config.rate_limits.ai_chat.clone();
    enforce(&state, &scope, req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<Body> {
        Request::builder().body(Body::empty()).unwrap()
    }

    #[test]
    fn anonymous_requests_key_on_ip() {
        let mut req = request();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        assert_eq!(identity_for(&req, IdentityKey::UserOrIp), "10.0.0.7");
        assert_eq!(identity_for(&req, IdentityKey::User), "10.0.0.7");
        assert_eq!(identity_for(&request(), IdentityKey::Ip), "unknown");
    }

    #[test]
    fn authenticated_requests_key_on_user_unless_ip_scoped() {
        let mut req = request();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        req.extensions_mut().insert(AuthSession {
            user_id: 42,
            token: "t".to_string(),
        });
        assert_eq!(identity_for(&req, IdentityKey::UserOrIp), "user:42");
        assert_eq!(identity_for(&req, IdentityKey::User), "user:42");
        assert_eq!(identity_for(&req, IdentityKey::Ip), "10.0.0.7");
    }

    #[test]
    fn innermost_scope_keeps_its_headers() {
        let decision = |limit| Decision {
            allowed: true,
            limit,
            remaining: limit - 1,
            reset_at: chrono::Utc::now(),
            reset_in: std::time::Duration::from_secs(60),
        };
        let mut response = Response::new(Body::empty());
        apply_headers(&mut response, &decision(10));
        apply_headers(&mut response, &decision(100));

        assert_eq!(response.headers()[LIMIT_HEADER], "10");
        assert_eq!(response.headers()[REMAINING_HEADER], "9");
    }
}
