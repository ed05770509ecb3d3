use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use http::{header, HeaderValue, Method};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    handlers,
    middleware_layer::{auth::require_auth, rate_limit},
    state::AppState,
};

/// Largest request body accepted on any route.
const BODY_LIMIT: usize = 1024 * 1024;

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400))
}

/// Builds the full HTTP surface over `state`.
///
/// # Arguments
///
/// * `state` - The shared application state.
///
/// # Returns
///
/// A `Router` ready to be served with `ConnectInfo<SocketAddr>`.
pub fn create_router(state: AppState) -> Router {
    let public_auth_routes = Router::new()
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route("/api/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route("/api/v1/auth/me", get(handlers::auth::me))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let character_routes = Router::new()
        .route(
            "/api/v1/characters",
            get(handlers::characters::list_characters),
        )
        .route(
            "/api/v1/characters/search",
            get(handlers::characters::search_characters),
        )
        .route(
            "/api/v1/characters/{id}",
            get(handlers::characters::get_character),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ))
        .with_state(state.clone());

    let chat_routes = Router::new()
        .route(
            "/api/v1/conversations/{id}/messages",
            post(handlers::conversations::send_message),
        )
        .route(
            "/api/v1/conversations/{id}/messages/stream",
            post(handlers::conversations::send_message_stream),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_ai_chat,
        ));

    // Layers run bottom-up: auth first so the quotas can key on the user.
    let conversation_routes = Router::new()
        .route(
            "/api/v1/conversations",
            get(handlers::conversations::list_conversations)
                .post(handlers::conversations::create_conversation),
        )
        .route(
            "/api/v1/conversations/batch",
            delete(handlers::conversations::delete_conversations),
        )
        .route(
            "/api/v1/conversations/{id}",
            get(handlers::conversations::get_conversation)
                .delete(handlers::conversations::delete_conversation),
        )
        .merge(chat_routes)
        .route_layer(from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .with_state(state.clone());

    Router::new()
        .merge(public_auth_routes)
        .merge(session_routes)
        .merge(character_routes)
        .merge(conversation_routes)
        .merge(health_routes)
        .layer(from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_global,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors(&state.config.allowed_origins))
}
