use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::models::message::Message;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// The connection pool could not hand out a client.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A key-value store error on a path that cannot fail open.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Missing, malformed, expired or revoked credential.
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// A resource not found error. Also used for resources owned by someone else.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// The user message was saved but the turn could not be finished.
    #[error("Turn incomplete: {reason}")]
    TurnIncomplete {
        user_message: Box<Message>,
        reason: String,
    },

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Wraps a failure that happened after `user_message` was persisted.
    pub fn turn_incomplete(user_message: Message, cause: impl std::fmt::Display) -> Self {
        AppError::TurnIncomplete {
            user_message: Box::new(user_message),
            reason: cause.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error"))
            }

            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, error_body("Database error"))
            }

            AppError::Cache(ref e) => {
                tracing::error!("Cache error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, error_body("Cache error"))
            }

            AppError::Unauthenticated(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, error_body(msg))
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, error_body("Resource not found"))
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, error_body(msg))
            }

            AppError::Conflict(ref msg) => {
                tracing::debug!("Conflict: {}", msg);
                (StatusCode::CONFLICT, error_body(msg))
            }

            AppError::RateLimited { retry_after } => {
                tracing::warn!("Rate limit exceeded, retry after {}s", retry_after);
                let body = sonic_rs::to_string(&RateLimitedBody {
                    error: "Rate limit exceeded",
                    retry_after,
                })
                .unwrap_or_else(|_| r#"{"error":"Rate limit exceeded"}"#.to_string());

                let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, body);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                return response;
            }

            AppError::TurnIncomplete {
                ref user_message,
                ref reason,
            } => {
                tracing::error!(
                    "Turn incomplete after saving message {}: {}",
                    user_message.id,
                    reason
                );
                let body = sonic_rs::to_string(&TurnIncompleteBody {
                    error: "Failed to complete the reply",
                    user_message: user_message.as_ref(),
                })
                .unwrap_or_else(|_| error_body("Failed to complete the reply"));
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, error_body("Internal server error"))
            }
        };

        json_response(status, body)
    }
}

#[derive(Serialize)]
struct RateLimitedBody {
    error: &'static str,
    retry_after: u64,
}

#[derive(Serialize)]
struct TurnIncompleteBody<'a> {
    error: &'static str,
    user_message: &'a Message,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_body(message: &str) -> String {
    sonic_rs::to_string(&ErrorBody { error: message })
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string())
}

/// Builds a response with an already-encoded JSON body.
pub fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}
