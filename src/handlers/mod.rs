use axum::{http::StatusCode, response::Response};
use serde::Serialize;

use crate::error::{json_response, AppError, Result};

pub mod auth;
pub mod characters;
pub mod conversations;
pub mod health;

/// Encodes `body` with sonic-rs and wraps it in a JSON response.
pub fn respond<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let json = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
    Ok(json_response(status, json))
}
