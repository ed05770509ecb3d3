use axum::{extract::State, http::StatusCode, response::Response};
use serde::Serialize;

use crate::{error::Result, handlers::respond, state::AppState};

#[derive(Serialize)]
struct Health {
    status: &'static str,
    model: &'static str,
}

/// Liveness probe. Also reports whether the model server answers.
pub async fn health(State(state): State<AppState>) -> Result<Response> {
    let model = if state.chat.gateway().ping().await {
        "up"
    } else {
        "down"
    };
    respond(StatusCode::OK, &Health { status: "ok", model })
}
