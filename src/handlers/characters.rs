use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::{error::Result, handlers::respond, models::character::Character, state::AppState};

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize)]
struct CharacterList {
    characters: Vec<Character>,
}

#[derive(Serialize)]
struct CharacterDetail {
    character: Character,
}

/// Lists every character.
pub async fn list_characters(State(state): State<AppState>) -> Result<Response> {
    let characters = state.characters.list().await?;
    respond(StatusCode::OK, &CharacterList { characters })
}

/// Searches characters by name, description or category.
pub async fn search_characters(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response> {
    let characters = state.characters.search(&params.q).await?;
    respond(StatusCode::OK, &CharacterList { characters })
}

pub async fn get_character(
    State(state): State<AppState>,
    Path(character_id): Path<i64>,
) -> Result<Response> {
    let character = state.characters.get(character_id).await?;
    respond(StatusCode::OK, &CharacterDetail { character })
}
