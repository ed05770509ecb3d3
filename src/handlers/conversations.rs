use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::StreamExt;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::{
    error::{AppError, Result},
    handlers::respond,
    models::{conversation::Conversation, message::Message, session::AuthSession},
    services::chat::Submission,
    state::AppState,
    validation::{chat::not_blank, validate},
};

#[derive(Deserialize, Validate)]
pub struct CreateConversationRequest {
    #[garde(range(min = 1))]
    pub character_id: i64,
}

#[derive(Deserialize, Validate)]
pub struct BatchDeleteRequest {
    #[garde(length(min = 1, max = 100))]
    pub ids: Vec<i64>,
}

#[derive(Deserialize, Validate)]
pub struct SendMessageRequest {
    #[garde(length(min = 1, max = 8000), custom(not_blank))]
    pub content: String,
    #[garde(skip)]
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl From<SendMessageRequest> for Submission {
    fn from(request: SendMessageRequest) -> Self {
        Submission {
            content: request.content,
            audio_url: request.audio_url.filter(|url| !url.trim().is_empty()),
        }
    }
}

#[derive(Serialize)]
struct ConversationList {
    conversations: Vec<Conversation>,
}

#[derive(Serialize)]
struct ConversationCreated {
    conversation: Conversation,
}

#[derive(Serialize)]
struct ConversationDetail {
    conversation: Conversation,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Deleted {
    deleted: u64,
}

#[derive(Serialize)]
struct TurnResponse {
    user_message: Message,
    ai_message: Message,
}

/// Lists the caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> Result<Response> {
    let conversations = state.db.list_conversations(auth.user_id).await?;
    respond(StatusCode::OK, &ConversationList { conversations })
}

/// Starts a conversation with a character.
#[axum::debug_handler]
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<Response> {
    validate(&payload)?;
    let character = state.characters.get(payload.character_id).await?;
    let title = format!("Chat with {}", character.name);

    let conversation = state
        .db
        .create_conversation(auth.user_id, &character, &title)
        .await?;

    respond(StatusCode::CREATED, &ConversationCreated { conversation })
}

/// Returns a conversation with its full message history.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(conversation_id): Path<i64>,
) -> Result<Response> {
    let conversation = state
        .db
        .find_conversation(conversation_id, auth.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let messages = state.db.list_messages(conversation.id).await?;

    respond(
        StatusCode::OK,
        &ConversationDetail {
            conversation,
            messages,
        },
    )
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(conversation_id): Path<i64>,
) -> Result<Response> {
    if !state
        .db
        .delete_conversation(conversation_id, auth.user_id)
        .await?
    {
        return Err(AppError::NotFound);
    }
    tracing::info!("🗑️ Conversation {} deleted", conversation_id);
    respond(StatusCode::OK, &Deleted { deleted: 1 })
}

/// Deletes the listed conversations the caller owns; others are ignored.
#[axum::debug_handler]
pub async fn delete_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Json(payload): Json<BatchDeleteRequest>,
) -> Result<Response> {
    validate(&payload)?;
    let deleted = state
        .db
        .delete_conversations(&payload.ids, auth.user_id)
        .await?;
    tracing::info!("🗑️ {} conversations deleted", deleted);
    respond(StatusCode::OK, &Deleted { deleted })
}

/// Sends a message and waits for the full reply.
#[axum::debug_handler]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Response> {
    validate(&payload)?;
    let turn = state
        .chat
        .send_message(auth.user_id, conversation_id, payload.into())
        .await?;

    respond(
        StatusCode::OK,
        &TurnResponse {
            user_message: turn.user_message,
            ai_message: turn.ai_message,
        },
    )
}

/// Sends a message and streams the reply as server-sent events.
///
/// The first event is the saved user message, then cumulative snapshots of
/// the assistant message, then `[DONE]`.
#[axum::debug_handler]
pub async fn send_message_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Response> {
    validate(&payload)?;
    let rx = state
        .chat
        .stream_message(auth.user_id, conversation_id, payload.into())
        .await?;

    let events = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((event, rx))
    })
    .filter_map(|event| async move {
        match event.to_data() {
            Ok(data) => Some(Ok::<_, Infallible>(Event::default().data(data))),
            Err(e) => {
                tracing::warn!("⚠️ Dropping unencodable stream event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
