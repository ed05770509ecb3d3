//! Runs one conversation turn: persist the user message, generate the reply,
//! persist the reply, deliver both.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{
    error::{AppError, Result},
    models::{
        character::Character,
        conversation::Conversation,
        message::{Message, MessageRole, NewMessage},
        stream::{EnvelopeSink, MessageEnvelope, StreamEvent},
    },
    repositories::Store,
    services::{
        gateway::{GatewayError, ModelGateway},
        response_cache::{fingerprint, ResponseCache},
    },
};

/// Assistant text used whenever the model cannot produce a reply.
pub const FALLBACK_REPLY: &str = "Sorry, something went wrong on our side. Please try again later.";

/// Appended to a reply cut short by the client going away.
pub const INTERRUPTED_MARKER: &str = "[response interrupted]";

/// Envelopes buffered between the generating task and a slow client.
const STREAM_BUFFER: usize = 32;

/// Both halves of a completed turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message: Message,
    pub ai_message: Message,
}

/// What the user submitted.
#[derive(Debug, Clone)]
pub struct Submission {
    pub content: String,
    pub audio_url: Option<String>,
}

struct Context {
    conversation: Conversation,
    user_message: Message,
    history: Vec<Message>,
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<dyn Store>,
    gateway: Arc<dyn ModelGateway>,
    responses: ResponseCache,
}

impl ChatService {
    pub fn new(db: Arc<dyn Store>, gateway: Arc<dyn ModelGateway>, responses: ResponseCache) -> Self {
        Self {
            db,
            gateway,
            responses,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    /// Checks ownership, saves the user message, then loads the history.
    ///
    /// Anything failing after the save is reported as `TurnIncomplete` so the
    /// caller still learns the message was stored.
    async fn prepare(
        &self,
        user_id: i64,
        conversation_id: i64,
        submission: Submission,
    ) -> Result<Context> {
        let conversation = self
            .db
            .find_conversation(conversation_id, user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let user_message = self
            .db
            .create_message(NewMessage::user(
                conversation.id,
                submission.content,
                submission.audio_url,
            ))
            .await?;

        let history = match self.db.list_messages(conversation.id).await {
            Ok(history) => history,
            Err(e) => return Err(AppError::turn_incomplete(user_message, e)),
        };

        Ok(Context {
            conversation,
            user_message,
            history,
        })
    }

    /// Non-streaming turn. Model failures degrade to `FALLBACK_REPLY`.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The authenticated caller.
    /// * `conversation_id` - Must belong to `user_id`, otherwise `NotFound`.
    /// * `submission` - The user's message.
    ///
    /// # Returns
    ///
    /// The persisted user and assistant messages.
    pub async fn send_message(
        &self,
        user_id: i64,
        conversation_id: i64,
        submission: Submission,
    ) -> Result<Turn> {
        let Context {
            conversation,
            user_message,
            history,
        } = self.prepare(user_id, conversation_id, submission).await?;

        let reply = self.generate(&conversation.character, &history).await;

        let ai_message = match self
            .db
            .create_message(NewMessage::assistant(conversation.id, reply))
            .await
        {
            Ok(message) => message,
            Err(e) => return Err(AppError::turn_incomplete(user_message, e)),
        };

        tracing::info!("✅ Turn completed in conversation {}", conversation.id);
        Ok(Turn {
            user_message,
            ai_message,
        })
    }

    /// Cache first, then the model, then the fallback.
    async fn generate(&self, character: &Character, history: &[Message]) -> String {
        let key = fingerprint(character.id, self.gateway.model_name(), history);

        if let Some(content) = self.responses.lookup(&key).await {
            return content;
        }

        match self.gateway.complete(&character.system_prompt, history).await {
            Ok(content) => {
                self.responses
                    .store(&key, &content, self.gateway.model_name())
                    .await;
                content
            }
            Err(e) => {
                tracing::warn!("⚠️ Model call failed, replying with fallback: {}", e);
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Streaming turn.
    ///
    /// Ownership, the user-message save and history loading happen before this
    /// returns, so their failures become ordinary HTTP errors. Generation then
    /// runs on its own task that feeds the returned receiver and persists the
    /// assistant message exactly once when it ends.
    pub async fn stream_message(
        &self,
        user_id: i64,
        conversation_id: i64,
        submission: Submission,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let context = self.prepare(user_id, conversation_id, submission).await?;
        let (sink, rx) = EnvelopeSink::channel(STREAM_BUFFER);

        let span = tracing::info_span!(
            "chat_stream",
            conversation_id = context.conversation.id,
            user_id
        );
        let service = self.clone();
        tokio::spawn(async move { service.drive_stream(context, sink).await }.instrument(span));

        Ok(rx)
    }

    async fn drive_stream(&self, context: Context, sink: EnvelopeSink) {
        let Context {
            conversation,
            user_message,
            history,
        } = context;

        if sink
            .emit(StreamEvent::Message(MessageEnvelope::from(&user_message)))
            .await
            .is_err()
        {
            tracing::info!("Client left before generation started");
            self.persist_reply(conversation.id, INTERRUPTED_MARKER.to_string())
                .await;
            return;
        }

        let outcome = self
            .gateway
            .complete_streaming(
                &conversation.character.system_prompt,
                &history,
                conversation.id,
                &sink,
            )
            .await;

        match outcome {
            Ok(completion) => {
                if !completion.finished {
                    let _ = sink.emit(StreamEvent::Done).await;
                }
                self.persist_reply(conversation.id, completion.content).await;
                tracing::info!("✅ Streamed turn completed");
            }
            Err(failure) if matches!(failure.error, GatewayError::Cancelled) => {
                tracing::info!("Client disconnected mid-stream, keeping partial reply");
                self.persist_reply(conversation.id, interrupted(&failure.partial))
                    .await;
            }
            Err(failure) => {
                tracing::warn!("⚠️ Model stream failed, replying with fallback: {}", failure);
                let envelope = match self
                    .persist_reply(conversation.id, FALLBACK_REPLY.to_string())
                    .await
                {
                    Some(saved) => MessageEnvelope::from(&saved),
                    None => MessageEnvelope {
                        id: 0,
                        role: MessageRole::Assistant,
                        content: FALLBACK_REPLY.to_string(),
                        created_at: chrono::Utc::now(),
                        conversation_id: conversation.id,
                    },
                };
                let _ = sink.emit(StreamEvent::Message(envelope)).await;
            }
        }
    }

    async fn persist_reply(&self, conversation_id: i64, content: String) -> Option<Message> {
        match self
            .db
            .create_message(NewMessage::assistant(conversation_id, content))
            .await
        {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::error!(
                    "❌ Failed to persist assistant reply for conversation {}: {}",
                    conversation_id,
                    e
                );
                None
            }
        }
    }
}

fn interrupted(partial: &str) -> String {
    if partial.trim().is_empty() {
        INTERRUPTED_MARKER.to_string()
    } else {
        format!("{}\n\n{}", partial, INTERRUPTED_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_reply_keeps_partial_text() {
        assert_eq!(interrupted("Once upon"), "Once upon\n\n[response interrupted]");
        assert_eq!(interrupted(""), INTERRUPTED_MARKER);
        assert_eq!(interrupted("  \n"), INTERRUPTED_MARKER);
    }
}
