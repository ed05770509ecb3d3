use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::message::{Message, MessageRole};

/// One message snapshot pushed to a streaming client. Assistant envelopes
/// carry the cumulative text so far, never a bare delta.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MessageEnvelope {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub conversation_id: i64,
}

impl From<&Message> for MessageEnvelope {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content.clone(),
            created_at: message.created_at,
            conversation_id: message.conversation_id,
        }
    }
}

/// A single unit on the streaming channel.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Message(MessageEnvelope),
    /// End-of-stream sentinel, rendered as `[DONE]`.
    Done,
}

impl StreamEvent {
    /// The `data:` payload for this event.
    pub fn to_data(&self) -> Result<String, sonic_rs::Error> {
        match self {
            StreamEvent::Message(envelope) => sonic_rs::to_string(envelope),
            StreamEvent::Done => Ok("[DONE]".to_string()),
        }
    }
}

/// The receiving half went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Where streamed envelopes go. Emitting waits when the client is slow and
/// fails once the client has disconnected.
#[derive(Clone, Debug)]
pub struct EnvelopeSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EnvelopeSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    /// Resolves once the receiving half is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_renders_sentinel() {
        assert_eq!(StreamEvent::Done.to_data().unwrap(), "[DONE]");
    }

    #[test]
    fn envelope_has_client_shape() {
        let envelope = MessageEnvelope {
            id: 7,
            role: MessageRole::Assistant,
            content: "Hi".to_string(),
            created_at: Utc::now(),
            conversation_id: 3,
        };
        let data = StreamEvent::Message(envelope).to_data().unwrap();
        assert!(data.contains(r#""id":7"#));
        assert!(data.contains(r#""role":"assistant""#));
        assert!(data.contains(r#""content":"Hi""#));
        assert!(data.contains(r#""conversation_id":3"#));
        assert!(data.contains(r#""created_at""#));
    }

    #[tokio::test]
    async fn emit_fails_after_receiver_drops() {
        let (sink, rx) = EnvelopeSink::channel(4);
        drop(rx);
        sink.closed().await;
        assert_eq!(sink.emit(StreamEvent::Done).await, Err(SinkClosed));
    }
}
