//! Client for an Ollama-compatible `/api/chat` endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::{
    config::Config,
    models::{
        message::{Message, MessageRole},
        stream::{EnvelopeSink, MessageEnvelope, SinkClosed, StreamEvent},
    },
};

/// Longest NDJSON line accepted from the model server.
const MAX_FRAGMENT_BYTES: usize = 1024 * 1024;

/// Problems talking to the model server. Never shown to API clients.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("model server unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("model server returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("malformed model response: {0}")]
    UpstreamDecode(String),

    #[error("model returned an empty completion")]
    EmptyCompletion,

    #[error("client disconnected")]
    Cancelled,
}

impl GatewayError {
    fn unavailable(e: impl std::fmt::Display) -> Self {
        GatewayError::UpstreamUnavailable(e.to_string())
    }
}

/// A streamed completion that produced text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedCompletion {
    pub content: String,
    /// Whether the upstream sent its terminal flag (and the sentinel was pushed).
    pub finished: bool,
}

/// A streamed completion that stopped early, with whatever text it had.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct StreamFailure {
    pub error: GatewayError,
    pub partial: String,
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Model name sent upstream, also part of the response-cache fingerprint.
    fn model_name(&self) -> &str;

    /// One blocking chat completion.
    async fn complete(&self, system_prompt: &str, history: &[Message])
        -> Result<String, GatewayError>;

    /// Streams a completion into `sink` as cumulative assistant envelopes.
    ///
    /// Pushes `StreamEvent::Done` when the upstream sets its terminal flag.
    /// If the input simply ends, the accumulated text is returned with
    /// `finished == false` and no sentinel is pushed.
    async fn complete_streaming(
        &self,
        system_prompt: &str,
        history: &[Message],
        conversation_id: i64,
        sink: &EnvelopeSink,
    ) -> Result<StreamedCompletion, StreamFailure>;

    /// Whether the model server answers at all.
    async fn ping(&self) -> bool;
}

/// Builds the cumulative assistant envelopes of one stream.
///
/// The synthetic message id and timestamp are fixed on the first non-empty
/// delta so every envelope of the stream refers to the same message.
#[derive(Debug)]
pub struct StreamAccumulator {
    conversation_id: i64,
    identity: Option<(i64, DateTime<Utc>)>,
    content: String,
}

impl StreamAccumulator {
    pub fn new(conversation_id: i64) -> Self {
        Self {
            conversation_id,
            identity: None,
            content: String::new(),
        }
    }

    /// Pushes the text so far plus `delta`. Empty deltas push nothing.
    ///
    /// `delta` only becomes part of the content once the client has received
    /// it, so the partial text of an abandoned stream is exactly what was sent.
    pub async fn push(&mut self, delta: &str, sink: &EnvelopeSink) -> Result<(), SinkClosed> {
        if delta.is_empty() {
            return Ok(());
        }

        let (id, created_at) = *self.identity.get_or_insert_with(|| {
            let now = Utc::now();
            let id = now
                .timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros());
            (id, now)
        });

        let content = format!("{}{}", self.content, delta);
        sink.emit(StreamEvent::Message(MessageEnvelope {
            id,
            role: MessageRole::Assistant,
            content,
            created_at,
            conversation_id: self.conversation_id,
        }))
        .await?;

        self.content.push_str(delta);
        Ok(())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether nothing but whitespace has been received.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn finish(self, finished: bool) -> StreamedCompletion {
        StreamedCompletion {
            content: self.content,
            finished,
        }
    }

    pub fn fail(self, error: GatewayError) -> StreamFailure {
        StreamFailure {
            error,
            partial: self.content,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OutboundMessage<'a>>,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct OutboundMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Deserialize, Default)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatFragment {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// One parsed line of a streamed reply.
#[derive(Debug, PartialEq, Eq)]
struct Fragment {
    delta: String,
    done: bool,
    error: Option<String>,
}

/// Parses one NDJSON line. Blank or malformed lines yield `None`.
fn parse_fragment(line: &str) -> Option<Fragment> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match sonic_rs::from_str::<ChatFragment>(line) {
        Ok(fragment) => Some(Fragment {
            delta: fragment.message.unwrap_or_default().content,
            done: fragment.done,
            error: fragment.error,
        }),
        Err(e) => {
            tracing::debug!("Skipping unparseable stream line: {}", e);
            None
        }
    }
}

/// System prompt first (when present), then the history in order.
fn outbound_messages<'a>(system_prompt: &'a str, history: &'a [Message]) -> Vec<OutboundMessage<'a>> {
    let system = (!system_prompt.trim().is_empty()).then_some(OutboundMessage {
        role: "system",
        content: system_prompt,
    });

    system
        .into_iter()
        .chain(history.iter().map(|m| OutboundMessage {
            role: m.role.as_str(),
            content: m.content.as_str(),
        }))
        .collect()
}

/// `ModelGateway` for an Ollama server.
#[derive(Clone)]
pub struct OllamaGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
    idle_timeout: Duration,
}

impl OllamaGateway {
    /// Creates a new `OllamaGateway`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Server root, e.g. `http://localhost:11434`.
    /// * `model` - Model name to request.
    /// * `timeout` - Bound on a non-streaming call and on opening a stream.
    /// * `idle_timeout` - Longest allowed gap between two streamed chunks.
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(GatewayError::unavailable)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            idle_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        Self::new(
            &config.ollama_base_url,
            &config.ollama_model,
            config.model_timeout,
            config.stream_idle_timeout,
        )
    }

    fn request_body(
        &self,
        system_prompt: &str,
        history: &[Message],
        stream: bool,
    ) -> Result<Vec<u8>, GatewayError> {
        let request = ChatRequest {
            model: &self.model,
            messages: outbound_messages(system_prompt, history),
            stream,
        };
        sonic_rs::to_vec(&request)
            .map_err(|e| GatewayError::UpstreamDecode(format!("request encoding: {}", e)))
    }

    async fn open(&self, body: Vec<u8>) -> Result<reqwest::Response, GatewayError> {
        let send = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| GatewayError::UpstreamUnavailable("request timed out".to_string()))?
            .map_err(GatewayError::unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, GatewayError> {
        let body = self.request_body(system_prompt, history, false)?;

        let call = async {
            let response = self.open(body).await?;
            response.bytes().await.map_err(GatewayError::unavailable)
        };
        let bytes = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| GatewayError::UpstreamUnavailable("request timed out".to_string()))??;

        let reply: ChatResponse = sonic_rs::from_slice(&bytes)
            .map_err(|e| GatewayError::UpstreamDecode(e.to_string()))?;

        if reply.message.content.trim().is_empty() {
            return Err(GatewayError::EmptyCompletion);
        }

        tracing::debug!("🤖 Completion received ({} bytes)", reply.message.content.len());
        Ok(reply.message.content)
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        history: &[Message],
        conversation_id: i64,
        sink: &EnvelopeSink,
    ) -> Result<StreamedCompletion, StreamFailure> {
        let mut acc = StreamAccumulator::new(conversation_id);

        let body = match self.request_body(system_prompt, history, true) {
            Ok(body) => body,
            Err(e) => return Err(acc.fail(e)),
        };
        let response = match self.open(body).await {
            Ok(response) => response,
            Err(e) => return Err(acc.fail(e)),
        };

        let reader = StreamReader::new(Box::pin(
            response.bytes_stream().map_err(std::io::Error::other),
        ));
        let mut lines = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(MAX_FRAGMENT_BYTES),
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(acc.fail(GatewayError::Cancelled)),
                next = tokio::time::timeout(self.idle_timeout, lines.next()) => next,
            };

            let line = match next {
                Err(_) => {
                    return Err(acc.fail(GatewayError::UpstreamUnavailable(
                        "stream stalled".to_string(),
                    )));
                }
                Ok(None) => break,
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    tracing::warn!("⚠️ Skipping oversized stream line");
                    continue;
                }
                Ok(Some(Err(LinesCodecError::Io(e)))) => {
                    return Err(acc.fail(GatewayError::unavailable(e)));
                }
            };

            let Some(fragment) = parse_fragment(&line) else {
                continue;
            };

            if let Some(error) = fragment.error {
                return Err(acc.fail(GatewayError::UpstreamError { status: 200, body: error }));
            }

            if acc.push(&fragment.delta, sink).await.is_err() {
                return Err(acc.fail(GatewayError::Cancelled));
            }

            if fragment.done {
                if acc.is_blank() {
                    return Err(acc.fail(GatewayError::EmptyCompletion));
                }
                if sink.emit(StreamEvent::Done).await.is_err() {
                    tracing::debug!("Client left before the end-of-stream marker");
                }
                return Ok(acc.finish(true));
            }
        }

        if acc.is_blank() {
            return Err(acc.fail(GatewayError::EmptyCompletion));
        }
        tracing::debug!("Model stream ended without a terminal flag");
        Ok(acc.finish(false))
    }

    async fn ping(&self) -> bool {
        let probe = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match probe {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Model server probe failed: {}", e);
                false
            }
        }
    }
}
