#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

use rolechat::{
    cache::MemoryStore,
    config::Config,
    models::{message::Message, stream::EnvelopeSink},
    repositories::{MemoryDatabase, MessageStore},
    routes::create_router,
    services::gateway::{
        GatewayError, ModelGateway, OllamaGateway, StreamAccumulator, StreamFailure,
        StreamedCompletion,
    },
    state::AppState,
};

pub const PASSWORD: &str = "secret1";

/// A config that never touches the process environment.
pub fn test_config(model_url: &str, overrides: &[(&str, &str)]) -> Config {
    let mut vars: Vec<(String, String)> = [
        ("DATABASE_URL", "postgres://unused@localhost/unused"),
        ("JWT_SECRET", "integration-test-secret-0123456789"),
        ("OLLAMA_MODEL", "llama2"),
        ("MODEL_TIMEOUT_SECS", "5"),
        ("STREAM_IDLE_TIMEOUT_SECS", "5"),
        ("ARGON2_MEMORY_KIB", "1024"),
        ("ARGON2_ITERATIONS", "1"),
        ("ARGON2_PARALLELISM", "1"),
        ("RATE_LIMIT_GLOBAL", "1000"),
        ("RATE_LIMIT_API", "1000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    vars.push(("OLLAMA_BASE_URL".to_string(), model_url.to_string()));
    for (k, v) in overrides {
        vars.retain(|(key, _)| key != k);
        vars.push((k.to_string(), v.to_string()));
    }

    Config::from_lookup(move |key| {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("test config")
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: Arc<MemoryDatabase>,
    pub kv: Arc<MemoryStore>,
}

pub fn build_app(config: Config, gateway: Arc<dyn ModelGateway>) -> TestApp {
    let db = Arc::new(MemoryDatabase::new());
    let kv = Arc::new(MemoryStore::new());
    let state = AppState::assemble(config, db.clone(), kv.clone(), gateway);
    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        kv,
    }
}

/// App wired to a real `OllamaGateway` pointed at `model_url`.
pub fn ollama_app(model_url: &str, overrides: &[(&str, &str)]) -> TestApp {
    let config = test_config(model_url, overrides);
    let gateway = OllamaGateway::from_config(&config).expect("gateway");
    build_app(config, Arc::new(gateway))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Registers `username` and returns `(token, user_id)`.
    pub async fn register(&self, username: &str) -> (String, i64) {
        let res = self
            .request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(serde_json::json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": PASSWORD,
                })),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{}", res.text());
        let body = res.json();
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_i64().unwrap(),
        )
    }

    pub async fn start_conversation(&self, token: &str, character_id: i64) -> i64 {
        let res = self
            .request(
                Method::POST,
                "/api/v1/conversations",
                Some(token),
                Some(serde_json::json!({ "character_id": character_id })),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{}", res.text());
        res.json()["conversation"]["id"].as_i64().unwrap()
    }

    pub async fn messages(&self, conversation_id: i64) -> Vec<Message> {
        self.db.list_messages(conversation_id).await.unwrap()
    }

    /// Polls until the conversation holds `count` messages.
    pub async fn wait_for_messages(&self, conversation_id: i64, count: usize) -> Vec<Message> {
        for _ in 0..100 {
            let messages = self.messages(conversation_id).await;
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("conversation {} never reached {} messages", conversation_id, count);
    }
}

/// The `data:` payloads of an SSE body, in order.
pub fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .collect()
}

/// One NDJSON line of an Ollama streaming reply.
pub fn ndjson_chunk(content: &str, done: bool) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "model": "llama2",
            "message": { "role": "assistant", "content": content },
            "done": done,
        })
    )
}

/// An Ollama non-streaming reply.
pub fn chat_reply(content: &str) -> Value {
    serde_json::json!({
        "model": "llama2",
        "message": { "role": "assistant", "content": content },
        "done": true,
    })
}

/// What a `ScriptedGateway` does next.
#[derive(Clone, Debug)]
pub enum Step {
    Delta(&'static str),
    /// Waits for `ScriptedGateway::release`.
    Pause,
    Done,
    Fail(&'static str),
}

/// Replays a fixed script through the same accumulator the real gateway uses.
pub struct ScriptedGateway {
    steps: Vec<Step>,
    gate: Notify,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system_prompt: &str, _history: &[Message]) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut content = String::new();
        for step in &self.steps {
            match step {
                Step::Delta(delta) => content.push_str(delta),
                Step::Fail(body) => {
                    return Err(GatewayError::UpstreamError {
                        status: 500,
                        body: body.to_string(),
                    })
                }
                Step::Pause | Step::Done => {}
            }
        }
        if content.trim().is_empty() {
            return Err(GatewayError::EmptyCompletion);
        }
        Ok(content)
    }

    async fn complete_streaming(
        &self,
        _system_prompt: &str,
        _history: &[Message],
        conversation_id: i64,
        sink: &EnvelopeSink,
    ) -> Result<StreamedCompletion, StreamFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut acc = StreamAccumulator::new(conversation_id);

        for step in &self.steps {
            match step {
                Step::Delta(delta) => {
                    if acc.push(delta, sink).await.is_err() {
                        return Err(acc.fail(GatewayError::Cancelled));
                    }
                }
                Step::Pause => self.gate.notified().await,
                Step::Done => {
                    if acc.is_blank() {
                        return Err(acc.fail(GatewayError::EmptyCompletion));
                    }
                    if sink.emit(rolechat::models::stream::StreamEvent::Done).await.is_err() {
                        return Err(acc.fail(GatewayError::Cancelled));
                    }
                    return Ok(acc.finish(true));
                }
                Step::Fail(body) => {
                    return Err(acc.fail(GatewayError::UpstreamError {
                        status: 500,
                        body: body.to_string(),
                    }))
                }
            }
        }

        if acc.is_blank() {
            return Err(acc.fail(GatewayError::EmptyCompletion));
        }
        Ok(acc.finish(false))
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// App wired to a `ScriptedGateway`.
pub fn scripted_app(gateway: Arc<ScriptedGateway>) -> TestApp {
    build_app(test_config("http://127.0.0.1:9", &[]), gateway)
}
