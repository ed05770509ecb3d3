mod common;

use chrono::Utc;
use common::{chat_reply, ndjson_chunk};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rolechat::{
    models::{
        message::{Message, MessageRole},
        stream::{EnvelopeSink, StreamEvent},
    },
    services::gateway::{GatewayError, ModelGateway, OllamaGateway},
};

fn gateway(base_url: &str) -> OllamaGateway {
    OllamaGateway::new(
        base_url,
        "llama2",
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn history() -> Vec<Message> {
    vec![Message {
        id: 1,
        conversation_id: 7,
        role: MessageRole::User,
        content: "hello".to_string(),
        audio_url: None,
        created_at: Utc::now(),
    }]
}

fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn contents(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message(envelope) => Some(envelope.content.clone()),
            StreamEvent::Done => None,
        })
        .collect()
}

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama2", "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn complete_sends_system_prompt_and_returns_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama2",
            "stream": false,
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "hello" },
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Hi.")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = gateway(&server.uri())
        .complete("Be brief.", &history())
        .await
        .unwrap();
    assert_eq!(reply, "Hi.");
}

#[tokio::test]
async fn complete_maps_upstream_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let err = gateway(&server.uri()).complete("", &history()).await.unwrap_err();
    match err {
        GatewayError::UpstreamError { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn complete_rejects_malformed_and_empty_replies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  ")))
        .mount(&server)
        .await;

    let gateway = gateway(&server.uri());
    assert!(matches!(
        gateway.complete("", &history()).await,
        Err(GatewayError::UpstreamDecode(_))
    ));
    assert!(matches!(
        gateway.complete("", &history()).await,
        Err(GatewayError::EmptyCompletion)
    ));
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let gateway = gateway("http://127.0.0.1:9");
    assert!(matches!(
        gateway.complete("", &history()).await,
        Err(GatewayError::UpstreamUnavailable(_))
    ));
    assert!(!gateway.ping().await);
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_reply("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let gateway = OllamaGateway::new(
        &server.uri(),
        "llama2",
        Duration::from_millis(200),
        Duration::from_millis(200),
    )
    .unwrap();
    assert!(matches!(
        gateway.complete("", &history()).await,
        Err(GatewayError::UpstreamUnavailable(_))
    ));
}

#[tokio::test]
async fn stream_pushes_cumulative_envelopes_then_done() {
    let server = MockServer::start().await;
    let body = [
        ndjson_chunk("Hel", false),
        "this is not json\n".to_string(),
        "\n".to_string(),
        ndjson_chunk("lo", false),
        ndjson_chunk("", true),
    ]
    .concat();
    mount_stream(&server, body).await;

    let (sink, rx) = EnvelopeSink::channel(32);
    let completion = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap();
    assert_eq!(completion.content, "Hello");
    assert!(completion.finished);

    let events = drain(rx);
    assert_eq!(contents(&events), ["Hel", "Hello"]);
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    let ids: Vec<i64> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message(envelope) => {
                assert_eq!(envelope.conversation_id, 7);
                assert_eq!(envelope.role, MessageRole::Assistant);
                Some(envelope.id)
            }
            StreamEvent::Done => None,
        })
        .collect();
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn stream_without_terminal_flag_completes_unfinished() {
    let server = MockServer::start().await;
    // Last line has no trailing newline.
    let body = format!("{}{}", ndjson_chunk("partial", false), ndjson_chunk(" end", false).trim_end());
    mount_stream(&server, body).await;

    let (sink, rx) = EnvelopeSink::channel(32);
    let completion = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap();
    assert_eq!(completion.content, "partial end");
    assert!(!completion.finished);

    let events = drain(rx);
    assert!(!events.contains(&StreamEvent::Done));
    assert_eq!(contents(&events), ["partial", "partial end"]);
}

#[tokio::test]
async fn stream_with_no_content_is_empty_completion() {
    let server = MockServer::start().await;
    mount_stream(&server, ndjson_chunk("", true)).await;

    let (sink, rx) = EnvelopeSink::channel(32);
    let failure = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, GatewayError::EmptyCompletion));
    assert!(drain(rx).is_empty());
}

#[tokio::test]
async fn whitespace_only_stream_is_empty_completion() {
    let server = MockServer::start().await;
    let body = [ndjson_chunk("  ", false), ndjson_chunk("\n", false), ndjson_chunk("", true)].concat();
    mount_stream(&server, body).await;

    let (sink, _rx) = EnvelopeSink::channel(32);
    let failure = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, GatewayError::EmptyCompletion));
}

#[tokio::test]
async fn stream_error_line_keeps_partial_text() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}\n",
        ndjson_chunk("Half a", false),
        json!({ "error": "out of memory" })
    );
    mount_stream(&server, body).await;

    let (sink, _rx) = EnvelopeSink::channel(32);
    let failure = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap_err();
    assert_eq!(failure.partial, "Half a");
    assert!(matches!(
        failure.error,
        GatewayError::UpstreamError { status: 200, .. }
    ));
}

#[tokio::test]
async fn stream_stops_when_client_is_gone() {
    let server = MockServer::start().await;
    let body = [ndjson_chunk("never", false), ndjson_chunk(" seen", true)].concat();
    mount_stream(&server, body).await;

    let (sink, rx) = EnvelopeSink::channel(32);
    drop(rx);
    let failure = gateway(&server.uri())
        .complete_streaming("", &history(), 7, &sink)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, GatewayError::Cancelled));
}

#[tokio::test]
async fn ping_checks_model_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(gateway(&server.uri()).ping().await);
}
