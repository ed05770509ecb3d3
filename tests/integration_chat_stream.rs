mod common;

use axum::http::{Method, StatusCode};
use common::{scripted_app, sse_data, ScriptedGateway, Step};
use serde_json::{json, Value};

use rolechat::{
    cache::KvStore,
    models::{message::MessageRole, stream::StreamEvent},
    repositories::ConversationStore,
    services::chat::{Submission, FALLBACK_REPLY, INTERRUPTED_MARKER},
};

fn envelopes(events: &[String]) -> Vec<Value> {
    events
        .iter()
        .filter(|e| *e != "[DONE]")
        .map(|e| serde_json::from_str(e).unwrap())
        .collect()
}

async fn stream(app: &common::TestApp, token: &str, conversation_id: i64, content: &str) -> Vec<String> {
    let res = app
        .request(
            Method::POST,
            &format!("/api/v1/conversations/{}/messages/stream", conversation_id),
            Some(token),
            Some(json!({ "content": content })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    sse_data(&res.text())
}

#[tokio::test]
async fn upstream_failure_mid_stream_sends_fallback_once() {
    let gateway = ScriptedGateway::new(vec![Step::Delta("Hel"), Step::Fail("boom")]);
    let app = scripted_app(gateway.clone());
    let (token, _) = app.register("ivan").await;
    let conversation_id = app.start_conversation(&token, 1).await;

    let events = stream(&app, &token, conversation_id, "hi").await;
    assert!(!events.iter().any(|e| e == "[DONE]"));

    let envelopes = envelopes(&events);
    let contents: Vec<&str> = envelopes
        .iter()
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["hi", "Hel", FALLBACK_REPLY]);

    let messages = app.wait_for_messages(conversation_id, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, FALLBACK_REPLY);
    assert_eq!(envelopes[2]["id"], messages[1].id);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn empty_stream_is_replaced_by_fallback() {
    let gateway = ScriptedGateway::new(vec![Step::Done]);
    let app = scripted_app(gateway);
    let (token, _) = app.register("judy").await;
    let conversation_id = app.start_conversation(&token, 2).await;

    let events = stream(&app, &token, conversation_id, "anything?").await;
    let envelopes = envelopes(&events);
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[1]["content"], FALLBACK_REPLY);

    let messages = app.wait_for_messages(conversation_id, 2).await;
    assert_eq!(messages[1].content, FALLBACK_REPLY);
}

#[tokio::test]
async fn whitespace_only_stream_is_replaced_by_fallback() {
    let gateway = ScriptedGateway::new(vec![Step::Delta("  "), Step::Delta("\n"), Step::Done]);
    let app = scripted_app(gateway);
    let (token, _) = app.register("jules").await;
    let conversation_id = app.start_conversation(&token, 1).await;

    let events = stream(&app, &token, conversation_id, "say nothing").await;
    assert!(!events.iter().any(|e| e == "[DONE]"));
    assert_eq!(envelopes(&events).last().unwrap()["content"], FALLBACK_REPLY);

    let messages = app.wait_for_messages(conversation_id, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, FALLBACK_REPLY);
}

#[tokio::test]
async fn stream_without_terminal_flag_still_ends_with_done() {
    let gateway = ScriptedGateway::new(vec![Step::Delta("To be"), Step::Delta(" or not")]);
    let app = scripted_app(gateway);
    let (token, _) = app.register("ken").await;
    let conversation_id = app.start_conversation(&token, 1).await;

    let events = stream(&app, &token, conversation_id, "quote?").await;
    assert_eq!(events.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(events.iter().filter(|e| *e == "[DONE]").count(), 1);

    let last = envelopes(&events).pop().unwrap();
    let messages = app.wait_for_messages(conversation_id, 2).await;
    assert_eq!(last["content"], "To be or not");
    assert_eq!(messages[1].content, "To be or not");
}

#[tokio::test]
async fn disconnect_keeps_partial_reply_with_marker() {
    let gateway = ScriptedGateway::new(vec![
        Step::Delta("Once upon"),
        Step::Pause,
        Step::Delta(" a time"),
        Step::Done,
    ]);
    let app = scripted_app(gateway.clone());
    let (_, user_id) = app.register("lena").await;

    let conversation = app
        .state
        .db
        .create_conversation(
            user_id,
            &app.state.characters.get(3).await.unwrap(),
            "Chat with Holmes",
        )
        .await
        .unwrap();

    let mut rx = app
        .state
        .chat
        .stream_message(
            user_id,
            conversation.id,
            Submission {
                content: "tell me a story".to_string(),
                audio_url: None,
            },
        )
        .await
        .unwrap();

    match rx.recv().await {
        Some(StreamEvent::Message(envelope)) => assert_eq!(envelope.role, MessageRole::User),
        other => panic!("expected user envelope, got {other:?}"),
    }
    match rx.recv().await {
        Some(StreamEvent::Message(envelope)) => assert_eq!(envelope.content, "Once upon"),
        other => panic!("expected first delta, got {other:?}"),
    }

    drop(rx);
    gateway.release();

    let messages = app.wait_for_messages(conversation.id, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1].content,
        format!("Once upon\n\n{}", INTERRUPTED_MARKER)
    );
}

#[tokio::test]
async fn failed_model_call_still_answers_non_streaming() {
    let gateway = ScriptedGateway::new(vec![Step::Fail("down")]);
    let app = scripted_app(gateway);
    let (token, _) = app.register("mona").await;
    let conversation_id = app.start_conversation(&token, 1).await;

    let res = app
        .request(
            Method::POST,
            &format!("/api/v1/conversations/{}/messages", conversation_id),
            Some(&token),
            Some(json!({ "content": "hello?" })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["ai_message"]["content"], FALLBACK_REPLY);

    // Fallbacks are never cached.
    assert_eq!(app.kv.delete_pattern("ai_response:*").await.unwrap(), 0);
}
