use bytes::Bytes;
use memory_bridge::memory_api::mock::{MockMemoryService, MockReply, search_body};
use memory_bridge::{
    BridgeConfig, ExtensionRuntime, OutgoingRequest, PageSession, ProfileSettings,
    ServiceResponse, enrich,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const CHATGPT_URL: &str = "https://chatgpt.com/backend-api/f/conversation";
const CLAUDE_URL: &str = "https://claude.ai/api/organizations/org-1/chat_conversations/c-1/completion";

struct Harness {
    runtime: ExtensionRuntime,
    session: PageSession,
    mock: MockMemoryService,
}

// RUST_LOG=memory_bridge=debug shows the pipeline's logs in test output
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness(config: BridgeConfig, api_key: Option<&str>, memory_enabled: bool) -> Harness {
    init_tracing();
    let settings = ProfileSettings::in_memory();
    if let Some(key) = api_key {
        settings.set_api_key(key).await.unwrap();
    }
    settings.set_memory_enabled(memory_enabled).await.unwrap();

    let mock = MockMemoryService::new();
    let runtime = ExtensionRuntime::start(Arc::new(config), settings, Arc::new(mock.clone()));
    let session = PageSession::load(&runtime).unwrap();
    Harness {
        runtime,
        session,
        mock,
    }
}

fn quiet() -> BridgeConfig {
    BridgeConfig {
        offscreen_keepalive_ms: None,
        ..Default::default()
    }
}

fn chatgpt_body(text: &str) -> String {
    json!({
        "action": "next",
        "messages": [{
            "id": "m-1",
            "author": {"role": "user"},
            "content": {"content_type": "text", "parts": [text]}
        }],
        "model": "auto"
    })
    .to_string()
}

fn parts(body: &Bytes) -> Value {
    let payload: Value = serde_json::from_slice(body).unwrap();
    payload["messages"][0]["content"]["parts"].clone()
}

#[tokio::test]
async fn test_chatgpt_submission_is_enriched() {
    let h = harness(quiet(), Some("sk-live"), true).await;
    h.mock.push_search(MockReply::Respond(ServiceResponse::new(
        200,
        search_body(&[("A", 0.3), ("B", 0.9), ("C", 0.5)]),
    )));

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CHATGPT_URL, chatgpt_body("hello")))
        .await;

    assert_eq!(parts(out.body.as_ref().unwrap()), json!([enrich("- B\n- C\n- A", "hello")]));

    let calls = h.mock.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].api_key, "sk-live");
    assert_eq!(
        calls[0].body,
        json!({
            "query": "hello",
            "similarity_threshold": 0.8,
            "minimum_similarity_threshold": 0.5,
            "scope": "internal",
            "metadata": null
        })
    );
}

#[tokio::test]
async fn test_concurrent_identical_submissions_share_one_search() {
    let h = harness(quiet(), Some("sk-live"), true).await;
    h.mock.push_search(MockReply::Delayed(
        Duration::from_millis(100),
        ServiceResponse::new(200, search_body(&[("shared", 0.9)])),
    ));

    let first = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, r#"{"prompt":"same question"}"#));
    let second = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, r#"{"prompt":" same question "}"#));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(h.mock.search_calls().len(), 1);
    let first: Value = serde_json::from_slice(first.body.as_ref().unwrap()).unwrap();
    let second: Value = serde_json::from_slice(second.body.as_ref().unwrap()).unwrap();
    assert_eq!(first["prompt"], enrich("- shared", "same question"));
    assert_eq!(second["prompt"], enrich("- shared", " same question "));
    assert_eq!(h.session.bridge().pending_count(), 0);
}

#[tokio::test]
async fn test_toggle_off_forwards_original_bytes() {
    let h = harness(quiet(), Some("sk-live"), false).await;
    let raw = chatgpt_body("hello");

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CHATGPT_URL, raw.clone()))
        .await;

    assert_eq!(out.body.as_deref(), Some(raw.as_bytes()));
    assert!(h.mock.search_calls().is_empty());
    assert_eq!(h.runtime.connection_count(), 0);
}

#[tokio::test]
async fn test_toggle_can_be_flipped_mid_session() {
    let h = harness(quiet(), Some("sk-live"), false).await;
    h.mock.always_search(MockReply::Respond(ServiceResponse::new(
        200,
        search_body(&[("fact", 0.9)]),
    )));
    let mut events = h.session.bus().subscribe();

    h.session.set_memory_enabled(true).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        memory_bridge::PageMessage::MemoryToggle { enabled: true }
    );

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, r#"{"prompt":"hi"}"#))
        .await;
    let payload: Value = serde_json::from_slice(out.body.as_ref().unwrap()).unwrap();
    assert_eq!(payload["prompt"], enrich("- fact", "hi"));
}

#[tokio::test]
async fn test_empty_prompt_makes_no_calls() {
    let h = harness(quiet(), Some("sk-live"), true).await;
    let raw = chatgpt_body("   ");

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CHATGPT_URL, raw.clone()))
        .await;

    assert_eq!(out.body.as_deref(), Some(raw.as_bytes()));
    assert!(h.mock.search_calls().is_empty());
}

#[tokio::test]
async fn test_missing_credential_makes_no_calls() {
    let h = harness(quiet(), None, true).await;
    let raw = r#"{"prompt":"hello"}"#;

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, raw))
        .await;

    assert_eq!(out.body.as_deref(), Some(raw.as_bytes()));
    assert!(h.mock.search_calls().is_empty());
    assert_eq!(h.runtime.connection_count(), 0);
}

#[tokio::test]
async fn test_search_failure_forwards_original_bytes() {
    let h = harness(quiet(), Some("sk-live"), true).await;
    h.mock.push_search(MockReply::Respond(ServiceResponse::new(401, "bad key")));
    let raw = r#"{"prompt":"hello"}"#;

    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, raw))
        .await;

    assert_eq!(out.body.as_deref(), Some(raw.as_bytes()));
    assert_eq!(h.mock.search_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_context_falls_back_to_original_request() {
    let h = harness(quiet(), Some("sk-live"), true).await;
    h.mock.push_search(MockReply::Delayed(
        Duration::from_secs(600),
        ServiceResponse::new(200, search_body(&[("too late", 0.9)])),
    ));
    let raw = r#"{"prompt":"hello"}"#;

    let started = tokio::time::Instant::now();
    let out = h
        .session
        .intercept(OutgoingRequest::fetch("POST", CLAUDE_URL, raw))
        .await;

    assert_eq!(out.body.as_deref(), Some(raw.as_bytes()));
    assert!(started.elapsed() < Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_mid_flight_degrades_and_reconnects() {
    let config = BridgeConfig {
        offscreen_keepalive_ms: None,
        content_keepalive_ms: 3_600_000,
        ..Default::default()
    };
    let h = harness(config, Some("sk-live"), true).await;
    h.mock.push_search(MockReply::Delayed(
        Duration::from_secs(45),
        ServiceResponse::new(200, search_body(&[("lost", 0.9)])),
    ));
    h.mock.push_search(MockReply::Respond(ServiceResponse::new(
        200,
        search_body(&[("fresh", 0.9)]),
    )));

    let bridge = h.session.bridge();
    assert_eq!(bridge.request_context("first").await, "");
    assert_eq!(h.runtime.eviction_count(), 1);
    assert!(!h.runtime.is_worker_alive());

    assert_eq!(bridge.request_context("second").await, "- fresh");
    assert!(h.runtime.is_worker_alive());
    assert_eq!(h.runtime.start_count(), 2);
    assert_eq!(h.mock.search_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_prevent_eviction() {
    let config = BridgeConfig {
        offscreen_keepalive_ms: None,
        content_keepalive_ms: 20_000,
        ..Default::default()
    };
    let h = harness(config, Some("sk-live"), true).await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.runtime.is_worker_alive());
    assert_eq!(h.runtime.eviction_count(), 0);

    h.session.unload();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!h.runtime.is_worker_alive());
}
