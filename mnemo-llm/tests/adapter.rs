//! Default adapter against a mocked OpenAI-compatible server.

use std::sync::Arc;
use std::time::Duration;

use mnemo_llm::backend::{LlmBackend, OpenAiAdapter};
use mnemo_llm::config::{BackendConfig, ExtractionMode, RateLimitConfig};
use mnemo_llm::error::LlmError;
use mnemo_llm::ratelimit::RateLimiter;
use mnemo_llm::retry::RetryPolicy;
use mnemo_llm::shape::{Field, FieldKind, Schema, StructuredResult};
use mnemo_llm::types::CompletionRequest;
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }],
    })
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(2), Duration::from_millis(10), Duration::from_millis(50))
        .with_jitter(Duration::ZERO)
}

fn adapter_for(server: &MockServer, mode: ExtractionMode) -> OpenAiAdapter {
    let config = BackendConfig::new(format!("{}/v1", server.uri()), "ollama", "llama3.1:8b")
        .with_extraction_mode(mode);
    OpenAiAdapter::new(config)
        .expect("adapter")
        .with_limiter(Arc::new(RateLimiter::unlimited()))
        .with_policy(fast_policy())
}

fn answer_schema() -> Schema {
    Schema::object("Answer").field(Field::new("answer", FieldKind::Integer))
}

async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("recording enabled")
        .iter()
        .map(|r| r.body_json::<Value>().expect("json body"))
        .collect()
}

#[tokio::test]
async fn plain_text_sends_user_then_system() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer ollama"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("4")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let result = adapter
        .structured_completion(&CompletionRequest::new("What is 2+2?", "Answer briefly."))
        .await
        .expect("completion");
    assert_eq!(result, StructuredResult::Text("4".into()));

    let body = &bodies(&server).await[0];
    assert_eq!(body["model"], json!("llama3.1:8b"));
    assert_eq!(body["messages"][0], json!({ "role": "user", "content": "What is 2+2?" }));
    assert_eq!(body["messages"][1], json!({ "role": "system", "content": "Answer briefly." }));
    assert!(body.get("response_format").is_none());
}

#[tokio::test]
async fn invalid_reply_is_repaired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("{\"answer\": \"four\"}")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("{\"answer\": 4}")))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let request = CompletionRequest::new("What is 2+2?", "Answer.").with_shape(answer_schema());
    let result = adapter.structured_completion(&request).await.expect("repaired");
    assert_eq!(result, StructuredResult::Object(json!({ "answer": 4 })));

    let bodies = bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    let repair = bodies[1]["messages"].as_array().expect("messages");
    assert_eq!(repair.len(), 4);
    assert_eq!(repair[2]["role"], json!("assistant"));
    assert!(repair[3]["content"].as_str().expect("text").contains("$.answer"));
}

#[tokio::test]
async fn exhausted_repairs_are_a_contract_violation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("I cannot answer that.")))
        .expect(3)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server, ExtractionMode::MdJson);
    let request = CompletionRequest::new("q", "s").with_shape(answer_schema());
    let err = adapter.structured_completion(&request).await.expect_err("invalid");
    assert!(matches!(err, LlmError::ContractViolation(_)), "{err:?}");
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'llama3.1:8b' not found"))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let err = adapter
        .structured_completion(&CompletionRequest::new("q", "s"))
        .await
        .expect_err("404");
    assert!(matches!(err, LlmError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("ok")))
        .mount(&server)
        .await;

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let result = adapter
        .structured_completion(&CompletionRequest::new("q", "s"))
        .await
        .expect("retried");
    assert_eq!(result.as_text(), Some("ok"));
    assert_eq!(bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn transient_error_surfaces_after_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let policy = RetryPolicy::new(Duration::from_millis(200), Duration::from_millis(20), Duration::from_millis(40))
        .with_jitter(Duration::ZERO);
    let adapter = adapter_for(&server, ExtractionMode::JsonMode).with_policy(policy);
    let err = adapter
        .structured_completion(&CompletionRequest::new("q", "s"))
        .await
        .expect_err("still failing");
    assert!(matches!(err, LlmError::Server { status: 503, .. }), "{err:?}");
    assert!(bodies(&server).await.len() >= 2);
}

#[tokio::test]
async fn audio_transcription_posts_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(body_string_contains("whisper-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "hello world" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let clip = dir.path().join("clip.wav");
    std::fs::write(&clip, b"RIFF....WAVE").expect("write clip");

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let text = adapter.transcribe_audio(&clip).await.expect("transcript");
    assert_eq!(text, "hello world");

    let requests = server.received_requests().await.expect("recording enabled");
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"clip.wav\""));
    assert!(body.contains("name=\"language\""));
}

#[tokio::test]
async fn transcription_without_text_is_a_contract_violation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "segments": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let clip = dir.path().join("clip.mp3");
    std::fs::write(&clip, b"ID3").expect("write clip");

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let err = adapter.transcribe_audio(&clip).await.expect_err("no text");
    match err {
        LlmError::ContractViolation(msg) => assert_eq!(msg, "Transcription failed. No text returned."),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_audio_file_makes_no_requests() {
    let server = MockServer::start().await;
    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let err = adapter
        .transcribe_audio(std::path::Path::new("/no/such/clip.wav"))
        .await
        .expect_err("missing");
    assert!(matches!(err, LlmError::NotFound { .. }), "{err:?}");
    assert!(server.received_requests().await.expect("recording enabled").is_empty());
}

#[tokio::test]
async fn image_uses_primary_endpoint_without_vision_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("A cat on a sofa.")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("cat.jpg");
    std::fs::write(&image, [0xFF_u8, 0xD8, 0xFF]).expect("write image");

    let adapter = adapter_for(&server, ExtractionMode::JsonMode);
    let text = adapter.transcribe_image(&image).await.expect("description");
    assert_eq!(text, "A cat on a sofa.");

    let body = &bodies(&server).await[0];
    assert_eq!(body["model"], json!("llama3.1:8b"));
    assert_eq!(body["max_tokens"], json!(300));
    let parts = &body["messages"][0]["content"];
    assert_eq!(parts[0]["text"], json!("What's in this image?"));
    assert_eq!(parts[1]["image_url"]["url"], json!("data:image/jpeg;base64,/9j/"));
}

#[tokio::test]
async fn image_uses_vision_credentials_when_distinct() {
    let primary = MockServer::start().await;
    let vision = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-vision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("A diagram.")))
        .expect(1)
        .mount(&vision)
        .await;

    let config = BackendConfig::new(format!("{}/v1", primary.uri()), "ollama", "llama3.1:8b").with_vision(
        "openai/gpt-4o-mini",
        format!("{}/v1", vision.uri()),
        "sk-vision",
    );
    let adapter = OpenAiAdapter::new(config)
        .expect("adapter")
        .with_limiter(Arc::new(RateLimiter::unlimited()))
        .with_policy(fast_policy());

    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("diagram.jpg");
    std::fs::write(&image, b"jpeg").expect("write image");

    let text = adapter.transcribe_image(&image).await.expect("description");
    assert_eq!(text, "A diagram.");
    assert_eq!(bodies(&vision).await[0]["model"], json!("gpt-4o-mini"));
    assert!(primary.received_requests().await.expect("recording enabled").is_empty());
}

#[tokio::test]
async fn limiter_balances_across_concurrent_calls_and_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("fail"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("ok")))
        .mount(&server)
        .await;

    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        enabled: true,
        max_concurrent: 2,
        requests_per_interval: 1_000,
        interval_secs: 60,
    }));
    let adapter = Arc::new(adapter_for(&server, ExtractionMode::JsonMode).with_limiter(Arc::clone(&limiter)));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let adapter = Arc::clone(&adapter);
        tasks.spawn(async move {
            let input = if i % 3 == 0 { "please fail" } else { "please answer" };
            adapter.structured_completion(&CompletionRequest::new(input, "s")).await
        });
    }
    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.expect("task").is_err() {
            failures += 1;
        }
    }

    assert_eq!(failures, 3);
    let stats = limiter.stats();
    assert_eq!(stats.acquired, 8);
    assert_eq!(stats.released, 8);
    assert_eq!(stats.in_flight(), 0);
}
