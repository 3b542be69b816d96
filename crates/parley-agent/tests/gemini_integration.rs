//! Gemini backend against a mock `generateContent` endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use parley_agent::{ChatBackend, ChatResponse, GeminiBackend, ModelConfig};
use parley_core::{ContentPart, ParleyError, Turn};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> GeminiBackend {
    GeminiBackend::new(ModelConfig {
        model_id: "gemini-test".into(),
        api_key: "test-key".into(),
        api_base_url: Some(server.uri()),
        ..ModelConfig::default()
    })
}

fn history() -> Vec<Turn> {
    vec![Turn::user_text("You are Parley."), Turn::model_text("Hello!")]
}

#[tokio::test]
async fn test_text_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi, how can I help?"}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .chat_turn(&history(), &[ContentPart::text("Hello")])
        .await
        .unwrap();
    assert_eq!(response, ChatResponse::Text("Hi, how can I help?".into()));
}

#[tokio::test]
async fn test_request_carries_history_then_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "A cat."}]}}]
        })))
        .mount(&server)
        .await;

    let prompt = vec![
        ContentPart::text("(current time: now)\nUser message (with image):\nwhat is this"),
        ContentPart::image(vec![0xff, 0xd8], "image/jpeg"),
    ];
    backend(&server).chat_turn(&history(), &prompt).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["parts"][0]["text"], "You are Parley.");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["role"], "user");
    assert!(contents[2]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .ends_with("what is this"));
    assert_eq!(contents[2]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");

    let categories: Vec<&str> = body["safetySettings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["category"].as_str().unwrap())
        .collect();
    assert_eq!(
        categories,
        vec![
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
    );
    assert!(body["safetySettings"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
}

#[tokio::test]
async fn test_blocked_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {
                "blockReason": "SAFETY",
                "safetyRatings": [
                    {"category": "HARM_CATEGORY_HATE_SPEECH", "probability": "HIGH", "blocked": true}
                ]
            }
        })))
        .mount(&server)
        .await;

    let response = backend(&server)
        .chat_turn(&history(), &[ContentPart::text("something nasty")])
        .await
        .unwrap();
    match response {
        ChatResponse::Blocked {
            reason,
            safety_ratings,
        } => {
            assert_eq!(reason.as_deref(), Some("SAFETY"));
            assert_eq!(safety_ratings[0].category, "HARM_CATEGORY_HATE_SPEECH");
        }
        other => panic!("expected Blocked, got {other:?}"),
    }
}

#[tokio::test]
async fn test_api_error_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .chat_turn(&history(), &[ContentPart::text("Hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::Backend(_)));
    assert!(err.to_string().contains("API key not valid."));
}

#[tokio::test]
async fn test_empty_body_is_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let response = backend(&server)
        .chat_turn(&history(), &[ContentPart::text("Hello")])
        .await
        .unwrap();
    assert_eq!(response, ChatResponse::Missing);
}
