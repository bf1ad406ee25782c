//! HTTP routes exercised through the axum router

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use switchyard_core::config::{load_from_str, ConfigFormat};
use switchyard_core::server::build_router;
use switchyard_core::Gateway;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(uri: &str) -> Router {
    let yaml = format!(
        r#"
providers:
  - name: deepseek
    base_url: {uri}/chat/completions
    api_key: sk-deepseek-secret
    models: [deepseek-chat]
    transformer:
      use: [openai]
router:
  default: deepseek,deepseek-chat
"#
    );
    let config = load_from_str(&yaml, ConfigFormat::Yaml).unwrap();
    build_router(Arc::new(Gateway::from_config(config).unwrap()))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_root_and_health() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = send(&app, request(Method::GET, "/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "LLMs API");
    assert_eq!(body["version"], switchyard_core::version());

    let (status, body) = send(&app, request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_chat_completions_endpoint_proxies() {
    let server = MockServer::start().await;
    let completion = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}]
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(&server.uri());
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/v1/chat/completions",
            Some(json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "ping"}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, completion);
}

#[tokio::test]
async fn test_upstream_status_is_propagated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let app = app(&server.uri());
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/v1/messages",
            Some(json!({"model": "x", "max_tokens": 5, "messages": [{"role": "user", "content": "hi"}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "provider_response_error");
    assert_eq!(body["error"]["type"], "api_error");
}

#[tokio::test]
async fn test_malformed_json_is_invalid_request() {
    let app = app("http://127.0.0.1:9");
    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/messages")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_count_tokens_route() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/v1/messages/count_tokens",
            Some(json!({"model": "deepseek,deepseek-chat", "messages": [{"role": "user", "content": "hello world"}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tokenizer"], "tiktoken-cl100k_base");
    assert!(body["input_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_transformer_and_config_views() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = send(&app, request(Method::GET, "/api/transformers", None)).await;
    assert_eq!(status, StatusCode::OK);
    let endpoints: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["endpoint"].as_str())
        .collect();
    assert!(endpoints.contains(&"/v1/messages"));
    assert!(endpoints.contains(&"/v1/responses"));

    let (status, body) = send(&app, request(Method::GET, "/api/config", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["router"]["default"], "deepseek,deepseek-chat");
    assert_ne!(body["providers"][0]["api_key"], "sk-deepseek-secret");
}

#[tokio::test]
async fn test_provider_lifecycle() {
    let app = app("http://127.0.0.1:9");
    let provider = json!({
        "name": "openrouter",
        "base_url": "https://openrouter.ai/api/v1/chat/completions",
        "api_key": "sk-or-v1-abcdef123456",
        "models": ["google/gemini-2.5-pro"],
        "transformer": {"use": ["openai"]}
    });

    let (status, body) = send(&app, request(Method::POST, "/providers", Some(provider.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "openrouter");
    assert_ne!(body["api_key"], "sk-or-v1-abcdef123456");

    let (status, body) = send(&app, request(Method::POST, "/providers", Some(provider))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "provider_exists");

    let (_, body) = send(&app, request(Method::GET, "/providers", None)).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        request(
            Method::PUT,
            "/providers/openrouter",
            Some(json!({"models": ["anthropic/claude-sonnet-4"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"], json!(["anthropic/claude-sonnet-4"]));

    let (status, body) = send(
        &app,
        request(Method::PATCH, "/providers/openrouter/toggle", Some(json!({"enabled": false}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Provider disabled successfully");

    let (_, body) = send(&app, request(Method::GET, "/providers/openrouter", None)).await;
    assert_eq!(body["enabled"], false);

    let (status, body) = send(&app, request(Method::DELETE, "/providers/openrouter", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Provider deleted successfully");

    let (status, body) = send(&app, request(Method::GET, "/providers/openrouter", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "provider_not_found");
}

#[tokio::test]
async fn test_provider_with_unknown_transformer_is_rejected() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/providers",
            Some(json!({
                "name": "odd",
                "base_url": "https://odd.example.com/v1",
                "api_key": "k",
                "models": ["m"],
                "transformer": {"use": ["does-not-exist"]}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}
