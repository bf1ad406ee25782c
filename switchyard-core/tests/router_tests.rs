//! Model selection observed at the provider boundary

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use switchyard_core::config::{load_from_str, ConfigFormat, GatewayConfig};
use switchyard_core::http::HttpDispatcher;
use switchyard_core::protocol::MessagesRequest;
use switchyard_core::router::CustomRouter;
use switchyard_core::{Gateway, GatewayResult};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(uri: &str) -> GatewayConfig {
    let yaml = format!(
        r#"
providers:
  - name: main
    base_url: {uri}/main
    api_key: sk-main
    models: [fast, big]
    transformer:
      use: [openai]
  - name: Alt
    base_url: {uri}/alt
    api_key: sk-alt
    models: [Turbo-1]
    transformer:
      use: [openai]
router:
  default: main,fast
  background: Alt,Turbo-1
  longContext: main,big
  longContextThreshold: 1000
"#
    );
    load_from_str(&yaml, ConfigFormat::Yaml).unwrap()
}

fn gateway(config: GatewayConfig) -> Gateway {
    let dispatcher = Arc::new(HttpDispatcher::new(&config.connection).unwrap());
    Gateway::new(config, dispatcher).unwrap()
}

fn completion() -> Value {
    json!({
        "id": "c",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1}
    })
}

async fn expect_model(server: &MockServer, route: &str, model: &str) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(body_partial_json(json!({"model": model})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion()))
        .expect(1)
        .mount(server)
        .await;
}

fn body(model: &str, text: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 16,
        "messages": [{"role": "user", "content": text}],
        "metadata": {"user_id": "user_x_account__session_sess-42"}
    })
}

#[tokio::test]
async fn test_explicit_model_is_canonicalized() {
    let server = MockServer::start().await;
    expect_model(&server, "/alt", "Turbo-1").await;

    gateway(config(&server.uri()))
        .handle("/v1/messages", body("alt,turbo-1", "hi"), &HeaderMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_haiku_routes_to_background() {
    let server = MockServer::start().await;
    expect_model(&server, "/alt", "Turbo-1").await;

    gateway(config(&server.uri()))
        .handle("/v1/messages", body("claude-3-5-haiku-latest", "hi"), &HeaderMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_long_prompt_routes_to_long_context() {
    let server = MockServer::start().await;
    expect_model(&server, "/main", "big").await;

    let long_text = "lorem ipsum dolor sit amet ".repeat(1000);
    gateway(config(&server.uri()))
        .handle("/v1/messages", body("claude-sonnet-4", &long_text), &HeaderMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_project_override_replaces_router() {
    let server = MockServer::start().await;
    expect_model(&server, "/alt", "Turbo-1").await;

    let projects = TempDir::new().unwrap();
    let overrides = TempDir::new().unwrap();
    fs::create_dir_all(projects.path().join("-home-dev-app")).unwrap();
    fs::write(projects.path().join("-home-dev-app").join("sess-42.jsonl"), "").unwrap();
    fs::create_dir_all(overrides.path().join("-home-dev-app")).unwrap();
    fs::write(
        overrides.path().join("-home-dev-app").join("config.json"),
        json!({"Router": {"default": "Alt,Turbo-1"}}).to_string(),
    )
    .unwrap();

    let mut config = config(&server.uri());
    config.projects_dir = Some(projects.path().to_path_buf());
    config.config_dir = Some(overrides.path().to_path_buf());

    gateway(config)
        .handle("/v1/messages", body("claude-sonnet-4", "hi"), &HeaderMap::new())
        .await
        .unwrap();
}

struct PinnedRouter;

#[async_trait]
impl CustomRouter for PinnedRouter {
    async fn route(
        &self,
        request: &MessagesRequest,
        _token_count: usize,
        config: &Value,
    ) -> GatewayResult<Option<String>> {
        assert_eq!(config["router"]["default"], "main,fast");
        Ok(request
            .model
            .starts_with("pin-")
            .then(|| "main,big".to_string()))
    }
}

#[tokio::test]
async fn test_custom_router_runs_first() {
    let server = MockServer::start().await;
    expect_model(&server, "/main", "big").await;

    gateway(config(&server.uri()))
        .with_custom_router(Arc::new(PinnedRouter))
        .handle("/v1/messages", body("pin-anything", "hi"), &HeaderMap::new())
        .await
        .unwrap();
}
