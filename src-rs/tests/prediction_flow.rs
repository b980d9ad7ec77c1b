//! End-to-end: the relay server in front of a fake chat-completions upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use imagegen_relay::api::{build_router, AppState};
use imagegen_relay::{
    BackendConnector, CleanupScheduler, DeliveryMode, OpenAIAdapter, OpenAIConfig, Orchestrator, OrchestratorConfig,
    ProviderAdapter, ServerConfig, TaskStore,
};

const UPSTREAM_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Here is \"}}]}\n\n",
    ": keep-alive\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"![image](https://host/a.png)\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn spawn(app: Router) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let local = server.local_addr();
    tokio::spawn(server);
    local
}

fn streaming_upstream() -> Router {
    Router::new().route(
        "/chat/completions",
        post(|| async { ([(header::CONTENT_TYPE, "text/event-stream")], UPSTREAM_BODY) }),
    )
}

async fn spawn_relay(access_token: Option<&str>, delivery: DeliveryMode) -> SocketAddr {
    spawn_relay_with(streaming_upstream(), access_token, delivery).await
}

async fn spawn_relay_with(upstream: Router, access_token: Option<&str>, delivery: DeliveryMode) -> SocketAddr {
    let upstream = spawn(upstream).await;
    let config = ServerConfig {
        api_keys: vec!["sk-test".into()],
        upstream_base_url: format!("http://{}", upstream),
        store_url: "memory://".into(),
        access_token: access_token.map(str::to_string),
        delivery,
        ..ServerConfig::default()
    };

    let adapter = OpenAIAdapter::new(OpenAIConfig {
        api_keys: config.api_keys.clone(),
        base_url: config.upstream_base_url.clone(),
        model: config.model.clone(),
    })
    .unwrap();
    let provider: Arc<dyn ProviderAdapter> = Arc::new(adapter);
    let store = Arc::new(TaskStore::new(Arc::new(BackendConnector::from_url(&config.store_url))));
    let orchestrator = Orchestrator::new(
        store.clone(),
        Some(provider),
        OrchestratorConfig {
            generation_timeout: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        },
    );
    let state = AppState {
        cleanup: Arc::new(CleanupScheduler::new(store, config.cleanup_delay)),
        config: Arc::new(config),
        orchestrator,
    };
    spawn(build_router(state)).await
}

#[tokio::test]
async fn submit_then_poll_until_completed() {
    let relay = spawn_relay(None, DeliveryMode::Polling).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/predictions", relay))
        .json(&json!({"prompt": "red balloon"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["status"], "pending");
    let id = accepted["id"].as_str().unwrap().to_string();

    let mut task = Value::Null;
    for _ in 0..200 {
        let resp = client
            .get(format!("http://{}/predictions/{}", relay, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        task = resp.json().await.unwrap();
        if task["status"] == "completed" || task["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(task["status"], "completed");
    assert_eq!(task["prompt"], "red balloon");
    assert_eq!(task["content"], "Here is ![image](https://host/a.png)");
    assert_eq!(task["image_url"], "https://host/a.png");
    assert_eq!(task["finish_reason"], "stop");
    assert!(task["createdAt"].is_number());
}

#[tokio::test]
async fn direct_delivery_answers_with_the_finished_record() {
    let relay = spawn_relay(None, DeliveryMode::Direct).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/predictions", relay))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let task: Value = resp.json().await.unwrap();
    assert_eq!(task["status"], "completed");
    assert_eq!(task["prompt"], "Studio Ghibli style husky");
}

#[tokio::test]
async fn unknown_task_is_404_with_error_body() {
    let relay = spawn_relay(None, DeliveryMode::Polling).await;
    let resp = reqwest::get(format!("http://{}/predictions/does-not-exist", relay))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn access_token_guards_prediction_routes_only() {
    let relay = spawn_relay(Some("s3cret"), DeliveryMode::Polling).await;
    let client = reqwest::Client::new();

    let denied = client
        .post(format!("http://{}/predictions", relay))
        .json(&json!({"prompt": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let allowed = client
        .post(format!("http://{}/predictions", relay))
        .bearer_auth("s3cret")
        .json(&json!({"prompt": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status().as_u16(), 202);

    let health = client.get(format!("http://{}/health", relay)).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
}

async fn direct_failure(upstream: Router) -> Value {
    let relay = spawn_relay_with(upstream, None, DeliveryMode::Direct).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/predictions", relay))
        .json(&json!({"prompt": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn empty_upstream_error_body_records_the_status() {
    let upstream = Router::new().route("/chat/completions", post(|| async { StatusCode::BAD_GATEWAY }));
    let task = direct_failure(upstream).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["error"], "upstream returned HTTP 502");
}

#[tokio::test]
async fn json_upstream_error_body_records_its_message() {
    let upstream = Router::new().route(
        "/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(json!({"error": {"message": "invalid api key", "type": "auth"}})),
            )
        }),
    );
    let task = direct_failure(upstream).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["error"], "invalid api key");
}

#[tokio::test]
async fn malformed_body_is_a_json_400() {
    let relay = spawn_relay(None, DeliveryMode::Polling).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/predictions", relay))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{\"prompt\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let wrong_type = reqwest::Client::new()
        .post(format!("http://{}/predictions", relay))
        .json(&json!({"prompt": 42}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_type.status().as_u16(), 400);
    let body: Value = wrong_type.json().await.unwrap();
    assert!(body["error"].is_string());
}
