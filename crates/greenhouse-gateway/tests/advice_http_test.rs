use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use greenhouse_advisor::{LlmProvider, LlmRequest, LlmStream, LlmStreamResponse, OpenAiProvider};
use greenhouse_common::{Error, NewReading, Reading, Result};
use greenhouse_config::AppConfig;
use greenhouse_db::{ControlStore, ReadingSource, ReadingStore, UserStore};
use greenhouse_gateway::{AppState, SharedState, build_router, hash_password};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

struct BrokenSource;

#[async_trait]
impl ReadingSource for BrokenSource {
    async fn fetch_readings_since(&self, _since: DateTime<Utc>) -> Result<Vec<Reading>> {
        Err(Error::Database("disk I/O error".into()))
    }

    async fn fetch_readings(&self) -> Result<Vec<Reading>> {
        Err(Error::Database("disk I/O error".into()))
    }

    async fn create_reading(&self, _reading: NewReading) -> Result<Reading> {
        Err(Error::Database("disk I/O error".into()))
    }
}

/// Reading source whose store call panics, taking the producer task down.
struct PanickingSource;

#[async_trait]
impl ReadingSource for PanickingSource {
    async fn fetch_readings_since(&self, _since: DateTime<Utc>) -> Result<Vec<Reading>> {
        panic!("reading store crashed");
    }

    async fn fetch_readings(&self) -> Result<Vec<Reading>> {
        Ok(Vec::new())
    }

    async fn create_reading(&self, _reading: NewReading) -> Result<Reading> {
        Err(Error::Database("read-only".into()))
    }
}

/// Marks the upstream handle as released when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Upstream that sends one delta and then never finishes.
struct StallingProvider {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl LlmProvider for StallingProvider {
    fn provider_id(&self) -> &str {
        "stalling"
    }

    async fn complete_stream(&self, _request: &LlmRequest) -> Result<LlmStream> {
        let guard = DropFlag(self.released.clone());
        let first = LlmStreamResponse {
            delta: "Keep ".into(),
            stop_reason: None,
        };
        let items = stream::iter([Ok(first)]).chain(stream::pending());
        Ok(Box::pin(items.map(move |item| {
            let _held = &guard;
            item
        })))
    }
}

async fn spawn_app(
    config: AppConfig,
    readings: Arc<dyn ReadingSource>,
    provider: Arc<dyn LlmProvider>,
) -> (SocketAddr, SharedState) {
    let controls = Arc::new(ControlStore::in_memory().unwrap());
    let users = Arc::new(UserStore::in_memory().unwrap());
    let state = AppState::new(config, readings, controls, users, provider)
        .unwrap()
        .shared();
    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn spawn_gateway(
    config: AppConfig,
    readings: Arc<dyn ReadingSource>,
    llm_uri: String,
) -> SocketAddr {
    let provider = Arc::new(OpenAiProvider::new("test-key".to_string(), Some(llm_uri)));
    spawn_app(config, readings, provider).await.0
}

async fn wait_until(flag: &AtomicBool) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

async fn seed_user(state: &SharedState, username: &str, password: &str) {
    let hash = hash_password(password.to_string(), 4).await.unwrap();
    state.users.upsert_user(username, &hash).await.unwrap();
}

async fn login(addr: SocketAddr, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/login"))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await
        .unwrap()
}

async fn seeded_store() -> Arc<ReadingStore> {
    let store = ReadingStore::in_memory().unwrap();
    let now = Utc::now();
    store
        .insert_reading(&Reading::new("temperature", 21.5, now - chrono::Duration::minutes(5)))
        .unwrap();
    store
        .insert_reading(&Reading::new("soil", 310.0, now - chrono::Duration::minutes(3)))
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_plant_advice_streams_text_for_default_plant() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Plant: strawberry"))
        .and(body_string_contains("- temperature: 21.5"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&["Keep ", "soil moist."])),
        )
        .expect(1)
        .mount(&llm)
        .await;

    let addr = spawn_gateway(AppConfig::default(), seeded_store().await, llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(String::from_utf8(body).unwrap(), "Keep soil moist.");
}

#[tokio::test]
async fn test_plant_advice_uses_requested_plant() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Plant: basil"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Pinch the tips."])))
        .expect(1)
        .mount(&llm)
        .await;

    let addr = spawn_gateway(
        AppConfig::default(),
        Arc::new(ReadingStore::in_memory().unwrap()),
        llm.uri(),
    )
    .await;

    let text = reqwest::get(format!("http://{addr}/api/llm/plant-advice?plant=basil"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "Pinch the tips.");
}

#[tokio::test]
async fn test_upstream_rejection_is_bad_gateway_before_any_text() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&llm)
        .await;

    let addr = spawn_gateway(AppConfig::default(), seeded_store().await, llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid api key"));
}

#[tokio::test]
async fn test_source_failure_never_reaches_upstream() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["unused"])))
        .expect(0)
        .mount(&llm)
        .await;

    let addr = spawn_gateway(AppConfig::default(), Arc::new(BrokenSource), llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("disk I/O error"));
}

#[tokio::test]
async fn test_slow_upstream_hits_deadline() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(&["too late"]))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&llm)
        .await;

    let mut config = AppConfig::default();
    config.advice.deadline_secs = 1;
    let addr = spawn_gateway(config, seeded_store().await, llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn test_truncated_upstream_cuts_the_body_after_partial_text() {
    let llm = MockServer::start().await;
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Water \"}}]}\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&llm)
        .await;

    let addr = spawn_gateway(AppConfig::default(), seeded_store().await, llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut received = Vec::new();
    let mut failed = false;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => received.extend_from_slice(&bytes),
            Err(_) => {
                failed = true;
                break;
            }
        }
    }
    assert_eq!(String::from_utf8(received).unwrap(), "Water ");
    assert!(failed, "an interrupted advice body must not end cleanly");
}

#[tokio::test]
async fn test_health_endpoints() {
    let addr = spawn_gateway(
        AppConfig::default(),
        Arc::new(ReadingStore::in_memory().unwrap()),
        "http://127.0.0.1:9".to_string(),
    )
    .await;
    let client = reqwest::Client::new();

    let text = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "OK");

    for route in ["/api/health", "/api/hello"] {
        let response = client
            .head(format!("http://{addr}{route}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "HEAD {route}");
    }
}

#[tokio::test]
async fn test_readings_create_then_list() {
    let addr = spawn_gateway(
        AppConfig::default(),
        Arc::new(ReadingStore::in_memory().unwrap()),
        "http://127.0.0.1:9".to_string(),
    )
    .await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("http://{addr}/api/readings"))
        .json(&json!({"temperature": 23.4, "humidity": 0, "soilMoisture": 415}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let data = created["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["type"], "sensor-reading");
    assert_eq!(data[0]["attributes"]["type"], "temperature");
    assert_eq!(data[1]["attributes"]["type"], "soil");
    assert_eq!(data[1]["attributes"]["value"], 415.0);

    let listed: Value = client
        .get(format!("http://{addr}/api/readings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_control_validation_and_upsert() {
    let provider = Arc::new(OpenAiProvider::new("test-key".into(), None));
    let (addr, state) = spawn_app(
        AppConfig::default(),
        Arc::new(ReadingStore::in_memory().unwrap()),
        provider,
    )
    .await;
    seed_user(&state, "grower", "s3cret").await;
    let session: Value = login(addr, "grower", "s3cret").await.json().await.unwrap();
    let token = session["access_token"].as_str().unwrap().to_string();

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/control");

    let rejected = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"sensor_type": "fan", "mode": "turbo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], "sensor_type and valid mode required");

    let accepted = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"sensor_type": "fan", "mode": "manual", "manual_int_value": 200}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);

    client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"sensor_type": "pump", "mode": "automatic", "manual_bool_value": true}))
        .send()
        .await
        .unwrap();

    let map: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(map["fan_mode"], "manual");
    assert_eq!(map["fan"], 200);
    assert_eq!(map["pump_mode"], "automatic");
    assert_eq!(map["pump"], true);
}

#[tokio::test]
async fn test_thresholds_come_from_config() {
    let mut config = AppConfig::default();
    config.thresholds.temp_max = 28;
    let addr = spawn_gateway(
        config,
        Arc::new(ReadingStore::in_memory().unwrap()),
        "http://127.0.0.1:9".to_string(),
    )
    .await;

    let body: Value = reqwest::get(format!("http://{addr}/api/thresholds"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!({
            "light_min": 100, "light_max": 800,
            "soil_min": 200, "soil_max": 600,
            "temp_min": 15, "temp_max": 28
        })
    );
}

#[tokio::test]
async fn test_login_guards_control_changes() {
    let provider = Arc::new(OpenAiProvider::new("test-key".into(), None));
    let (addr, state) = spawn_app(
        AppConfig::default(),
        Arc::new(ReadingStore::in_memory().unwrap()),
        provider,
    )
    .await;
    seed_user(&state, "grower", "s3cret").await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/control");
    let fan = json!({"sensor_type": "fan", "mode": "manual", "manual_int_value": 90});

    let wrong = login(addr, "grower", "guess").await;
    assert_eq!(wrong.status(), 401);
    let body: Value = wrong.json().await.unwrap();
    assert_eq!(body["error"], "Invalid username or password");
    assert_eq!(login(addr, "nobody", "s3cret").await.status(), 401);

    let malformed = client
        .post(format!("http://{addr}/api/login"))
        .header("content-type", "application/json")
        .body("{\"username\":")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
    let body: Value = malformed.json().await.unwrap();
    assert_eq!(body["error"], "Invalid request");

    let anonymous = client.post(&url).json(&fan).send().await.unwrap();
    assert_eq!(anonymous.status(), 401);
    let forged = client
        .post(&url)
        .bearer_auth("eyJhbGciOiJIUzI1NiJ9.e30.c2lnbmF0dXJl")
        .json(&fan)
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), 401);

    let ok = login(addr, "grower", "s3cret").await;
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    let token = body["access_token"].as_str().unwrap();
    let claims = state.tokens.verify(token).unwrap();
    assert_eq!(claims.username, "grower");

    let accepted = client
        .post(&url)
        .bearer_auth(token)
        .json(&fan)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);
    let map: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(map["fan"], 90);
}

#[tokio::test]
async fn test_out_of_range_lookback_is_a_server_error() {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["unused"])))
        .expect(0)
        .mount(&llm)
        .await;

    let mut config = AppConfig::default();
    config.advice.lookback_secs = 10_000_000_000_000;
    let addr = spawn_gateway(config, seeded_store().await, llm.uri()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("look-back"));
}

#[tokio::test]
async fn test_out_of_range_deadline_is_a_server_error() {
    let mut config = AppConfig::default();
    config.advice.deadline_secs = u64::MAX;
    let addr = spawn_gateway(config, seeded_store().await, "http://127.0.0.1:9".into()).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("deadline"));
}

#[tokio::test]
async fn test_crashed_producer_is_a_server_error_not_an_empty_ok() {
    let addr = spawn_gateway(
        AppConfig::default(),
        Arc::new(PanickingSource),
        "http://127.0.0.1:9".into(),
    )
    .await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("without closing"));
}

#[tokio::test]
async fn test_dropping_the_response_releases_upstream() {
    let released = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(StallingProvider {
        released: released.clone(),
    });
    let (addr, _state) = spawn_app(AppConfig::default(), seeded_store().await, provider).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"Keep ");
    assert!(!released.load(Ordering::SeqCst));

    drop(body);
    assert!(
        wait_until(&released).await,
        "upstream stream still held after the client went away"
    );
}

#[tokio::test]
async fn test_deadline_after_first_bytes_keeps_status_and_partial_body() {
    let released = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(StallingProvider {
        released: released.clone(),
    });
    let mut config = AppConfig::default();
    config.advice.deadline_secs = 1;
    let (addr, _state) = spawn_app(config, seeded_store().await, provider).await;

    let response = reqwest::get(format!("http://{addr}/api/llm/plant-advice"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut received = Vec::new();
    let mut failed = false;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => received.extend_from_slice(&bytes),
            Err(_) => {
                failed = true;
                break;
            }
        }
    }
    assert_eq!(String::from_utf8(received).unwrap(), "Keep ");
    assert!(failed, "a body cut off by the deadline must not end cleanly");
    assert!(wait_until(&released).await);
}
