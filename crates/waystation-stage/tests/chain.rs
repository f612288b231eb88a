//! End-to-end tests against real stage servers on ephemeral ports.

use serde_json::{json, Value};
use tokio::net::TcpListener;
use waystation_stage::{stage_for, StageConfig, StageHandler, StageKind, StageServer};
use waystation_telemetry::{stage_tracer, TraceFlusher, TracedClient};

/// Starts `kind` with no delay and tracing disabled; returns its base URL.
async fn spawn_stage(kind: StageKind) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = StageConfig::for_stage(kind);
    let handler = StageHandler::new(
        stage_for(kind),
        stage_tracer(None, "waystation-chain-test"),
        TraceFlusher::disabled(),
    );
    let server = StageServer::new(&config, handler).unwrap();
    tokio::spawn(server.serve(listener));

    format!("http://{addr}")
}

async fn post(url: &str, body: &Value) -> (u16, Value) {
    let response = TracedClient::new().post_json(url, body).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn validate_accepts_text() {
    let url = spawn_stage(StageKind::Validate).await;
    let (status, body) = post(&format!("{url}/"), &json!({"text": "hello"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["text"], "hello");
    assert_eq!(body["payload"]["data"], "hello");
    assert_eq!(body["payload"]["type"], "text");

    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["service"], "validator");
    assert_eq!(steps[0]["status"], "ok");
}

#[tokio::test]
async fn validate_rejects_empty_text() {
    let url = spawn_stage(StageKind::Validate).await;
    let (status, body) = post(&format!("{url}/"), &json!({"text": ""})).await;

    assert_eq!(status, 400);
    assert_eq!(body["detail"], "Input must be non-empty");
}

#[tokio::test]
async fn validate_length_bound() {
    let url = spawn_stage(StageKind::Validate).await;

    let (status, _) = post(&format!("{url}/"), &json!({"text": "a".repeat(10_000)})).await;
    assert_eq!(status, 200);

    let (status, body) = post(&format!("{url}/"), &json!({"text": "a".repeat(10_001)})).await;
    assert_eq!(status, 400);
    assert_eq!(body["detail"], "Text length must be <= 10000");
}

#[tokio::test]
async fn transform_uppercases_envelope_data() {
    let url = spawn_stage(StageKind::Transform).await;
    let (status, body) = post(&format!("{url}/"), &json!({"payload": {"data": "abc"}})).await;

    assert_eq!(status, 200);
    assert_eq!(body["payload"]["data"], "ABC");
    assert_eq!(body["text"], "ABC");
}

#[tokio::test]
async fn enrich_adds_timestamp_and_id() {
    let url = spawn_stage(StageKind::Enrich).await;
    let input = json!({"payload": {"data": "x", "metadata": {"origin": "gateway"}}});
    let (status, body) = post(&format!("{url}/"), &input).await;

    assert_eq!(status, 200);
    let metadata = body["payload"]["metadata"].as_object().unwrap();
    assert!(metadata.contains_key("timestamp"));
    assert!(metadata.contains_key("id"));
    assert_eq!(metadata["origin"], "gateway");
    assert_eq!(body["steps"][0]["metadata"]["id"], metadata["id"]);
}

#[tokio::test]
async fn full_chain_builds_ordered_ledger() {
    let validate = spawn_stage(StageKind::Validate).await;
    let transform = spawn_stage(StageKind::Transform).await;
    let enrich = spawn_stage(StageKind::Enrich).await;
    let persist = spawn_stage(StageKind::Persist).await;

    let mut body = json!({"text": "hi"});
    for url in [&validate, &transform, &enrich] {
        let (status, next) = post(&format!("{url}/"), &body).await;
        assert_eq!(status, 200, "{url} answered {next}");
        body = next;
    }
    let (status, result) = post(&format!("{persist}/"), &body).await;

    assert_eq!(status, 200);
    assert_eq!(result["stored"], true);
    assert_eq!(result["result"], "HI");
    assert_eq!(result["payload"]["data"], "HI");
    assert!(result.get("text").is_none());

    let services: Vec<&str> = result["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["service"].as_str().unwrap())
        .collect();
    assert_eq!(services, vec!["validator", "transformer", "enricher", "persister"]);
}

#[tokio::test]
async fn health_reports_service_name() {
    for kind in StageKind::ALL {
        let url = spawn_stage(kind).await;
        let response = TracedClient::new()
            .get(&format!("{url}/health"))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok", "service": kind.service_name()}));
    }
}

#[tokio::test]
async fn unknown_route_and_wrong_method() {
    let url = spawn_stage(StageKind::Validate).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{url}/nope")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.json::<Value>().await.unwrap()["detail"], "Not Found");

    let response = client.get(format!("{url}/")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 405);

    let response = client.get(format!("{url}/metrics")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn malformed_json_is_unprocessable() {
    let url = spawn_stage(StageKind::Transform).await;
    let response = reqwest::Client::new()
        .post(format!("{url}/"))
        .header("content-type", "application/json")
        .body("{\"text\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(!body["detail"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn empty_body_is_an_empty_request() {
    let url = spawn_stage(StageKind::Validate).await;
    let response = reqwest::Client::new()
        .post(format!("{url}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Input must be non-empty");
}

#[tokio::test]
async fn request_id_is_propagated_or_generated() {
    let url = spawn_stage(StageKind::Validate).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/"))
        .header("x-request-id", "req-123")
        .json(&json!({"text": "a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = client.get(format!("{url}/health")).send().await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok());
}
