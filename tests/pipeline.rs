use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use vigil::api;
use vigil::runtime::{Services, serve};
use vigil_adapter_analytics::SqliteStorage;
use vigil_adapter_notification::LogMessenger;
use vigil_application::Shutdown;
use vigil_domain::{Group, GroupId, GroupInfo, ScoreboardRow, TimeRange, VigilConfig};
use vigil_ports::{ManualClock, ScoreboardPort};

const T0: i64 = 1_700_000_400;
const GROUP: GroupId = 5;
const A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

/// Scoreboard whose efficiencies the test rewrites between passes.
#[derive(Default)]
struct ScriptedSource {
    efficiencies: Mutex<HashMap<String, f64>>,
}

impl ScriptedSource {
    fn set(&self, validator: &str, efficiency: f64) {
        self.efficiencies
            .lock()
            .unwrap()
            .insert(validator.to_string(), efficiency);
    }
}

#[async_trait]
impl ScoreboardPort for ScriptedSource {
    async fn fetch_groups(&self, _group_id: Option<GroupId>) -> Result<Vec<Group>> {
        Ok(vec![Group {
            group_id: GROUP,
            info: GroupInfo {
                valid_since: T0 - 3_600,
                valid_until: T0 + 86_400,
                total_weight: 100,
                members: Vec::new(),
            },
        }])
    }

    async fn fetch_scoreboard(
        &self,
        group_id: GroupId,
        _window: Option<TimeRange>,
    ) -> Result<Vec<ScoreboardRow>> {
        let mut rows: Vec<ScoreboardRow> = self
            .efficiencies
            .lock()
            .unwrap()
            .iter()
            .map(|(validator, efficiency)| ScoreboardRow {
                group_id,
                validator_id: validator.clone(),
                efficiency: *efficiency,
                stake: 3_000_000_000_000,
                weight: 50,
                index: 1,
                ..ScoreboardRow::default()
            })
            .collect();
        rows.sort_by(|a, b| a.validator_id.cmp(&b.validator_id));
        Ok(rows)
    }
}

struct Pipeline {
    _dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    source: Arc<ScriptedSource>,
    messenger: Arc<LogMessenger>,
    services: Services,
    app: Router,
}

fn pipeline() -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStorage::open(&dir.path().join("vigil.sqlite"), 4).unwrap());
    let clock = Arc::new(ManualClock::at_unix(T0));
    let source = Arc::new(ScriptedSource::default());
    let messenger = Arc::new(LogMessenger::default());
    let mut config = VigilConfig::default();
    config.notifications.details_base_url = Some("https://vigil.example".into());
    let services = Services::assemble(
        &config,
        clock.clone(),
        store,
        source.clone(),
        messenger.clone(),
    );
    let app = api::router(services.app_state());
    Pipeline {
        _dir: dir,
        clock,
        source,
        messenger,
        services,
        app,
    }
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn json_of(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn wait_for_messages(messenger: &LogMessenger, count: usize) {
    for _ in 0..200 {
        if messenger.sent().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} messages, got {:?}", messenger.sent());
}

#[tokio::test]
async fn ingestion_alerts_queries_and_acknowledgment() {
    let p = pipeline();
    let (trigger, shutdown) = Shutdown::new();
    let listener = tokio::spawn(p.services.dispatcher.clone().run_listener(shutdown.clone()));

    let (status, _) = call(&p.app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &p.app,
        Method::POST,
        "/api/subscriptions",
        Some(json!({ "validator_id": A, "recipient_id": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["changed"], true);

    p.source.set(A, 0.95);
    p.source.set(B, 0.50);
    let first = p.services.ingestor.run_once(&shutdown).await.unwrap();
    assert_eq!((first.samples, first.alerts), (2, 1));

    p.clock.advance(Duration::from_secs(60));
    p.source.set(A, 0.40);
    let second = p.services.ingestor.run_once(&shutdown).await.unwrap();
    assert_eq!((second.samples, second.alerts), (2, 1));

    wait_for_messages(&p.messenger, 1).await;
    let sent = p.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, 7);
    assert!(sent[0].text.contains(&format!("Validator {A} is now not ok")));
    assert!(sent[0].text.contains("Previous state ok, duration: 0h 1 min."));
    let alert_id = sent[0].ack_alert_id.expect("not ok alert must be ackable");

    p.clock.advance(Duration::from_secs(7_200));
    let uri = format!("/api/validator-statuses?from={T0}&to={}", T0 + 120);
    let (status, cold) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, warm) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(cold, warm);

    let overview = json_of(&cold);
    assert_eq!(overview["statuses"][A][T0.to_string()], 0.95);
    assert_eq!(overview["statuses"][A][(T0 + 60).to_string()], 0.4);
    assert_eq!(overview["statuses"][B].as_object().unwrap().len(), 60);
    assert_eq!(overview["meta"][A]["stake"], 3_000);
    assert_eq!(overview["meta"][A]["group_id"], GROUP);

    let uri = format!("/api/chart?validators={A},{B}&from={T0}&to={}", T0 + 120);
    let (status, body) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let chart = json_of(&body);
    assert_eq!(chart.as_array().unwrap().len(), 2);
    assert_eq!(chart[0]["points"].as_array().unwrap().len(), 60);

    let ack_uri = format!("/api/alerts/{alert_id}/ack");
    let (status, body) = call(
        &p.app,
        Method::POST,
        &ack_uri,
        Some(json!({ "by": 7, "username": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let acked = json_of(&body);
    assert_eq!(acked["is_acknowledged"], true);
    assert_eq!(acked["ack_by"], 7);

    let (status, _) = call(
        &p.app,
        Method::POST,
        &ack_uri,
        Some(json!({ "by": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &p.app,
        Method::POST,
        "/api/alerts/callback",
        Some(json!({ "data": "ack_999", "from": { "id": 7 } })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &p.app,
        Method::GET,
        &format!("/api/validators/{A}/history?limit=10"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history: Vec<String> = json_of(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(history, vec!["acknowledged", "not ok", "ok"]);

    let (status, body) = call(
        &p.app,
        Method::DELETE,
        "/api/subscriptions",
        Some(json!({ "validator_id": A, "recipient_id": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["changed"], true);
    assert!(p.services.dispatcher.global_subscribers().await.unwrap().is_empty());

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(2), listener)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let p = pipeline();

    let (status, _) = call(&p.app, Method::GET, "/api/chart", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/chart?validators={A}&from={}&to={T0}", T0 + 600);
    let (status, body) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["code"], "INVALID_INPUT");

    let uri = format!("/api/chart?validators={A}&from=0&to={}", i64::MAX);
    let (status, _) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let uri = format!("/api/validator-statuses?to={}", i64::MIN);
    let (status, _) = call(&p.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &p.app,
        Method::POST,
        "/api/subscriptions",
        Some(json!({ "validator_id": "not-an-address", "recipient_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &p.app,
        Method::POST,
        "/api/alerts/callback",
        Some(json!({ "data": "mute", "from": { "id": 1 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn supervisor_drains_on_stop() {
    let p = pipeline();
    let mut config = VigilConfig::default();
    config.server.shutdown_grace_secs = 2;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (trigger, _shutdown) = Shutdown::new();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let supervisor = tokio::spawn(async move {
        serve(&config, p.services, listener, trigger, async {
            let _ = stop_rx.await;
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
