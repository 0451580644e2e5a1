//! End-to-end checks of the HTTP/WebSocket surface over a loopback listener.

use futures::{SinkExt, StreamExt};
use pingwatch_kernel::config::ProbeConf;
use pingwatch_kernel::health::HealthTracker;
use pingwatch_kernel::http::{build_router, AppState};
use pingwatch_kernel::{BroadcastHub, Host, HostRegistry, HostStatus, ProbeOutcome, Prober, Scheduler};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

struct AlwaysUp;

#[async_trait::async_trait]
impl Prober for AlwaysUp {
    async fn probe(&self, _address: &str) -> ProbeOutcome {
        ProbeOutcome::Reachable { round_trip_ms: 2.5, loss_pct: 0.0 }
    }
}

struct TestServer {
    addr: SocketAddr,
    registry: HostRegistry,
    hub: BroadcastHub,
    health: HealthTracker,
}

async fn start() -> TestServer {
    let registry = HostRegistry::new();
    let hub = BroadcastHub::new(registry.clone(), 8);
    let health = HealthTracker::new();
    let app = build_router(AppState {
        registry: registry.clone(),
        hub: hub.clone(),
        health: health.clone(),
        send_timeout: Duration::from_secs(1),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, registry, hub, health }
}

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_snapshot(ws: &mut Ws) -> Vec<Host> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no snapshot within 5s")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_subscribers(hub: &BroadcastHub, n: usize) {
    for _ in 0..100 {
        if hub.subscriber_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} subscribers, got {}", hub.subscriber_count());
}

#[tokio::test]
async fn add_list_and_conflicts() {
    let srv = start().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/hosts", srv.addr);

    let res = client.post(&url).json(&serde_json::json!({ "address": "10.0.0.1" })).send().await.unwrap();
    assert_eq!(res.status(), 201);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "created");
    assert_eq!(body["host"]["status"], "unknown");

    let res = client.post(&url).json(&serde_json::json!({ "ip": " 10.0.0.1 " })).send().await.unwrap();
    assert_eq!(res.status(), 409);
    assert_eq!(res.json::<Value>().await.unwrap()["status"], "duplicate");

    for bad in ["300.1.1.1", "1.2.3", "abc.def.1.1"] {
        let res = client.post(&url).json(&serde_json::json!({ "address": bad })).send().await.unwrap();
        assert_eq!(res.status(), 400, "{bad}");
    }

    let hosts: Vec<Host> = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].address, "10.0.0.1");
    assert_eq!(srv.registry.len(), 1);
}

#[tokio::test]
async fn import_then_export() {
    let srv = start().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("http://{}/api/import", srv.addr))
        .body("10.0.0.1;x\n10.0.0.1;y\nbad;z\n")
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["added"], 1);

    let res = client.get(format!("http://{}/api/export", srv.addr)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers()["content-disposition"].to_str().unwrap().contains("hosts.csv"));
    let text = res.text().await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "10.0.0.1;unknown;n/a;0.0%;100.0%;n/a");
}

#[tokio::test]
async fn websocket_initial_add_and_refresh() {
    let srv = start().await;
    srv.registry.add("10.0.0.1").unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/api/ws/monitor", srv.addr))
        .await
        .unwrap();
    let first = next_snapshot(&mut ws).await;
    assert_eq!(first.len(), 1);
    wait_for_subscribers(&srv.hub, 1).await;

    // a successful add pushes right away
    reqwest::Client::new()
        .post(format!("http://{}/api/hosts", srv.addr))
        .json(&serde_json::json!({ "address": "10.0.0.2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(next_snapshot(&mut ws).await.len(), 2);

    ws.send(Message::Text("refresh".into())).await.unwrap();
    assert_eq!(next_snapshot(&mut ws).await.len(), 2);

    ws.close(None).await.unwrap();
    wait_for_subscribers(&srv.hub, 0).await;
}

#[tokio::test]
async fn scheduler_cycles_reach_websocket_subscribers() {
    let srv = start().await;
    srv.registry.import_batch(["10.0.0.1", "10.0.0.2"]);

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/api/ws/monitor", srv.addr))
        .await
        .unwrap();
    assert!(next_snapshot(&mut ws).await.iter().all(|h| h.status == HostStatus::Unknown));

    let conf = ProbeConf { interval_ms: 50, ..ProbeConf::default() };
    let (tx, rx) = watch::channel(false);
    let handle = Scheduler::new(srv.registry.clone(), Arc::new(AlwaysUp), srv.hub.clone(), srv.health.clone(), conf)
        .spawn(rx);

    let snap = next_snapshot(&mut ws).await;
    assert!(snap.iter().all(|h| h.status == HostStatus::Online));
    assert!(snap.iter().all(|h| h.round_trip_ms == Some(2.5) && h.delivered_pct == 100.0));
    assert!(snap.iter().all(|h| h.last_probe_at.is_some()));

    let health: Value = reqwest::get(format!("http://{}/system/health", srv.addr)).await.unwrap().json().await.unwrap();
    assert_eq!(health["hosts_tracked"], 2);
    assert!(health["cycles_completed"].as_u64().unwrap() >= 1);

    tx.send(true).unwrap();
    handle.await.unwrap();

    srv.hub.close_all();
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(end.is_ok());
}

#[tokio::test]
async fn listing_is_idempotent() {
    let srv = start().await;
    srv.registry.import_batch(["10.0.0.3", "10.0.0.1"]);
    let url = format!("http://{}/api/hosts", srv.addr);
    let a: Vec<Host> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    let b: Vec<Host> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].address, "10.0.0.3");
}

#[tokio::test]
async fn import_survives_non_utf8_rows() {
    let srv = start().await;
    // cp1251 header row followed by a valid host
    let mut body = b"\xD1\xF2\xE0\xF2\xF3\xF1;x\n".to_vec();
    body.extend_from_slice(b"10.0.0.1;y\n");

    let res = reqwest::Client::new()
        .post(format!("http://{}/api/import", srv.addr))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.json::<Value>().await.unwrap()["added"], 1);
    assert_eq!(srv.registry.snapshot()[0].address, "10.0.0.1");
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let srv = start().await;
    let res = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{}/api/hosts", srv.addr))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success(), "{}", res.status());
    assert_eq!(res.headers()["access-control-allow-origin"], "*");

    let res = reqwest::Client::new()
        .get(format!("http://{}/api/hosts", srv.addr))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn hosts_route_accepts_trailing_slash() {
    let srv = start().await;
    let url = format!("http://{}/api/hosts/", srv.addr);
    let res = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "ip": "10.0.0.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    let hosts: Vec<Host> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(hosts.len(), 1);
}
