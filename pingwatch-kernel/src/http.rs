/**
 * PINGWATCH API - HTTP + WebSocket surface of the kernel
 *
 * ROLE:
 * Thin transport over the registry and the broadcast hub. No monitoring
 * logic lives here: handlers validate, call one core operation, map the
 * result to a status code.
 *
 * ROUTES:
 * - GET  /health            liveness
 * - GET  /system/health     scheduler + hub introspection
 * - GET  /api/hosts         current snapshot
 * - POST /api/hosts         add one host, pushes a snapshot right away
 *                           (also served with a trailing slash)
 * - POST /api/import        bulk add from ';'-delimited text
 * - GET  /api/export        ';'-delimited table (hosts.csv)
 * - GET  /api/ws/monitor    live snapshot stream, accepts "refresh"
 *
 * Every route answers CORS preflights for any origin, so a dashboard
 * served from elsewhere can call the API.
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::hub::{BroadcastHub, Subscription};
use crate::models::{Host, Snapshot};
use crate::registry::{HostRegistry, RegistryError};
use crate::transfer;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: HostRegistry,
    pub hub: BroadcastHub,
    pub health: HealthTracker,
    /// Bound on one outbound WebSocket write before the subscriber is dropped.
    pub send_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AddHostIn {
    #[serde(alias = "ip")]
    address: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let (code, status) = match &self {
            RegistryError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "invalid"),
            RegistryError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
        };
        (code, Json(json!({ "status": status, "message": self.to_string() }))).into_response()
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/hosts", get(list_hosts).post(add_host))
        .route("/api/hosts/", get(list_hosts).post(add_host))
        .route("/api/import", post(import_hosts))
        .route("/api/export", get(export_hosts))
        .route("/api/ws/monitor", get(monitor))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(app.registry.len(), app.hub.subscriber_count()))
}

// GET /api/hosts
async fn list_hosts(State(app): State<AppState>) -> Json<Vec<Host>> {
    Json(app.registry.snapshot())
}

// POST /api/hosts
async fn add_host(
    State(app): State<AppState>,
    Json(body): Json<AddHostIn>,
) -> Result<(StatusCode, Json<serde_json::Value>), RegistryError> {
    let host = app.registry.add(&body.address)?;
    info!("[api] added host {}", host.address);
    app.hub.publish_current();
    Ok((StatusCode::CREATED, Json(json!({ "status": "created", "host": host }))))
}

// POST /api/import (body = ';'-delimited text, any encoding)
async fn import_hosts(State(app): State<AppState>, body: Bytes) -> Json<serde_json::Value> {
    // non-UTF-8 bytes become U+FFFD, so only the rows holding them fail validation
    let text = String::from_utf8_lossy(&body);
    let rows = transfer::import_rows(&text);
    let added = app.registry.import_batch(&rows);
    info!("[api] import: {added} added out of {} rows", rows.len());
    if added > 0 {
        app.hub.publish_current();
    }
    Json(json!({ "status": "success", "added": added }))
}

// GET /api/export
async fn export_hosts(State(app): State<AppState>) -> impl IntoResponse {
    let body = transfer::export_table(&app.registry.snapshot());
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=hosts.csv"),
        ],
        body,
    )
}

// GET /api/ws/monitor
async fn monitor(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        let (sink, stream) = socket.split();
        serve_subscriber(sink, stream, app)
    })
}

/// `refresh` as a bare word or `{"action": "refresh"}`.
pub fn is_refresh_request(text: &str) -> bool {
    let text = text.trim();
    if text.eq_ignore_ascii_case("refresh") {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(|a| a.eq_ignore_ascii_case("refresh")))
        .unwrap_or(false)
}

/// Pumps snapshots into `sink` and refresh requests out of `stream` until
/// either side ends or one write exceeds `send_timeout`.
async fn serve_subscriber<S, R>(mut sink: S, mut stream: R, app: AppState)
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
    R: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut sub: Subscription = app.hub.subscribe();
    let id = sub.id();

    loop {
        tokio::select! {
            snapshot = sub.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!("[ws] {id}: hub closed the channel");
                    break;
                };
                if let Err(reason) = send_snapshot(&mut sink, &snapshot, app.send_timeout).await {
                    warn!("[ws] {id}: {reason}, dropping subscriber");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_refresh_request(text.as_str()) {
                        app.hub.refresh(id);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("[ws] {id}: receive error {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    app.hub.unsubscribe(id);
    let _ = sink.close().await;
}

async fn send_snapshot<S>(sink: &mut S, snapshot: &Snapshot, send_timeout: Duration) -> Result<(), String>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = serde_json::to_string(snapshot).map_err(|e| format!("serialize: {e}"))?;
    match tokio::time::timeout(send_timeout, sink.send(Message::Text(payload.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("send failed: {e}")),
        Err(_) => Err(format!("send timed out after {send_timeout:?}")),
    }
}
