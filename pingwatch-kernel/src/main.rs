/**
 * PINGWATCH KERNEL - Main entry point
 *
 * ROLE: wires config, registry, prober, broadcast hub and scheduler,
 * serves the HTTP/WebSocket API, and tears everything down in order on
 * Ctrl-C / SIGTERM.
 */

use anyhow::Context;
use pingwatch_kernel::config::load_config;
use pingwatch_kernel::health::HealthTracker;
use pingwatch_kernel::http::{build_router, AppState};
use pingwatch_kernel::{logging, BroadcastHub, HostRegistry, IcmpProber, Scheduler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    logging::init();

    let cfg = load_config().await;

    let registry = HostRegistry::new();
    if !cfg.hosts.is_empty() {
        let seeded = registry.import_batch(&cfg.hosts);
        info!("[kernel] seeded {seeded}/{} hosts from config", cfg.hosts.len());
    }

    let prober = IcmpProber::new(&cfg.probe);
    if !prober.is_operational() {
        warn!("[kernel] ICMP unavailable, every host will report status=error");
    }

    let hub = BroadcastHub::new(registry.clone(), cfg.hub.subscriber_buffer);
    let health = HealthTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(
        registry.clone(),
        Arc::new(prober),
        hub.clone(),
        health.clone(),
        cfg.probe.clone(),
    );
    let scheduler_handle = scheduler.spawn(shutdown_rx);

    let app = build_router(AppState {
        registry,
        hub: hub.clone(),
        health,
        send_timeout: cfg.hub.send_timeout(),
    });

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("cannot bind {}", cfg.listen))?;
    info!("[kernel] listening on http://{}", cfg.listen);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        warn!("[kernel] scheduler task ended abnormally: {e}");
    }
    hub.close_all();
    info!("[kernel] stopped");

    served.context("HTTP server error")
}

/// Resolves on Ctrl-C or SIGTERM. Subscriber channels are closed first so
/// open WebSockets end and graceful shutdown can complete.
async fn shutdown_signal(hub: BroadcastHub) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[kernel] cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("[kernel] cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("[kernel] shutdown requested");
    hub.close_all();
}
