/**
 * PROBE SCHEDULER - Periodic probe cycles over the whole registry
 *
 * ROLE: drives Idle -> Probing -> Broadcasting -> Idle forever, until the
 * shutdown signal flips.
 *
 * CYCLE:
 * 1. copy the address list (hosts added later wait for the next cycle)
 * 2. probe every address concurrently, bounded by max_concurrency, each
 *    probe boxed in host_timeout (a timed-out probe counts as unreachable)
 * 3. apply every outcome in one registry write
 * 4. publish the resulting snapshot
 * 5. sleep interval
 */

use crate::config::ProbeConf;
use crate::health::{HealthTracker, SchedulerPhase};
use crate::hub::BroadcastHub;
use crate::models::ProbeOutcome;
use crate::prober::Prober;
use crate::registry::HostRegistry;
use futures::{stream, FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub probed: usize,
    pub applied: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub delivered: usize,
    pub took: Duration,
}

pub struct Scheduler {
    registry: HostRegistry,
    prober: Arc<dyn Prober>,
    hub: BroadcastHub,
    health: HealthTracker,
    conf: ProbeConf,
}

enum Probed {
    Done(ProbeOutcome),
    TimedOut,
}

impl Scheduler {
    pub fn new(
        registry: HostRegistry,
        prober: Arc<dyn Prober>,
        hub: BroadcastHub,
        health: HealthTracker,
        conf: ProbeConf,
    ) -> Self {
        Self { registry, prober, hub, health, conf }
    }

    /// One full probe cycle, broadcast included.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        self.health.set_phase(SchedulerPhase::Probing);

        let addresses = self.registry.addresses();
        let probed = addresses.len();
        let host_timeout = self.conf.host_timeout();

        let results: Vec<(String, Probed)> = stream::iter(addresses)
            .map(|address| {
                let prober = self.prober.clone();
                async move {
                    let attempt = AssertUnwindSafe(prober.probe(&address)).catch_unwind();
                    let probed = match tokio::time::timeout(host_timeout, attempt).await {
                        Ok(Ok(outcome)) => Probed::Done(outcome),
                        Ok(Err(_)) => {
                            error!("[scheduler] prober panicked on {address}");
                            Probed::Done(ProbeOutcome::Failed("prober panicked".into()))
                        }
                        Err(_) => Probed::TimedOut,
                    };
                    (address, probed)
                }
            })
            .buffer_unordered(self.conf.max_concurrency.max(1))
            .collect()
            .await;

        let mut timed_out = 0;
        let mut failed = 0;
        let outcomes: Vec<(String, ProbeOutcome)> = results
            .into_iter()
            .map(|(address, probed)| {
                let outcome = match probed {
                    Probed::Done(outcome) => outcome,
                    Probed::TimedOut => {
                        debug!("[scheduler] {address} exceeded {host_timeout:?}");
                        timed_out += 1;
                        ProbeOutcome::Unreachable
                    }
                };
                if let ProbeOutcome::Failed(reason) = &outcome {
                    debug!("[scheduler] probe of {address} failed: {reason}");
                    failed += 1;
                }
                (address, outcome)
            })
            .collect();

        self.health.set_phase(SchedulerPhase::Broadcasting);
        let applied = self.registry.apply_cycle(&outcomes, OffsetDateTime::now_utc());
        let delivered = self.hub.publish_current();

        let took = started.elapsed();
        self.health.record_cycle(took);
        self.health.set_phase(SchedulerPhase::Idle);

        CycleReport { probed, applied, timed_out, failed, delivered, took }
    }

    /// Cycles until `shutdown` turns true or its sender is dropped. An
    /// in-flight cycle is abandoned at the next suspension point.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[scheduler] started (interval {:?}, {} echoes/host, host timeout {:?})",
            self.conf.interval(),
            self.conf.echo_count,
            self.conf.host_timeout()
        );
        let interval = self.conf.interval();

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                report = self.run_cycle() => {
                    debug!(
                        "[scheduler] cycle: {} probed, {} applied, {} timed out, {} failed, {} subscribers, {:?}",
                        report.probed, report.applied, report.timed_out, report.failed, report.delivered, report.took
                    );
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.health.set_phase(SchedulerPhase::Idle);
        info!("[scheduler] stopped after {} cycles", self.health.cycles_completed());
    }

    /// Spawns the loop; the caller owns the handle and joins it on shutdown.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
