/*!
Scenario harness for the monitoring engine

Wires a registry, a broadcast hub and a scheduler around a ScriptedProber:
- Cycles can be driven one at a time or by the real loop
- Assertions on host status and percentage consistency
- Snapshot waits with a deadline
*/

use crate::prober_stub::{Behaviour, ScriptedProber};
use anyhow::{bail, Context, Result};
use pingwatch_kernel::config::ProbeConf;
use pingwatch_kernel::health::HealthTracker;
use pingwatch_kernel::{
    BroadcastHub, CycleReport, Host, HostRegistry, HostStatus, Scheduler, Snapshot, Subscription,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct TestHarness {
    pub registry: HostRegistry,
    pub hub: BroadcastHub,
    pub health: HealthTracker,
    pub prober: ScriptedProber,
    pub conf: ProbeConf,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl TestHarness {
    /// Short timings so hanging hosts resolve quickly.
    pub fn new() -> Self {
        env_logger::try_init().ok();

        let registry = HostRegistry::new();
        Self {
            hub: BroadcastHub::new(registry.clone(), 16),
            registry,
            health: HealthTracker::new(),
            prober: ScriptedProber::new(),
            conf: ProbeConf {
                host_timeout_ms: 200,
                interval_ms: 50,
                ..ProbeConf::default()
            },
            running: None,
        }
    }

    pub fn with_conf(mut self, conf: ProbeConf) -> Self {
        self.conf = conf;
        self
    }

    pub fn with_hosts(self, addresses: &[&str]) -> Self {
        let added = self.registry.import_batch(addresses);
        log::info!("[harness] seeded {added} hosts");
        self
    }

    /// Same as `with_hosts`, for a harness that is already borrowed.
    pub fn seed(&self, addresses: &[&str]) -> usize {
        self.registry.import_batch(addresses)
    }

    pub fn add_host(&self, address: &str) -> Result<Host> {
        Ok(self.registry.add(address)?)
    }

    pub fn script(&self, address: &str, behaviour: Behaviour) -> &Self {
        self.prober.script(address, behaviour);
        self
    }

    /// A scheduler over the harness state; cheap, build one per use.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.registry.clone(),
            Arc::new(self.prober.clone()),
            self.hub.clone(),
            self.health.clone(),
            self.conf.clone(),
        )
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let report = self.scheduler().run_cycle().await;
        log::info!(
            "[harness] cycle: {} probed, {} timed out, {} delivered in {:?}",
            report.probed,
            report.timed_out,
            report.delivered,
            report.took
        );
        report
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Starts the real loop in the background.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let handle = self.scheduler().spawn(rx);
        self.running = Some((tx, handle));
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some((tx, handle)) = self.running.take() {
            let _ = tx.send(true);
            handle.await.context("scheduler task")?;
        }
        Ok(())
    }

    pub fn host(&self, address: &str) -> Result<Host> {
        self.registry
            .get(address)
            .with_context(|| format!("host {address} not registered"))
    }

    pub fn expect_status(&self, address: &str, expected: HostStatus) -> Result<()> {
        let host = self.host(address)?;
        if host.status != expected {
            bail!("{address}: expected status {expected}, got {}", host.status);
        }
        Ok(())
    }

    /// delivered + loss == 100 for every host, both within [0, 100].
    pub fn assert_percentages_consistent(&self) -> Result<()> {
        for host in self.registry.snapshot() {
            let in_range = |v: f64| (0.0..=100.0).contains(&v);
            if !in_range(host.delivered_pct) || !in_range(host.loss_pct) {
                bail!("{}: percentages out of range {:?}", host.address, host);
            }
            if host.delivered_pct + host.loss_pct != 100.0 {
                bail!(
                    "{}: delivered {} + loss {} != 100",
                    host.address,
                    host.delivered_pct,
                    host.loss_pct
                );
            }
        }
        Ok(())
    }

    pub async fn wait_for_snapshot(sub: &mut Subscription, timeout_ms: u64) -> Result<Arc<Snapshot>> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), sub.recv()).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => bail!("subscription closed"),
            Err(_) => bail!("no snapshot within {timeout_ms}ms"),
        }
    }

    pub fn get_stats(&self) -> HarnessStats {
        let mut status_counts = HashMap::new();
        for host in self.registry.snapshot() {
            *status_counts.entry(host.status).or_insert(0) += 1;
        }
        HarnessStats {
            hosts: self.registry.len(),
            subscribers: self.hub.subscriber_count(),
            cycles_completed: self.health.cycles_completed(),
            probes_sent: self.prober.calls().len(),
            status_counts,
        }
    }

    /// Forgets hosts, scripts and subscribers. Stop the loop first.
    pub fn reset(&mut self) {
        self.hub.close_all();
        self.registry = HostRegistry::new();
        self.hub = BroadcastHub::new(self.registry.clone(), 16);
        self.health = HealthTracker::new();
        self.prober = ScriptedProber::new();
        log::info!("[harness] reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct HarnessStats {
    pub hosts: usize,
    pub subscribers: usize,
    pub cycles_completed: u64,
    pub probes_sent: usize,
    pub status_counts: HashMap<HostStatus, usize>,
}

impl HarnessStats {
    pub fn print(&self) {
        println!("harness stats:");
        println!("  hosts: {} ({} subscribers)", self.hosts, self.subscribers);
        println!("  cycles: {}, probes sent: {}", self.cycles_completed, self.probes_sent);
        for (status, count) in &self.status_counts {
            println!("    {status}: {count}");
        }
    }
}

/// Declares a tokio test with a fresh `TestHarness` bound to `$h`. The
/// body is a block returning `anyhow::Result<()>`.
#[macro_export]
macro_rules! harness_test {
    ($name:ident, |$h:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            #[allow(unused_mut)]
            let mut $h = $crate::test_utils::TestHarness::new();
            let result: $crate::anyhow::Result<()> = async { $body }.await;
            $h.get_stats().print();
            if let Err(e) = result {
                panic!("scenario '{}' failed: {e:#}", stringify!($name));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    harness_test!(one_hanging_host_does_not_block_the_others, |h| {
        let hosts = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"];
        h.seed(&hosts);
        h.prober.set_fallback(Behaviour::up(3.0));
        h.script("10.0.0.3", Behaviour::Hang);

        let report = h.run_cycle().await;
        assert_eq!(report.probed, 5);
        assert_eq!(report.timed_out, 1);
        assert!(report.took < Duration::from_millis(1000), "{:?}", report.took);

        for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.4", "10.0.0.5"] {
            h.expect_status(addr, HostStatus::Online)?;
        }
        h.expect_status("10.0.0.3", HostStatus::Offline)?;
        h.assert_percentages_consistent()?;
        Ok(())
    });

    harness_test!(late_subscriber_gets_current_state_at_once, |h| {
        h.seed(&["10.0.0.1", "10.0.0.2"]);
        h.script("10.0.0.1", Behaviour::lossy(8.0, 33.3));
        h.run_cycle().await;

        let mut sub = h.subscribe();
        let snap = sub.try_recv().context("no snapshot queued on subscribe")?;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].status, HostStatus::Online);
        assert_eq!(snap[0].loss_pct, 33.3);
        assert_eq!(snap[1].status, HostStatus::Offline);
        Ok(())
    });

    harness_test!(host_added_mid_cycle_waits_for_next_cycle, |h| {
        h.seed(&["10.0.0.1"]);
        h.prober.set_fallback(Behaviour::up(1.0));
        h.script("10.0.0.1", Behaviour::slow(Duration::from_millis(100), Behaviour::up(1.0)));

        let scheduler = h.scheduler();
        let (report, added) = tokio::join!(scheduler.run_cycle(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.add_host("10.0.0.2")
        });
        added?;
        assert_eq!(report.probed, 1);
        assert_eq!(h.prober.call_count("10.0.0.2"), 0);
        h.expect_status("10.0.0.2", HostStatus::Unknown)?;

        h.run_cycle().await;
        h.expect_status("10.0.0.2", HostStatus::Online)?;
        h.assert_percentages_consistent()?;
        Ok(())
    });

    harness_test!(probe_failures_surface_as_error_status, |h| {
        h.seed(&["10.0.0.1"]);
        h.script("10.0.0.1", Behaviour::Fail("socket: permission denied".into()));
        let report = h.run_cycle().await;
        assert_eq!(report.failed, 1);
        h.expect_status("10.0.0.1", HostStatus::Error)?;
        assert!(h.expect_status("10.0.0.1", HostStatus::Online).is_err());
        Ok(())
    });

    #[tokio::test]
    async fn test_background_loop_publishes_until_stopped() {
        let mut h = TestHarness::new().with_hosts(&["10.0.0.1"]);
        h.prober.set_fallback(Behaviour::up(2.0));
        let mut sub = h.subscribe();
        let first = TestHarness::wait_for_snapshot(&mut sub, 1000).await.unwrap();
        assert_eq!(first[0].status, HostStatus::Unknown);

        h.start();
        let next = TestHarness::wait_for_snapshot(&mut sub, 2000).await.unwrap();
        assert_eq!(next[0].status, HostStatus::Online);
        h.stop().await.unwrap();

        let stats = h.get_stats();
        assert!(stats.cycles_completed >= 1);
        assert_eq!(stats.status_counts.get(&HostStatus::Online), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_timeout_shorter_than_echo_budget_cuts_slow_hosts() {
        // 3 echoes x 300ms would need 900ms, the host gets 100ms
        let h = TestHarness::new()
            .with_conf(ProbeConf {
                echo_count: 3,
                echo_timeout_ms: 300,
                host_timeout_ms: 100,
                ..ProbeConf::default()
            })
            .with_hosts(&["10.0.0.1", "10.0.0.2"]);
        h.script("10.0.0.1", Behaviour::slow(Duration::from_millis(500), Behaviour::up(450.0)))
            .script("10.0.0.2", Behaviour::slow(Duration::from_millis(50), Behaviour::up(50.0)));

        let report = h.run_cycle().await;
        assert_eq!(report.timed_out, 1);
        h.expect_status("10.0.0.1", HostStatus::Offline).unwrap();
        h.expect_status("10.0.0.2", HostStatus::Online).unwrap();
        h.assert_percentages_consistent().unwrap();
    }

    #[tokio::test]
    async fn test_reset() {
        let mut h = TestHarness::new().with_hosts(&["10.0.0.1"]);
        let sub = h.subscribe();
        h.run_cycle().await;
        h.reset();
        assert_eq!(h.registry.len(), 0);
        assert_eq!(h.get_stats().probes_sent, 0);
        drop(sub);
        assert_eq!(h.hub.subscriber_count(), 0);
    }
}
