//! ICMP echo probing.
//!
//! A probe sends `echo_count` echo requests one after the other, each bounded
//! by `echo_timeout`, and folds the replies into a [`ProbeOutcome`]. Every
//! failure stays inside the prober: callers always get an outcome back.

use crate::config::ProbeConf;
pub use crate::models::ProbeOutcome;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};
use tracing::{debug, error, warn};

/// Probes one host and classifies the result.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

/// Reply tally of one echo sequence.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EchoTally {
    pub sent: u16,
    pub rtts: Vec<Duration>,
}

impl EchoTally {
    pub fn record_reply(&mut self, rtt: Duration) {
        self.sent += 1;
        self.rtts.push(rtt);
    }

    pub fn record_loss(&mut self) {
        self.sent += 1;
    }

    /// Average RTT over answered echoes, loss over all sent ones.
    pub fn outcome(&self) -> ProbeOutcome {
        if self.rtts.is_empty() || self.sent == 0 {
            return ProbeOutcome::Unreachable;
        }
        let total: Duration = self.rtts.iter().sum();
        let round_trip_ms = total.as_secs_f64() * 1000.0 / self.rtts.len() as f64;
        let lost = usize::from(self.sent).saturating_sub(self.rtts.len());
        let loss_pct = lost as f64 * 100.0 / f64::from(self.sent);
        ProbeOutcome::Reachable { round_trip_ms, loss_pct }
    }
}

/// ICMPv4 prober over a shared surge-ping socket.
pub struct IcmpProber {
    client: Option<Client>,
    init_error: Option<String>,
    echo_count: u16,
    echo_timeout: Duration,
    payload: Vec<u8>,
    next_ident: AtomicU16,
}

impl IcmpProber {
    /// Opens the ICMP socket. Without permission the prober still builds;
    /// every probe then reports `Failed` so hosts surface as `error`.
    pub fn new(conf: &ProbeConf) -> Self {
        let (client, init_error) = match Client::new(&Config::default()) {
            Ok(client) => (Some(client), None),
            Err(e) => {
                error!("cannot open ICMP socket: {e} (raw socket permission or net.ipv4.ping_group_range?)");
                (None, Some(e.to_string()))
            }
        };
        Self {
            client,
            init_error,
            echo_count: conf.echo_count.max(1),
            echo_timeout: conf.echo_timeout(),
            payload: vec![0u8; conf.payload_size],
            next_ident: AtomicU16::new(std::process::id() as u16),
        }
    }

    pub fn is_operational(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let Some(client) = &self.client else {
            let reason = self.init_error.as_deref().unwrap_or("ICMP socket unavailable");
            return ProbeOutcome::Failed(reason.to_string());
        };
        let ip: Ipv4Addr = match address.parse() {
            Ok(ip) => ip,
            Err(e) => return ProbeOutcome::Failed(format!("bad address {address}: {e}")),
        };

        let ident = PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed));
        let mut pinger = client.pinger(IpAddr::V4(ip), ident).await;
        pinger.timeout(self.echo_timeout);

        let mut tally = EchoTally::default();
        for seq in 0..self.echo_count {
            match pinger.ping(PingSequence(seq), &self.payload).await {
                Ok((_packet, rtt)) => tally.record_reply(rtt),
                Err(SurgeError::Timeout { .. }) => tally.record_loss(),
                Err(e) => {
                    warn!("echo {seq} to {address} failed: {e}");
                    // replies already received still prove reachability
                    if tally.rtts.is_empty() {
                        return ProbeOutcome::Failed(e.to_string());
                    }
                    tally.record_loss();
                }
            }
        }
        debug!("{address}: {}/{} replies", tally.rtts.len(), tally.sent);
        tally.outcome()
    }
}
