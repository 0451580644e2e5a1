use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reachability status of a tracked host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// No probe has completed yet.
    Unknown,
    Online,
    Offline,
    /// The local probing mechanism failed (permissions, network stack...).
    Error,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Unknown => write!(f, "unknown"),
            HostStatus::Online => write!(f, "online"),
            HostStatus::Offline => write!(f, "offline"),
            HostStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of one probe sequence against one host.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// At least one echo reply came back.
    Reachable { round_trip_ms: f64, loss_pct: f64 },
    /// The probe ran to completion without a single reply.
    Unreachable,
    /// The probe itself could not run.
    Failed(String),
}

/// One tracked endpoint and its latest reachability state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub address: String,
    pub status: HostStatus,
    pub round_trip_ms: Option<f64>,
    pub delivered_pct: f64,
    pub loss_pct: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_probe_at: Option<OffsetDateTime>,
}

/// Full ordered host list at one instant; the broadcast payload.
pub type Snapshot = Vec<Host>;

impl Host {
    /// Fresh entry, as created by add/import. Nothing delivered yet, so the
    /// whole budget sits on the loss side.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: HostStatus::Unknown,
            round_trip_ms: None,
            delivered_pct: 0.0,
            loss_pct: 100.0,
            last_probe_at: None,
        }
    }

    /// Overwrites every mutable field from a probe outcome.
    ///
    /// `delivered_pct` is always derived from `loss_pct`, so the pair sums to
    /// exactly 100 whatever the outcome.
    pub fn apply(&mut self, outcome: &ProbeOutcome, at: OffsetDateTime) {
        let loss = match outcome {
            ProbeOutcome::Reachable { round_trip_ms, loss_pct } => {
                self.status = HostStatus::Online;
                self.round_trip_ms = Some(round_trip_ms.max(0.0));
                if loss_pct.is_finite() { loss_pct.clamp(0.0, 100.0) } else { 100.0 }
            }
            ProbeOutcome::Unreachable => {
                self.status = HostStatus::Offline;
                self.round_trip_ms = None;
                100.0
            }
            ProbeOutcome::Failed(_) => {
                self.status = HostStatus::Error;
                self.round_trip_ms = None;
                100.0
            }
        };
        self.loss_pct = loss;
        self.delivered_pct = 100.0 - loss;
        self.last_probe_at = Some(at);
    }
}
