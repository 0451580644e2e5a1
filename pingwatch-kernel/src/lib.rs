//! pingwatch kernel: keeps a set of IPv4 hosts under continuous ICMP probing
//! and pushes every resulting snapshot to live subscribers.
//!
//! Leaves first: [`models`] → [`registry`] → [`prober`] → [`hub`] →
//! [`scheduler`], with [`http`] and [`transfer`] as the thin outer layer.

pub mod config;
pub mod health;
pub mod http;
pub mod hub;
pub mod logging;
pub mod models;
pub mod prober;
pub mod registry;
pub mod scheduler;
pub mod transfer;

pub use hub::{BroadcastHub, SubscriberId, Subscription};
pub use models::{Host, HostStatus, ProbeOutcome, Snapshot};
pub use prober::{IcmpProber, Prober};
pub use registry::{HostRegistry, RegistryError};
pub use scheduler::{CycleReport, Scheduler};
