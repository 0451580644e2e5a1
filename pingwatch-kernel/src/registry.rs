/**
 * HOST REGISTRY - Authoritative in-memory set of monitored hosts
 *
 * ROLE: owns every tracked host and its latest reachability state.
 * Written by add/import handlers and by the scheduler's apply step,
 * read by list/export and by every broadcast.
 *
 * DISCIPLINE: one RwLock guards the ordered map. Structural changes
 * (insert) and field updates (apply) both take the write side, so a
 * reader always clones whole, consistent Host records.
 */

use crate::models::{Host, ProbeOutcome, Snapshot};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::net::Ipv4Addr;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("host already tracked: {0}")]
    Duplicate(String),
}

/// Ordered host map keyed by normalized address. Cheap to clone.
#[derive(Clone, Default)]
pub struct HostRegistry {
    hosts: Arc<RwLock<IndexMap<String, Host>>>,
}

/// Parses a dotted-quad with every octet in [0,255] and returns its
/// canonical form. Leading zeros are accepted (`010.0.0.1` -> `10.0.0.1`).
pub fn normalize_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in raw.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        octets[count] = part.parse::<u8>().ok()?;
        count += 1;
    }
    if count != 4 {
        return None;
    }
    Some(Ipv4Addr::from(octets).to_string())
}

fn dedup_key(address: &str) -> String {
    address.to_ascii_lowercase()
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new host in `unknown` state.
    pub fn add(&self, address: &str) -> Result<Host, RegistryError> {
        let normalized = normalize_address(address)
            .ok_or_else(|| RegistryError::InvalidAddress(address.trim().to_string()))?;
        let mut hosts = self.hosts.write();
        insert_new(&mut hosts, normalized)
    }

    /// Applies `add` to every row, skipping invalid and duplicate ones.
    /// Returns how many hosts were created.
    pub fn import_batch<I, S>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // validate outside the lock, insert under a single write guard
        let candidates: Vec<String> = rows
            .into_iter()
            .filter_map(|row| normalize_address(row.as_ref()))
            .collect();
        if candidates.is_empty() {
            return 0;
        }
        let mut hosts = self.hosts.write();
        candidates
            .into_iter()
            .filter(|address| insert_new(&mut hosts, address.clone()).is_ok())
            .count()
    }

    /// Independent copy of every host, in insertion order.
    pub fn snapshot(&self) -> Snapshot {
        self.hosts.read().values().cloned().collect()
    }

    /// Addresses to probe this cycle. Hosts added afterwards wait for the
    /// next one.
    pub fn addresses(&self) -> Vec<String> {
        self.hosts.read().values().map(|h| h.address.clone()).collect()
    }

    /// Updates one host from a probe outcome. Returns false when the host is
    /// no longer tracked; nothing is recreated in that case.
    pub fn apply_result(&self, address: &str, outcome: &ProbeOutcome, at: OffsetDateTime) -> bool {
        match self.hosts.write().get_mut(&dedup_key(address)) {
            Some(host) => {
                host.apply(outcome, at);
                true
            }
            None => false,
        }
    }

    /// Applies a whole cycle's outcomes under one write guard so readers see
    /// either none or all of them.
    pub fn apply_cycle(&self, results: &[(String, ProbeOutcome)], at: OffsetDateTime) -> usize {
        let mut hosts = self.hosts.write();
        results
            .iter()
            .filter(|(address, outcome)| match hosts.get_mut(&dedup_key(address)) {
                Some(host) => {
                    host.apply(outcome, at);
                    true
                }
                None => false,
            })
            .count()
    }

    pub fn get(&self, address: &str) -> Option<Host> {
        let key = normalize_address(address).unwrap_or_else(|| address.trim().to_string());
        self.hosts.read().get(&dedup_key(&key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }
}

fn insert_new(hosts: &mut IndexMap<String, Host>, address: String) -> Result<Host, RegistryError> {
    let key = dedup_key(&address);
    if hosts.contains_key(&key) {
        return Err(RegistryError::Duplicate(address));
    }
    let host = Host::new(address);
    hosts.insert(key, host.clone());
    Ok(host)
}
