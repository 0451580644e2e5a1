/*!
Scripted prober for tests without ICMP permission

Implements the kernel's `Prober` trait from a per-address script. Every
call is recorded so tests can assert who was probed and how often.
*/

use parking_lot::Mutex;
use pingwatch_kernel::{ProbeOutcome, Prober};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a scripted host answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    Reply { rtt_ms: f64, loss_pct: f64 },
    Down,
    Fail(String),
    /// Never answers; only the scheduler's per-host timeout ends it.
    Hang,
    /// Answers `then` after `after`.
    Slow { after: Duration, then: Box<Behaviour> },
}

impl Behaviour {
    pub fn up(rtt_ms: f64) -> Self {
        Behaviour::Reply { rtt_ms, loss_pct: 0.0 }
    }

    pub fn lossy(rtt_ms: f64, loss_pct: f64) -> Self {
        Behaviour::Reply { rtt_ms, loss_pct }
    }

    pub fn slow(after: Duration, then: Behaviour) -> Self {
        Behaviour::Slow { after, then: Box::new(then) }
    }
}

/// Clones share the same script and call log.
#[derive(Clone)]
pub struct ScriptedProber {
    script: Arc<Mutex<HashMap<String, Behaviour>>>,
    fallback: Arc<Mutex<Behaviour>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProber {
    /// Unscripted addresses answer `Down`.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(HashMap::new())),
            fallback: Arc::new(Mutex::new(Behaviour::Down)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(&self, address: &str, behaviour: Behaviour) -> &Self {
        self.script.lock().insert(address.to_string(), behaviour);
        log::debug!("[stub] {} scripted", address);
        self
    }

    pub fn set_fallback(&self, behaviour: Behaviour) -> &Self {
        *self.fallback.lock() = behaviour;
        self
    }

    /// Every probed address, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, address: &str) -> usize {
        self.calls.lock().iter().filter(|a| a.as_str() == address).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn behaviour_for(&self, address: &str) -> Behaviour {
        self.script
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new()
    }
}

async fn play(mut behaviour: Behaviour) -> ProbeOutcome {
    loop {
        match behaviour {
            Behaviour::Reply { rtt_ms, loss_pct } => {
                return ProbeOutcome::Reachable { round_trip_ms: rtt_ms, loss_pct };
            }
            Behaviour::Down => return ProbeOutcome::Unreachable,
            Behaviour::Fail(reason) => return ProbeOutcome::Failed(reason),
            Behaviour::Hang => return std::future::pending().await,
            Behaviour::Slow { after, then } => {
                tokio::time::sleep(after).await;
                behaviour = *then;
            }
        }
    }
}

#[async_trait::async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        self.calls.lock().push(address.to_string());
        play(self.behaviour_for(address)).await
    }
}
