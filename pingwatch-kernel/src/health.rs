use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the scheduler loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPhase {
    Idle,
    Probing,
    Broadcasting,
}

impl SchedulerPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerPhase::Probing,
            2 => SchedulerPhase::Broadcasting,
            _ => SchedulerPhase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedulerPhase::Idle => 0,
            SchedulerPhase::Probing => 1,
            SchedulerPhase::Broadcasting => 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u32,
    pub subscribers: u32,
    pub cycles_completed: u64,
    pub last_cycle_ms: u64,
    pub scheduler_phase: SchedulerPhase,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles: Arc<AtomicU64>,
    last_cycle_ms: Arc<AtomicU64>,
    phase: Arc<AtomicU8>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: Arc::new(AtomicU64::new(0)),
            last_cycle_ms: Arc::new(AtomicU64::new(0)),
            phase: Arc::new(AtomicU8::new(SchedulerPhase::Idle.as_u8())),
        }
    }

    pub fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> SchedulerPhase {
        SchedulerPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn record_cycle(&self, took: Duration) {
        self.last_cycle_ms.store(took.as_millis() as u64, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, hosts_tracked: usize, subscribers: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_tracked: hosts_tracked as u32,
            subscribers: subscribers as u32,
            cycles_completed: self.cycles_completed(),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            scheduler_phase: self.phase(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
