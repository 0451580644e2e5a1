use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "PINGWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "pingwatch.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    pub probe: ProbeConf,
    pub hub: HubConf,
    /// Seeded into the registry at startup, import rules apply.
    pub hosts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProbeConf {
    pub echo_count: u16,
    pub echo_timeout_ms: u64,
    pub host_timeout_ms: u64,
    pub interval_ms: u64,
    pub payload_size: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HubConf {
    pub subscriber_buffer: usize,
    pub send_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            probe: ProbeConf::default(),
            hub: HubConf::default(),
            hosts: Vec::new(),
        }
    }
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            echo_count: 3,
            echo_timeout_ms: 300,
            host_timeout_ms: 1000,
            interval_ms: 1000,
            payload_size: 56,
            max_concurrency: 64,
        }
    }
}

impl Default for HubConf {
    fn default() -> Self {
        Self { subscriber_buffer: 16, send_timeout_ms: 1000 }
    }
}

impl ProbeConf {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl HubConf {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Replaces zero values with defaults.
    pub fn sanitize(mut self) -> Self {
        let d = ProbeConf::default();
        let p = &mut self.probe;
        if p.echo_count == 0 {
            warn!("probe.echo_count must be > 0, using {}", d.echo_count);
            p.echo_count = d.echo_count;
        }
        if p.echo_timeout_ms == 0 {
            warn!("probe.echo_timeout_ms must be > 0, using {}", d.echo_timeout_ms);
            p.echo_timeout_ms = d.echo_timeout_ms;
        }
        if p.host_timeout_ms == 0 {
            warn!("probe.host_timeout_ms must be > 0, using {}", d.host_timeout_ms);
            p.host_timeout_ms = d.host_timeout_ms;
        }
        if p.interval_ms == 0 {
            warn!("probe.interval_ms must be > 0, using {}", d.interval_ms);
            p.interval_ms = d.interval_ms;
        }
        if p.max_concurrency == 0 {
            warn!("probe.max_concurrency must be > 0, using {}", d.max_concurrency);
            p.max_concurrency = d.max_concurrency;
        }
        if p.host_timeout_ms < p.echo_timeout_ms.saturating_mul(u64::from(p.echo_count)) {
            warn!(
                "probe.host_timeout_ms ({}) is shorter than {} echoes x {}ms, late echoes will be cut",
                p.host_timeout_ms, p.echo_count, p.echo_timeout_ms
            );
        }

        let dh = HubConf::default();
        if self.hub.subscriber_buffer == 0 {
            warn!("hub.subscriber_buffer must be > 0, using {}", dh.subscriber_buffer);
            self.hub.subscriber_buffer = dh.subscriber_buffer;
        }
        if self.hub.send_timeout_ms == 0 {
            warn!("hub.send_timeout_ms must be > 0, using {}", dh.send_timeout_ms);
            self.hub.send_timeout_ms = dh.send_timeout_ms;
        }
        self
    }

    /// `PINGWATCH_LISTEN` and `PINGWATCH_INTERVAL_MS` win over the file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(listen) = std::env::var("PINGWATCH_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => self.listen = addr,
                Err(e) => warn!("ignoring PINGWATCH_LISTEN={listen}: {e}"),
            }
        }
        if let Ok(interval) = std::env::var("PINGWATCH_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(ms) => self.probe.interval_ms = ms,
                Err(e) => warn!("ignoring PINGWATCH_INTERVAL_MS={interval}: {e}"),
            }
        }
        self
    }
}

/// Reads the YAML config; any problem falls back to defaults so the monitor
/// always starts.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let cfg = if Path::new(&path).exists() {
        match read_config(&path).await {
            Ok(cfg) => {
                info!("loaded config from {path}");
                cfg
            }
            Err(e) => {
                warn!("invalid config {path}: {e}, using defaults");
                KernelConfig::default()
            }
        }
    } else {
        info!("no {path}, using default config");
        KernelConfig::default()
    };
    cfg.apply_env_overrides().sanitize()
}

async fn read_config(path: &str) -> Result<KernelConfig, ConfigError> {
    let txt = fs::read_to_string(path).await?;
    KernelConfig::from_yaml(&txt)
}
