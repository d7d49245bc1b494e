use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;

/// Server settings, read from `SEATLINE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    /// `None` when `SEATLINE_QUEUE_TIMEOUT_MS=0`: waiters queue indefinitely.
    pub queue_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "seatline".into(),
            max_connections: 256,
            compact_threshold: 1000,
            queue_timeout: Some(Duration::from_millis(5_000)),
            sweep_interval: Duration::from_millis(30_000),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

        let queue_timeout = match parsed("SEATLINE_QUEUE_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.queue_timeout,
        };
        let sweep_interval = parsed("SEATLINE_SWEEP_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.sweep_interval);

        Self {
            port: number(&get, "SEATLINE_PORT").unwrap_or(defaults.port),
            bind: get("SEATLINE_BIND").unwrap_or(defaults.bind),
            data_dir: get("SEATLINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: get("SEATLINE_PASSWORD").unwrap_or(defaults.password),
            max_connections: number(&get, "SEATLINE_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: number(&get, "SEATLINE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            queue_timeout,
            sweep_interval,
            metrics_port: number(&get, "SEATLINE_METRICS_PORT"),
            tls_cert: get("SEATLINE_TLS_CERT"),
            tls_key: get("SEATLINE_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            queue_timeout: self.queue_timeout,
        }
    }
}

fn number<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}
