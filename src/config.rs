//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_BOOTSTRAP_SERVER: &str = "127.0.0.1:7700";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:27777";
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
const DEFAULT_REPORT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY: Duration = Duration::from_secs(30);
const DEFAULT_LOG_REPORT: Duration = Duration::from_secs(5);
const DEFAULT_LOG_BATCH_SIZE: usize = 256;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// The log queue holds this many batches before enqueues start dropping.
pub const LOG_QUEUE_BATCHES: usize = 4;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Initial server address used until discovery resolves a fresher one.
    pub bootstrap_server: String,
    /// Application name registered on the server.
    pub app_name: String,
    /// Client version reported during discovery.
    pub client_version: String,
    /// Address the inbound HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Address advertised to the server. Defaults to the listen address.
    pub worker_address: String,
    pub heartbeat_interval: Duration,
    pub report_interval: Duration,
    pub discovery_interval: Duration,
    pub log_report_interval: Duration,
    /// Maximum entries per shipped log batch.
    pub log_batch_size: usize,
    /// Timeout for each outbound request to the server.
    pub http_timeout: Duration,
    /// libSQL database file. `None` keeps instance records in memory.
    pub db_path: Option<PathBuf>,
    /// Route prefix for the inbound endpoints.
    pub route_base: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let listen_addr: SocketAddr = ([0, 0, 0, 0], 27777).into();
        Self {
            bootstrap_server: DEFAULT_BOOTSTRAP_SERVER.to_string(),
            app_name: "powerjob-worker".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr,
            worker_address: listen_addr.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT,
            report_interval: DEFAULT_REPORT,
            discovery_interval: DEFAULT_DISCOVERY,
            log_report_interval: DEFAULT_LOG_REPORT,
            log_batch_size: DEFAULT_LOG_BATCH_SIZE,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            db_path: None,
            route_base: "/worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Build config from `POWERJOB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Missing keys use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_raw =
            lookup("POWERJOB_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr =
            listen_raw
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                    key: "POWERJOB_LISTEN_ADDR".to_string(),
                    message: format!("{listen_raw}: {e}"),
                })?;

        let secs = |key: &str| -> Duration {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO)
        };

        let mut config = Self {
            bootstrap_server: lookup("POWERJOB_BOOTSTRAP_SERVER")
                .unwrap_or(defaults.bootstrap_server),
            app_name: lookup("POWERJOB_APP_NAME").unwrap_or(defaults.app_name),
            client_version: lookup("POWERJOB_CLIENT_VERSION").unwrap_or(defaults.client_version),
            listen_addr,
            worker_address: lookup("POWERJOB_WORKER_ADDRESS")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| listen_addr.to_string()),
            heartbeat_interval: secs("POWERJOB_HEARTBEAT_SECS"),
            report_interval: secs("POWERJOB_REPORT_SECS"),
            discovery_interval: secs("POWERJOB_DISCOVERY_SECS"),
            log_report_interval: secs("POWERJOB_LOG_REPORT_SECS"),
            log_batch_size: lookup("POWERJOB_LOG_BATCH_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            http_timeout: secs("POWERJOB_HTTP_TIMEOUT_SECS"),
            db_path: lookup("POWERJOB_DB_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            route_base: lookup("POWERJOB_ROUTE_BASE").unwrap_or(defaults.route_base),
        };
        config.with_defaults();

        if config.app_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "POWERJOB_APP_NAME".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(config)
    }

    /// Replace zero intervals and sizes with their defaults.
    pub fn with_defaults(&mut self) {
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT;
        }
        if self.report_interval.is_zero() {
            self.report_interval = DEFAULT_REPORT;
        }
        if self.discovery_interval.is_zero() {
            self.discovery_interval = DEFAULT_DISCOVERY;
        }
        if self.log_report_interval.is_zero() {
            self.log_report_interval = DEFAULT_LOG_REPORT;
        }
        if self.log_batch_size == 0 {
            self.log_batch_size = DEFAULT_LOG_BATCH_SIZE;
        }
        if self.http_timeout.is_zero() {
            self.http_timeout = DEFAULT_HTTP_TIMEOUT;
        }
        if !self.route_base.starts_with('/') {
            self.route_base.insert(0, '/');
        }
        while self.route_base.len() > 1 && self.route_base.ends_with('/') {
            self.route_base.pop();
        }
    }

    /// Capacity of the bounded log queue.
    pub fn log_queue_capacity(&self) -> usize {
        self.log_batch_size.max(1) * LOG_QUEUE_BATCHES
    }
}
