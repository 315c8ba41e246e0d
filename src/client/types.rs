//! Wire types of the worker ↔ server protocol.
//!
//! Field names follow the server's camelCase JSON contract.

use serde::{Deserialize, Serialize};

use crate::worker::state::InstanceStatus;

/// Protocol tag sent with heartbeats and discovery requests.
pub const PROTOCOL_HTTP: &str = "HTTP";

/// Envelope the server wraps every response in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonResp<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// Run request pushed by the server (`runJob`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerScheduleJobReq {
    #[serde(default)]
    pub all_worker_address: Vec<String>,
    pub job_id: i64,
    #[serde(default)]
    pub wf_instance_id: Option<i64>,
    pub instance_id: i64,
    #[serde(default)]
    pub execute_type: String,
    #[serde(default)]
    pub processor_type: String,
    #[serde(default)]
    pub processor_info: String,
    #[serde(default, rename = "instanceTimeoutMS")]
    pub instance_timeout_ms: i64,
    #[serde(default)]
    pub job_params: String,
    #[serde(default)]
    pub instance_params: Option<String>,
    #[serde(default)]
    pub thread_concurrency: i32,
    #[serde(default)]
    pub task_retry_num: i32,
    #[serde(default)]
    pub time_expression_type: String,
    #[serde(default)]
    pub time_expression: Option<String>,
    #[serde(default)]
    pub max_instance_num: i32,
}

impl ServerScheduleJobReq {
    /// Minimal request, mostly for hosts and tests driving the dispatcher directly.
    pub fn new(instance_id: i64, job_id: i64, processor_info: &str, job_params: &str) -> Self {
        Self {
            all_worker_address: Vec::new(),
            job_id,
            wf_instance_id: None,
            instance_id,
            execute_type: String::new(),
            processor_type: String::new(),
            processor_info: processor_info.to_string(),
            instance_timeout_ms: 0,
            job_params: job_params.to_string(),
            instance_params: None,
            thread_concurrency: 0,
            task_retry_num: 0,
            time_expression_type: String::new(),
            time_expression: None,
            max_instance_num: 0,
        }
    }
}

/// Body of `stopInstance` and `queryInstanceStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdReq {
    pub instance_id: i64,
}

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeat {
    pub worker_address: String,
    pub heartbeat_time: i64,
    pub protocol: String,
    pub system_metrics: SystemMetrics,
}

/// Machine health snapshot. Memory fields keep the server's `jvm*` names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(rename = "cpuLoad")]
    pub cpu_load: f64,
    #[serde(rename = "cpuProcessors")]
    pub cpu_processors: u32,
    #[serde(rename = "diskTotal")]
    pub disk_total_gb: f64,
    #[serde(rename = "diskUsage")]
    pub disk_usage_ratio: f64,
    #[serde(rename = "diskUsed")]
    pub disk_used_gb: f64,
    #[serde(rename = "jvmMaxMemory")]
    pub max_memory_gb: f64,
    #[serde(rename = "jvmMemoryUsage")]
    pub memory_usage_ratio: f64,
    #[serde(rename = "jvmUsedMemory")]
    pub used_memory_gb: f64,
    pub score: f64,
}

/// Per-instance status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusReport {
    pub job_id: i64,
    pub instance_id: i64,
    pub report_time: i64,
    pub source_address: String,
    pub instance_status: InstanceStatus,
}

/// Online log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Self::Debug),
            2 => Ok(Self::Info),
            3 => Ok(Self::Warn),
            4 => Ok(Self::Error),
            other => Err(format!("log level must be 1..=4, got {other}")),
        }
    }
}

/// One online log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub instance_id: i64,
    pub log_content: String,
    pub log_level: LogLevel,
    /// Milliseconds since the Unix epoch.
    pub log_time: i64,
}

impl LogEntry {
    pub fn new(instance_id: i64, level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            instance_id,
            log_content: content.into(),
            log_level: level,
            log_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Entries without an instance or a timestamp are never shipped.
    pub fn is_shippable(&self) -> bool {
        self.instance_id != 0 && self.log_time != 0
    }
}

/// Batched log upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReportRequest {
    pub instance_log_contents: Vec<LogEntry>,
    pub worker_address: String,
}
