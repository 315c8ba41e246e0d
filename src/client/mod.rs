//! Outbound transport to the scheduling server.

pub mod http;
pub mod types;

use async_trait::async_trait;

use crate::error::ServerApiError;

pub use http::HttpServerApi;
pub use types::{
    InstanceStatusReport, LogEntry, LogLevel, LogReportRequest, ServerScheduleJobReq,
    SystemMetrics, WorkerHeartbeat,
};

/// Worker → server operations. All of them are safe to retry.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Check the application is registered; returns its id.
    async fn assert_app(&self, bootstrap: &str, app_name: &str) -> Result<i64, ServerApiError>;

    /// Resolve the server address currently responsible for this application.
    async fn acquire(
        &self,
        bootstrap: &str,
        app_id: i64,
        current_server: &str,
        client_version: &str,
    ) -> Result<String, ServerApiError>;

    async fn heartbeat(
        &self,
        server_addr: &str,
        heartbeat: &WorkerHeartbeat,
    ) -> Result<(), ServerApiError>;

    async fn report_instance_status(
        &self,
        server_addr: &str,
        report: &InstanceStatusReport,
    ) -> Result<(), ServerApiError>;

    async fn report_log(
        &self,
        server_addr: &str,
        request: &LogReportRequest,
    ) -> Result<(), ServerApiError>;
}
