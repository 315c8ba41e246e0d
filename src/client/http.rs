//! HTTP implementation of [`ServerApi`] on top of reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::ServerApi;
use super::types::{
    CommonResp, InstanceStatusReport, LogReportRequest, PROTOCOL_HTTP, WorkerHeartbeat,
};
use crate::error::ServerApiError;

/// Talks to the server over plain HTTP/JSON.
pub struct HttpServerApi {
    client: reqwest::Client,
}

impl HttpServerApi {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ServerApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerApiError::RequestFailed {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    fn url(host: &str, path: &str) -> String {
        format!("http://{host}{path}")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<CommonResp<T>, ServerApiError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ServerApiError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServerApiError::Status {
                method: "GET",
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<CommonResp<T>>()
            .await
            .map_err(|e| ServerApiError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(), ServerApiError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServerApiError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServerApiError::Status {
                method: "POST",
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Unwrap a `CommonResp`, turning `success=false` or a missing payload into errors.
fn into_data<T>(operation: &str, resp: CommonResp<T>) -> Result<T, ServerApiError> {
    if !resp.success {
        return Err(ServerApiError::Rejected {
            operation: operation.to_string(),
            message: resp.message.unwrap_or_default(),
        });
    }
    resp.data.ok_or_else(|| ServerApiError::Rejected {
        operation: operation.to_string(),
        message: "response carried no data".to_string(),
    })
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn assert_app(&self, bootstrap: &str, app_name: &str) -> Result<i64, ServerApiError> {
        let url = Self::url(bootstrap, "/server/assert");
        let resp = self
            .get_json::<i64>(&url, &[("appName", app_name.to_string())])
            .await?;
        into_data("assert app", resp)
    }

    async fn acquire(
        &self,
        bootstrap: &str,
        app_id: i64,
        current_server: &str,
        client_version: &str,
    ) -> Result<String, ServerApiError> {
        let url = Self::url(bootstrap, "/server/acquire");
        let mut query = vec![
            ("appId", app_id.to_string()),
            ("protocol", PROTOCOL_HTTP.to_string()),
        ];
        if !current_server.is_empty() {
            query.push(("currentServer", current_server.to_string()));
        }
        if !client_version.is_empty() {
            query.push(("clientVersion", client_version.to_string()));
        }
        let resp = self.get_json::<String>(&url, &query).await?;
        into_data("acquire", resp)
    }

    async fn heartbeat(
        &self,
        server_addr: &str,
        heartbeat: &WorkerHeartbeat,
    ) -> Result<(), ServerApiError> {
        self.post_json(&Self::url(server_addr, "/server/workerHeartbeat"), heartbeat)
            .await
    }

    async fn report_instance_status(
        &self,
        server_addr: &str,
        report: &InstanceStatusReport,
    ) -> Result<(), ServerApiError> {
        self.post_json(&Self::url(server_addr, "/server/reportInstanceStatus"), report)
            .await
    }

    async fn report_log(
        &self,
        server_addr: &str,
        request: &LogReportRequest,
    ) -> Result<(), ServerApiError> {
        self.post_json(&Self::url(server_addr, "/server/reportLog"), request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;
    use crate::client::types::{LogEntry, LogLevel, SystemMetrics};
    use crate::worker::state::InstanceStatus;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    fn api() -> HttpServerApi {
        HttpServerApi::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn assert_and_acquire() {
        let seen_query: Arc<Mutex<HashMap<String, String>>> = Arc::default();
        let seen = Arc::clone(&seen_query);
        let app = Router::new()
            .route(
                "/server/assert",
                get(|| async { Json(serde_json::json!({"success": true, "data": 123})) }),
            )
            .route(
                "/server/acquire",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        *seen.lock().unwrap() = q;
                        Json(serde_json::json!({"success": true, "data": "127.0.0.1:10010"}))
                    }
                }),
            );
        let host = serve(app).await;
        let api = api();

        let app_id = api.assert_app(&host, "demo").await.unwrap();
        assert_eq!(app_id, 123);

        let addr = api.acquire(&host, app_id, "boot:7700", "0.1.0").await.unwrap();
        assert_eq!(addr, "127.0.0.1:10010");

        let q = seen_query.lock().unwrap().clone();
        assert_eq!(q.get("appId").map(String::as_str), Some("123"));
        assert_eq!(q.get("currentServer").map(String::as_str), Some("boot:7700"));
        assert_eq!(q.get("protocol").map(String::as_str), Some("HTTP"));
        assert_eq!(q.get("clientVersion").map(String::as_str), Some("0.1.0"));
    }

    #[tokio::test]
    async fn assert_rejected_when_success_false() {
        let app = Router::new().route(
            "/server/assert",
            get(|| async {
                Json(serde_json::json!({"success": false, "message": "app not found"}))
            }),
        );
        let host = serve(app).await;
        let err = api().assert_app(&host, "none").await.unwrap_err();
        assert!(matches!(err, ServerApiError::Rejected { .. }));
        assert!(err.to_string().contains("app not found"));
    }

    #[tokio::test]
    async fn acquire_fails_on_non_2xx() {
        let app = Router::new().route(
            "/server/acquire",
            get(|| async { (StatusCode::BAD_REQUEST, "bad") }),
        );
        let host = serve(app).await;
        let err = api().acquire(&host, 1, "", "0.1.0").await.unwrap_err();
        match err {
            ServerApiError::Status { status, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn posts_reports_as_json() {
        let bodies: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let record = |bodies: Arc<Mutex<Vec<serde_json::Value>>>| {
            move |Json(body): Json<serde_json::Value>| {
                let bodies = Arc::clone(&bodies);
                async move {
                    bodies.lock().unwrap().push(body);
                    StatusCode::OK
                }
            }
        };
        let app = Router::new()
            .route("/server/workerHeartbeat", post(record(Arc::clone(&bodies))))
            .route("/server/reportInstanceStatus", post(record(Arc::clone(&bodies))))
            .route("/server/reportLog", post(record(Arc::clone(&bodies))));
        let host = serve(app).await;
        let api = api();

        api.heartbeat(
            &host,
            &WorkerHeartbeat {
                worker_address: "w:1".into(),
                heartbeat_time: 1,
                protocol: PROTOCOL_HTTP.into(),
                system_metrics: SystemMetrics::default(),
            },
        )
        .await
        .unwrap();
        api.report_instance_status(
            &host,
            &InstanceStatusReport {
                job_id: 7,
                instance_id: 1,
                report_time: 2,
                source_address: "w:1".into(),
                instance_status: InstanceStatus::Running,
            },
        )
        .await
        .unwrap();
        api.report_log(
            &host,
            &LogReportRequest {
                instance_log_contents: vec![LogEntry {
                    instance_id: 1,
                    log_content: "a".into(),
                    log_level: LogLevel::Info,
                    log_time: 3,
                }],
                worker_address: "w:1".into(),
            },
        )
        .await
        .unwrap();

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["workerAddress"], "w:1");
        assert_eq!(bodies[1]["instanceStatus"], 3);
        assert_eq!(bodies[2]["instanceLogContents"][0]["logContent"], "a");
    }

    #[tokio::test]
    async fn unreachable_server_is_request_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = api().heartbeat(&host, &WorkerHeartbeat {
            worker_address: "w".into(),
            heartbeat_time: 0,
            protocol: PROTOCOL_HTTP.into(),
            system_metrics: SystemMetrics::default(),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServerApiError::RequestFailed { .. }));
    }
}
