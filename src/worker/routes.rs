//! Inbound HTTP endpoints the server calls on the worker.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::dispatcher::{Dispatcher, RunOutcome};
use crate::client::types::{InstanceIdReq, ServerScheduleJobReq};
use crate::error::DatabaseError;

/// Router state shared across handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the worker router. `base` prefixes the job endpoints, e.g. `/worker`.
pub fn worker_routes(dispatcher: Arc<Dispatcher>, base: &str) -> Router {
    let base = base.trim_end_matches('/');
    Router::new()
        .route("/health", get(health))
        .route(&format!("{base}/runJob"), post(run_job))
        .route(&format!("{base}/stopInstance"), post(stop_instance))
        .route(&format!("{base}/queryInstanceStatus"), post(query_instance_status))
        .layer(TraceLayer::new_for_http())
        .with_state(WorkerState { dispatcher })
}

async fn health(State(state): State<WorkerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "running": state.dispatcher.running_count(),
    }))
}

fn write_err(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"success": false, "message": message.into()})),
    )
        .into_response()
}

fn ok_response() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"success": true}))).into_response()
}

/// Parse a JSON body, mapping any failure to a 400 response.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Malformed request body");
        write_err(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    })
}

fn require_instance_id(instance_id: i64) -> Result<(), Response> {
    if instance_id <= 0 {
        return Err(write_err(
            StatusCode::BAD_REQUEST,
            "instanceId must be positive",
        ));
    }
    Ok(())
}

async fn run_job(State(state): State<WorkerState>, body: Bytes) -> Response {
    let req: ServerScheduleJobReq = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_instance_id(req.instance_id) {
        return resp;
    }

    // Duplicates and unknown processors are acknowledged; the outcome is
    // visible through the instance record.
    let outcome = state.dispatcher.run_job(&req).await;
    if outcome == RunOutcome::Duplicate {
        tracing::debug!(instance_id = req.instance_id, "Acknowledged duplicate run request");
    }
    ok_response()
}

async fn stop_instance(State(state): State<WorkerState>, body: Bytes) -> Response {
    let req: InstanceIdReq = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    state.dispatcher.stop_instance(req.instance_id).await;
    ok_response()
}

async fn query_instance_status(State(state): State<WorkerState>, body: Bytes) -> Response {
    let req: InstanceIdReq = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state.dispatcher.query(req.instance_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(DatabaseError::NotFound { instance_id }) => {
            write_err(StatusCode::NOT_FOUND, format!("instance {instance_id} not found"))
        }
        Err(e) => {
            warn!(instance_id = req.instance_id, error = %e, "Instance query failed");
            write_err(StatusCode::NOT_FOUND, "instance unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::processor::ProcessorRegistry;
    use crate::store::MemoryStore;
    use crate::tracker::InstanceTracker;

    fn router() -> Router {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ProcessorRegistry::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(InstanceTracker::new(CancellationToken::new())),
            None,
        ));
        worker_routes(dispatcher, "/worker/")
    }

    async fn post(router: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = router
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (status, body) = post(router(), "/worker/runJob", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("invalid request body"));
    }

    #[tokio::test]
    async fn non_positive_instance_id_only_rejected_on_run() {
        let (status, _) = post(
            router(),
            "/worker/runJob",
            r#"{"instanceId":0,"jobId":7,"processorInfo":"simple"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(router(), "/worker/stopInstance", r#"{"instanceId":0}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) =
            post(router(), "/worker/queryInstanceStatus", r#"{"instanceId":0}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_instance_query_is_not_found() {
        let (status, body) =
            post(router(), "/worker/queryInstanceStatus", r#"{"instanceId":77}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn stop_unknown_is_ok() {
        let (status, body) = post(router(), "/worker/stopInstance", r#"{"instanceId":5}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn health_reports_running_count() {
        let resp = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["running"], 0);
    }
}
