//! Integration tests for the worker runtime.
//!
//! Each test starts a full `WorkerRuntime` on a random port against a stub
//! server API and drives the inbound HTTP contract with reqwest.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use powerjob_worker::client::types::{LogLevel, SystemMetrics};
use powerjob_worker::client::{
    InstanceStatusReport, LogReportRequest, ServerApi, WorkerHeartbeat,
};
use powerjob_worker::config::WorkerConfig;
use powerjob_worker::error::{Error, ProcessorError, ServerApiError};
use powerjob_worker::metrics::MetricsSampler;
use powerjob_worker::processor::{
    ProcessResult, Processor, ProcessorContext, ProcessorRegistry, SimpleProcessor,
};
use powerjob_worker::store::MemoryStore;
use powerjob_worker::worker::{WorkerDeps, WorkerRuntime};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub scheduling server (no network calls).
#[derive(Default)]
struct StubServer {
    reject_assert: AtomicBool,
    log_calls: AtomicUsize,
    logs: Mutex<Vec<LogReportRequest>>,
}

impl StubServer {
    fn shipped_lines(&self) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.instance_log_contents.len())
            .sum()
    }
}

#[async_trait]
impl ServerApi for StubServer {
    async fn assert_app(&self, _bootstrap: &str, _app_name: &str) -> Result<i64, ServerApiError> {
        if self.reject_assert.load(Ordering::SeqCst) {
            return Err(ServerApiError::Rejected {
                operation: "assert".into(),
                message: "unknown app".into(),
            });
        }
        Ok(42)
    }

    async fn acquire(&self, _: &str, _: i64, current: &str, _: &str) -> Result<String, ServerApiError> {
        Ok(current.to_string())
    }

    async fn heartbeat(&self, _: &str, _: &WorkerHeartbeat) -> Result<(), ServerApiError> {
        Ok(())
    }

    async fn report_instance_status(
        &self,
        _: &str,
        _: &InstanceStatusReport,
    ) -> Result<(), ServerApiError> {
        Ok(())
    }

    async fn report_log(&self, _: &str, request: &LogReportRequest) -> Result<(), ServerApiError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.logs.lock().unwrap().push(request.clone());
        Ok(())
    }
}

struct IdleSampler;

#[async_trait]
impl MetricsSampler for IdleSampler {
    async fn sample(&self) -> SystemMetrics {
        SystemMetrics::default()
    }
}

/// Counts invocations and sleeps a little, observing cancellation.
#[derive(Default)]
struct CountingProcessor {
    runs: AtomicUsize,
}

#[async_trait]
impl Processor for CountingProcessor {
    fn task_key(&self) -> &str {
        "count"
    }

    async fn run(
        &self,
        ctx: &ProcessorContext,
        _params: &str,
    ) -> Result<ProcessResult, ProcessorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.sleep(Duration::from_millis(50)).await?;
        Ok(ProcessResult::ok())
    }
}

/// Runs until canceled, then logs one last line on the way out.
struct FarewellProcessor;

#[async_trait]
impl Processor for FarewellProcessor {
    fn task_key(&self) -> &str {
        "farewell"
    }

    async fn run(
        &self,
        ctx: &ProcessorContext,
        _params: &str,
    ) -> Result<ProcessResult, ProcessorError> {
        if let Err(e) = ctx.sleep(Duration::from_secs(60)).await {
            ctx.logger.warn("interrupted, cleaning up");
            return Err(e);
        }
        Ok(ProcessResult::ok())
    }
}

fn test_config(log_batch_size: usize) -> WorkerConfig {
    let mut config = WorkerConfig {
        bootstrap_server: "127.0.0.1:1".to_string(),
        listen_addr: ([127, 0, 0, 1], 0).into(),
        heartbeat_interval: Duration::from_secs(3600),
        report_interval: Duration::from_secs(3600),
        discovery_interval: Duration::from_secs(3600),
        log_report_interval: Duration::from_secs(3600),
        log_batch_size,
        ..Default::default()
    };
    config.worker_address = config.listen_addr.to_string();
    config
}

struct Harness {
    runtime: WorkerRuntime,
    server: Arc<StubServer>,
    counter: Arc<CountingProcessor>,
    base: String,
    http: reqwest::Client,
}

async fn start_worker(log_batch_size: usize) -> Harness {
    let server = Arc::new(StubServer::default());
    let counter = Arc::new(CountingProcessor::default());

    let registry = Arc::new(ProcessorRegistry::new());
    registry.register(Arc::new(SimpleProcessor)).await.unwrap();
    registry.register(counter.clone()).await.unwrap();
    registry.register(Arc::new(FarewellProcessor)).await.unwrap();

    let deps = WorkerDeps {
        api: server.clone(),
        store: Arc::new(MemoryStore::new()),
        registry,
        sampler: Arc::new(IdleSampler),
    };
    let runtime = WorkerRuntime::start(test_config(log_batch_size), deps, CancellationToken::new())
        .await
        .unwrap();
    let base = format!("http://{}/worker", runtime.local_addr());

    Harness {
        runtime,
        server,
        counter,
        base,
        http: reqwest::Client::new(),
    }
}

impl Harness {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.post_raw(path, body.to_string()).await
    }

    async fn post_raw(&self, path: &str, body: String) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}/{path}", self.base))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        let json = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, json)
    }

    async fn query(&self, instance_id: i64) -> (u16, Value) {
        self.post("queryInstanceStatus", json!({"instanceId": instance_id}))
            .await
    }

    /// Poll until the instance reaches `status`.
    async fn wait_status(&self, instance_id: i64, status: i64) -> Value {
        timeout(Duration::from_secs(2), async {
            loop {
                let (code, body) = self.query(instance_id).await;
                if code == 200 && body["status"] == status {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("instance {instance_id} never reached status {status}"))
    }
}

fn run_request(instance_id: i64, processor: &str, params: &str) -> Value {
    json!({
        "allWorkerAddress": [],
        "jobId": 7,
        "instanceId": instance_id,
        "executeType": "STANDALONE",
        "processorType": "BUILT_IN",
        "processorInfo": processor,
        "instanceTimeoutMS": 0,
        "jobParams": params,
        "threadConcurrency": 1,
        "taskRetryNum": 0,
        "timeExpressionType": "API",
        "maxInstanceNum": 0
    })
}

#[tokio::test]
async fn simple_job_succeeds() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;
        assert_eq!(h.runtime.app_id(), 42);

        let (status, body) = h
            .post("runJob", run_request(1, "simple", r#"{"sleepMS":10}"#))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let record = h.wait_status(1, 5).await;
        assert_eq!(record["resultCode"], 0);
        assert_eq!(record["resultMessage"], "ok");
        assert_eq!(record["jobId"], 7);

        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_processor_fails_immediately() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        let (status, _) = h.post("runJob", run_request(2, "missing", "")).await;
        assert_eq!(status, 200);

        let (status, record) = h.query(2).await;
        assert_eq!(status, 200);
        assert_eq!(record["status"], 4);
        assert_eq!(record["resultCode"], -1);

        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_running_instance() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        h.post("runJob", run_request(3, "simple", r#"{"sleepMS":60000}"#))
            .await;
        let (status, record) = h.query(3).await;
        assert_eq!(status, 200);
        assert_eq!(record["status"], 3);

        let (status, body) = h.post("stopInstance", json!({"instanceId": 3})).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let record = h.wait_status(3, 10).await;
        assert_eq!(record["resultMessage"], "stopped");

        // The canceled handler must not overwrite the stopped status.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.query(3).await.1["status"], 10);

        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_unknown_instance_is_advisory() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        let (status, _) = h.post("stopInstance", json!({"instanceId": 404})).await;
        assert_eq!(status, 200);

        let (status, body) = h.query(404).await;
        assert_eq!(status, 404);
        assert_eq!(body["success"], false);

        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn concurrent_duplicates_run_once() {
    timeout(TEST_TIMEOUT, async {
        let h = Arc::new(start_worker(256).await);

        let mut requests = Vec::new();
        for _ in 0..10 {
            let h = Arc::clone(&h);
            requests.push(tokio::spawn(async move {
                h.post("runJob", run_request(5, "count", "")).await.0
            }));
        }
        for request in requests {
            assert_eq!(request.await.unwrap(), 200);
        }

        h.wait_status(5, 5).await;
        assert_eq!(h.counter.runs.load(Ordering::SeqCst), 1);

        let h = Arc::into_inner(h).expect("no outstanding harness references");
        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        let (status, body) = h.post_raw("runJob", "{\"instanceId\":".to_string()).await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (status, _) = h.post("runJob", json!({"jobId": 1})).await;
        assert_eq!(status, 400);

        h.runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn log_pressure_drops_without_blocking() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(2).await;
        let capacity = h.runtime.log_shipper().capacity();
        assert_eq!(capacity, 8);

        for n in 0..50 {
            h.runtime.log(9, LogLevel::Info, format!("line {n}"), 0);
        }
        let dropped = h.runtime.log_shipper().dropped();
        assert!(dropped > 0);

        let server = Arc::clone(&h.server);
        h.runtime.shutdown().await;
        assert_eq!(server.shipped_lines() as u64 + dropped, 50);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn shutdown_flushes_buffered_logs_once() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        h.runtime.log(11, LogLevel::Info, "first", 0);
        h.runtime.log(11, LogLevel::Warn, "second", 1_700_000_000_000);
        h.runtime.log(0, LogLevel::Error, "never shipped", 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.server.log_calls.load(Ordering::SeqCst), 0);

        let server = Arc::clone(&h.server);
        h.runtime.shutdown().await;

        assert_eq!(server.log_calls.load(Ordering::SeqCst), 1);
        let logs = server.logs.lock().unwrap();
        let entries = &logs[0].instance_log_contents;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].log_content, "first");
        assert_eq!(entries[1].log_time, 1_700_000_000_000);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn logs_written_during_shutdown_are_shipped() {
    timeout(TEST_TIMEOUT, async {
        let h = start_worker(256).await;

        h.post("runJob", run_request(12, "farewell", "")).await;
        h.wait_status(12, 3).await;

        let server = Arc::clone(&h.server);
        h.runtime.shutdown().await;

        let logs = server.logs.lock().unwrap();
        let lines: Vec<&str> = logs
            .iter()
            .flat_map(|r| r.instance_log_contents.iter())
            .filter(|e| e.instance_id == 12)
            .map(|e| e.log_content.as_str())
            .collect();
        assert_eq!(lines, vec!["interrupted, cleaning up"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_app_check_still_starts() {
    timeout(TEST_TIMEOUT, async {
        let server = Arc::new(StubServer::default());
        server.reject_assert.store(true, Ordering::SeqCst);
        let deps = WorkerDeps {
            api: server,
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(ProcessorRegistry::new()),
            sampler: Arc::new(IdleSampler),
        };
        let runtime = WorkerRuntime::start(test_config(256), deps, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(runtime.app_id(), 0);
        assert_eq!(runtime.server_address(), "127.0.0.1:1");
        assert_ne!(runtime.local_addr().port(), 0);
        assert_eq!(runtime.worker_address(), runtime.local_addr().to_string());
        runtime.shutdown().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn occupied_port_is_fatal() {
    timeout(TEST_TIMEOUT, async {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(256);
        config.listen_addr = occupied.local_addr().unwrap();

        let deps = WorkerDeps {
            api: Arc::new(StubServer::default()),
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(ProcessorRegistry::new()),
            sampler: Arc::new(IdleSampler),
        };
        let err = WorkerRuntime::start(config, deps, CancellationToken::new())
            .await
            .err()
            .expect("bind should fail");
        assert!(matches!(err, Error::Bind { .. }));
    })
    .await
    .expect("test timed out");
}
