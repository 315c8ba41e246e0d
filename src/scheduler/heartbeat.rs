//! Heartbeat loop: periodic liveness and health reports.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::types::PROTOCOL_HTTP;
use crate::client::{ServerApi, WorkerHeartbeat};
use crate::metrics::MetricsSampler;
use crate::scheduler::discovery::AddressCache;

pub struct Heartbeat {
    api: Arc<dyn ServerApi>,
    cache: Arc<AddressCache>,
    sampler: Arc<dyn MetricsSampler>,
    worker_address: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        api: Arc<dyn ServerApi>,
        cache: Arc<AddressCache>,
        sampler: Arc<dyn MetricsSampler>,
        worker_address: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            sampler,
            worker_address: worker_address.into(),
            interval,
        }
    }

    /// Sample metrics and send one heartbeat to the current server.
    pub async fn beat(&self) {
        let heartbeat = WorkerHeartbeat {
            worker_address: self.worker_address.clone(),
            heartbeat_time: Utc::now().timestamp_millis(),
            protocol: PROTOCOL_HTTP.to_string(),
            system_metrics: self.sampler.sample().await,
        };

        let server = self.cache.current();
        if let Err(e) = self.api.heartbeat(&server, &heartbeat).await {
            warn!(server = %server, error = %e, "Heartbeat failed");
        } else {
            debug!(server = %server, score = heartbeat.system_metrics.score, "Heartbeat sent");
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // A hung server must not hold up shutdown.
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.beat() => {}
                        }
                    }
                }
            }
            debug!("Heartbeat loop stopped");
        })
    }
}
