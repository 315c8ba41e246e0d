//! Instance reporter loop. Reports every running instance each tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{InstanceStatusReport, ServerApi};
use crate::scheduler::discovery::AddressCache;
use crate::store::RunningLister;

pub struct InstanceReporter {
    api: Arc<dyn ServerApi>,
    cache: Arc<AddressCache>,
    lister: Arc<dyn RunningLister>,
    worker_address: String,
    interval: Duration,
}

impl InstanceReporter {
    pub fn new(
        api: Arc<dyn ServerApi>,
        cache: Arc<AddressCache>,
        lister: Arc<dyn RunningLister>,
        worker_address: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            lister,
            worker_address: worker_address.into(),
            interval,
        }
    }

    /// Report the current running set. Returns how many reports succeeded.
    pub async fn report_once(&self) -> usize {
        let running = match self.lister.list_running().await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "Listing running instances failed, skipping report");
                return 0;
            }
        };
        if running.is_empty() {
            return 0;
        }

        let server = self.cache.current();
        let report_time = Utc::now().timestamp_millis();
        let reports = running.iter().map(|view| {
            let report = InstanceStatusReport {
                job_id: view.job_id,
                instance_id: view.instance_id,
                report_time,
                source_address: self.worker_address.clone(),
                instance_status: view.status,
            };
            let server = server.as_str();
            async move {
                match self.api.report_instance_status(server, &report).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            instance_id = report.instance_id,
                            error = %e,
                            "Instance status report failed"
                        );
                        false
                    }
                }
            }
        });

        let sent = join_all(reports).await.into_iter().filter(|ok| *ok).count();
        debug!(sent, total = running.len(), "Instance status reported");
        sent
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
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.report_once() => {}
                        }
                    }
                }
            }
            debug!("Instance reporter stopped");
        })
    }
}
