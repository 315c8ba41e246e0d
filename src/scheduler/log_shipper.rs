//! Online log shipping.
//!
//! Producers enqueue through [`LogShipper`] without ever blocking: when the
//! bounded queue is full the entry is dropped with a warning. The background
//! [`LogShipperLoop`] batches entries by count or interval and ships each
//! batch once. A failed batch is discarded. On shutdown the queue is closed,
//! drained and flushed one last time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{LogEntry, LogReportRequest, ServerApi};
use crate::config::LOG_QUEUE_BATCHES;
use crate::processor::LogSink;
use crate::scheduler::discovery::AddressCache;

/// Producer side of the log pipeline. Cheap to clone.
#[derive(Clone)]
pub struct LogShipper {
    tx: mpsc::Sender<LogEntry>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

/// Consumer side, driven by [`LogShipperLoop::spawn`].
pub struct LogShipperLoop {
    rx: mpsc::Receiver<LogEntry>,
    api: Arc<dyn ServerApi>,
    cache: Arc<AddressCache>,
    worker_address: String,
    batch_size: usize,
    interval: Duration,
}

impl LogShipper {
    /// Build both halves. Queue capacity is `batch_size * LOG_QUEUE_BATCHES`.
    pub fn new(
        api: Arc<dyn ServerApi>,
        cache: Arc<AddressCache>,
        worker_address: impl Into<String>,
        batch_size: usize,
        interval: Duration,
    ) -> (Self, LogShipperLoop) {
        let batch_size = batch_size.max(1);
        let capacity = batch_size * LOG_QUEUE_BATCHES;
        let (tx, rx) = mpsc::channel(capacity);

        let shipper = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        };
        let shipper_loop = LogShipperLoop {
            rx,
            api,
            cache,
            worker_address: worker_address.into(),
            batch_size,
            interval,
        };
        (shipper, shipper_loop)
    }

    /// Entries dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl LogSink for LogShipper {
    fn enqueue(&self, entry: LogEntry) {
        if !entry.is_shippable() {
            return;
        }
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    instance_id = entry.instance_id,
                    dropped, "Log queue full, dropping entry"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                debug!(
                    instance_id = entry.instance_id,
                    "Log shipper stopped, dropping entry"
                );
            }
        }
    }
}

impl LogShipperLoop {
    async fn flush(&self, batch: &mut Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        let request = LogReportRequest {
            instance_log_contents: std::mem::take(batch),
            worker_address: self.worker_address.clone(),
        };
        let count = request.instance_log_contents.len();
        let server = self.cache.current();

        match self.api.report_log(&server, &request).await {
            Ok(()) => debug!(count, server = %server, "Log batch shipped"),
            Err(e) => warn!(count, server = %server, error = %e, "Log batch dropped after failed report"),
        }
    }

    /// Flush unless `token` fires first. Returns false when interrupted; the
    /// batch is then either still buffered or was already handed to the server.
    async fn flush_until(&self, token: &CancellationToken, batch: &mut Vec<LogEntry>) -> bool {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Log batch in flight abandoned at shutdown");
                false
            }
            _ = self.flush(batch) => true,
        }
    }

    /// Spawn the shipping loop. Returns once the final flush is done.
    pub fn spawn(mut self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(self.batch_size);
            let mut ticker = tokio::time::interval(self.interval);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = self.rx.recv() => match received {
                        Some(entry) => {
                            batch.push(entry);
                            if batch.len() >= self.batch_size
                                && !self.flush_until(&token, &mut batch).await
                            {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        if !self.flush_until(&token, &mut batch).await {
                            break;
                        }
                    }
                }
            }

            self.rx.close();
            while let Ok(entry) = self.rx.try_recv() {
                batch.push(entry);
                if batch.len() >= self.batch_size {
                    self.flush(&mut batch).await;
                }
            }
            self.flush(&mut batch).await;
            debug!("Log shipper stopped");
        })
    }
}
