//! Dispatcher: run, stop and query job instances.
//!
//! A run request is deduplicated against the [`InstanceTracker`], persisted
//! as running, and executed on its own task. Completion writes the terminal
//! status and releases the tracker entry. A stop cancels the execution and
//! owns the terminal status from then on: the handler's late result is not
//! written.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::ServerScheduleJobReq;
use crate::error::{DatabaseError, ProcessorError};
use crate::processor::{
    InstanceLogger, LogSink, ProcessResult, Processor, ProcessorContext, ProcessorRegistry,
};
use crate::store::{InstanceRecord, Storage};
use crate::tracker::{ExecutionHandle, InstanceTracker};
use crate::worker::state::InstanceStatus;

pub const STOPPED_MESSAGE: &str = "stopped";

/// What happened to a run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution was launched.
    Started,
    /// The instance is already executing; nothing was done.
    Duplicate,
    /// No processor is registered for the key; the record is failed.
    ProcessorNotFound,
}

pub struct Dispatcher {
    registry: Arc<ProcessorRegistry>,
    store: Arc<dyn Storage>,
    tracker: Arc<InstanceTracker>,
    log_sink: Option<Arc<dyn LogSink>>,
    executions: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        store: Arc<dyn Storage>,
        tracker: Arc<InstanceTracker>,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Self {
        Self {
            registry,
            store,
            tracker,
            log_sink,
            executions: TaskTracker::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<InstanceTracker> {
        &self.tracker
    }

    /// Accept a run request. Execution continues in the background.
    pub async fn run_job(&self, req: &ServerScheduleJobReq) -> RunOutcome {
        let instance_id = req.instance_id;
        let Some(handle) = self.tracker.try_start(instance_id) else {
            debug!(instance_id, "Duplicate run request ignored");
            return RunOutcome::Duplicate;
        };

        if let Err(e) = self
            .store
            .upsert(&InstanceRecord::running(instance_id, req.job_id))
            .await
        {
            warn!(instance_id, error = %e, "Failed to persist running record");
        }

        let processor = match self.registry.require(&req.processor_info).await {
            Ok(processor) => processor,
            Err(e) => {
                warn!(
                    instance_id,
                    processor = %req.processor_info,
                    "No processor registered for key"
                );
                write_terminal(
                    self.store.as_ref(),
                    instance_id,
                    InstanceStatus::Failed,
                    e.code(),
                    &e.to_string(),
                )
                .await;
                self.tracker.release(instance_id, handle.generation);
                return RunOutcome::ProcessorNotFound;
            }
        };

        let logger = match &self.log_sink {
            Some(sink) => InstanceLogger::new(instance_id, Arc::clone(sink)),
            None => InstanceLogger::detached(instance_id),
        };
        let ctx = ProcessorContext::new(instance_id, req.job_id, handle.token.clone(), logger);

        info!(
            instance_id,
            job_id = req.job_id,
            processor = %req.processor_info,
            "Instance started"
        );
        self.executions.spawn(execute(
            Arc::clone(&self.store),
            Arc::clone(&self.tracker),
            processor,
            ctx,
            req.job_params.clone(),
            handle,
        ));
        RunOutcome::Started
    }

    /// Stop an executing instance. Returns false when it was not tracked.
    pub async fn stop_instance(&self, instance_id: i64) -> bool {
        if !self.tracker.stop(instance_id) {
            debug!(instance_id, "Stop for untracked instance ignored");
            return false;
        }
        info!(instance_id, "Instance stop requested");
        write_terminal(
            self.store.as_ref(),
            instance_id,
            InstanceStatus::Stopped,
            0,
            STOPPED_MESSAGE,
        )
        .await;
        true
    }

    pub async fn query(&self, instance_id: i64) -> Result<InstanceRecord, DatabaseError> {
        self.store.get(instance_id).await
    }

    /// Number of instances currently executing.
    pub fn running_count(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every spawned execution to finish. Call after cancelling
    /// the root token.
    pub async fn wait_idle(&self) {
        self.executions.close();
        self.executions.wait().await;
    }
}

async fn execute(
    store: Arc<dyn Storage>,
    tracker: Arc<InstanceTracker>,
    processor: Arc<dyn Processor>,
    ctx: ProcessorContext,
    params: String,
    handle: ExecutionHandle,
) {
    let instance_id = handle.instance_id;
    let outcome = AssertUnwindSafe(processor.run(&ctx, &params))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(ProcessorError::Failed {
                code: -1,
                reason: "processor panicked".to_string(),
            })
        });

    if !tracker.owns(instance_id, handle.generation) {
        debug!(instance_id, "Instance was stopped, dropping processor result");
        // A stop that landed before the running record existed wrote nothing.
        if tracker.get(instance_id).is_none() {
            write_terminal(
                store.as_ref(),
                instance_id,
                InstanceStatus::Stopped,
                0,
                STOPPED_MESSAGE,
            )
            .await;
        }
        return;
    }

    match outcome {
        Ok(ProcessResult { code, message }) => {
            write_terminal(
                store.as_ref(),
                instance_id,
                InstanceStatus::Succeeded,
                code,
                &message,
            )
            .await;
        }
        Err(e) => {
            if e.is_canceled() {
                info!(instance_id, "Instance canceled");
            } else {
                warn!(instance_id, error = %e, "Instance failed");
            }
            write_terminal(
                store.as_ref(),
                instance_id,
                InstanceStatus::Failed,
                e.code(),
                &e.to_string(),
            )
            .await;
        }
    }
    tracker.release(instance_id, handle.generation);
}

async fn write_terminal(
    store: &dyn Storage,
    instance_id: i64,
    status: InstanceStatus,
    code: i32,
    message: &str,
) {
    match store.update_status(instance_id, status, code, message).await {
        Ok(true) => debug!(instance_id, %status, code, "Instance status updated"),
        Ok(false) => debug!(instance_id, %status, "Instance already terminal"),
        Err(e) => warn!(instance_id, %status, error = %e, "Failed to update instance status"),
    }
}
