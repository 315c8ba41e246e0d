//! Processor abstraction: pluggable job handlers selected by task key.

pub mod registry;
pub mod simple;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::types::{LogEntry, LogLevel};
use crate::error::ProcessorError;

pub use registry::ProcessorRegistry;
pub use simple::SimpleProcessor;

/// Result a processor returns on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub code: i32,
    pub message: String,
}

impl ProcessResult {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(0, "ok")
    }
}

/// A job handler.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Key the server puts in `processorInfo` to select this handler.
    fn task_key(&self) -> &str;

    /// One-time setup, run once at startup.
    async fn init(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Execute one instance. Implementations must observe `ctx.cancel`
    /// wherever they wait and return [`ProcessorError::Canceled`] once it fires.
    async fn run(&self, ctx: &ProcessorContext, params: &str)
    -> Result<ProcessResult, ProcessorError>;
}

/// Destination of online log entries. Never blocks the caller.
pub trait LogSink: Send + Sync {
    fn enqueue(&self, entry: LogEntry);
}

/// Online logger bound to one instance.
#[derive(Clone)]
pub struct InstanceLogger {
    instance_id: i64,
    sink: Option<Arc<dyn LogSink>>,
}

impl InstanceLogger {
    pub fn new(instance_id: i64, sink: Arc<dyn LogSink>) -> Self {
        Self {
            instance_id,
            sink: Some(sink),
        }
    }

    /// Logger that only writes to the local tracing output.
    pub fn detached(instance_id: i64) -> Self {
        Self {
            instance_id,
            sink: None,
        }
    }

    pub fn log(&self, level: LogLevel, content: impl Into<String>) {
        let content = content.into();
        tracing::debug!(instance_id = self.instance_id, ?level, "{content}");
        if let Some(sink) = &self.sink {
            sink.enqueue(LogEntry::new(self.instance_id, level, content));
        }
    }

    pub fn debug(&self, content: impl Into<String>) {
        self.log(LogLevel::Debug, content);
    }

    pub fn info(&self, content: impl Into<String>) {
        self.log(LogLevel::Info, content);
    }

    pub fn warn(&self, content: impl Into<String>) {
        self.log(LogLevel::Warn, content);
    }

    pub fn error(&self, content: impl Into<String>) {
        self.log(LogLevel::Error, content);
    }
}

/// Execution context handed to a processor for one instance.
#[derive(Clone)]
pub struct ProcessorContext {
    pub instance_id: i64,
    pub job_id: i64,
    pub cancel: CancellationToken,
    pub logger: InstanceLogger,
}

impl ProcessorContext {
    pub fn new(
        instance_id: i64,
        job_id: i64,
        cancel: CancellationToken,
        logger: InstanceLogger,
    ) -> Self {
        Self {
            instance_id,
            job_id,
            cancel,
            logger,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, returning `Canceled` early if the instance is stopped.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProcessorError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProcessorError::Canceled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
