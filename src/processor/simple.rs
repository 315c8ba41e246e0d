//! Built-in `simple` processor: sleeps for `sleepMS`, then reports ok.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProcessorError;
use crate::processor::{ProcessResult, Processor, ProcessorContext};

const DEFAULT_SLEEP_MS: u64 = 100;

#[derive(Debug, Default, Deserialize)]
struct SimpleParams {
    #[serde(default, rename = "sleepMS")]
    sleep_ms: Option<u64>,
}

pub struct SimpleProcessor;

impl SimpleProcessor {
    pub const TASK_KEY: &'static str = "simple";

    fn parse(params: &str) -> Result<SimpleParams, ProcessorError> {
        if params.trim().is_empty() {
            return Ok(SimpleParams::default());
        }
        serde_json::from_str(params).map_err(|e| ProcessorError::InvalidParams {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Processor for SimpleProcessor {
    fn task_key(&self) -> &str {
        Self::TASK_KEY
    }

    async fn run(
        &self,
        ctx: &ProcessorContext,
        params: &str,
    ) -> Result<ProcessResult, ProcessorError> {
        let params = Self::parse(params)?;
        let sleep_ms = params.sleep_ms.unwrap_or(DEFAULT_SLEEP_MS);

        ctx.logger.info(format!("simple processor sleeping {sleep_ms}ms"));
        ctx.sleep(Duration::from_millis(sleep_ms)).await?;
        ctx.logger.info("simple processor done");

        Ok(ProcessResult::ok())
    }
}
