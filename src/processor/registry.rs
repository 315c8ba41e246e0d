//! Processor registry keyed by task key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::ProcessorError;
use crate::processor::Processor;

/// Registry of available processors.
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a processor under its task key, replacing any previous one.
    pub async fn register(&self, processor: Arc<dyn Processor>) -> Result<(), ProcessorError> {
        let key = processor.task_key().to_string();
        if key.is_empty() {
            return Err(ProcessorError::EmptyKey);
        }
        if self
            .processors
            .write()
            .await
            .insert(key.clone(), processor)
            .is_some()
        {
            tracing::warn!(task_key = %key, "Replaced registered processor");
        } else {
            tracing::debug!("Registered processor: {}", key);
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<dyn Processor>> {
        self.processors.read().await.get(key).cloned()
    }

    /// Like [`get`](Self::get), but a missing key is a [`ProcessorError::NotFound`].
    pub async fn require(&self, key: &str) -> Result<Arc<dyn Processor>, ProcessorError> {
        self.get(key).await.ok_or_else(|| ProcessorError::NotFound {
            key: key.to_string(),
        })
    }

    /// All registered keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.processors.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run every processor's `init`. Failures are logged, not fatal.
    pub async fn init_all(&self) {
        let processors: Vec<Arc<dyn Processor>> =
            self.processors.read().await.values().cloned().collect();
        for processor in processors {
            if let Err(e) = processor.init().await {
                tracing::warn!(
                    task_key = %processor.task_key(),
                    error = %e,
                    "Processor init failed"
                );
            }
        }
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
