//! In-memory instance store, the default backend and the one tests use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::store::traits::{InstanceRecord, Storage};
use crate::worker::state::InstanceStatus;

/// Thread-safe map of instance id → record.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<i64, InstanceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn upsert(&self, record: &InstanceRecord) -> Result<(), DatabaseError> {
        self.records
            .write()
            .await
            .insert(record.instance_id, record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        instance_id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_message: &str,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&instance_id)
            .ok_or(DatabaseError::NotFound { instance_id })?;

        if !record.status.can_transition_to(status) {
            return Ok(false);
        }

        record.status = status;
        record.result_code = result_code;
        record.result_message = result_message.to_string();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn get(&self, instance_id: i64) -> Result<InstanceRecord, DatabaseError> {
        self.records
            .read()
            .await
            .get(&instance_id)
            .cloned()
            .ok_or(DatabaseError::NotFound { instance_id })
    }

    async fn list_running(&self) -> Result<Vec<InstanceRecord>, DatabaseError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == InstanceStatus::Running)
            .cloned()
            .collect())
    }
}
