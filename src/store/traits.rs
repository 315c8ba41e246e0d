//! `Storage` trait: single async interface for instance persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::worker::state::InstanceStatus;

/// Persisted state of one job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub instance_id: i64,
    pub job_id: i64,
    pub status: InstanceStatus,
    pub progress: i32,
    pub result_code: i32,
    pub result_message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Fresh record for an instance that just started running.
    pub fn running(instance_id: i64, job_id: i64) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            job_id,
            status: InstanceStatus::Running,
            progress: 0,
            result_code: 0,
            result_message: String::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn running_view(&self) -> RunningView {
        RunningView {
            job_id: self.job_id,
            instance_id: self.instance_id,
            status: self.status,
        }
    }
}

/// Minimal projection consumed by the instance reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningView {
    pub job_id: i64,
    pub instance_id: i64,
    pub status: InstanceStatus,
}

/// Backend-agnostic instance store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a record, or replace the one with the same instance id.
    async fn upsert(&self, record: &InstanceRecord) -> Result<(), DatabaseError>;

    /// Move a record to `status` with the given result.
    ///
    /// Returns `Ok(false)` without writing when the record is already in a
    /// terminal status, and `NotFound` when no record exists.
    async fn update_status(
        &self,
        instance_id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_message: &str,
    ) -> Result<bool, DatabaseError>;

    /// Get a record by instance id; `NotFound` when unknown.
    async fn get(&self, instance_id: i64) -> Result<InstanceRecord, DatabaseError>;

    /// All records currently in the running status.
    async fn list_running(&self) -> Result<Vec<InstanceRecord>, DatabaseError>;
}

/// Source of the running set for the instance reporter.
#[async_trait]
pub trait RunningLister: Send + Sync {
    async fn list_running(&self) -> Result<Vec<RunningView>, DatabaseError>;
}

/// Adapts any [`Storage`] into a [`RunningLister`] by projecting its running records.
pub struct StorageLister {
    store: Arc<dyn Storage>,
}

impl StorageLister {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RunningLister for StorageLister {
    async fn list_running(&self) -> Result<Vec<RunningView>, DatabaseError> {
        let records = self.store.list_running().await?;
        Ok(records.iter().map(InstanceRecord::running_view).collect())
    }
}
