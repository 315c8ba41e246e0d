//! libSQL implementation of the async `Storage` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{InstanceRecord, Storage};
use crate::worker::state::InstanceStatus;

const RECORD_COLUMNS: &str =
    "instance_id, job_id, status, progress, result_code, result_message, started_at, updated_at";

/// libSQL instance store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Instance database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to an InstanceRecord. Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<InstanceRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let status_code: i64 = row.get(2).map_err(get_err)?;
    let status = InstanceStatus::from_code(status_code as i32).ok_or_else(|| {
        DatabaseError::Query(format!("row parse: unknown status {status_code}"))
    })?;
    let started: String = row.get(6).map_err(get_err)?;
    let updated: String = row.get(7).map_err(get_err)?;

    Ok(InstanceRecord {
        instance_id: row.get(0).map_err(get_err)?,
        job_id: row.get(1).map_err(get_err)?,
        status,
        progress: row.get::<i64>(3).map_err(get_err)? as i32,
        result_code: row.get::<i64>(4).map_err(get_err)? as i32,
        result_message: row.get(5).map_err(get_err)?,
        started_at: parse_datetime(&started),
        updated_at: parse_datetime(&updated),
    })
}

#[async_trait]
impl Storage for LibSqlStore {
    async fn upsert(&self, record: &InstanceRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO instance_records (instance_id, job_id, status, progress,
                    result_code, result_message, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(instance_id) DO UPDATE SET
                    job_id = excluded.job_id,
                    status = excluded.status,
                    progress = excluded.progress,
                    result_code = excluded.result_code,
                    result_message = excluded.result_message,
                    started_at = excluded.started_at,
                    updated_at = excluded.updated_at",
                params![
                    record.instance_id,
                    record.job_id,
                    record.status.code() as i64,
                    record.progress as i64,
                    record.result_code as i64,
                    record.result_message.clone(),
                    record.started_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert: {e}")))?;

        debug!(instance_id = record.instance_id, status = %record.status, "Instance record upserted");
        Ok(())
    }

    async fn update_status(
        &self,
        instance_id: i64,
        status: InstanceStatus,
        result_code: i32,
        result_message: &str,
    ) -> Result<bool, DatabaseError> {
        let [t1, t2, t3, t4] = InstanceStatus::terminal_codes();
        let changed = self
            .conn
            .execute(
                "UPDATE instance_records
                 SET status = ?2, result_code = ?3, result_message = ?4, updated_at = ?5
                 WHERE instance_id = ?1 AND status NOT IN (?6, ?7, ?8, ?9)",
                params![
                    instance_id,
                    status.code() as i64,
                    result_code as i64,
                    result_message,
                    Utc::now().to_rfc3339(),
                    t1 as i64,
                    t2 as i64,
                    t3 as i64,
                    t4 as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        if changed > 0 {
            return Ok(true);
        }

        // Nothing changed: either the record is terminal or it never existed.
        self.get(instance_id).await?;
        Ok(false)
    }

    async fn get(&self, instance_id: i64) -> Result<InstanceRecord, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM instance_records WHERE instance_id = ?1"),
                params![instance_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_record(&row),
            Ok(None) => Err(DatabaseError::NotFound { instance_id }),
            Err(e) => Err(DatabaseError::Query(format!("get: {e}"))),
        }
    }

    async fn list_running(&self) -> Result<Vec<InstanceRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM instance_records WHERE status = ?1 ORDER BY started_at ASC"
                ),
                params![InstanceStatus::Running.code() as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_running: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(row_to_record(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_running: {e}"))),
            }
        }
        Ok(records)
    }
}
