//! Machine health sampling for heartbeats.
//!
//! Collects load, disk and memory figures with the sysinfo crate and folds
//! them into the server's health score.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sysinfo::{Disks, System};

use crate::client::types::SystemMetrics;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Produces a machine health snapshot.
#[async_trait]
pub trait MetricsSampler: Send + Sync {
    async fn sample(&self) -> SystemMetrics;
}

/// sysinfo-backed sampler. Sampling runs on the blocking pool.
pub struct SysinfoSampler {
    system: Arc<Mutex<System>>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSampler for SysinfoSampler {
    async fn sample(&self) -> SystemMetrics {
        let system = Arc::clone(&self.system);
        let result = tokio::task::spawn_blocking(move || {
            let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
            collect(&mut system)
        })
        .await;

        match result {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!(error = %e, "Metrics sampling task failed");
                SystemMetrics::default()
            }
        }
    }
}

fn collect(system: &mut System) -> SystemMetrics {
    system.refresh_cpu();
    system.refresh_memory();

    let mut out = SystemMetrics {
        cpu_load: System::load_average().one,
        cpu_processors: system.cpus().len().max(1) as u32,
        ..Default::default()
    };

    let disks = Disks::new_with_refreshed_list();
    if let Some(root) = disks
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.iter().next())
    {
        let total = root.total_space();
        if total > 0 {
            let used = total.saturating_sub(root.available_space());
            out.disk_total_gb = total as f64 / GIB;
            out.disk_used_gb = used as f64 / GIB;
            out.disk_usage_ratio = used as f64 / total as f64;
        }
    }

    let total_memory = system.total_memory();
    if total_memory > 0 {
        out.max_memory_gb = total_memory as f64 / GIB;
    }

    if let Ok(pid) = sysinfo::get_current_pid() {
        system.refresh_process(pid);
        if let Some(process) = system.process(pid) {
            out.used_memory_gb = process.memory() as f64 / GIB;
            if out.max_memory_gb > 0.0 {
                out.memory_usage_ratio = out.used_memory_gb / out.max_memory_gb;
            }
        }
    }

    out.score = health_score(&out);
    out
}

/// Health score in `[0, 100]`: load, disk pressure and memory pressure each
/// subtract from a perfect 100.
pub fn health_score(m: &SystemMetrics) -> f64 {
    let mut score = 100.0;
    if m.cpu_load > 0.0 {
        score -= m.cpu_load * 5.0;
    }
    if m.disk_usage_ratio > 0.0 {
        score -= m.disk_usage_ratio * 20.0;
    }
    if m.memory_usage_ratio > 0.0 {
        score -= m.memory_usage_ratio * 30.0;
    }
    score.clamp(0.0, 100.0)
}
