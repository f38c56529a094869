use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;

/// The tuning knobs from the timeout/backoff/concurrency model.
///
/// Defaults match the reference values: 10s task timeouts, a 100ms worker
/// poll backoff, and a per-worker storage fan-out cap of 16.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub map_task_timeout: Duration,
    pub reduce_task_timeout: Duration,
    pub worker_idle_wait: Duration,
    pub storage_max_concurrency: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            map_task_timeout: Duration::from_secs(10),
            reduce_task_timeout: Duration::from_secs(10),
            worker_idle_wait: Duration::from_millis(100),
            storage_max_concurrency: 16,
        }
    }
}

/// Immutable job configuration, fixed at coordinator construction.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub files: Vec<String>,
    pub n_reduce: usize,
    pub job_id: String,
    pub listen_addr: SocketAddr,
    pub tuning: Tuning,
}

/// Verbosity passed on the CLI to both binaries.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Info,
    Debug,
}
