pub mod config;
pub mod coordinator;
pub mod error;
pub mod function;
pub mod hash;
pub mod storage;
pub mod storage_s3;
pub mod types;
pub mod worker;

pub use config::LogLevel;

/// Installs a `tracing` subscriber at the given verbosity.
///
/// Safe to call more than once per process (e.g. from tests); later calls
/// are no-ops once a global subscriber is installed.
pub fn init_tracing(level: LogLevel) {
    let filter = match level {
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}
