//! Starts the coordinator, waits for the job to finish, then stops it.
//!
//! Usage: mrcoordinator [--n-reduce N] [--job-id PREFIX] [--listen ADDR] <input files...>

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;

use mapreduce_rs::mr::config::{JobConfig, LogLevel, Tuning};
use mapreduce_rs::mr::coordinator::CoordinatorServer;
use mapreduce_rs::mr::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "mrcoordinator", about = "MapReduce coordinator")]
struct Args {
    /// Reduce fan-out.
    #[arg(long = "n-reduce", default_value_t = 10)]
    n_reduce: usize,

    /// Job id prefix; a nanosecond timestamp is appended for uniqueness.
    #[arg(long = "job-id", default_value = "job")]
    job_id: String,

    /// RPC listen address.
    #[arg(long = "listen", default_value = ":8123")]
    listen: String,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Input file identifiers; M = count of these.
    #[arg(required = true)]
    input_files: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);

    let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    let job_id = format!("{}-{}", args.job_id, unique);

    let listen_addr: SocketAddr = normalize_listen_addr(&args.listen).parse()?;

    let config = JobConfig {
        files: args.input_files,
        n_reduce: args.n_reduce,
        job_id: job_id.clone(),
        listen_addr,
        tuning: Tuning::default(),
    };

    tracing::info!(job_id = %job_id, "starting coordinator");

    let server = CoordinatorServer::bind(config).await?;

    while !server.done() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    server.stop();
    tracing::info!(job_id = %job_id, "coordinator: job finished");

    Ok(())
}

/// `:8123` style shorthand binds all interfaces, matching the CLI default.
fn normalize_listen_addr(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}
