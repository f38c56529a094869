//! Starts a worker process that pulls tasks from the coordinator until it
//! receives an `Exit` reply.
//!
//! Usage: mrworker --app <name> [--coord-addr host:port] [--storage local|s3] [--s3-bucket NAME]

use clap::{Parser, ValueEnum};
use tarpc::{client, tokio_serde::formats::Json};

use mapreduce_rs::mr::config::{LogLevel, Tuning};
use mapreduce_rs::mr::coordinator::ServerClient;
use mapreduce_rs::mr::function::load_app;
use mapreduce_rs::mr::init_tracing;
use mapreduce_rs::mr::storage::{LocalStorage, Storage};
use mapreduce_rs::mr::storage_s3::S3Storage;
use mapreduce_rs::mr::worker::WorkerContext;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Local,
    S3,
}

#[derive(Parser, Debug)]
#[command(name = "mrworker", about = "MapReduce worker")]
struct Args {
    #[arg(long = "coord-addr", default_value = "localhost:8123")]
    coord_addr: String,

    /// Name of the built-in map/reduce application to run (e.g. "wordcount").
    #[arg(long = "app")]
    app: String,

    #[arg(long = "storage", value_enum, default_value_t = Backend::Local)]
    storage: Backend,

    #[arg(long = "s3-bucket")]
    s3_bucket: Option<String>,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_level);

    if let Err(e) = run(args).await {
        tracing::error!("worker: fatal error: {e:#}");
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (map_fn, reduce_fn) = load_app(&args.app)
        .ok_or_else(|| anyhow::anyhow!("unknown app '{}': no built-in map/reduce registered", args.app))?;

    let tuning = Tuning::default();

    let storage: Box<dyn Storage> = match args.storage {
        Backend::Local => Box::new(LocalStorage::new(".")),
        Backend::S3 => {
            let bucket = args
                .s3_bucket
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--s3-bucket is required when --storage=s3"))?;
            Box::new(S3Storage::new(bucket, String::new(), tuning.storage_max_concurrency).await?)
        }
    };

    let server_addr = tokio::net::lookup_host(&args.coord_addr)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve coordinator address {}", args.coord_addr))?;

    let transport = match tarpc::serde_transport::tcp::connect(server_addr, Json::default).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("worker: failed to connect to coordinator: {e}");
            return Ok(());
        }
    };

    let client = ServerClient::new(client::Config::default(), transport).spawn();

    let worker = WorkerContext::new(client, storage, map_fn, reduce_fn, tuning);
    worker.run().await?;

    Ok(())
}
