//! pichi-rs - CLI entry point

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use pichi_rs::{Config, Node, VERSION};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pichi-rs")]
#[command(version = VERSION)]
#[command(about = "Multi-protocol TCP proxy node")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured GeoIP database path
    #[arg(long = "geoip-database")]
    geoip_database: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Validate configuration and exit without starting any listener
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        .event_interval(61)
        .global_queue_interval(31)
        .thread_name("pichi-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(args.config.to_str().unwrap_or("config.yaml")) {
        Ok(c) => c,
        Err(e) => {
            // tracing isn't initialized yet when config itself fails to
            // load, so this one line goes to stderr directly.
            eprintln!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = args.geoip_database {
        config.geoip_database = Some(path);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info")
        }))
        .init();

    info!("pichi-rs v{}", VERSION);
    info!("loaded configuration from {}", args.config.display());

    if args.test {
        info!("configuration is valid");
        return Ok(());
    }

    let node = match Node::new(config).await {
        Ok(n) => n,
        Err(e) => {
            error!("failed to initialize node: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.run().await {
        error!("node error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
