use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use snapgate_core::app::AppBuilder;
use snapgate_core::cache::CacheStore;
use snapgate_core::config::Config;
use snapgate_core::jobs::{JobStore, JobTable};
use snapgate_core::ports::{Clock, SystemClock};
use snapgate_core::webhook::signing;

mod capture;
mod logging;

use crate::capture::CommandCapture;
use crate::logging::LogFormat;

const DEFAULT_CONFIG: &str = "snapgate.toml";

#[derive(Debug, Parser)]
#[command(name = "snapgate", version)]
#[command(about = "Rate-limited, cached webpage capture service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./snapgate.toml when present)
    #[arg(short, long, global = true, env = "SNAPGATE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service until Ctrl-C
    Serve {
        /// Listen address, overrides [server] bind
        #[arg(long, env = "SNAPGATE_BIND")]
        bind: Option<String>,
    },

    /// Sweep expired cache entries and reap old jobs once, then exit
    Sweep,

    /// Check a webhook signature against a payload (file or stdin)
    Verify {
        #[arg(long, env = "SNAPGATE_WEBHOOK_SECRET")]
        secret: String,

        #[arg(long)]
        signature: String,

        #[arg(long)]
        payload_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Sweep => sweep(&config),
        Command::Verify {
            secret,
            signature,
            payload_file,
        } => verify(&secret, &signature, payload_file.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(DEFAULT_CONFIG).is_file() => Ok(Config::load(Path::new(DEFAULT_CONFIG))?),
        None => {
            tracing::info!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}

async fn serve(mut config: Config, bind: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let engine = CommandCapture::from_config(&config.capture)?;
    let bind = config.server.bind.clone();

    let app = Arc::new(
        AppBuilder::new(config)
            .capture_engine(Arc::new(engine))
            .build()
            .context("failed to build app")?,
    );
    let maintenance = app.spawn_maintenance();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    snapgate_core::http::serve(listener, Arc::clone(&app), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
        tracing::info!("shutdown requested");
    })
    .await
    .context("server error")?;

    maintenance.shutdown_and_join().await;
    tracing::info!(in_flight = app.jobs.pool().in_flight(), "waiting for running jobs");
    app.drain().await;
    tracing::info!("bye");
    Ok(())
}

fn sweep(config: &Config) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = CacheStore::open(config.cache.dir.clone(), config.cache.ttl(), Arc::clone(&clock))
        .context("failed to open cache")?;
    let removed = cache.sweep_expired();
    println!("cache: removed {removed} expired entries, {} left", cache.len());

    match &config.jobs.index_path {
        Some(path) => {
            let jobs = JobTable::open(path.clone());
            let reaped = jobs.remove_terminal_before(clock.now() - config.jobs.retention());
            println!("jobs: reaped {reaped}, {} left", jobs.len());
        }
        None => println!("jobs: in-memory table, nothing to reap"),
    }
    Ok(())
}

fn verify(secret: &str, signature: &str, payload_file: Option<&Path>) -> anyhow::Result<()> {
    let raw = match payload_file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read payload from stdin")?;
            buf
        }
    };
    let payload: serde_json::Value =
        serde_json::from_slice(&raw).context("payload is not valid JSON")?;

    if signing::verify(&payload, signature.trim(), secret) {
        println!("signature valid");
        Ok(())
    } else {
        bail!("signature does not match payload")
    }
}
