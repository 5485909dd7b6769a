//! `rankd` binary: restore, run the persistence pipeline, flush on SIGINT/SIGTERM.
//!
//! The request transport is supplied by the embedding application; this
//! binary owns process lifecycle and offline inspection of the store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rankd::{Bucket, Directory, FsDirectory, RankSet, Server, ServiceConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rankd")]
#[command(about = "Leaderboard ranking service with write-back persistence")]
struct Args {
    /// Root directory of the snapshot store.
    #[arg(long, env = "RANKD_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Bucket holding one snapshot per ranking set.
    #[arg(long, env = "RANKD_BUCKET", default_value = rankd::formats::DEFAULT_BUCKET, global = true)]
    bucket: String,

    /// Verbose logging (overridden by RANKD_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore state and keep it persisted until a termination signal.
    Serve(ServeArgs),
    /// Print what the store holds.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Milliseconds between flush cycles.
    #[arg(long, env = "RANKD_FLUSH_INTERVAL_MS", default_value_t = 10_000)]
    flush_interval_ms: u64,

    /// Capacity of the dirty-name queue; writers wait when it is full.
    #[arg(long, env = "RANKD_QUEUE_CAPACITY", default_value_t = rankd::dirty::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Print every entry of this set instead of the summary.
    #[arg(long)]
    name: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let result = match &args.cmd {
        Command::Serve(serve) => serve_blocking(&args, serve),
        Command::Inspect(inspect) => run_inspect(&args, inspect),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "rankd failed");
            ExitCode::FAILURE
        }
    }
}

fn serve_blocking(args: &Args, serve: &ServeArgs) -> anyhow::Result<()> {
    let config = ServiceConfig {
        data_dir: args.data_dir.clone(),
        bucket: args.bucket.clone(),
        flush_interval: Duration::from_millis(serve.flush_interval_ms),
        queue_capacity: serve.queue_capacity,
    };
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(serve_async(config))
}

async fn serve_async(config: ServiceConfig) -> anyhow::Result<()> {
    let server = Server::open(&config)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    info!(
        data_dir = %config.data_dir.display(),
        sets = server.restored.sets,
        entries = server.restored.entries,
        "rankd ready"
    );

    let shutdown = CancellationToken::new();
    let mut pipeline = tokio::spawn(server.pipeline.run(shutdown.clone()));
    // Keep the service (and its dirty sender) alive for the transport.
    let _service = server.service;

    let finished = tokio::select! {
        signal = wait_for_termination() => {
            signal.context("installing signal handlers")?;
            info!("termination signal received");
            shutdown.cancel();
            (&mut pipeline).await
        }
        early = &mut pipeline => early,
    };

    let report = finished
        .context("persistence pipeline panicked")?
        .context("persistence pipeline failed")?;
    info!(written = report.written, removed = report.removed, "shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn run_inspect(args: &Args, inspect: &InspectArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.data_dir.is_dir(),
        "no store at {}",
        args.data_dir.display()
    );
    let dir: Arc<dyn Directory> = Arc::new(
        FsDirectory::new(&args.data_dir)
            .with_context(|| format!("opening store at {}", args.data_dir.display()))?,
    );
    let bucket = Bucket::open(dir, &args.bucket).with_context(|| {
        format!(
            "no bucket {:?} in store at {}",
            args.bucket,
            args.data_dir.display()
        )
    })?;

    let load = |name: &str, bytes: &[u8]| -> anyhow::Result<RankSet> {
        let set = RankSet::new();
        set.unmarshal(bytes)
            .with_context(|| format!("decoding snapshot {name:?}"))?;
        Ok(set)
    };

    match &inspect.name {
        Some(name) => {
            let bytes = bucket
                .get(name)?
                .with_context(|| format!("no snapshot named {name:?}"))?;
            let set = load(name, &bytes)?;
            for (i, e) in set.entries().iter().enumerate() {
                println!("{}\t{}\t{}", i + 1, e.user_id, e.score);
            }
        }
        None => {
            for name in bucket.keys()? {
                let bytes = bucket.get(&name)?.unwrap_or_default();
                let set = load(&name, &bytes)?;
                println!("{name}\t{}", set.len());
            }
        }
    }
    Ok(())
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("RANKD_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("rankd=debug,info")
        } else {
            EnvFilter::new("rankd=info,warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
