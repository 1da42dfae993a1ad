//! upqueue entry point.

mod app;
mod args;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = args::Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting upqueue");

    let mut config = config::Config::load(args.config.as_deref())?;
    args.apply(&mut config)?;
    tracing::info!(
        url = %config.upload.url,
        parallel = config.queue.parallel,
        files = args.files.len(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(config, args.files, args.validate))?;

    tracing::info!(
        uploaded = summary.uploaded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        paused = summary.paused,
        "queue settled"
    );
    if summary.failed > 0 {
        anyhow::bail!("{} upload(s) failed", summary.failed);
    }
    Ok(())
}
