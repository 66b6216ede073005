use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use futures_util::{Stream, StreamExt};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::low_level::signal_name;
use signal_hook_tokio::Signals;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use tracing_log::LogTracer;

use scrub_filter::{pipeline, Config, ScrubFilter};

/// Rewrites a field of newline-delimited JSON events read from standard
/// input, using a substring dictionary file
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(flatten)]
    filter: Config,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

/// Cancels `shutdown_token` on the first termination signal and returns the
/// next one, if it arrives while shutdown is still in progress.
///
/// A read blocked on standard input can hold the shutdown indefinitely, so the
/// caller is expected to exit right away when a second signal is returned.
#[instrument(skip_all)]
async fn handle_signals<S>(signals: S, shutdown_token: CancellationToken) -> Option<i32>
where
    S: Stream<Item = i32>,
{
    let mut signals = std::pin::pin!(signals);
    info!(status = "started");
    while let Some(signal) = signals.next().await {
        let name = signal_name(signal).unwrap_or("unknown");
        if shutdown_token.is_cancelled() {
            warn!(msg = "received signal", reaction = "exiting now", signal = name);
            return Some(signal);
        }
        info!(
            msg = "received signal",
            reaction = "finishing current event",
            signal = name
        );
        shutdown_token.cancel();
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.verbose.tracing_level())
        .with_writer(std::io::stderr)
        .init();

    LogTracer::init_with_filter(args.verbose.log_level_filter())?;

    let filter = ScrubFilter::configure(&args.filter).context("error configuring filter")?;

    let shutdown_token = CancellationToken::new();

    let signals = Signals::new(TERM_SIGNALS).context("error registering termination signals")?;
    let signals_handle = signals.handle();
    let signals_task = tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            if let Some(signal) = handle_signals(signals, shutdown_token).await {
                std::process::exit(128 + signal);
            }
        }
    });

    let pipeline_task = pipeline::run(
        Arc::new(filter),
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown_token,
    );

    pipeline_task
        .await
        .context("error joining pipeline task")?
        .context("error processing events")?;

    signals_handle.close();

    signals_task.await.context("error joining signals task")?;

    Ok(())
}
