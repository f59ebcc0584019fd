use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use node_monitor::cli::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{
    EnvFilter,
    prelude::*,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Args::parse()
        .into_config()
        .context("invalid configuration")?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone())?;

    node_monitor::run(config, shutdown)
        .await
        .context("node monitor terminated unexpectedly")
}

/// Logs to stderr, filtered by `RUST_LOG` (default `info`). Websocket
/// transport chatter is capped at `warn`.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("alloy_pubsub=warn".parse()?)
        .add_directive("alloy_transport_ws=warn".parse()?);

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")
}

/// Cancels `shutdown` on the first SIGTERM or SIGINT (Ctrl+C elsewhere).
/// Handlers are installed before returning so that an early signal is not
/// lost.
#[cfg(unix)]
fn cancel_on_signal(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{
        SignalKind,
        signal,
    };

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::spawn(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            () = shutdown.cancelled() => return,
        };
        info!(signal = received, "Shutting down node monitor");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn cancel_on_signal(shutdown: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!(signal = "ctrl-c", "Shutting down node monitor"),
                Err(err) => tracing::warn!(error = %err, "Failed to listen for ctrl-c, shutting down"),
            },
            () = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}
