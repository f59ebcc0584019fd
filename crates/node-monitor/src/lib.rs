#![doc = include_str!("../README.md")]
#![allow(clippy::missing_errors_doc)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::unreachable)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::indexing_slicing)]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::indexing_slicing))]

pub mod cli;
pub mod config;
mod macros;
pub mod metrics;
pub mod monitor;
pub mod rank;
pub mod server;
pub mod state;
pub mod subscriber;
pub mod window;

pub use config::{
    Config,
    EndpointConfig,
};
pub use monitor::Monitor;
pub use state::State;

use crate::{
    server::MetricsServer,
    subscriber::WsHeaderSource,
};

use anyhow::{
    Context,
    Result,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs the monitor until `shutdown` is cancelled or the metrics server
/// fails. Every subscriber is stopped and joined before the server drains.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let handle = metrics::install_recorder(&config.server_name)
        .context("failed to install metrics recorder")?;

    let mut monitor = Monitor::new(&config, Arc::new(WsHeaderSource))
        .context("failed to register execution endpoints")?;
    info!(
        server_name = %config.server_name,
        endpoints = config.endpoints.len(),
        "Starting node monitor"
    );
    monitor.start();

    let server = MetricsServer::new(config.listen_address, CancellationToken::new());
    let server_token = server.shutdown_token();
    let state = monitor.state();
    let mut serving = tokio::spawn(async move { server.run(state, handle).await });

    let finished = tokio::select! {
        () = shutdown.cancelled() => None,
        result = &mut serving => Some(result),
    };

    info!("Stopping execution endpoint subscribers");
    monitor.stop();
    monitor.join().await;

    server_token.cancel();
    let served = match finished {
        Some(result) => result,
        None => serving.await,
    }
    .context("metrics server task failed")?;

    if let Err(err) = &served {
        critical!(error = ?err, "Metrics server terminated");
    }
    served.context("metrics server terminated unexpectedly")?;

    info!(server_name = %config.server_name, "Node monitor stopped");
    Ok(())
}
