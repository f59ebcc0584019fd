//! HTTP server exposing the health check and the Prometheus scrape endpoint.

use crate::{
    metrics,
    state::State,
};
use axum::{
    Router,
    extract,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{
    io,
    net::SocketAddr,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    instrument,
};

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to bind metrics server address: {addr}")]
    BindAddress {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("metrics server error on {addr}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone)]
struct Scrape {
    state: Arc<State>,
    handle: PrometheusHandle,
}

#[derive(Debug)]
pub struct MetricsServer {
    bind_addr: SocketAddr,
    shutdown_token: CancellationToken,
}

impl MetricsServer {
    /// Server that stops gracefully once `shutdown_token` is cancelled.
    pub fn new(bind_addr: SocketAddr, shutdown_token: CancellationToken) -> Self {
        Self {
            bind_addr,
            shutdown_token,
        }
    }

    #[instrument(
        name = "metrics_server::run",
        skip_all,
        fields(bind_addr = %self.bind_addr),
        level = "debug"
    )]
    pub async fn run(&self, state: Arc<State>, handle: PrometheusHandle) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| {
                error!(
                    bind_addr = %self.bind_addr,
                    error = ?e,
                    "Failed to bind metrics server listener"
                );
                ServerError::BindAddress {
                    addr: self.bind_addr,
                    source: e,
                }
            })?;

        info!(bind_addr = %self.bind_addr, "Metrics server starting");

        let shutdown = self.shutdown_token.clone();
        axum::serve(listener, router(state, handle))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| {
                error!(error = ?e, "Metrics server failed");
                ServerError::Serve {
                    addr: self.bind_addr,
                    source: e,
                }
            })?;

        info!("Metrics server stopped");
        Ok(())
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[instrument(name = "metrics_server::health", level = "trace")]
async fn health() -> &'static str {
    "OK"
}

#[instrument(name = "metrics_server::scrape", skip_all, level = "trace")]
async fn scrape(extract::State(scrape): extract::State<Scrape>) -> String {
    metrics::observe(&scrape.state);
    scrape.handle.render()
}

pub fn router(state: Arc<State>, handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/metrics", get(scrape))
        .with_state(Scrape { state, handle })
}
