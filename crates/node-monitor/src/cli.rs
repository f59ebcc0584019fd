//! Command-line configuration for the node monitor.

use crate::config::{
    Config,
    ConfigError,
    EndpointConfig,
};
use clap::Parser;
use std::{
    net::SocketAddr,
    time::Duration,
};

/// Every flag is also readable from an env var so the monitor can be
/// configured through deployment manifests without shell args.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Execution endpoints (websocket) in the format of `[group:]name=host:port`.
    #[arg(
        long = "eth-el-endpoint",
        env = "NODE_MONITOR_ETH_EL_ENDPOINTS",
        value_delimiter = ','
    )]
    pub execution_endpoints: Vec<EndpointConfig>,

    /// External execution endpoints (websocket) in the format of `[group:]name=host:port`.
    #[arg(
        long = "eth-ext-el-endpoint",
        env = "NODE_MONITOR_ETH_EXT_EL_ENDPOINTS",
        value_delimiter = ','
    )]
    pub external_execution_endpoints: Vec<EndpointConfig>,

    /// Interval at which the monitor tries to (re-)subscribe to node events,
    /// e.g. `15s`, `500ms` or `1m 30s`.
    #[arg(
        long,
        default_value = "15s",
        env = "NODE_MONITOR_RESUBSCRIBE_INTERVAL",
        value_parser = humantime::parse_duration
    )]
    pub resubscribe_interval: Duration,

    /// `host:port` for the server to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "NODE_MONITOR_LISTEN_ADDRESS")]
    pub listen_address: SocketAddr,

    /// Service name to report in logs.
    #[arg(long, default_value = "node-monitor", env = "NODE_MONITOR_SERVER_NAME")]
    pub server_name: String,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut endpoints = self.execution_endpoints;
        endpoints.extend(self.external_execution_endpoints);

        let config = Config {
            endpoints,
            resubscribe_interval: self.resubscribe_interval,
            listen_address: self.listen_address,
            server_name: self.server_name,
        };
        config.validate()?;
        Ok(config)
    }
}
