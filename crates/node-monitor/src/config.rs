//! Runtime configuration and endpoint identity parsing.

use crate::state::endpoint_id;
use std::{
    collections::HashSet,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unexpected execution endpoint `{0}` (must look like `[group:]name=host:port`)")]
    MalformedEndpoint(String),
    #[error("too many parts in the id of execution endpoint: {0}")]
    TooManyIdParts(String),
    #[error("empty name in the id of execution endpoint: {0}")]
    EmptyName(String),
    #[error("invalid uri `{uri}` for execution endpoint {id}")]
    InvalidUri { id: String, uri: String },
    #[error("duplicate execution endpoint id: {0}")]
    DuplicateEndpoint(String),
}

/// One configured execution endpoint: `[group:]name=uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub group: String,
    pub name: String,
    pub uri: Url,
}

impl EndpointConfig {
    pub fn id(&self) -> String {
        endpoint_id(&self.group, &self.name)
    }
}

impl FromStr for EndpointConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // the uri may carry a query string, only the first `=` separates
        let (id, uri) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedEndpoint(s.to_string()))?;
        let (id, uri) = (id.trim(), uri.trim());

        let (group, name) = parse_endpoint_id(id)?;
        let uri = parse_endpoint_uri(uri).ok_or_else(|| {
            ConfigError::InvalidUri {
                id: id.to_string(),
                uri: uri.to_string(),
            }
        })?;

        Ok(Self {
            group: group.to_string(),
            name: name.to_string(),
            uri,
        })
    }
}

/// Splits `[group:]name` into its group (empty when absent) and name.
pub fn parse_endpoint_id(id: &str) -> Result<(&str, &str), ConfigError> {
    let (group, name) = match id.split_once(':') {
        Some((_, rest)) if rest.contains(':') => {
            return Err(ConfigError::TooManyIdParts(id.to_string()));
        }
        Some((group, name)) => (group, name),
        None => ("", id),
    };

    if name.is_empty() {
        return Err(ConfigError::EmptyName(id.to_string()));
    }
    Ok((group, name))
}

/// Parses an endpoint uri. A bare `host:port` is dialed over plain
/// websockets.
fn parse_endpoint_uri(uri: &str) -> Option<Url> {
    if uri.contains("://") {
        return Url::parse(uri).ok().filter(Url::has_host);
    }

    let (host, port) = uri.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Url::parse(&format!("ws://{host}:{port}")).ok()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Vec<EndpointConfig>,
    /// Base delay between (re-)subscription attempts, jittered by 10%.
    pub resubscribe_interval: Duration,
    pub listen_address: SocketAddr,
    pub server_name: String,
}

impl Config {
    /// Rejects configurations that name the same endpoint twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            if !seen.insert((endpoint.group.as_str(), endpoint.name.as_str())) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.id()));
            }
        }
        Ok(())
    }
}
