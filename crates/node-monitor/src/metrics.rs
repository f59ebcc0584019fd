//! Prometheus metrics for the node monitor.
//!
//! ### Gauges (sampled from [`State`] on every scrape)
//! - `node_monitor_highest_block`: highest block seen by a group or endpoint
//! - `node_monitor_highest_block_lag`: blocks an endpoint trails its group by
//! - `node_monitor_time_since_last_block`: seconds since the highest block
//!   arrived
//!
//! ### Histograms
//! - `node_monitor_new_block_latency`: seconds an endpoint reported a block
//!   after the first member of its group did
//!
//! Every series carries the `service_name` global label. Group-level series
//! add `group` for named groups, endpoint series add `name` and, for grouped
//! endpoints, `group`.

#![allow(clippy::cast_precision_loss)]

use crate::state::{
    Latency,
    State,
    lag,
};
use alloy_primitives::U256;
use metrics::{
    Unit,
    describe_gauge,
    describe_histogram,
    gauge,
    histogram,
};
use metrics_exporter_prometheus::{
    BuildError,
    Matcher,
    PrometheusBuilder,
    PrometheusHandle,
};
use std::time::Duration;
use thiserror::Error;

pub const HIGHEST_BLOCK: &str = "node_monitor_highest_block";
pub const HIGHEST_BLOCK_LAG: &str = "node_monitor_highest_block_lag";
pub const TIME_SINCE_LAST_BLOCK: &str = "node_monitor_time_since_last_block";
pub const NEW_BLOCK_LATENCY: &str = "node_monitor_new_block_latency";

/// Doubling buckets from ~12ms up to ~3.4h.
pub const NEW_BLOCK_LATENCY_BUCKETS: &[f64] = &[
    0.011_718_75,
    0.023_437_5,
    0.046_875,
    0.093_75,
    0.187_5,
    0.375,
    0.75,
    1.5,
    3.0,
    6.0,
    12.0,
    24.0,
    48.0,
    96.0,
    192.0,
    384.0,
    768.0,
    1536.0,
    3072.0,
    6144.0,
    12288.0,
];

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("failed to install prometheus recorder")]
    Install(#[source] BuildError),
}

/// Global label naming the reporting service on every series.
pub const SERVICE_NAME_LABEL: &str = "service_name";

/// Exporter builder with the service label and the latency histogram
/// buckets configured.
pub fn builder(service_name: &str) -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .add_global_label(SERVICE_NAME_LABEL, service_name)
        .set_buckets_for_metric(
            Matcher::Full(NEW_BLOCK_LATENCY.to_string()),
            NEW_BLOCK_LATENCY_BUCKETS,
        )
        .map_err(MetricsError::Install)
}

/// Installs the process-wide recorder and returns the handle used to render
/// scrapes. Must be called at most once per process.
pub fn install_recorder(service_name: &str) -> Result<PrometheusHandle, MetricsError> {
    let handle = builder(service_name)?
        .install_recorder()
        .map_err(MetricsError::Install)?;
    describe();
    Ok(handle)
}

/// Registers help text and units for every metric.
pub fn describe() {
    describe_gauge!(
        HIGHEST_BLOCK,
        "Highest block number seen by the group or endpoint"
    );
    describe_gauge!(
        HIGHEST_BLOCK_LAG,
        "Number of blocks the endpoint trails the highest block of its group"
    );
    describe_gauge!(
        TIME_SINCE_LAST_BLOCK,
        Unit::Seconds,
        "Time since the highest block of the group or endpoint was received"
    );
    describe_histogram!(
        NEW_BLOCK_LATENCY,
        Unit::Seconds,
        "Delay between the first and this endpoint's report of a block"
    );
}

fn endpoint_labels(group: &str, name: &str) -> Vec<(&'static str, String)> {
    let mut labels = Vec::with_capacity(2);
    if !group.is_empty() {
        labels.push(("group", group.to_string()));
    }
    labels.push(("name", name.to_string()));
    labels
}

fn group_labels(group: &str) -> Vec<(&'static str, String)> {
    if group.is_empty() {
        return Vec::new();
    }
    vec![("group", group.to_string())]
}

/// Records the latency of one endpoint's report. Infinite latencies carry no
/// measurement and are skipped.
pub fn record_latency(group: &str, name: &str, latency: Latency) {
    let Some(seconds) = latency.as_secs_f64() else {
        return;
    };
    histogram!(NEW_BLOCK_LATENCY, &endpoint_labels(group, name)).record(seconds);
}

/// Publishes the current gauges of every group and endpoint. Entities that
/// have not observed a block yet are left out.
pub fn observe(state: &State) {
    state.iterate_groups(|group_name, group| {
        let (group_highest, group_elapsed) = group.time_since_highest_block();
        if !group_highest.is_zero() {
            let labels = group_labels(group_name);
            gauge!(HIGHEST_BLOCK, &labels).set(block_as_f64(group_highest));
            if let Some(elapsed) = group_elapsed {
                gauge!(TIME_SINCE_LAST_BLOCK, &labels).set(elapsed.as_secs_f64());
            }
        }

        group.iterate_endpoints(|name, endpoint| {
            let (highest, elapsed) = endpoint.time_since_highest_block();
            if highest.is_zero() {
                return;
            }

            let labels = endpoint_labels(group_name, name);
            gauge!(HIGHEST_BLOCK, &labels).set(block_as_f64(highest));
            gauge!(HIGHEST_BLOCK_LAG, &labels).set(block_as_f64(lag(group_highest, highest)));
            gauge!(TIME_SINCE_LAST_BLOCK, &labels)
                .set(elapsed.map_or(0.0, |elapsed: Duration| elapsed.as_secs_f64()));
        });
    });
}

/// Block numbers beyond `u64` are clamped, gauges only need the magnitude.
fn block_as_f64(block: U256) -> f64 {
    u64::try_from(block).unwrap_or(u64::MAX) as f64
}
