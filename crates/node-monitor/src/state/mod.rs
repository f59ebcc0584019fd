//! In-memory view of every monitored group and endpoint.
//!
//! The [`State`] registry owns all group and endpoint records. It is shared
//! between the header handler, which mutates it through the per-group and
//! per-endpoint synchronized accessors, and the metrics sampler, which only
//! ever reads it.

pub mod endpoint;
pub mod group;

pub use endpoint::EndpointState;
pub use group::{
    GroupState,
    Latency,
    MAX_HISTORY_BLOCKS,
};

use crate::rank::RankError;
use alloy_primitives::U256;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("duplicate execution endpoint id: {id}")]
    DuplicateEndpoint { id: String },
    #[error("failed to rank block number")]
    Rank(#[from] RankError),
}

/// Registry of groups, each owning its member endpoints.
#[derive(Debug, Default)]
pub struct State {
    groups: RwLock<HashMap<String, Arc<GroupState>>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers endpoint `name` in `group`, creating the group on first use.
    pub fn register_endpoint(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Arc<EndpointState>, StateError> {
        let group_state = self
            .groups
            .write()
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(GroupState::new(group)))
            .clone();

        group_state.register_endpoint(name)
    }

    pub fn group(&self, name: &str) -> Option<Arc<GroupState>> {
        self.groups.read().get(name).cloned()
    }

    /// Looks up the group and endpoint records of `group:name`.
    pub fn endpoint(&self, group: &str, name: &str) -> Option<(Arc<GroupState>, Arc<EndpointState>)> {
        let group_state = self.group(group)?;
        let endpoint = group_state.endpoint(name)?;
        Some((group_state, endpoint))
    }

    /// Calls `f` for every group. Iteration order is unspecified.
    pub fn iterate_groups<F>(&self, mut f: F)
    where
        F: FnMut(&str, &GroupState),
    {
        let groups = self.groups.read();
        for (name, group) in groups.iter() {
            f(name, group);
        }
    }
}

/// Identifier used in logs and errors: `name` for ungrouped endpoints,
/// `group:name` otherwise.
pub fn endpoint_id(group: &str, name: &str) -> String {
    if group.is_empty() {
        name.to_string()
    } else {
        format!("{group}:{name}")
    }
}

/// Distance between a group's highest block and one member's highest block.
///
/// Zero when either side has not observed a block yet, so that endpoints
/// that never connected do not report the full chain height as lag.
pub fn lag(group_highest: U256, endpoint_highest: U256) -> U256 {
    if group_highest.is_zero() || endpoint_highest.is_zero() {
        return U256::ZERO;
    }
    group_highest.saturating_sub(endpoint_highest)
}
