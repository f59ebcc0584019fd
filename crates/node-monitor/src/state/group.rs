//! Group-wide latency engine.
//!
//! A group remembers when it first saw each of its most recent highest
//! blocks. Every report of a block is scored against that first arrival, so
//! the fastest member of the group scores zero and everybody else scores how
//! far behind the fastest member they were.
//!
//! Only blocks that raised the group's highest block are ever timed. A report
//! for a block that is not in the retained window, either because it aged out
//! or because the group skipped past it, scores [`Latency::Infinity`] and must
//! not be recorded as a latency sample.

use crate::{
    rank::RankKey,
    state::{
        StateError,
        endpoint::EndpointState,
        endpoint_id,
    },
    window::BoundedSortedWindow,
};
use alloy_primitives::U256;
use parking_lot::{
    RwLock,
    RwLockWriteGuard,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

/// Number of distinct highest blocks a group keeps first-seen times for.
pub const MAX_HISTORY_BLOCKS: usize = 1024;

/// How late an endpoint reported a block, compared to the first report of
/// the same block within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Measured(Duration),
    /// The block is too old to be scored.
    Infinity,
}

impl Latency {
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinity)
    }

    /// Latency in seconds, or `None` for [`Latency::Infinity`].
    pub fn as_secs_f64(&self) -> Option<f64> {
        match self {
            Self::Measured(latency) => Some(latency.as_secs_f64()),
            Self::Infinity => None,
        }
    }
}

#[derive(Debug)]
struct Frontier {
    highest_block: U256,
    highest_rank: RankKey,
    blocks: BoundedSortedWindow<RankKey>,
    first_seen: HashMap<RankKey, Instant>,
}

impl Frontier {
    fn new(capacity: usize) -> Self {
        Self {
            highest_block: U256::ZERO,
            highest_rank: RankKey::zero(),
            blocks: BoundedSortedWindow::new(capacity),
            first_seen: HashMap::with_capacity(capacity + 1),
        }
    }
}

#[derive(Debug)]
pub struct GroupState {
    name: String,
    frontier: RwLock<Frontier>,
    endpoints: RwLock<HashMap<String, Arc<EndpointState>>>,
}

impl GroupState {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, MAX_HISTORY_BLOCKS)
    }

    pub(crate) fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            frontier: RwLock::new(Frontier::new(capacity)),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Group name, empty for ungrouped endpoints.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn register_endpoint(&self, name: &str) -> Result<Arc<EndpointState>, StateError> {
        let id = endpoint_id(&self.name, name);
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(name) {
            return Err(StateError::DuplicateEndpoint { id });
        }

        let endpoint = Arc::new(EndpointState::new(id));
        endpoints.insert(name.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<EndpointState>> {
        self.endpoints.read().get(name).cloned()
    }

    /// Folds a report of `block` arriving at `received_at` into the group and
    /// returns how late it was relative to the first report of that block.
    pub fn record_observation(
        &self,
        block: U256,
        received_at: Instant,
    ) -> Result<Latency, StateError> {
        let rank = RankKey::encode(&block)?;

        let mut frontier = self.frontier.read();
        if rank > frontier.highest_rank {
            drop(frontier);
            let mut exclusive = self.frontier.write();
            // another writer may have raised the frontier while we waited
            if rank > exclusive.highest_rank {
                if let Some(evicted) = exclusive.blocks.insert_and_evict(rank.clone()) {
                    exclusive.first_seen.remove(&evicted);
                }
                exclusive.highest_block = block;
                exclusive.highest_rank = rank.clone();
                exclusive.first_seen.insert(rank.clone(), received_at);
            }
            frontier = RwLockWriteGuard::downgrade(exclusive);
        }

        let latency = match frontier.first_seen.get(&rank) {
            Some(first_seen) => {
                Latency::Measured(received_at.saturating_duration_since(*first_seen))
            }
            None => Latency::Infinity,
        };
        Ok(latency)
    }

    pub fn highest_block(&self) -> U256 {
        self.frontier.read().highest_block
    }

    /// Highest block of the group and the time elapsed since its first
    /// report. The elapsed time is `None` until the first block is observed.
    pub fn time_since_highest_block(&self) -> (U256, Option<Duration>) {
        let frontier = self.frontier.read();
        let elapsed = frontier
            .first_seen
            .get(&frontier.highest_rank)
            .map(Instant::elapsed);
        (frontier.highest_block, elapsed)
    }

    /// Calls `f` for every member endpoint. Iteration order is unspecified.
    pub fn iterate_endpoints<F>(&self, mut f: F)
    where
        F: FnMut(&str, &EndpointState),
    {
        let endpoints = self.endpoints.read();
        for (name, endpoint) in endpoints.iter() {
            f(name, endpoint);
        }
    }

    #[cfg(test)]
    pub(crate) fn retained_blocks(&self) -> usize {
        let frontier = self.frontier.read();
        debug_assert_eq!(frontier.blocks.len(), frontier.first_seen.len());
        frontier.first_seen.len()
    }
}
