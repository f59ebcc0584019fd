use alloy_primitives::U256;
use parking_lot::{
    RwLock,
    RwLockWriteGuard,
};
use std::time::{
    Duration,
    Instant,
};

/// High-water mark of a single endpoint: the highest block it reported and
/// when that report arrived.
#[derive(Debug)]
pub struct EndpointState {
    id: String,
    inner: RwLock<HighestBlock>,
}

#[derive(Debug, Default)]
struct HighestBlock {
    number: U256,
    received_at: Option<Instant>,
}

impl EndpointState {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            inner: RwLock::new(HighestBlock::default()),
        }
    }

    /// `group:name`, or just `name` for ungrouped endpoints.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raises the high-water mark to `block` if it is strictly higher than
    /// the current one. Returns whether the mark moved.
    pub fn update_highest_block_if_needed(&self, block: U256, received_at: Instant) -> bool {
        let mut inner = self.inner.read();
        let mut updated = false;

        if block > inner.number {
            drop(inner);
            let mut exclusive = self.inner.write();
            // another writer may have advanced the mark while we waited
            if block > exclusive.number {
                exclusive.number = block;
                exclusive.received_at = Some(received_at);
                updated = true;
            }
            inner = RwLockWriteGuard::downgrade(exclusive);
        }

        debug_assert!(inner.number >= block);
        updated
    }

    pub fn highest_block(&self) -> U256 {
        self.inner.read().number
    }

    pub fn highest_block_time(&self) -> Option<Instant> {
        self.inner.read().received_at
    }

    /// Highest block and the time elapsed since it arrived. The elapsed time
    /// is `None` until the first block has been observed.
    pub fn time_since_highest_block(&self) -> (U256, Option<Duration>) {
        let inner = self.inner.read();
        (inner.number, inner.received_at.map(|at| at.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let endpoint = EndpointState::new("geth".into());
        assert_eq!(endpoint.highest_block(), U256::ZERO);
        assert_eq!(endpoint.highest_block_time(), None);
        assert_eq!(endpoint.time_since_highest_block(), (U256::ZERO, None));
    }

    #[test]
    fn timestamp_moves_only_on_strict_increase() {
        let endpoint = EndpointState::new("mainnet:geth".into());
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(10);
        let t2 = t0 + Duration::from_millis(20);

        assert!(endpoint.update_highest_block_if_needed(U256::from(5), t0));
        assert!(!endpoint.update_highest_block_if_needed(U256::from(5), t1));
        assert!(!endpoint.update_highest_block_if_needed(U256::from(3), t2));
        assert_eq!(endpoint.highest_block(), U256::from(5));
        assert_eq!(endpoint.highest_block_time(), Some(t0));

        assert!(endpoint.update_highest_block_if_needed(U256::from(6), t2));
        assert_eq!(endpoint.highest_block(), U256::from(6));
        assert_eq!(endpoint.highest_block_time(), Some(t2));
    }

    #[test]
    fn elapsed_is_measured_from_the_highest_block() {
        let endpoint = EndpointState::new("geth".into());
        let received_at = Instant::now() - Duration::from_secs(3);
        endpoint.update_highest_block_if_needed(U256::from(42), received_at);

        let (block, elapsed) = endpoint.time_since_highest_block();
        assert_eq!(block, U256::from(42));
        assert!(elapsed.unwrap() >= Duration::from_secs(3));
    }
}
