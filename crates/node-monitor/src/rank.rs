//! Fixed-width, lexicographically ordered encoding of block numbers.
//!
//! Block numbers are unbounded in principle, so ordering them through a
//! sorted string structure requires every key to have the same width. A
//! [`RankKey`] is the decimal form of the number left-padded with zeros to
//! [`RANK_WIDTH`] characters, which makes string order identical to numeric
//! order for every number that fits.

use alloy_primitives::U256;
use std::fmt;
use thiserror::Error;

/// Width of every encoded rank key, in characters.
pub const RANK_WIDTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankError {
    #[error("block number {value} has {digits} digits, rank keys are {width} wide")]
    TooWide {
        value: U256,
        digits: usize,
        width: usize,
    },
}

/// Zero-padded decimal representation of a block number.
///
/// Ordering is plain string ordering, which by construction matches the
/// numeric ordering of the encoded values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankKey(String);

impl RankKey {
    /// Encodes `block`, refusing values that do not fit into [`RANK_WIDTH`]
    /// digits instead of truncating them.
    pub fn encode(block: &U256) -> Result<Self, RankError> {
        let digits = block.to_string();
        if digits.len() > RANK_WIDTH {
            return Err(RankError::TooWide {
                value: *block,
                digits: digits.len(),
                width: RANK_WIDTH,
            });
        }
        Ok(Self(format!("{digits:0>RANK_WIDTH$}")))
    }

    /// Rank of block zero, the floor every group and endpoint starts from.
    pub fn zero() -> Self {
        Self("0".repeat(RANK_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
