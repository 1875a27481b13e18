//! Pure derivations of configuration values from live chain state.
//!
//! Every function takes explicit inputs and returns a value or a typed
//! failure. No hidden state, no querying: queries belong to the chain
//! reader, invoked by the orchestrating stage. Derived values are recomputed
//! on every run, never cached, because they depend on live chain state.

use crate::error::{BootError, Result};
use crate::rpc::ChainQueryResult;

/// Compute the genesis time override for the rollup layer.
///
/// `l1_timestamp - starting_block_number * block_time`, integer arithmetic
/// only. A negative result means the configured starting height is ahead of
/// L1 time, which is a real misconfiguration that must surface, not clamp.
pub fn genesis_time_override(
    l1_timestamp: u64,
    starting_block_number: u64,
    block_time: u64,
) -> Result<u64> {
    let backdated = starting_block_number
        .checked_mul(block_time)
        .ok_or_else(|| {
            BootError::ArithmeticDomain(format!(
                "starting block {starting_block_number} x block time {block_time}s overflows"
            ))
        })?;

    l1_timestamp.checked_sub(backdated).ok_or_else(|| {
        BootError::ArithmeticDomain(format!(
            "genesis time would be negative: l1 timestamp {l1_timestamp} < \
             {starting_block_number} blocks x {block_time}s = {backdated}"
        ))
    })
}

/// Extract the trusted anchor height from an anchor registry query.
///
/// The registry returns a `(bytes32, uint256)` pair of output root and
/// rollup block number; the height is the second element.
pub fn resolve_anchor_height(result: &ChainQueryResult) -> Result<u64> {
    let [root, height] = result.values.as_slice() else {
        return Err(BootError::MalformedResult(format!(
            "anchor query returned {} value(s), expected (bytes32, uint256)",
            result.values.len()
        )));
    };

    if root.as_fixed_bytes().is_none() {
        return Err(BootError::MalformedResult(
            "anchor root is not a bytes32".to_string(),
        ));
    }
    let height = height.as_uint().ok_or_else(|| {
        BootError::MalformedResult("anchor height is not a uint256".to_string())
    })?;

    height.try_into().map_err(|_| {
        BootError::MalformedResult(format!("anchor height {height} does not fit in u64"))
    })
}
