//! Well-known configuration keys shared between the base configuration and
//! the downstream service envs.

/// Rollup block height the network starts deriving from.
pub const STARTING_BLOCK_NUMBER: &str = "STARTING_BLOCK_NUMBER";

/// Rollup block time in seconds.
pub const L2_BLOCK_TIME: &str = "L2_BLOCK_TIME";

/// Derived: rollup genesis timestamp backdated from the latest L1 block.
pub const GENESIS_TIME_OVERRIDE: &str = "GENESIS_TIME_OVERRIDE";

/// Derived: rollup height the verification registry currently trusts.
pub const STARTING_ANCHOR_HEIGHT: &str = "STARTING_ANCHOR_HEIGHT";

/// Proof engine selector (`fault` or `validity`); gates the proving stages.
pub const PROOF_ENGINE: &str = "PROOF_ENGINE";

/// Numeric dispute game type to respect and wait for.
pub const RESPECTED_GAME_TYPE: &str = "RESPECTED_GAME_TYPE";

/// Unlocked dev account the registration transaction is sent from.
pub const ADMIN_ADDRESS: &str = "ADMIN_ADDRESS";

/// Flag: skip the service launch stage.
pub const SKIP_LAUNCH: &str = "SKIP_LAUNCH";
