pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;

/// Blocks between two difficulty adjustments.
pub const RETARGET_INTERVAL: u64 = 10;
/// Expected seconds between two blocks.
pub const BLOCK_TIME_SECS: u64 = 10;
pub const EXPECTED_TIMESPAN_MS: u64 = RETARGET_INTERVAL * BLOCK_TIME_SECS * 1_000;
/// A single retarget never moves the target by more than 4x in either direction.
pub const MIN_TIMESPAN_MS: u64 = EXPECTED_TIMESPAN_MS / 4;
pub const MAX_TIMESPAN_MS: u64 = EXPECTED_TIMESPAN_MS * 4;

pub const INITIAL_TARGET: &str =
    "000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00.000000";
pub const GENESIS_NONCE: &str = "0";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
