use thiserror::Error;

/// Errors raised while building, retargeting or checking blocks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("invalid target {0:?}: expected up to 64 hex digits")]
    InvalidTarget(String),

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("block height {actual} does not extend the tip (expected {expected})")]
    HeightMismatch { expected: u64, actual: u64 },

    #[error("previous hash {actual:?} does not match the tip hash {expected:?}")]
    PreviousHashMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("stored hash {stored} does not match computed hash {computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("block target {actual} differs from the expected target {expected}")]
    TargetMismatch { expected: String, actual: String },

    #[error("block hash {0} is not below its target")]
    InsufficientWork(String),
}

pub type ChainResult<T> = Result<T, ChainError>;
