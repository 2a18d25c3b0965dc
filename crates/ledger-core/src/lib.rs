pub mod canonical;
pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;

pub use chain::Chain;
pub use error::{ChainError, ChainResult};
pub use mine::{Miner, MinerState};
pub use pow::Target;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::TIMESTAMP_FORMAT;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: u64) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }
}

/// Every block field except the hash. Sealing a template produces a [`Block`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub height: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Option<String>,
    pub nonce: String,
    pub target: String,
    pub timestamp: String,
}

impl BlockTemplate {
    /// SHA-256 over the canonical JSON of the template, lowercase hex.
    pub fn compute_hash(&self) -> String {
        // Strings, integers and options of those always serialize.
        let bytes = canonical::to_canonical_vec(self).expect("block template serializes");
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn seal(self) -> Block {
        let hash = self.compute_hash();
        Block {
            contents: self,
            hash,
        }
    }
}

/// A sealed block. The hash is only ever computed from the contents or taken
/// verbatim from the wire, never set by callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    contents: BlockTemplate,
    hash: String,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.contents.height
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.contents.transactions
    }

    pub fn previous_hash(&self) -> Option<&str> {
        self.contents.previous_hash.as_deref()
    }

    pub fn nonce(&self) -> &str {
        &self.contents.nonce
    }

    pub fn target(&self) -> &str {
        &self.contents.target
    }

    pub fn timestamp(&self) -> &str {
        &self.contents.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn contents(&self) -> &BlockTemplate {
        &self.contents
    }

    pub fn compute_hash(&self) -> String {
        self.contents.compute_hash()
    }

    /// True when the carried hash matches the contents.
    pub fn has_valid_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn meets_target(&self) -> bool {
        pow::meets_target(&self.hash, &self.contents.target)
    }
}

/// Current UTC time in the ledger's timestamp format.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses naive ISO-8601 timestamps (taken as UTC) and RFC 3339.
pub fn parse_timestamp(raw: &str) -> ChainResult<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| ChainError::InvalidTimestamp(raw.to_string()))
}

pub mod pow {
    use crate::constants::{HASH_HEX_SIZE, INITIAL_TARGET};
    use crate::error::{ChainError, ChainResult};
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::str::FromStr;

    /// A 256-bit proof-of-work threshold.
    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Target(BigUint);

    impl Target {
        pub fn from_hex(raw: &str) -> ChainResult<Self> {
            if raw.is_empty() || raw.len() > HASH_HEX_SIZE {
                return Err(ChainError::InvalidTarget(raw.to_string()));
            }
            parse_hex(raw)
                .map(Target)
                .ok_or_else(|| ChainError::InvalidTarget(raw.to_string()))
        }

        /// Zero-padded, 64 lowercase hex digits.
        pub fn to_hex(&self) -> String {
            format!("{:0>width$}", self.0.to_str_radix(16), width = HASH_HEX_SIZE)
        }

        /// The easiest possible target, `2^256 - 1`.
        pub fn max() -> Self {
            Target((BigUint::from(1u8) << 256usize) - 1u8)
        }

        pub fn value(&self) -> &BigUint {
            &self.0
        }

        /// `floor(self * numer / denom)`, kept within `1..=max`.
        pub fn scale(&self, numer: u64, denom: u64) -> Self {
            let scaled = &self.0 * BigUint::from(numer) / BigUint::from(denom.max(1));
            let max = Target::max().0;
            if scaled > max {
                Target(max)
            } else if scaled == BigUint::from(0u8) {
                Target(BigUint::from(1u8))
            } else {
                Target(scaled)
            }
        }
    }

    impl Default for Target {
        fn default() -> Self {
            // INITIAL_TARGET is a fixed valid literal.
            Target(parse_hex(INITIAL_TARGET).unwrap_or_else(|| Target::max().0))
        }
    }

    impl From<BigUint> for Target {
        fn from(value: BigUint) -> Self {
            Target(value)
        }
    }

    impl FromStr for Target {
        type Err = ChainError;

        fn from_str(s: &str) -> ChainResult<Self> {
            Target::from_hex(s)
        }
    }

    impl fmt::Display for Target {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.to_hex())
        }
    }

    impl Serialize for Target {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_hex())
        }
    }

    impl<'de> Deserialize<'de> for Target {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let raw = String::deserialize(deserializer)?;
            Target::from_hex(&raw).map_err(serde::de::Error::custom)
        }
    }

    pub(crate) fn parse_hex(raw: &str) -> Option<BigUint> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        BigUint::parse_bytes(raw.as_bytes(), 16)
    }

    /// True iff `hash`, read as a big-endian integer, is strictly below `target`.
    /// Malformed hex on either side never meets the target.
    pub fn meets_target(hash: &str, target: &str) -> bool {
        match (parse_hex(hash), parse_hex(target)) {
            (Some(hash), Some(target)) => hash < target,
            _ => false,
        }
    }
}
