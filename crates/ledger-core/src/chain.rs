use std::collections::HashSet;

use rand::Rng;
use tracing::{debug, info};

use crate::constants::{
    EXPECTED_TIMESPAN_MS, GENESIS_NONCE, GENESIS_TIMESTAMP, MAX_TIMESPAN_MS, MIN_TIMESPAN_MS,
    RETARGET_INTERVAL,
};
use crate::error::{ChainError, ChainResult};
use crate::mine::Miner;
use crate::{parse_timestamp, timestamp_now, Block, BlockTemplate, Target, Transaction};

/// The single local chain: blocks, pending transactions and the current target.
#[derive(Clone, Debug)]
pub struct Chain {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    target: Target,
    known_hashes: HashSet<String>,
    retargeted_for: Option<u64>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::with_target(Target::default())
    }

    /// A chain holding only the genesis block, mining against `target`.
    pub fn with_target(target: Target) -> Self {
        let genesis = genesis_block(&target);
        info!(hash = %genesis.hash(), "Created genesis block");
        let mut chain = Self {
            blocks: Vec::new(),
            pending: Vec::new(),
            target,
            known_hashes: HashSet::new(),
            retargeted_for: None,
        };
        chain.push(genesis);
        chain
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Height of the tip block.
    pub fn height(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }

    pub fn last_block(&self) -> &Block {
        // Never empty: the genesis block is pushed on construction.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.known_hashes.contains(hash)
    }

    pub fn contains_transaction(&self, tx: &Transaction) -> bool {
        self.pending.contains(tx)
    }

    /// Every block above `height`, ascending.
    pub fn blocks_after(&self, height: u64) -> &[Block] {
        let start = usize::try_from(height.saturating_add(1))
            .unwrap_or(usize::MAX)
            .min(self.blocks.len());
        &self.blocks[start..]
    }

    /// Queues a transaction for the next block. Callers validate beforehand.
    pub fn new_transaction(
        &mut self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u64,
    ) {
        self.push_transaction(Transaction::new(sender, recipient, amount));
    }

    pub fn push_transaction(&mut self, tx: Transaction) {
        debug!(sender = %tx.sender, recipient = %tx.recipient, amount = tx.amount, "Queued transaction");
        self.pending.push(tx);
    }

    /// Builds a sealed, not yet checked block on top of the tip with a fresh
    /// random nonce. Does not touch the chain.
    pub fn create_candidate_block(&self) -> Block {
        let nonce: u64 = rand::thread_rng().gen();
        BlockTemplate {
            height: self.blocks.len() as u64,
            transactions: self.pending.clone(),
            previous_hash: self.blocks.last().map(|b| b.hash().to_string()),
            nonce: format!("{nonce:x}"),
            target: self.target.to_hex(),
            timestamp: timestamp_now(),
        }
        .seal()
    }

    /// Appends `block` without checking it and drops the pending transactions it
    /// already contains.
    pub fn add_block(&mut self, block: Block) {
        let before = self.pending.len();
        self.pending.retain(|tx| !block.transactions().contains(tx));
        debug!(
            height = block.height(),
            hash = %block.hash(),
            settled = before - self.pending.len(),
            "Appending block"
        );
        self.push(block);
    }

    fn push(&mut self, block: Block) {
        self.known_hashes.insert(block.hash().to_string());
        self.blocks.push(block);
    }

    /// The target the block at `next_height` has to meet, computed from the
    /// current target and the last retarget window. Pure.
    pub fn next_target(&self, next_height: u64) -> ChainResult<Target> {
        let window = RETARGET_INTERVAL as usize;
        if next_height % RETARGET_INTERVAL != 0 || self.blocks.len() < window {
            return Ok(self.target.clone());
        }

        let last = parse_timestamp(self.blocks[self.blocks.len() - 1].timestamp())?;
        let first = parse_timestamp(self.blocks[self.blocks.len() - window].timestamp())?;
        let actual_ms = (last - first).num_milliseconds();
        let clamped = u64::try_from(actual_ms)
            .unwrap_or(0)
            .clamp(MIN_TIMESPAN_MS, MAX_TIMESPAN_MS);

        Ok(self.target.scale(clamped, EXPECTED_TIMESPAN_MS))
    }

    /// Adjusts the target before mining the block at `next_height`. Applied at
    /// most once per height; repeated calls for the same height are no-ops.
    pub fn recalculate_target(&mut self, next_height: u64) -> ChainResult<&Target> {
        if self.retargeted_for == Some(next_height) {
            return Ok(&self.target);
        }
        let target = self.next_target(next_height)?;
        if target != self.target {
            info!(height = next_height, target = %target, "Calculated new target");
        }
        self.target = target;
        self.retargeted_for = Some(next_height);
        Ok(&self.target)
    }

    /// Full check of a block that claims to extend the tip: height, linkage,
    /// hash integrity, target and proof-of-work.
    pub fn validate_block(&self, block: &Block) -> ChainResult<()> {
        let expected_height = self.blocks.len() as u64;
        if block.height() != expected_height {
            return Err(ChainError::HeightMismatch {
                expected: expected_height,
                actual: block.height(),
            });
        }

        let tip_hash = self.blocks.last().map(|b| b.hash().to_string());
        if block.previous_hash().map(str::to_string) != tip_hash {
            return Err(ChainError::PreviousHashMismatch {
                expected: tip_hash,
                actual: block.previous_hash().map(str::to_string),
            });
        }

        let computed = block.compute_hash();
        if computed != block.hash() {
            return Err(ChainError::HashMismatch {
                stored: block.hash().to_string(),
                computed,
            });
        }

        let expected_target = if self.retargeted_for == Some(expected_height) {
            self.target.clone()
        } else {
            self.next_target(expected_height)?
        };
        let claimed = Target::from_hex(block.target())?;
        if claimed != expected_target {
            return Err(ChainError::TargetMismatch {
                expected: expected_target.to_hex(),
                actual: claimed.to_hex(),
            });
        }

        if !block.meets_target() {
            return Err(ChainError::InsufficientWork(block.hash().to_string()));
        }
        Ok(())
    }

    /// Mines one block: retarget, then draw candidates until one meets the
    /// target, yielding to the scheduler after every failed attempt.
    pub async fn mine(&mut self) -> Block {
        let mut miner = Miner::new();
        loop {
            if let Some(block) = miner.step(self) {
                return block;
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Deterministic genesis block shared by every node.
pub fn genesis_block(target: &Target) -> Block {
    BlockTemplate {
        height: 0,
        transactions: Vec::new(),
        previous_hash: None,
        nonce: GENESIS_NONCE.to_string(),
        target: target.to_hex(),
        timestamp: GENESIS_TIMESTAMP.to_string(),
    }
    .seal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format_timestamp, parse_timestamp};
    use chrono::Duration;
    use num_bigint::BigUint;

    /// Appends synthetic blocks up to `count`; block `h` is stamped
    /// `offset_ms(h)` after the genesis timestamp.
    fn chain_with_offsets(count: usize, offset_ms: impl Fn(u64) -> i64) -> Chain {
        let mut chain = Chain::new();
        let start = parse_timestamp(GENESIS_TIMESTAMP).unwrap();
        while chain.len() < count {
            let height = chain.len() as u64;
            let block = BlockTemplate {
                height,
                transactions: vec![],
                previous_hash: Some(chain.last_block().hash().to_string()),
                nonce: format!("{height:x}"),
                target: chain.target().to_hex(),
                timestamp: format_timestamp(start + Duration::milliseconds(offset_ms(height))),
            }
            .seal();
            chain.add_block(block);
        }
        chain
    }

    /// Ten blocks whose first and last timestamps are `span_secs` apart.
    fn window_spanning(span_secs: i64) -> Chain {
        chain_with_offsets(10, |h| span_secs * 1_000 * h as i64 / 9)
    }

    fn span_secs(chain: &Chain) -> i64 {
        let first = parse_timestamp(chain.blocks()[chain.len() - 10].timestamp()).unwrap();
        let last = parse_timestamp(chain.last_block().timestamp()).unwrap();
        (last - first).num_seconds()
    }

    #[test]
    fn genesis_present_after_construction() {
        let chain = Chain::new();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.height(), 0);
        let genesis = chain.last_block();
        assert_eq!(genesis.height(), 0);
        assert_eq!(genesis.previous_hash(), None);
        assert!(genesis.has_valid_hash());
        assert_eq!(genesis, &genesis_block(&Target::default()));
    }

    #[test]
    fn candidate_extends_tip_without_mutating() {
        let mut chain = Chain::new();
        chain.new_transaction("alice", "bob", 3);
        let candidate = chain.create_candidate_block();

        assert_eq!(candidate.height(), 1);
        assert_eq!(candidate.previous_hash(), Some(chain.last_block().hash()));
        assert_eq!(candidate.transactions(), chain.pending());
        assert_eq!(candidate.target(), chain.target().to_hex());
        assert!(candidate.has_valid_hash());
        assert!(u64::from_str_radix(candidate.nonce(), 16).is_ok());
        assert!(parse_timestamp(candidate.timestamp()).is_ok());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.pending().len(), 1);
    }

    #[test]
    fn candidates_draw_fresh_nonces() {
        let chain = Chain::new();
        let a = chain.create_candidate_block();
        let b = chain.create_candidate_block();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn add_block_settles_only_included_transactions() {
        let mut chain = Chain::new();
        chain.new_transaction("alice", "bob", 1);
        let block = chain.create_candidate_block();
        chain.new_transaction("carol", "dave", 2);

        chain.add_block(block.clone());

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_block(), &block);
        assert_eq!(chain.pending(), &[Transaction::new("carol", "dave", 2)]);
        assert!(chain.contains_block(block.hash()));
    }

    #[test]
    fn retarget_skipped_off_interval() {
        let mut chain = window_spanning(10);
        let before = chain.target().clone();
        chain.recalculate_target(9).unwrap();
        chain.recalculate_target(11).unwrap();
        assert_eq!(chain.target(), &before);
    }

    #[test]
    fn retarget_on_schedule_keeps_target() {
        let mut chain = window_spanning(100);
        assert_eq!(span_secs(&chain), 100);
        let before = chain.target().clone();
        chain.recalculate_target(10).unwrap();
        assert_eq!(chain.target(), &before);
    }

    #[test]
    fn retarget_fast_blocks_clamped_to_quarter() {
        // Ratio 0.1, clamped to 0.25.
        let mut chain = window_spanning(10);
        assert_eq!(span_secs(&chain), 10);
        let old = chain.target().value().clone();
        chain.recalculate_target(10).unwrap();
        assert_eq!(chain.target().value(), &(old / BigUint::from(4u8)));
    }

    #[test]
    fn retarget_slow_blocks_clamped_to_four() {
        // Ratio 10, clamped to 4.0.
        let mut chain = window_spanning(1_000);
        assert_eq!(span_secs(&chain), 1_000);
        let old = chain.target().value().clone();
        chain.recalculate_target(10).unwrap();
        assert_eq!(chain.target().value(), &(old * BigUint::from(4u8)));
    }

    #[test]
    fn retarget_scales_proportionally_inside_bounds() {
        let mut chain = window_spanning(150);
        let old = chain.target().value().clone();
        chain.recalculate_target(10).unwrap();
        assert_eq!(
            chain.target().value(),
            &(old * BigUint::from(3u8) / BigUint::from(2u8))
        );
    }

    #[test]
    fn retarget_applies_once_per_height() {
        let mut chain = window_spanning(10);
        let old = chain.target().value().clone();
        chain.recalculate_target(10).unwrap();
        chain.recalculate_target(10).unwrap();
        assert_eq!(chain.target().value(), &(old / BigUint::from(4u8)));
    }

    #[test]
    fn blocks_after_returns_missing_suffix() {
        let chain = chain_with_offsets(5, |h| h as i64 * 10_000);
        let after = chain.blocks_after(2);
        assert_eq!(after.iter().map(Block::height).collect::<Vec<_>>(), vec![3, 4]);
        assert!(chain.blocks_after(4).is_empty());
        assert!(chain.blocks_after(u64::MAX).is_empty());
    }

    #[test]
    fn retarget_rejects_bad_timestamps() {
        let mut chain = chain_with_offsets(9, |h| h as i64 * 1_000);
        let block = BlockTemplate {
            height: 9,
            transactions: vec![],
            previous_hash: Some(chain.last_block().hash().to_string()),
            nonce: "0".into(),
            target: chain.target().to_hex(),
            timestamp: "not a time".into(),
        }
        .seal();
        chain.add_block(block);
        let before = chain.target().clone();
        assert!(matches!(
            chain.recalculate_target(10),
            Err(ChainError::InvalidTimestamp(_))
        ));
        assert_eq!(chain.target(), &before);
    }

    #[test]
    fn validate_block_accepts_mined_block() {
        let mut chain = Chain::with_target(Target::max());
        let block = loop {
            let candidate = chain.create_candidate_block();
            if candidate.meets_target() {
                break candidate;
            }
        };
        chain.validate_block(&block).unwrap();
        chain.add_block(block);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn validate_block_rejects_broken_linkage_and_work() {
        let chain = Chain::with_target(Target::from(BigUint::from(1u8)));
        let mut template = chain.create_candidate_block().contents().clone();

        template.height = 7;
        assert!(matches!(
            chain.validate_block(&template.clone().seal()),
            Err(ChainError::HeightMismatch { expected: 1, actual: 7 })
        ));

        template.height = 1;
        template.previous_hash = Some("00".repeat(32));
        assert!(matches!(
            chain.validate_block(&template.clone().seal()),
            Err(ChainError::PreviousHashMismatch { .. })
        ));

        template.previous_hash = Some(chain.last_block().hash().to_string());
        template.target = Target::max().to_hex();
        assert!(matches!(
            chain.validate_block(&template.clone().seal()),
            Err(ChainError::TargetMismatch { .. })
        ));

        template.target = chain.target().to_hex();
        assert!(matches!(
            chain.validate_block(&template.clone().seal()),
            Err(ChainError::InsufficientWork(_))
        ));
    }

    #[test]
    fn validate_block_rejects_forged_hash() {
        let chain = Chain::with_target(Target::max());
        let block = chain.create_candidate_block();
        let mut json = serde_json::to_value(&block).unwrap();
        json["hash"] = serde_json::Value::String("0".repeat(64));
        let forged: Block = serde_json::from_value(json).unwrap();
        assert!(matches!(
            chain.validate_block(&forged),
            Err(ChainError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn mine_appends_block_meeting_target() {
        let mut chain = Chain::with_target(Target::from(Target::max().value() >> 4usize));
        chain.new_transaction("alice", "bob", 5);

        let block = chain.mine().await;

        assert!(block.meets_target());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_block(), &block);
        assert_eq!(block.transactions(), &[Transaction::new("alice", "bob", 5)]);
        assert!(chain.pending().is_empty());
        for (i, b) in chain.blocks().iter().enumerate() {
            assert_eq!(b.height(), i as u64);
            assert_eq!(b.hash(), b.compute_hash());
            if i > 0 {
                assert_eq!(b.previous_hash(), Some(chain.blocks()[i - 1].hash()));
            }
        }
    }
}
