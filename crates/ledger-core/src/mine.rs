use std::fmt;

use tracing::{debug, info, warn};

use crate::{Block, Chain};

/// Where the miner is in its `Idle -> Retargeting -> Attempting -> Found -> Idle` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinerState {
    #[default]
    Idle,
    Retargeting,
    Attempting,
    Found,
}

impl fmt::Display for MinerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinerState::Idle => write!(f, "idle"),
            MinerState::Retargeting => write!(f, "retargeting"),
            MinerState::Attempting => write!(f, "attempting"),
            MinerState::Found => write!(f, "found"),
        }
    }
}

/// Incremental miner. Every [`Miner::step`] performs at most one hash attempt,
/// so whoever drives it decides when to yield.
#[derive(Debug, Default)]
pub struct Miner {
    state: MinerState,
    /// Height the current attempts are for.
    working_on: Option<u64>,
    attempts: u64,
}

impl Miner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MinerState {
        self.state
    }

    /// Hash attempts made for the block currently being mined.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    fn transition_to(&mut self, next: MinerState) {
        debug!(from = %self.state, to = %next, "Miner state transition");
        self.state = next;
    }

    /// One hash attempt. Retargets first whenever the tip moved since the last
    /// attempt (our own block or one received from a peer). Returns the block
    /// once one meets the target; it has already been appended to `chain`.
    pub fn step(&mut self, chain: &mut Chain) -> Option<Block> {
        let next_height = chain.len() as u64;
        if self.working_on != Some(next_height) {
            self.transition_to(MinerState::Retargeting);
            if let Err(error) = chain.recalculate_target(next_height) {
                warn!(%error, height = next_height, "Retarget failed, keeping current target");
            }
            self.working_on = Some(next_height);
            self.attempts = 0;
            self.transition_to(MinerState::Attempting);
        }

        self.attempts += 1;
        let candidate = chain.create_candidate_block();
        if !candidate.meets_target() {
            return None;
        }

        self.transition_to(MinerState::Found);
        info!(
            height = candidate.height(),
            hash = %candidate.hash(),
            attempts = self.attempts,
            transactions = candidate.transactions().len(),
            "Mined new block"
        );
        chain.add_block(candidate.clone());
        self.working_on = None;
        self.transition_to(MinerState::Idle);
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockTemplate, Target};
    use num_bigint::BigUint;

    #[test]
    fn impossible_target_keeps_attempting() {
        let mut chain = Chain::with_target(Target::from(BigUint::from(1u8)));
        let mut miner = Miner::new();
        assert_eq!(miner.state(), MinerState::Idle);

        for _ in 0..5 {
            assert!(miner.step(&mut chain).is_none());
        }
        assert_eq!(miner.state(), MinerState::Attempting);
        assert_eq!(miner.attempts(), 5);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn easy_target_finds_and_returns_to_idle() {
        let mut chain = Chain::with_target(Target::max());
        chain.new_transaction("alice", "bob", 2);
        let mut miner = Miner::new();

        let block = loop {
            if let Some(block) = miner.step(&mut chain) {
                break block;
            }
        };

        assert_eq!(miner.state(), MinerState::Idle);
        assert_eq!(chain.last_block(), &block);
        assert_eq!(block.height(), 1);
        assert!(chain.pending().is_empty());
    }

    #[test]
    fn restarts_when_tip_moves_underneath() {
        let mut chain = Chain::with_target(Target::from(BigUint::from(1u8)));
        let mut miner = Miner::new();
        miner.step(&mut chain);
        miner.step(&mut chain);
        assert_eq!(miner.attempts(), 2);

        let peer_block = BlockTemplate {
            height: 1,
            transactions: vec![],
            previous_hash: Some(chain.last_block().hash().to_string()),
            nonce: "1".into(),
            target: chain.target().to_hex(),
            timestamp: crate::timestamp_now(),
        }
        .seal();
        chain.add_block(peer_block);

        miner.step(&mut chain);
        assert_eq!(miner.attempts(), 1);
    }
}
