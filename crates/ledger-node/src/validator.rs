//! Transaction acceptance predicate.
//!
//! Signature checking lives outside the node; anything that can answer
//! "is this transaction acceptable" plugs in here.

use ledger_core::Transaction;

pub trait TransactionValidator: Send + Sync {
    fn validate_transaction(&self, tx: &Transaction) -> bool;
}

impl<F> TransactionValidator for F
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    fn validate_transaction(&self, tx: &Transaction) -> bool {
        self(tx)
    }
}

/// Default validator: both parties named, non-zero amount.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl TransactionValidator for StructuralValidator {
    fn validate_transaction(&self, tx: &Transaction) -> bool {
        !tx.sender.trim().is_empty() && !tx.recipient.trim().is_empty() && tx.amount > 0
    }
}
