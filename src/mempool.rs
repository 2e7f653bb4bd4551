//! Pending transaction pool feeding event emission.
//!
//! Transactions are grouped by sender and kept in nonce order within a
//! group; the emitter walks groups in sender order, which is the "pool
//! order" packing follows.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::transaction::{Transaction, TxId};
use crate::Hash;

/// Pending transactions grouped by sender, nonce ordered within a group.
pub type PendingTxs = BTreeMap<Hash, Vec<Transaction>>;

/// Errors from pool operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("transaction already in pool")]
    Duplicate,
    #[error("pool is full ({0} transactions)")]
    Full(usize),
    #[error("transaction pool unavailable: {0}")]
    Unavailable(String),
}

/// Source of pending transactions.
pub trait TxPool: Send + Sync {
    fn pending(&self) -> Result<PendingTxs, PoolError>;
}

#[derive(Debug, Default)]
struct PoolInner {
    by_sender: PendingTxs,
    ids: HashSet<TxId>,
}

/// In-memory transaction pool.
#[derive(Debug)]
pub struct Mempool {
    inner: Mutex<PoolInner>,
    max_transactions: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(crate::constants::MEMPOOL_MAX_TXS)
    }
}

impl Mempool {
    pub fn new(max_transactions: usize) -> Self {
        Mempool {
            inner: Mutex::new(PoolInner::default()),
            max_transactions,
        }
    }

    /// Add a transaction. Returns its id.
    pub fn insert(&self, tx: Transaction) -> Result<TxId, PoolError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = tx.tx_id();
        if inner.ids.contains(&id) {
            return Err(PoolError::Duplicate);
        }
        if inner.ids.len() >= self.max_transactions {
            return Err(PoolError::Full(self.max_transactions));
        }
        inner.ids.insert(id);

        let group = inner.by_sender.entry(tx.sender).or_default();
        let pos = group.partition_point(|t| t.nonce <= tx.nonce);
        group.insert(pos, tx);
        Ok(id)
    }

    /// Drop transactions that made it into an event.
    pub fn remove_included(&self, txs: &[Transaction]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let included: HashSet<TxId> = txs.iter().map(|tx| tx.tx_id()).collect();
        inner.ids.retain(|id| !included.contains(id));
        inner.by_sender.retain(|_, group| {
            group.retain(|tx| !included.contains(&tx.tx_id()));
            !group.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxPool for Mempool {
    fn pending(&self) -> Result<PendingTxs, PoolError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_sender
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: u8, nonce: u64) -> Transaction {
        Transaction::new([sender; 32], nonce, 21_000, vec![])
    }

    #[test]
    fn grouped_and_nonce_ordered() {
        let pool = Mempool::new(100);
        pool.insert(tx(2, 1)).unwrap();
        pool.insert(tx(1, 5)).unwrap();
        pool.insert(tx(2, 0)).unwrap();

        let pending = pool.pending().unwrap();
        let senders: Vec<_> = pending.keys().copied().collect();
        assert_eq!(senders, vec![[1u8; 32], [2u8; 32]]);
        let nonces: Vec<_> = pending[&[2u8; 32]].iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[test]
    fn duplicate_rejected() {
        let pool = Mempool::new(100);
        pool.insert(tx(1, 0)).unwrap();
        assert_eq!(pool.insert(tx(1, 0)), Err(PoolError::Duplicate));
    }

    #[test]
    fn capacity_enforced() {
        let pool = Mempool::new(1);
        pool.insert(tx(1, 0)).unwrap();
        assert_eq!(pool.insert(tx(1, 1)), Err(PoolError::Full(1)));
    }

    #[test]
    fn remove_included_drops_empty_groups() {
        let pool = Mempool::new(100);
        pool.insert(tx(1, 0)).unwrap();
        pool.insert(tx(2, 0)).unwrap();
        pool.remove_included(&[tx(1, 0)]);

        assert_eq!(pool.len(), 1);
        let pending = pool.pending().unwrap();
        assert!(!pending.contains_key(&[1u8; 32]));
    }
}
