//! Transaction model carried inside events.
//!
//! The emission core only cares about a transaction's identity, its sender
//! (for pool grouping) and the gas it consumes from the creator's gas power.
//! Execution semantics live outside this crate.

use serde::{Deserialize, Serialize};

use crate::Hash;

/// A unique transaction identifier (hash of the serialized transaction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash);

/// A transaction awaiting inclusion in an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Account that submitted the transaction
    pub sender: Hash,
    /// Per-sender ordering
    pub nonce: u64,
    /// Gas the transaction consumes
    pub gas: u64,
    /// Opaque call data
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(sender: Hash, nonce: u64, gas: u64, payload: Vec<u8>) -> Self {
        Transaction {
            sender,
            nonce,
            gas,
            payload,
        }
    }

    /// Compute the transaction ID.
    pub fn tx_id(&self) -> TxId {
        let mut hasher = blake3::Hasher::new_derive_key("stratum.tx.id");
        hasher.update(&self.sender);
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(&self.gas.to_le_bytes());
        hasher.update(&(self.payload.len() as u64).to_le_bytes());
        hasher.update(&self.payload);
        TxId(*hasher.finalize().as_bytes())
    }
}
