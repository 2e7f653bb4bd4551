//! Events: the signed vertices of the DAG.
//!
//! Each event references its creator's previous event (the self-parent, at
//! position 0 of `parents`) plus up to `max_parents - 1` other heads. Lamport
//! time, sequence number and claimed time are derived from the parents, so an
//! event's position in the partial order is fixed once it is signed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto::keys::{self, SignError, Signature, Signer, SigningPublicKey};
use crate::transaction::Transaction;
use crate::Hash;

/// Epoch number; validator sets and ancestry indices are per-epoch.
pub type Epoch = u32;
/// Per-creator sequence number, starting at 1 in each epoch.
pub type Seq = u32;
/// Lamport clock value.
pub type Lamport = u32;
/// Validator identity (fingerprint of the signing key).
pub type ValidatorId = Hash;

/// Unique identifier for an event (hash of its signed header).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventId(pub Hash);

impl EventId {
    /// Placeholder marking "no self-parent" in foreign parent lists.
    pub const ZERO: EventId = EventId([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Short hex form for logs.
    pub fn short(&self) -> String {
        crate::short_hex(&self.0)
    }
}

/// Creator-claimed wall-clock time, unix nanoseconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms.saturating_mul(1_000_000))
    }

    /// Time elapsed since `earlier`; zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    pub fn after(self, d: Duration) -> Self {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

/// Signed header fields of an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub epoch: Epoch,
    pub seq: Seq,
    pub creator: ValidatorId,
    /// Self-parent first (when `seq > 1`), then the other parents
    pub parents: Vec<EventId>,
    pub lamport: Lamport,
    pub claimed_time: Timestamp,
    pub gas_power_used: u64,
    pub gas_power_left: u64,
    /// Merkle root of the transaction ids
    pub tx_hash: Hash,
}

impl EventHeader {
    /// The creator's previous event, if this is not its first event of the epoch.
    pub fn self_parent(&self) -> Option<&EventId> {
        if self.seq <= 1 {
            return None;
        }
        self.parents.first().filter(|p| !p.is_zero())
    }

    /// Canonical byte encoding of the header, signed by the creator.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128 + self.parents.len() * 32);
        data.extend_from_slice(b"stratum.event");
        data.extend_from_slice(&self.epoch.to_le_bytes());
        data.extend_from_slice(&self.seq.to_le_bytes());
        data.extend_from_slice(&self.creator);
        data.extend_from_slice(&(self.parents.len() as u64).to_le_bytes());
        for p in &self.parents {
            data.extend_from_slice(&p.0);
        }
        data.extend_from_slice(&self.lamport.to_le_bytes());
        data.extend_from_slice(&self.claimed_time.0.to_le_bytes());
        data.extend_from_slice(&self.gas_power_used.to_le_bytes());
        data.extend_from_slice(&self.gas_power_left.to_le_bytes());
        data.extend_from_slice(&self.tx_hash);
        data
    }
}

/// A DAG event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub header: EventHeader,
    pub transactions: Vec<Transaction>,
    pub signature: Signature,
    /// Content hash, valid after [`Event::recache_hash`]
    pub id: EventId,
    #[serde(skip)]
    size: usize,
}

impl Event {
    /// Create an unsigned event with no transactions.
    pub fn new(header: EventHeader) -> Self {
        Event {
            header,
            transactions: Vec::new(),
            signature: Signature::empty(),
            id: EventId::ZERO,
            size: 0,
        }
    }

    /// Compute the content hash over the signed header and the signature.
    pub fn compute_id(&self) -> EventId {
        let mut hasher = blake3::Hasher::new_derive_key("stratum.event.id");
        hasher.update(&self.header.signing_bytes());
        hasher.update(self.signature.as_bytes());
        EventId(*hasher.finalize().as_bytes())
    }

    /// Merkle root of the transaction ids, in event order.
    pub fn tx_root(&self) -> Hash {
        let ids: Vec<Hash> = self.transactions.iter().map(|tx| tx.tx_id().0).collect();
        crate::crypto::merkle::merkle_root(&ids)
    }

    /// Sum of transaction gas.
    pub fn txs_gas(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.gas).sum()
    }

    /// Sign the header on behalf of the creator account.
    pub fn sign<S: Signer + ?Sized>(&mut self, signer: &S) -> Result<(), SignError> {
        let payload = self.header.signing_bytes();
        self.signature = signer.sign(
            &self.header.creator,
            crate::constants::MIMETYPE_EVENT,
            &payload,
        )?;
        Ok(())
    }

    /// Verify the signature against the creator's public key.
    pub fn verify_signature(&self, public_key: &SigningPublicKey) -> bool {
        let msg = keys::sign_data(
            crate::constants::MIMETYPE_EVENT,
            &self.header.signing_bytes(),
        );
        public_key.verify(&msg, &self.signature)
    }

    /// Recompute and store the content hash. Call after signing.
    pub fn recache_hash(&mut self) {
        self.id = self.compute_id();
    }

    /// Recompute and store the serialized size.
    pub fn recache_size(&mut self) {
        self.size = self.calc_size();
    }

    /// Cached serialized size (0 until [`Event::recache_size`] runs).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Serialized size in bytes.
    pub fn calc_size(&self) -> usize {
        // An event that cannot be encoded never fits any size bound.
        crate::serialize(self).map(|b| b.len()).unwrap_or(usize::MAX)
    }

    /// Serialized size once a signature is attached.
    pub fn signed_size_estimate(&self) -> usize {
        let missing = keys::signature_bytes().saturating_sub(self.signature.as_bytes().len());
        self.calc_size().saturating_add(missing)
    }
}
