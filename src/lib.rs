//! # Stratum
//!
//! The consensus-facing core of a DAG-based aBFT ledger:
//! - **Strongly-see ancestry index**: per-event `LowestSees` / `HighestSeen`
//!   vectors answering "does A strongly see B" in O(validators)
//! - **Rate-limited event emission**: parent selection, gas-power admission
//!   control, signing and a validation sanity gate, paced by a periodic task
//!   sharing one lock with the consensus engine

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod demo;
pub mod emitter;
pub mod mempool;
pub mod storage;
pub mod transaction;
pub mod validation;

/// Protocol constants
pub mod constants {
    /// Mimetype passed to the signer for event payloads.
    pub const MIMETYPE_EVENT: &str = "application/event";

    /// Fixed gas charged for every event, before transactions.
    pub const EVENT_GAS: u64 = 28_000;
    /// Gas charged per parent reference.
    pub const PARENT_GAS: u64 = 2_400;

    /// Default upper bound on gas used by a single event.
    pub const MAX_GAS_POWER_USED: u64 = 10_000_000;
    /// Default maximum serialized event size in bytes (128 KiB).
    pub const MAX_EVENT_SIZE: usize = 128 * 1024;
    /// Default maximum number of parent references per event.
    pub const MAX_PARENTS: usize = 5;

    /// Default minimum interval between two emissions of one validator.
    pub const MIN_EMIT_INTERVAL_MS: u64 = 200;
    /// Default interval an out-of-power validator waits between emissions.
    pub const MAX_EMIT_INTERVAL_MS: u64 = 10_000;
    /// Default gas rate growth allowed while gas power is being controlled.
    pub const MAX_GAS_RATE_GROWTH_FACTOR: f64 = 3.0;

    /// Power at or below which no transactions are packed.
    pub const NO_TXS_THRESHOLD: u64 = EVENT_GAS * 50;
    /// Power at or below which the gas rate is smoothed.
    pub const GAS_POWER_CONTROL_THRESHOLD: u64 = NO_TXS_THRESHOLD * 20;
    /// Power at or below which power must not decrease between events.
    pub const EMERGENCY_THRESHOLD: u64 = EVENT_GAS * 5;

    /// Gas power granted to a validator with no self-parent in the epoch.
    pub const STARTUP_GAS_POWER: u64 = GAS_POWER_CONTROL_THRESHOLD;
    /// Gas power allocated per second of claimed time.
    pub const GAS_POWER_ALLOC_PER_SEC: u64 = 5_000_000;
    /// Cap on gas power a validator may accumulate.
    pub const MAX_STASHED_GAS_POWER: u64 = MAX_GAS_POWER_USED * 5;

    /// Default transaction pool capacity.
    pub const MEMPOOL_MAX_TXS: usize = 10_000;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all Stratum domains are ASCII literals).
/// Panics at runtime if it is not; that is a programming error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

/// Serialize a value using bincode with legacy (v1-compatible) encoding.
pub fn serialize<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(val, bincode::config::legacy())
}

/// Deserialize a value using bincode with legacy (v1-compatible) encoding.
pub fn deserialize<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    let (val, _len) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_domain_deterministic() {
        let a = hash_domain(b"stratum.test", b"hello");
        let b = hash_domain(b"stratum.test", b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_domain_different_domains() {
        let a = hash_domain(b"stratum.domain_a", b"data");
        let b = hash_domain(b"stratum.domain_b", b"data");
        assert_ne!(a, b);
    }

    #[test]
    fn thresholds_are_ordered() {
        assert!(constants::EMERGENCY_THRESHOLD < constants::NO_TXS_THRESHOLD);
        assert!(constants::NO_TXS_THRESHOLD < constants::GAS_POWER_CONTROL_THRESHOLD);
    }

    #[test]
    fn short_hex_is_eight_bytes() {
        assert_eq!(short_hex(&[0xab; 32]), "abababababababab");
    }
}
