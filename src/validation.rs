//! Event validation.
//!
//! The emitter runs the full check on every event it produces as a last
//! sanity gate before handing it to the listener. Checks that need context
//! (parent headers, the validator set) take it as arguments; nothing here
//! touches storage.

use std::collections::HashSet;

use crate::config::DagConfig;
use crate::consensus::event::{Event, EventHeader, EventId, Seq};
use crate::consensus::members::Members;
use crate::constants::{EVENT_GAS, PARENT_GAS};

/// Base gas charged for an event before its transactions.
pub fn calc_gas_power_used(parents: usize) -> u64 {
    EVENT_GAS.saturating_add(PARENT_GAS.saturating_mul(parents as u64))
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("event has too many parents ({0})")]
    TooManyParents(usize),
    #[error("duplicate parent reference {0:?}")]
    DuplicateParent(EventId),
    #[error("expected {expected} parent headers, got {got}")]
    ParentHeaderMismatch { expected: usize, got: usize },
    #[error("parent epoch {parent} differs from event epoch {event}")]
    WrongEpoch { event: u32, parent: u32 },
    #[error("seq {got} does not follow self-parent (expected {expected})")]
    WrongSeq { expected: Seq, got: Seq },
    #[error("lamport {got} should be {expected}")]
    WrongLamport { expected: u32, got: u32 },
    #[error("claimed time does not advance past self-parent")]
    ClaimedTimeNotMonotonic,
    #[error("gas_power_used {got} should be {expected}")]
    WrongGasUsed { expected: u64, got: u64 },
    #[error("gas_power_used {0} exceeds per-event maximum")]
    GasUsedTooHigh(u64),
    #[error("transaction root does not match header")]
    WrongTxHash,
    #[error("event size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
    #[error("creator is not a member of the epoch")]
    NotMember,
    #[error("event ID does not match computed hash")]
    InvalidId,
    #[error("creator signature is invalid")]
    InvalidSignature,
}

/// Validation gate invoked on freshly built events.
pub trait EventValidator: Send + Sync {
    /// `parents` holds the header of every entry of `event.header.parents`, in order.
    fn validate_all(
        &self,
        dag: &DagConfig,
        members: &Members,
        event: &Event,
        parents: &[EventHeader],
    ) -> Result<(), ValidationError>;
}

/// Structural, causal, gas and signature checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    fn check_structure(dag: &DagConfig, event: &Event) -> Result<(), ValidationError> {
        let h = &event.header;
        if h.parents.len() > dag.max_parents {
            return Err(ValidationError::TooManyParents(h.parents.len()));
        }
        let mut unique = HashSet::with_capacity(h.parents.len());
        for p in &h.parents {
            if !unique.insert(p) {
                return Err(ValidationError::DuplicateParent(*p));
            }
        }
        if h.tx_hash != event.tx_root() {
            return Err(ValidationError::WrongTxHash);
        }
        let size = event.calc_size();
        if size > dag.max_event_size {
            return Err(ValidationError::TooLarge {
                size,
                max: dag.max_event_size,
            });
        }
        Ok(())
    }

    fn check_parents(event: &Event, parents: &[EventHeader]) -> Result<(), ValidationError> {
        let h = &event.header;
        if parents.len() != h.parents.len() {
            return Err(ValidationError::ParentHeaderMismatch {
                expected: h.parents.len(),
                got: parents.len(),
            });
        }
        if let Some(p) = parents.iter().find(|p| p.epoch != h.epoch) {
            return Err(ValidationError::WrongEpoch {
                event: h.epoch,
                parent: p.epoch,
            });
        }

        // Position 0 holds the self-parent whenever one exists.
        let self_parent = parents.first().filter(|p| p.creator == h.creator);
        let expected_seq = self_parent.map(|p| p.seq.saturating_add(1)).unwrap_or(1);
        if h.seq != expected_seq {
            return Err(ValidationError::WrongSeq {
                expected: expected_seq,
                got: h.seq,
            });
        }
        if let Some(sp) = self_parent {
            if h.claimed_time <= sp.claimed_time {
                return Err(ValidationError::ClaimedTimeNotMonotonic);
            }
        }

        let expected_lamport = parents.iter().map(|p| p.lamport).max().unwrap_or(0) + 1;
        if h.lamport != expected_lamport {
            return Err(ValidationError::WrongLamport {
                expected: expected_lamport,
                got: h.lamport,
            });
        }
        Ok(())
    }

    fn check_gas(dag: &DagConfig, event: &Event) -> Result<(), ValidationError> {
        let h = &event.header;
        let expected = calc_gas_power_used(h.parents.len()).saturating_add(event.txs_gas());
        if h.gas_power_used != expected {
            return Err(ValidationError::WrongGasUsed {
                expected,
                got: h.gas_power_used,
            });
        }
        if h.gas_power_used > dag.max_gas_power_used {
            return Err(ValidationError::GasUsedTooHigh(h.gas_power_used));
        }
        Ok(())
    }
}

impl EventValidator for BasicValidator {
    fn validate_all(
        &self,
        dag: &DagConfig,
        members: &Members,
        event: &Event,
        parents: &[EventHeader],
    ) -> Result<(), ValidationError> {
        Self::check_structure(dag, event)?;
        Self::check_parents(event, parents)?;
        Self::check_gas(dag, event)?;

        let creator = members
            .get(&event.header.creator)
            .ok_or(ValidationError::NotMember)?;
        if event.id != event.compute_id() {
            return Err(ValidationError::InvalidId);
        }
        if !event.verify_signature(&creator.public_key) {
            return Err(ValidationError::InvalidSignature);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::event::Timestamp;
    use crate::consensus::members::Validator;
    use crate::crypto::keys::{Keystore, SigningKeypair};
    use crate::transaction::Transaction;

    struct Fixture {
        keystore: Keystore,
        members: Members,
        creator: [u8; 32],
    }

    fn fixture() -> Fixture {
        let kp = SigningKeypair::generate();
        let members = Members::new(vec![Validator::new(kp.public.clone(), 1)]);
        let mut keystore = Keystore::new();
        let creator = keystore.insert(kp);
        Fixture {
            keystore,
            members,
            creator,
        }
    }

    fn build(f: &Fixture, seq: Seq, parents: &[&EventHeader], txs: Vec<Transaction>) -> Event {
        let mut event = Event::new(EventHeader {
            epoch: 1,
            seq,
            creator: f.creator,
            parents: vec![],
            lamport: parents.iter().map(|p| p.lamport).max().unwrap_or(0) + 1,
            claimed_time: Timestamp(seq as u64 * 1_000),
            ..Default::default()
        });
        event.transactions = txs;
        finish(f, event, parents)
    }

    fn finish(f: &Fixture, mut event: Event, parents: &[&EventHeader]) -> Event {
        event.header.parents = parents
            .iter()
            .map(|p| EventId(crate::hash_domain(b"stratum.test.parent", &p.signing_bytes())))
            .collect();
        event.header.gas_power_used =
            calc_gas_power_used(event.header.parents.len()) + event.txs_gas();
        event.header.tx_hash = event.tx_root();
        event.sign(&f.keystore).unwrap();
        event.recache_hash();
        event
    }

    #[test]
    fn gas_base_cost() {
        assert_eq!(calc_gas_power_used(0), EVENT_GAS);
        assert_eq!(calc_gas_power_used(3), EVENT_GAS + 3 * PARENT_GAS);
    }

    #[test]
    fn valid_chain_passes() {
        let f = fixture();
        let dag = DagConfig::default();
        let first = build(&f, 1, &[], vec![]);
        BasicValidator
            .validate_all(&dag, &f.members, &first, &[])
            .unwrap();

        let tx = Transaction::new([7u8; 32], 0, 21_000, vec![1, 2, 3]);
        let second = build(&f, 2, &[&first.header], vec![tx]);
        BasicValidator
            .validate_all(&dag, &f.members, &second, &[first.header.clone()])
            .unwrap();
    }

    #[test]
    fn wrong_seq_rejected() {
        let f = fixture();
        let first = build(&f, 1, &[], vec![]);
        let skipped = build(&f, 3, &[&first.header], vec![]);
        assert_eq!(
            BasicValidator.validate_all(
                &DagConfig::default(),
                &f.members,
                &skipped,
                &[first.header.clone()]
            ),
            Err(ValidationError::WrongSeq {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn stale_claimed_time_rejected() {
        let f = fixture();
        let first = build(&f, 1, &[], vec![]);
        let mut second = build(&f, 2, &[&first.header], vec![]);
        second.header.claimed_time = first.header.claimed_time;
        let second = finish(&f, second, &[&first.header]);
        assert_eq!(
            BasicValidator.validate_all(
                &DagConfig::default(),
                &f.members,
                &second,
                &[first.header.clone()]
            ),
            Err(ValidationError::ClaimedTimeNotMonotonic)
        );
    }

    #[test]
    fn tampered_gas_rejected() {
        let f = fixture();
        let mut event = build(&f, 1, &[], vec![]);
        event.header.gas_power_used += 1;
        assert!(matches!(
            BasicValidator.validate_all(&DagConfig::default(), &f.members, &event, &[]),
            Err(ValidationError::WrongGasUsed { .. })
        ));
    }

    #[test]
    fn oversized_event_rejected() {
        let f = fixture();
        let event = build(&f, 1, &[], vec![]);
        let dag = DagConfig {
            max_event_size: 16,
            ..DagConfig::default()
        };
        assert!(matches!(
            BasicValidator.validate_all(&dag, &f.members, &event, &[]),
            Err(ValidationError::TooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn outsider_and_bad_signature_rejected() {
        let f = fixture();
        let event = build(&f, 1, &[], vec![]);

        let strangers = Members::new(vec![Validator::new(SigningKeypair::generate().public, 1)]);
        assert_eq!(
            BasicValidator.validate_all(&DagConfig::default(), &strangers, &event, &[]),
            Err(ValidationError::NotMember)
        );

        let mut forged = event.clone();
        forged.signature = f.keystore.get(&f.creator).unwrap().sign(b"other").unwrap();
        forged.recache_hash();
        assert_eq!(
            BasicValidator.validate_all(&DagConfig::default(), &f.members, &forged, &[]),
            Err(ValidationError::InvalidSignature)
        );
    }

    #[test]
    fn stale_id_rejected() {
        let f = fixture();
        let mut event = build(&f, 1, &[], vec![]);
        event.id = EventId([1u8; 32]);
        assert_eq!(
            BasicValidator.validate_all(&DagConfig::default(), &f.members, &event, &[]),
            Err(ValidationError::InvalidId)
        );
    }
}
