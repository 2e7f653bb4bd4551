//! Validator set ("members") of an epoch.
//!
//! Members keep a stable enumeration order (insertion order) and a voting
//! weight per validator. The quorum is the BFT supermajority `2W/3 + 1` of
//! the total weight `W`; with equal weights this is the familiar `2f + 1`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::consensus::event::ValidatorId;
use crate::crypto::keys::SigningPublicKey;

/// Voting weight of a validator.
pub type Weight = u64;

/// A validator registered for an epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Validator {
    /// The validator's signing public key
    pub public_key: SigningPublicKey,
    /// The validator's unique ID (fingerprint of signing key)
    pub id: ValidatorId,
    pub weight: Weight,
}

impl Validator {
    pub fn new(public_key: SigningPublicKey, weight: Weight) -> Self {
        let id = public_key.fingerprint();
        Validator {
            public_key,
            id,
            weight,
        }
    }
}

/// The validator set of one epoch. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct Members {
    validators: Vec<Validator>,
    index: HashMap<ValidatorId, usize>,
    total_weight: Weight,
}

impl Members {
    /// Build a validator set. Later duplicates of an id are ignored and
    /// zero-weight validators are dropped.
    pub fn new(validators: impl IntoIterator<Item = Validator>) -> Self {
        let mut members = Members::default();
        for v in validators {
            if v.weight == 0 || members.index.contains_key(&v.id) {
                continue;
            }
            members.total_weight = members.total_weight.saturating_add(v.weight);
            members.index.insert(v.id, members.validators.len());
            members.validators.push(v);
        }
        members
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ValidatorId) -> Option<&Validator> {
        self.index.get(id).map(|&i| &self.validators[i])
    }

    pub fn weight(&self, id: &ValidatorId) -> Weight {
        self.get(id).map(|v| v.weight).unwrap_or(0)
    }

    /// Position of a validator in the stable enumeration order.
    pub fn position(&self, id: &ValidatorId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Validators in stable enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Weight needed for a supermajority.
    pub fn quorum(&self) -> Weight {
        quorum_of(self.total_weight)
    }

    pub fn new_counter(&self) -> WeightCounter<'_> {
        WeightCounter {
            members: self,
            counted: vec![false; self.validators.len()],
            sum: 0,
        }
    }
}

/// Compute the BFT quorum for a total weight: 2/3 + 1.
pub fn quorum_of(total: Weight) -> Weight {
    total.saturating_mul(2) / 3 + 1
}

/// Accumulates the weight of distinct validators until quorum is reached.
pub struct WeightCounter<'a> {
    members: &'a Members,
    counted: Vec<bool>,
    sum: Weight,
}

impl WeightCounter<'_> {
    /// Count a validator once. Returns false for unknown or already counted ids.
    pub fn count(&mut self, id: &ValidatorId) -> bool {
        let Some(pos) = self.members.position(id) else {
            return false;
        };
        if self.counted[pos] {
            return false;
        }
        self.counted[pos] = true;
        self.sum = self.sum.saturating_add(self.members.validators[pos].weight);
        true
    }

    pub fn sum(&self) -> Weight {
        self.sum
    }

    pub fn has_quorum(&self) -> bool {
        self.sum >= self.members.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::SigningKeypair;

    fn make_members(weights: &[Weight]) -> Members {
        Members::new(
            weights
                .iter()
                .map(|&w| Validator::new(SigningKeypair::generate().public, w)),
        )
    }

    #[test]
    fn quorum_for_equal_weights() {
        assert_eq!(quorum_of(4), 3);
        assert_eq!(quorum_of(7), 5);
        assert_eq!(quorum_of(21), 15);
        assert_eq!(make_members(&[1, 1, 1, 1]).quorum(), 3);
    }

    #[test]
    fn stable_order_and_lookup() {
        let members = make_members(&[1, 2, 3]);
        let ids: Vec<_> = members.iter().map(|v| v.id).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(members.position(id), Some(i));
        }
        assert_eq!(members.total_weight(), 6);
        assert_eq!(members.weight(&ids[2]), 3);
        assert_eq!(members.weight(&[0u8; 32]), 0);
    }

    #[test]
    fn duplicate_and_zero_weight_ignored() {
        let kp = SigningKeypair::generate();
        let members = Members::new(vec![
            Validator::new(kp.public.clone(), 5),
            Validator::new(kp.public.clone(), 7),
            Validator::new(SigningKeypair::generate().public, 0),
        ]);
        assert_eq!(members.len(), 1);
        assert_eq!(members.total_weight(), 5);
    }

    #[test]
    fn counter_reaches_quorum_once_per_validator() {
        let members = make_members(&[1, 1, 1, 1]);
        let ids: Vec<_> = members.iter().map(|v| v.id).collect();
        let mut counter = members.new_counter();

        assert!(counter.count(&ids[0]));
        assert!(!counter.count(&ids[0]));
        assert!(counter.count(&ids[1]));
        assert!(!counter.has_quorum());
        assert!(!counter.count(&[9u8; 32]));
        assert!(counter.count(&ids[2]));
        assert!(counter.has_quorum());
        assert_eq!(counter.sum(), 3);
    }

    #[test]
    fn weighted_quorum() {
        // One heavy validator holds a supermajority alone
        let members = make_members(&[10, 1]);
        let heavy = members.iter().next().unwrap().id;
        let mut counter = members.new_counter();
        counter.count(&heavy);
        assert!(counter.has_quorum());
    }
}
