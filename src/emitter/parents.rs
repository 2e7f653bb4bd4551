//! Parent selection.
//!
//! The self-parent always goes first. The remaining slots are filled from the
//! current heads one at a time, each pick made by a [`SearchStrategy`].

use rand::RngExt;

use crate::consensus::ancestry::VectorClock;
use crate::consensus::event::{EventId, Seq};

/// Policy choosing the next parent among candidate heads.
pub trait SearchStrategy {
    /// Called once per selection, before any `choose`.
    fn init(&mut self, self_parent: Option<&EventId>);
    /// Index into `candidates` of the next parent. `candidates` is never empty.
    fn choose(&mut self, candidates: &[EventId]) -> usize;
}

/// Picks the head that adds the most ancestry not already reachable through
/// the parents chosen so far.
///
/// Gain is the sum over creators of how far a candidate's `highest_seen`
/// runs ahead of the merged vector of the chosen parents. Ties go to the
/// smallest event id.
pub struct CausalityStrategy<'a> {
    clock: &'a dyn VectorClock,
    known: Vec<Seq>,
}

impl<'a> CausalityStrategy<'a> {
    pub fn new(clock: &'a dyn VectorClock) -> Self {
        CausalityStrategy {
            clock,
            known: Vec::new(),
        }
    }

    fn merge(&mut self, event: &EventId) {
        let Some(seen) = self.clock.highest_seen(event) else {
            return;
        };
        if self.known.len() < seen.len() {
            self.known.resize(seen.len(), 0);
        }
        for (k, &s) in self.known.iter_mut().zip(seen) {
            *k = (*k).max(s);
        }
    }

    fn gain(&self, event: &EventId) -> u64 {
        let Some(seen) = self.clock.highest_seen(event) else {
            return 0;
        };
        seen.iter()
            .enumerate()
            .map(|(n, &s)| {
                let k = self.known.get(n).copied().unwrap_or(0);
                u64::from(s.saturating_sub(k))
            })
            .sum()
    }
}

impl SearchStrategy for CausalityStrategy<'_> {
    fn init(&mut self, self_parent: Option<&EventId>) {
        self.known.clear();
        if let Some(sp) = self_parent {
            self.merge(sp);
        }
    }

    fn choose(&mut self, candidates: &[EventId]) -> usize {
        let mut best = 0;
        let mut best_gain = self.gain(&candidates[0]);
        for (i, candidate) in candidates.iter().enumerate().skip(1) {
            let gain = self.gain(candidate);
            if gain > best_gain || (gain == best_gain && *candidate < candidates[best]) {
                best = i;
                best_gain = gain;
            }
        }
        self.merge(&candidates[best]);
        best
    }
}

/// Uniform random choice, for when no ancestry index is available.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl SearchStrategy for RandomStrategy {
    fn init(&mut self, _self_parent: Option<&EventId>) {}

    fn choose(&mut self, candidates: &[EventId]) -> usize {
        rand::rng().random_range(0..candidates.len())
    }
}

/// Select at most `max_parents` parents, self-parent first when present.
pub fn find_best_parents(
    max_parents: usize,
    heads: &[EventId],
    self_parent: Option<EventId>,
    strategy: &mut dyn SearchStrategy,
) -> Vec<EventId> {
    let mut parents = Vec::with_capacity(max_parents);
    if max_parents == 0 {
        return parents;
    }

    let mut candidates: Vec<EventId> = heads
        .iter()
        .filter(|h| !h.is_zero() && Some(**h) != self_parent)
        .copied()
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    strategy.init(self_parent.as_ref());
    if let Some(sp) = self_parent {
        parents.push(sp);
    }
    while parents.len() < max_parents && !candidates.is_empty() {
        let i = strategy.choose(&candidates);
        parents.push(candidates.remove(i));
    }
    parents
}
