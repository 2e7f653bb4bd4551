//! Consensus engine interface and the in-process reference engine.
//!
//! The emitter only needs four things from consensus: the current epoch, the
//! validator set, the ancestry index for parent selection, and `prepare`,
//! which fills in the consensus-owned header fields (gas power left) or
//! declines the event. `LocalEngine` implements these on top of the
//! strongly-see index and an in-memory event store.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::consensus::ancestry::{AncestryError, VectorClock};
use crate::consensus::event::{Epoch, Event, EventId};
use crate::consensus::members::Members;
use crate::consensus::strongly::StronglySee;
use crate::storage::{EventStore, MemoryStore, StoreError};

/// What the emitter reads from the consensus engine.
///
/// Every call happens with the engine lock held by the caller.
pub trait Consensus: Send + Sync + 'static {
    fn epoch(&self) -> Epoch;
    fn members(&self) -> &Members;
    /// Ancestry index, if the engine maintains one.
    fn vector_index(&self) -> Option<&dyn VectorClock>;
    /// Fill in consensus fields. `None` declines the event.
    fn prepare(&self, event: Event) -> Option<Event>;
}

/// Errors from event ingestion.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine halted after a fatal error")]
    Halted,
    #[error("event {event:?} belongs to epoch {got}, engine is at {expected}")]
    WrongEpoch {
        event: EventId,
        expected: Epoch,
        got: Epoch,
    },
    #[error("ancestry index: {0}")]
    Ancestry(#[from] AncestryError),
    #[error("event store: {0}")]
    Store(#[from] StoreError),
}

/// Reference engine: validator set, strongly-see index and gas power
/// allocation for a single node.
pub struct LocalEngine {
    epoch: Epoch,
    index: StronglySee,
    store: Arc<MemoryStore>,
    gas: EngineConfig,
    halted: bool,
}

impl LocalEngine {
    pub fn new(epoch: Epoch, members: Members, store: Arc<MemoryStore>, gas: EngineConfig) -> Self {
        LocalEngine {
            epoch,
            index: StronglySee::new(members),
            store,
            gas,
            halted: false,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn strongly(&self) -> &StronglySee {
        &self.index
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Does `who` strongly see `whom`?
    pub fn see(&self, who: &EventId, whom: &EventId) -> bool {
        self.index.see(who, whom)
    }

    /// Ingest an event whose parents were already processed.
    ///
    /// Ancestry and storage failures halt the engine: the index no longer
    /// matches the DAG and every later answer would be suspect.
    pub fn process_event(&mut self, event: &Event) -> Result<(), EngineError> {
        if self.halted {
            return Err(EngineError::Halted);
        }
        if event.header.epoch != self.epoch {
            return Err(EngineError::WrongEpoch {
                event: event.id,
                expected: self.epoch,
                got: event.header.epoch,
            });
        }

        let result = self
            .index
            .add(event)
            .map_err(EngineError::from)
            .and_then(|()| self.store.put_event(event).map_err(EngineError::from));
        if let Err(e) = &result {
            tracing::error!(
                event = %event.id.short(),
                seq = event.header.seq,
                error = %e,
                "Fatal ingestion error, halting engine"
            );
            self.halted = true;
        }
        result
    }

    /// Advance to the next epoch with a new validator set.
    ///
    /// Clears the ancestry index and the previous epoch's events. A halted
    /// engine resumes, since the state that caused the halt is gone.
    pub fn new_epoch(&mut self, members: Members) {
        let previous = self.epoch;
        self.epoch = self.epoch.saturating_add(1);
        self.index.reset(members);
        self.store.prune_epoch(previous);
        self.halted = false;
        tracing::info!(
            epoch = self.epoch,
            validators = self.index.members().len(),
            "Entered new epoch"
        );
    }

    /// Gas power available to an event before it spends anything.
    fn available_gas_power(&self, event: &Event) -> u64 {
        let header = &event.header;
        let self_parent = header
            .self_parent()
            .and_then(|sp| self.store.event_header(header.epoch, sp).ok().flatten());

        let (base, since) = match self_parent {
            Some(sp) => (sp.gas_power_left, Some(sp.claimed_time)),
            None => (self.gas.startup_gas_power, None),
        };
        let allocated = since
            .map(|t| {
                let nanos = header.claimed_time.since(t).as_nanos();
                let gas = nanos.saturating_mul(self.gas.gas_power_alloc_per_sec as u128)
                    / 1_000_000_000;
                u64::try_from(gas).unwrap_or(u64::MAX)
            })
            .unwrap_or(0);

        base.saturating_add(allocated)
            .min(self.gas.max_stashed_gas_power)
    }
}

impl Consensus for LocalEngine {
    fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn members(&self) -> &Members {
        self.index.members()
    }

    fn vector_index(&self) -> Option<&dyn VectorClock> {
        Some(&self.index)
    }

    fn prepare(&self, mut event: Event) -> Option<Event> {
        if self.halted || !self.members().contains(&event.header.creator) {
            return None;
        }
        let available = self.available_gas_power(&event);
        let used = event.header.gas_power_used;
        if used > available {
            tracing::debug!(used, available, "Declining event: insufficient gas power");
            return None;
        }
        event.header.gas_power_left = available - used;
        Some(event)
    }
}
