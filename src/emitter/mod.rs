//! Event emitter.
//!
//! Builds the local validator's next event: picks parents, asks consensus to
//! prepare it, packs transactions under gas power admission control, signs,
//! and runs full validation before handing it to the emission listener.
//!
//! ```text
//! tick (min_emit_interval / 10)
//!   └─ min_emit_interval elapsed since last emission?
//!        └─ engine.write()            shared with consensus ingestion
//!             ├─ member check, heads, self-parent, parent selection
//!             ├─ parent headers        missing head halts the emitter
//!             ├─ seq / lamport / claimed time, base gas
//!             ├─ engine.prepare        gas power left
//!             ├─ pack txs, pacing check
//!             ├─ tx root, sign, hash, size
//!             ├─ validate_all
//!             └─ listener.on_emitted, meter + last emission time
//! ```
//!
//! A cycle either produces a complete signed event or nothing.

pub mod admission;
pub mod parents;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DagConfig, EmitterConfig, StratumConfig};
use crate::consensus::engine::Consensus;
use crate::consensus::event::{Epoch, Event, EventHeader, EventId, Timestamp, ValidatorId};
use crate::crypto::keys::Signer;
use crate::mempool::TxPool;
use crate::storage::{EventStore, StoreError};
use crate::validation::{calc_gas_power_used, BasicValidator, EventValidator};

use admission::{AdmissionController, GasRateMeter};
use parents::{find_best_parents, CausalityStrategy, RandomStrategy, SearchStrategy};

/// Errors that abort an emission cycle.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    #[error("selected head {id:?} of epoch {epoch} not found in storage")]
    MissingHead { epoch: Epoch, id: EventId },
    #[error("event store: {0}")]
    Store(#[from] StoreError),
}

impl EmitterError {
    /// Whether the emitter must stop emitting altogether.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EmitterError::MissingHead { .. })
    }
}

/// Receives every emitted event, inside the engine lock.
///
/// Typically connects the event to the local engine and queues it for gossip.
pub trait EmissionListener<E>: Send + Sync {
    fn on_emitted(&self, engine: &mut E, event: &Event);
}

impl<E, F> EmissionListener<E> for F
where
    F: Fn(&mut E, &Event) + Send + Sync,
{
    fn on_emitted(&self, engine: &mut E, event: &Event) {
        self(engine, event)
    }
}

/// Forwards emitted events to a bounded channel. A full channel drops the
/// event with a warning rather than blocking the cycle.
pub struct ChannelListener {
    tx: mpsc::Sender<Event>,
}

impl ChannelListener {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelListener { tx }, rx)
    }
}

impl<E> EmissionListener<E> for ChannelListener {
    fn on_emitted(&self, _engine: &mut E, event: &Event) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::warn!(event = %event.id.short(), error = %e, "Dropping emitted event");
        }
    }
}

struct EmitterState {
    gas_rate: GasRateMeter,
    prev_emitted_time: Timestamp,
    /// Last event this emitter produced. Stands in for the self-parent until
    /// the listener's side of the store catches up.
    last_emitted: Option<(EventId, EventHeader)>,
    halted: bool,
}

struct EmissionTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Produces events for one local validator.
pub struct Emitter<E: Consensus> {
    config: EmitterConfig,
    dag: DagConfig,
    admission: AdmissionController,
    engine: Arc<RwLock<E>>,
    store: Arc<dyn EventStore>,
    txpool: Arc<dyn TxPool>,
    signer: Arc<dyn Signer>,
    validator: Arc<dyn EventValidator>,
    listener: Option<Arc<dyn EmissionListener<E>>>,
    coinbase: std::sync::RwLock<ValidatorId>,
    state: Mutex<EmitterState>,
    task: tokio::sync::Mutex<Option<EmissionTask>>,
}

impl<E: Consensus> Emitter<E> {
    pub fn new(
        config: &StratumConfig,
        engine: Arc<RwLock<E>>,
        store: Arc<dyn EventStore>,
        txpool: Arc<dyn TxPool>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let now = Timestamp::now();
        Emitter {
            config: config.emitter.clone(),
            dag: config.dag.clone(),
            admission: AdmissionController::new(config.dag.clone(), config.emitter.clone()),
            engine,
            store,
            txpool,
            signer,
            validator: Arc::new(BasicValidator),
            listener: None,
            coinbase: std::sync::RwLock::new([0u8; 32]),
            state: Mutex::new(EmitterState {
                gas_rate: GasRateMeter::new(now),
                prev_emitted_time: Timestamp::default(),
                last_emitted: None,
                halted: false,
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_listener(mut self, listener: impl EmissionListener<E> + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn EventValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Set the identity events are created and signed as.
    pub fn set_coinbase(&self, id: ValidatorId) {
        *self.coinbase.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub fn coinbase(&self) -> ValidatorId {
        *self.coinbase.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn prev_emitted_time(&self) -> Timestamp {
        self.state().prev_emitted_time
    }

    /// True once a fatal error stopped emission.
    pub fn is_halted(&self) -> bool {
        self.state().halted
    }

    fn state(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one emission cycle under the engine lock.
    pub async fn emit_event(&self) -> Option<Event> {
        if self.is_halted() {
            return None;
        }
        let mut engine = self.engine.write().await;

        let event = match self.create_event(&engine) {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(error = %e, "Emitter halted");
                    self.state().halted = true;
                } else {
                    tracing::error!(error = %e, "Emission cycle aborted");
                }
                return None;
            }
        };

        if let Some(listener) = &self.listener {
            listener.on_emitted(&mut engine, &event);
        }

        // Taken after the listener so processing time counts towards the gap.
        let now = Timestamp::now();
        {
            let mut state = self.state();
            state.gas_rate.mark(event.header.gas_power_used, now);
            state.prev_emitted_time = now;
            state.last_emitted = Some((event.id, event.header.clone()));
        }
        drop(engine);
        tracing::info!(
            event = %event.id.short(),
            epoch = event.header.epoch,
            seq = event.header.seq,
            lamport = event.header.lamport,
            parents = event.header.parents.len(),
            txs = event.transactions.len(),
            gas_used = event.header.gas_power_used,
            gas_left = event.header.gas_power_left,
            "New event emitted"
        );
        Some(event)
    }

    fn create_event(&self, engine: &E) -> Result<Option<Event>, EmitterError> {
        let coinbase = self.coinbase();
        if !engine.members().contains(&coinbase) {
            return Ok(None);
        }

        let epoch = engine.epoch();
        let heads = self.store.heads(epoch)?;
        let self_parent = self.self_parent(epoch, &coinbase)?;
        let self_parent_id = self_parent.as_ref().map(|(id, _)| *id);

        let mut strategy: Box<dyn SearchStrategy + '_> = match engine.vector_index() {
            Some(clock) => Box::new(CausalityStrategy::new(clock)),
            None => Box::new(RandomStrategy),
        };
        let parents = find_best_parents(self.dag.max_parents, &heads, self_parent_id, strategy.as_mut());

        let mut parent_headers = Vec::with_capacity(parents.len());
        for id in &parents {
            let header = match &self_parent {
                Some((sp, header)) if sp == id => header.clone(),
                _ => self
                    .store
                    .event_header(epoch, id)?
                    .ok_or(EmitterError::MissingHead { epoch, id: *id })?,
            };
            parent_headers.push(header);
        }
        let self_parent_header: Option<&EventHeader> =
            self_parent.as_ref().and(parent_headers.first());

        let (seq, claimed_time) = match self_parent_header {
            Some(sp) => (
                sp.seq.saturating_add(1),
                Timestamp::now().max(Timestamp(sp.claimed_time.0.saturating_add(1))),
            ),
            None => (1, Timestamp::now()),
        };
        let lamport = parent_headers.iter().map(|p| p.lamport).max().unwrap_or(0) + 1;

        let event = Event::new(EventHeader {
            epoch,
            seq,
            creator: coinbase,
            parents,
            lamport,
            claimed_time,
            gas_power_used: calc_gas_power_used(parent_headers.len()),
            gas_power_left: 0,
            tx_hash: [0u8; 32],
        });

        let Some(mut event) = engine.prepare(event) else {
            tracing::warn!(seq, "Dropped event while emitting: declined by consensus");
            return Ok(None);
        };

        let (prev_emitted, gas_rate) = {
            let mut state = self.state();
            let rate = state.gas_rate.rate1(Timestamp::now());
            (state.prev_emitted_time, rate)
        };
        match self.txpool.pending() {
            Ok(pending) => {
                let cap = self
                    .admission
                    .max_gas_power_to_use(&event, prev_emitted, gas_rate);
                self.admission.pack_transactions(&mut event, &pending, cap);
            }
            Err(e) => tracing::error!(error = %e, "Tx pool transactions fetching error"),
        }

        if !self
            .admission
            .is_allowed_to_emit(&event, self_parent_header, prev_emitted)
        {
            return Ok(None);
        }

        event.header.tx_hash = event.tx_root();
        if let Err(e) = event.sign(self.signer.as_ref()) {
            tracing::error!(seq, error = %e, "Failed to sign event");
            return Ok(None);
        }
        event.recache_hash();
        event.recache_size();

        if let Err(e) =
            self.validator
                .validate_all(&self.dag, engine.members(), &event, &parent_headers)
        {
            tracing::error!(event = %event.id.short(), error = %e, "Emitted incorrect event");
            return Ok(None);
        }
        Ok(Some(event))
    }

    /// The coinbase's latest event in the epoch: the stored one, or the one
    /// emitted here if the store has not seen it yet.
    fn self_parent(
        &self,
        epoch: Epoch,
        coinbase: &ValidatorId,
    ) -> Result<Option<(EventId, EventHeader)>, EmitterError> {
        let stored = match self.store.last_event(epoch, coinbase)? {
            Some(id) => {
                let header = self
                    .store
                    .event_header(epoch, &id)?
                    .ok_or(EmitterError::MissingHead { epoch, id })?;
                Some((id, header))
            }
            None => None,
        };
        let local = self
            .state()
            .last_emitted
            .clone()
            .filter(|(_, h)| h.epoch == epoch && h.creator == *coinbase);

        Ok(match (stored, local) {
            (Some(stored), Some(local)) if local.1.seq > stored.1.seq => Some(local),
            (stored, local) => stored.or(local),
        })
    }

    /// Claimed time of the coinbase's last stored event in the current epoch.
    async fn load_prev_emit_time(&self) -> Option<Timestamp> {
        let epoch = self.engine.read().await.epoch();
        let coinbase = self.coinbase();
        let last = self.store.last_event(epoch, &coinbase).ok().flatten()?;
        let header = self.store.event_header(epoch, &last).ok().flatten()?;
        Some(header.claimed_time)
    }

    /// Start periodic emission. Does nothing if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        if let Some(prev) = self.load_prev_emit_time().await {
            self.state().prev_emitted_time = prev;
        }

        let shutdown = CancellationToken::new();
        let emitter = Arc::clone(self);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { emitter.run(token).await });
        *task = Some(EmissionTask { shutdown, handle });
        tracing::info!(coinbase = %crate::short_hex(&self.coinbase()), "Event emission started");
    }

    /// Stop periodic emission and wait for an in-flight cycle. Idempotent.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.shutdown.cancel();
        if let Err(e) = task.handle.await {
            tracing::warn!(error = %e, "Emission task ended abnormally");
        }
        tracing::info!("Event emission stopped");
    }

    /// False after `stop`, or once the task exited on a fatal error.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let min_interval = self.config.min_emit_interval();
        let period = (min_interval / 10).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_halted() {
                        break;
                    }
                    if Timestamp::now().since(self.prev_emitted_time()) >= min_interval {
                        self.emit_event().await;
                    }
                }
            }
        }
    }
}
