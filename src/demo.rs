//! In-process network simulation.
//!
//! Runs several validators' emitters against one shared engine and event
//! store, feeds them transactions, then reports how far the DAG got and how
//! widely each validator's first event is strongly seen.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, StratumConfig};
use crate::consensus::engine::{Consensus, LocalEngine};
use crate::consensus::event::{Epoch, Event, EventId, Seq, ValidatorId};
use crate::consensus::members::{Members, Validator};
use crate::crypto::keys::{Keystore, SigningKeypair};
use crate::emitter::Emitter;
use crate::mempool::Mempool;
use crate::storage::{EventStore, MemoryStore};
use crate::transaction::Transaction;

const DEMO_SENDERS: u8 = 8;
const DEMO_TX_GAS: u64 = 21_000;

#[derive(Clone, Debug)]
pub struct SimulationParams {
    pub validators: usize,
    pub duration: Duration,
    /// Transactions submitted per second
    pub tx_rate: u32,
    pub config: StratumConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation needs at least one validator")]
    NoValidators,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug)]
pub struct ValidatorReport {
    pub id: ValidatorId,
    pub events: Seq,
    pub first_event: Option<EventId>,
    /// Validators whose latest event strongly sees `first_event`
    pub seen_by: usize,
}

#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub epoch: Epoch,
    pub total_events: usize,
    pub txs_included: usize,
    pub validators: Vec<ValidatorReport>,
}

/// Run the simulation to completion.
pub async fn run_simulation(params: SimulationParams) -> Result<SimulationReport, SimulationError> {
    if params.validators == 0 {
        return Err(SimulationError::NoValidators);
    }
    params.config.validate()?;

    let mut keystore = Keystore::new();
    let mut validators = Vec::with_capacity(params.validators);
    for _ in 0..params.validators {
        let kp = SigningKeypair::generate();
        validators.push(Validator::new(kp.public.clone(), 1));
        keystore.insert(kp);
    }
    let ids: Vec<ValidatorId> = validators.iter().map(|v| v.id).collect();
    let members = Members::new(validators);

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(RwLock::new(LocalEngine::new(
        1,
        members,
        store.clone(),
        params.config.engine.clone(),
    )));
    let pool = Arc::new(Mempool::default());
    let signer = Arc::new(keystore);
    let included = Arc::new(AtomicUsize::new(0));

    let mut emitters = Vec::with_capacity(ids.len());
    for id in &ids {
        let listener_pool = pool.clone();
        let listener_included = included.clone();
        let emitter = Emitter::new(
            &params.config,
            engine.clone(),
            store.clone(),
            pool.clone(),
            signer.clone(),
        )
        .with_listener(move |engine: &mut LocalEngine, event: &Event| {
            if let Err(e) = engine.process_event(event) {
                tracing::error!(event = %event.id.short(), error = %e, "Failed to connect emitted event");
                return;
            }
            listener_pool.remove_included(&event.transactions);
            listener_included.fetch_add(event.transactions.len(), Ordering::Relaxed);
        });
        emitter.set_coinbase(*id);
        let emitter = Arc::new(emitter);
        emitter.start().await;
        emitters.push(emitter);
    }

    let shutdown = CancellationToken::new();
    let feeder = tokio::spawn(feed_transactions(pool.clone(), params.tx_rate, shutdown.clone()));

    tokio::time::sleep(params.duration).await;

    shutdown.cancel();
    if let Err(e) = feeder.await {
        tracing::warn!(error = %e, "Transaction feeder ended abnormally");
    }
    for emitter in &emitters {
        emitter.stop().await;
    }

    let engine = engine.read().await;
    Ok(build_report(&engine, &ids, included.load(Ordering::Relaxed)))
}

async fn feed_transactions(pool: Arc<Mempool>, tx_rate: u32, shutdown: CancellationToken) {
    if tx_rate == 0 {
        shutdown.cancelled().await;
        return;
    }
    let senders: Vec<_> = (0..DEMO_SENDERS)
        .map(|i| crate::hash_domain(b"stratum.demo.sender", &[i]))
        .collect();
    let mut nonces = vec![0u64; senders.len()];
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / tx_rate);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let i = rand::rng().random_range(0..senders.len());
                let tx = Transaction::new(
                    senders[i],
                    nonces[i],
                    DEMO_TX_GAS,
                    nonces[i].to_le_bytes().to_vec(),
                );
                match pool.insert(tx) {
                    Ok(_) => nonces[i] += 1,
                    Err(e) => tracing::debug!(error = %e, "Transaction not pooled"),
                }
            }
        }
    }
}

fn build_report(engine: &LocalEngine, ids: &[ValidatorId], txs_included: usize) -> SimulationReport {
    let epoch = engine.epoch();
    let store = engine.store();

    let latest: Vec<EventId> = ids
        .iter()
        .filter_map(|id| store.last_event(epoch, id).ok().flatten())
        .collect();

    let validators = ids
        .iter()
        .map(|id| {
            let last = store.last_event(epoch, id).ok().flatten();
            let events = last
                .and_then(|l| store.event_header(epoch, &l).ok().flatten())
                .map(|h| h.seq)
                .unwrap_or(0);
            let first_event = last.map(|l| first_of_chain(store, epoch, l));
            let seen_by = first_event
                .map(|first| latest.iter().filter(|e| engine.see(e, &first)).count())
                .unwrap_or(0);
            ValidatorReport {
                id: *id,
                events,
                first_event,
                seen_by,
            }
        })
        .collect();

    SimulationReport {
        epoch,
        total_events: store.len(epoch),
        txs_included,
        validators,
    }
}

/// Follow self-parents back to the creator's first event of the epoch.
fn first_of_chain(store: &MemoryStore, epoch: Epoch, mut id: EventId) -> EventId {
    while let Some(sp) = store
        .event_header(epoch, &id)
        .ok()
        .flatten()
        .and_then(|h| h.self_parent().copied())
    {
        id = sp;
    }
    id
}

/// Print a simulation report to stdout.
pub fn print_report(report: &SimulationReport) {
    println!("=== STRATUM: DAG emission simulation ===\n");
    println!("    Epoch:              {}", report.epoch);
    println!("    Events in DAG:      {}", report.total_events);
    println!("    Txs included:       {}", report.txs_included);
    println!("    Validators:         {}\n", report.validators.len());

    for v in &report.validators {
        let first = v
            .first_event
            .map(|e| e.short())
            .unwrap_or_else(|| "-".into());
        println!(
            "    {}  events: {:>5}  first: {}  strongly seen by {}/{} latest",
            crate::short_hex(&v.id),
            v.events,
            first,
            v.seen_by,
            report.validators.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_validators_rejected() {
        let params = SimulationParams {
            validators: 0,
            duration: Duration::from_millis(10),
            tx_rate: 0,
            config: StratumConfig::default(),
        };
        assert!(matches!(
            run_simulation(params).await,
            Err(SimulationError::NoValidators)
        ));
    }

    #[tokio::test]
    async fn short_run_produces_chains() {
        let mut config = StratumConfig::default();
        config.emitter.min_emit_interval_ms = 20;
        let params = SimulationParams {
            validators: 3,
            duration: Duration::from_millis(500),
            tx_rate: 50,
            config,
        };
        let report = run_simulation(params).await.unwrap();
        assert_eq!(report.validators.len(), 3);
        assert!(report.total_events >= 3);
        let chained: usize = report.validators.iter().map(|v| v.events as usize).sum();
        assert_eq!(chained, report.total_events);
        assert!(report.validators.iter().all(|v| v.first_event.is_some()));
    }
}
