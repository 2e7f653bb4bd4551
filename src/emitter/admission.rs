//! Gas power admission control.
//!
//! Decides how much gas an event may spend on transactions, which pending
//! transactions go in, and whether the event may be emitted at all given the
//! creator's remaining gas power and how long ago it last emitted.

use std::time::Duration;

use crate::config::{DagConfig, EmitterConfig};
use crate::consensus::event::{Event, EventHeader, Timestamp};
use crate::mempool::PendingTxs;

const METER_TICK: Duration = Duration::from_secs(5);
const METER_WINDOW_SECS: f64 = 60.0;

/// One-minute exponentially weighted moving average of gas spent per second.
///
/// Ticks every five seconds of the supplied clock; the rate reads zero until
/// the first tick.
#[derive(Clone, Debug)]
pub struct GasRateMeter {
    uncounted: u64,
    rate: f64,
    initialized: bool,
    last_tick: Timestamp,
}

impl GasRateMeter {
    pub fn new(now: Timestamp) -> Self {
        GasRateMeter {
            uncounted: 0,
            rate: 0.0,
            initialized: false,
            last_tick: now,
        }
    }

    /// Record gas spent at `now`.
    pub fn mark(&mut self, gas: u64, now: Timestamp) {
        self.tick_until(now);
        self.uncounted = self.uncounted.saturating_add(gas);
    }

    /// Gas per second, averaged over the last minute.
    pub fn rate1(&mut self, now: Timestamp) -> f64 {
        self.tick_until(now);
        self.rate
    }

    fn tick_until(&mut self, now: Timestamp) {
        let alpha = 1.0 - (-METER_TICK.as_secs_f64() / METER_WINDOW_SECS).exp();
        while now.since(self.last_tick) >= METER_TICK {
            let instant = self.uncounted as f64 / METER_TICK.as_secs_f64();
            self.uncounted = 0;
            if self.initialized {
                self.rate += alpha * (instant - self.rate);
            } else {
                self.rate = instant;
                self.initialized = true;
            }
            self.last_tick = self.last_tick.after(METER_TICK);
        }
    }
}

/// Gas power thresholds and pacing applied to each candidate event.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    dag: DagConfig,
    emitter: EmitterConfig,
}

impl AdmissionController {
    pub fn new(dag: DagConfig, emitter: EmitterConfig) -> Self {
        AdmissionController { dag, emitter }
    }

    /// Cap on the event's total gas power used.
    ///
    /// Zero at or below the no-transactions threshold. At or below the
    /// control threshold, spending may grow by at most the configured factor
    /// over the recent rate. Above it, the per-event ceiling.
    pub fn max_gas_power_to_use(&self, event: &Event, prev_emitted: Timestamp, gas_rate: f64) -> u64 {
        let left = event.header.gas_power_left;
        let thresholds = &self.dag.gas_power;
        let ceiling = self.dag.max_gas_power_used;

        if left <= thresholds.no_txs_threshold {
            return 0;
        }
        if left <= thresholds.gas_power_control_threshold {
            let passed = event.header.claimed_time.since(prev_emitted).as_secs_f64();
            let allowed = passed * gas_rate * self.emitter.max_gas_rate_growth_factor;
            // Float to int casts saturate; NaN becomes 0.
            return (allowed as u64).min(ceiling);
        }
        ceiling
    }

    /// Append pending transactions in pool order while they fit, then trim
    /// from the tail until the signed event fits the size limit.
    ///
    /// A transaction fits when its gas is within the gas power left and the
    /// event's gas used stays within `cap`. Each packed transaction moves its
    /// gas from `gas_power_left` to `gas_power_used`; trimmed ones move it
    /// back. Returns the number of transactions left in the event.
    pub fn pack_transactions(&self, event: &mut Event, pending: &PendingTxs, cap: u64) -> usize {
        for txs in pending.values() {
            for tx in txs {
                let h = &mut event.header;
                let fits = tx.gas <= h.gas_power_left
                    && h.gas_power_used.checked_add(tx.gas).is_some_and(|u| u <= cap);
                if !fits {
                    // Later nonces of this sender depend on this one.
                    break;
                }
                h.gas_power_used += tx.gas;
                h.gas_power_left -= tx.gas;
                event.transactions.push(tx.clone());
            }
        }

        while !event.transactions.is_empty()
            && event.signed_size_estimate() > self.dag.max_event_size
        {
            if let Some(tx) = event.transactions.pop() {
                event.header.gas_power_used -= tx.gas;
                event.header.gas_power_left += tx.gas;
            }
        }
        event.transactions.len()
    }

    /// Pacing and emergency check on a fully packed event.
    ///
    /// At or below the no-transactions threshold the required gap since the
    /// previous emission stretches linearly from the minimum interval (at the
    /// threshold) to the maximum interval (at zero power). At or below the
    /// emergency threshold, power must not drop below the self-parent's.
    pub fn is_allowed_to_emit(
        &self,
        event: &Event,
        self_parent: Option<&EventHeader>,
        prev_emitted: Timestamp,
    ) -> bool {
        let left = event.header.gas_power_left;
        let thresholds = &self.dag.gas_power;

        if left <= thresholds.no_txs_threshold {
            let required = self.adjusted_emit_interval(left);
            if event.header.claimed_time.since(prev_emitted) < required {
                tracing::debug!(
                    power = left,
                    required_ms = required.as_millis() as u64,
                    "Low gas power, delaying emission"
                );
                return false;
            }
        }

        if left <= thresholds.emergency_threshold {
            let sp_left = self_parent.map(|sp| sp.gas_power_left);
            if !sp_left.is_some_and(|sp_left| left >= sp_left) {
                tracing::warn!(
                    power = left,
                    self_parent_power = ?sp_left,
                    "Not enough power to emit event, waiting"
                );
                return false;
            }
        }
        true
    }

    fn adjusted_emit_interval(&self, left: u64) -> Duration {
        let max = self.emitter.max_emit_interval();
        let min = self.emitter.min_emit_interval().min(max);
        let threshold = self.dag.gas_power.no_txs_threshold;
        if threshold == 0 {
            return max;
        }
        let span = (max - min).as_nanos();
        let relief = span.saturating_mul(u128::from(left.min(threshold))) / u128::from(threshold);
        max - Duration::from_nanos(u64::try_from(relief).unwrap_or(u64::MAX))
    }
}
