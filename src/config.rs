//! Configuration file support.
//!
//! Loads optional `stratum.toml` from the data directory. CLI flags override
//! config file values. If no config file exists, defaults are used.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::constants;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    pub emitter: EmitterConfig,
    pub dag: DagConfig,
    pub engine: EngineConfig,
}

/// Emission pacing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub min_emit_interval_ms: u64,
    pub max_emit_interval_ms: u64,
    pub max_gas_rate_growth_factor: f64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            min_emit_interval_ms: constants::MIN_EMIT_INTERVAL_MS,
            max_emit_interval_ms: constants::MAX_EMIT_INTERVAL_MS,
            max_gas_rate_growth_factor: constants::MAX_GAS_RATE_GROWTH_FACTOR,
        }
    }
}

impl EmitterConfig {
    pub fn min_emit_interval(&self) -> Duration {
        Duration::from_millis(self.min_emit_interval_ms)
    }

    pub fn max_emit_interval(&self) -> Duration {
        Duration::from_millis(self.max_emit_interval_ms)
    }
}

/// DAG-wide event limits, shared by the emitter and the validator.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub max_parents: usize,
    pub max_event_size: usize,
    pub max_gas_power_used: u64,
    pub gas_power: GasPowerConfig,
}

impl Default for DagConfig {
    fn default() -> Self {
        DagConfig {
            max_parents: constants::MAX_PARENTS,
            max_event_size: constants::MAX_EVENT_SIZE,
            max_gas_power_used: constants::MAX_GAS_POWER_USED,
            gas_power: GasPowerConfig::default(),
        }
    }
}

/// Gas power thresholds driving admission control.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GasPowerConfig {
    pub no_txs_threshold: u64,
    pub gas_power_control_threshold: u64,
    pub emergency_threshold: u64,
}

impl Default for GasPowerConfig {
    fn default() -> Self {
        GasPowerConfig {
            no_txs_threshold: constants::NO_TXS_THRESHOLD,
            gas_power_control_threshold: constants::GAS_POWER_CONTROL_THRESHOLD,
            emergency_threshold: constants::EMERGENCY_THRESHOLD,
        }
    }
}

/// Gas power allocation of the reference engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub startup_gas_power: u64,
    pub gas_power_alloc_per_sec: u64,
    pub max_stashed_gas_power: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            startup_gas_power: constants::STARTUP_GAS_POWER,
            gas_power_alloc_per_sec: constants::GAS_POWER_ALLOC_PER_SEC,
            max_stashed_gas_power: constants::MAX_STASHED_GAS_POWER,
        }
    }
}

/// Incoherent configuration values.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("min_emit_interval_ms ({min}) exceeds max_emit_interval_ms ({max})")]
    EmitIntervals { min: u64, max: u64 },
    #[error("min_emit_interval_ms must be positive")]
    ZeroEmitInterval,
    #[error("max_gas_rate_growth_factor must be a positive number, got {0}")]
    GrowthFactor(f64),
    #[error("max_parents must be at least 1")]
    NoParents,
    #[error("gas power thresholds must satisfy emergency <= no_txs <= control")]
    Thresholds,
    #[error("startup_gas_power ({startup}) exceeds max_stashed_gas_power ({stash})")]
    Stash { startup: u64, stash: u64 },
}

impl StratumConfig {
    /// Load configuration from `stratum.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("stratum.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let em = &self.emitter;
        if em.min_emit_interval_ms == 0 {
            return Err(ConfigError::ZeroEmitInterval);
        }
        if em.min_emit_interval_ms > em.max_emit_interval_ms {
            return Err(ConfigError::EmitIntervals {
                min: em.min_emit_interval_ms,
                max: em.max_emit_interval_ms,
            });
        }
        if !(em.max_gas_rate_growth_factor.is_finite() && em.max_gas_rate_growth_factor > 0.0) {
            return Err(ConfigError::GrowthFactor(em.max_gas_rate_growth_factor));
        }
        if self.dag.max_parents == 0 {
            return Err(ConfigError::NoParents);
        }
        let gp = &self.dag.gas_power;
        if gp.emergency_threshold > gp.no_txs_threshold
            || gp.no_txs_threshold > gp.gas_power_control_threshold
        {
            return Err(ConfigError::Thresholds);
        }
        let eng = &self.engine;
        if eng.startup_gas_power > eng.max_stashed_gas_power {
            return Err(ConfigError::Stash {
                startup: eng.startup_gas_power,
                stash: eng.max_stashed_gas_power,
            });
        }
        Ok(())
    }
}
