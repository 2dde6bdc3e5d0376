//! Aggregator configuration.

use serde::{Deserialize, Serialize};

use crate::error::AggregatorError;

/// Top-level aggregator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Txs per rollup. Must be a power of two; the circuit shape depends
    /// on it.
    #[serde(default = "default_rollup_size")]
    pub rollup_size: usize,

    /// Longest a pending tx may wait before its batch is closed.
    #[serde(default = "default_max_rollup_wait_secs")]
    pub max_rollup_wait_secs: u64,

    /// Throttle between consecutive batch dispatches.
    #[serde(default)]
    pub min_rollup_interval_secs: u64,

    /// Confirmations required before a rollup block is ingested.
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,

    /// Chain polling cadence.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub fees: FeeConfig,
}

fn default_rollup_size() -> usize {
    2
}

fn default_max_rollup_wait_secs() -> u64 {
    10
}

fn default_min_confirmations() -> u64 {
    1
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            rollup_size: default_rollup_size(),
            max_rollup_wait_secs: default_max_rollup_wait_secs(),
            min_rollup_interval_secs: 0,
            min_confirmations: default_min_confirmations(),
            poll_interval_secs: default_poll_interval_secs(),
            fees: FeeConfig::default(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration: a JSON file named by `CONFIG_PATH` if present,
    /// then scalar overrides from the environment.
    pub fn from_env() -> Result<Self, AggregatorError> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    AggregatorError::Config(format!("failed to read {path}: {e}"))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    AggregatorError::Config(format!("failed to parse {path}: {e}"))
                })?
            }
            Err(_) => Self::default(),
        };
        if let Some(v) = env_u64("ROLLUP_SIZE")? {
            config.rollup_size = v as usize;
        }
        if let Some(v) = env_u64("MAX_ROLLUP_WAIT_SECS")? {
            config.max_rollup_wait_secs = v;
        }
        if let Some(v) = env_u64("MIN_ROLLUP_INTERVAL_SECS")? {
            config.min_rollup_interval_secs = v;
        }
        if let Some(v) = env_u64("MIN_CONFIRMATIONS")? {
            config.min_confirmations = v;
        }
        if let Some(v) = env_u64("POLL_INTERVAL_SECS")? {
            config.poll_interval_secs = v;
        }
        if let Some(v) = env_u64("BASE_TX_GAS")? {
            config.fees.base_tx_gas = v;
        }
        if let Some(v) = env_u64("PUBLISH_INTERVAL_SECS")? {
            config.fees.publish_interval_secs = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.rollup_size == 0 || !self.rollup_size.is_power_of_two() {
            return Err(AggregatorError::Config(format!(
                "rollup_size must be a power of two, got {}",
                self.rollup_size
            )));
        }
        if self.min_rollup_interval_secs > self.max_rollup_wait_secs {
            return Err(AggregatorError::Config(format!(
                "min_rollup_interval_secs ({}) exceeds max_rollup_wait_secs ({})",
                self.min_rollup_interval_secs, self.max_rollup_wait_secs
            )));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, AggregatorError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AggregatorError::Config(format!("{name} must be an integer: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Fee schedule parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Gas every tx pays toward rollup publication.
    #[serde(default = "default_base_tx_gas")]
    pub base_tx_gas: u64,

    /// Cap on the effective gas price; 0 disables the cap.
    #[serde(default)]
    pub max_fee_gas_price: u128,

    /// Markup over the oracle gas price. Held internally as an integer
    /// percentage to keep two fractional digits exact.
    #[serde(default = "default_fee_gas_price_multiplier")]
    pub fee_gas_price_multiplier: f64,

    /// Target publication cadence, used for quote times.
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,

    /// Assets the aggregator subsidizes entirely.
    #[serde(default)]
    pub fee_free_assets: Vec<u32>,

    /// Per-asset fee parameters. Asset 0 is the native asset.
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetConfig>,
}

fn default_base_tx_gas() -> u64 {
    16_000
}

fn default_fee_gas_price_multiplier() -> f64 {
    1.0
}

fn default_publish_interval_secs() -> u64 {
    600
}

fn default_assets() -> Vec<AssetConfig> {
    vec![AssetConfig {
        asset_id: 0,
        decimals: 18,
        gas_constants: [5000, 0, 5000, 30000, 0, 0, 0],
    }]
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_tx_gas: default_base_tx_gas(),
            max_fee_gas_price: 0,
            fee_gas_price_multiplier: default_fee_gas_price_multiplier(),
            publish_interval_secs: default_publish_interval_secs(),
            fee_free_assets: vec![],
            assets: default_assets(),
        }
    }
}

/// Per-asset fee parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetConfig {
    pub asset_id: u32,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// Extra gas per tx type, in canonical tx-type order.
    pub gas_constants: [u64; 7],
}

fn default_decimals() -> u32 {
    18
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        AggregatorConfig::default().validate().unwrap();
    }

    #[test]
    fn non_power_of_two_rollup_size_rejected() {
        let config = AggregatorConfig {
            rollup_size: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AggregatorError::Config(_))
        ));
    }

    #[test]
    fn throttle_longer_than_wait_rejected() {
        let config = AggregatorConfig {
            max_rollup_wait_secs: 5,
            min_rollup_interval_secs: 6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AggregatorError::Config(_))
        ));
    }
}
