//! Fee quoting and batch surplus scoring.
//!
//! Gas costs convert into per-asset fees through the price oracle; the
//! surplus ratio scores how far a candidate batch pays above the minimum,
//! which drives the quote tiers clients see.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use zkra_common::{JoinSplitProofData, TxType, TX_TYPES};

use crate::config::{AssetConfig, FeeConfig};

/// The native (gas) asset id.
pub const NATIVE_ASSET_ID: u32 = 0;

/// Quote tiers, from an idle rollup to a full one.
pub const SURPLUS_RATIOS: [f64; 4] = [1.0, 0.9, 0.5, 0.0];

/// Quotes never promise publication sooner than this.
const MIN_QUOTE_TIME_SECS: u64 = 300;

/// External price feed.
///
/// `asset_price` is the native-asset cost of one whole unit (`10^decimals`
/// base units) of the asset; 0 signals the price is unknown and fees for
/// that asset degrade to 0.
pub trait PriceOracle: Send + Sync {
    fn asset_price(&self, asset_id: u32) -> u128;
    fn gas_price(&self) -> u128;
}

/// Fixed-price oracle for tests and local development.
#[derive(Default)]
pub struct StaticOracle {
    pub gas_price: u128,
    pub prices: HashMap<u32, u128>,
}

impl PriceOracle for StaticOracle {
    fn asset_price(&self, asset_id: u32) -> u128 {
        self.prices.get(&asset_id).copied().unwrap_or(0)
    }

    fn gas_price(&self) -> u128 {
        self.gas_price
    }
}

/// A fee quote for one asset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeQuotes {
    /// Per-tx-type fee constants, canonical tx-type order.
    pub fee_constants: Vec<u128>,
    /// One entry per surplus-ratio tier.
    pub base_fee_quotes: Vec<BaseFeeQuote>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaseFeeQuote {
    pub fee: u128,
    pub time_secs: u64,
}

pub struct FeeCalculator {
    oracle: Arc<dyn PriceOracle>,
    base_tx_gas: u64,
    max_fee_gas_price: u128,
    /// `fee_gas_price_multiplier` scaled by 100.
    multiplier_pct: u128,
    publish_interval_secs: u64,
    txs_per_rollup: usize,
    fee_free_assets: Vec<u32>,
    assets: Vec<AssetConfig>,
}

impl FeeCalculator {
    pub fn new(config: &FeeConfig, txs_per_rollup: usize, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            oracle,
            base_tx_gas: config.base_tx_gas,
            max_fee_gas_price: config.max_fee_gas_price,
            multiplier_pct: (config.fee_gas_price_multiplier * 100.0).round().max(0.0) as u128,
            publish_interval_secs: config.publish_interval_secs,
            txs_per_rollup,
            fee_free_assets: config.fee_free_assets.clone(),
            assets: config.assets.clone(),
        }
    }

    fn asset(&self, asset_id: u32) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.asset_id == asset_id)
    }

    fn decimals(&self, asset_id: u32) -> u32 {
        self.asset(asset_id).map(|a| a.decimals).unwrap_or(18)
    }

    fn gas_constant(&self, asset_id: u32, tx_type: TxType) -> u64 {
        self.asset(asset_id)
            .map(|a| a.gas_constants[tx_type.index()])
            .unwrap_or(0)
    }

    /// Native-asset cost of `value` gas-scaled units, capped when a cap is
    /// configured.
    fn apply_gas_price(&self, value: u128) -> u128 {
        let scaled = value
            .saturating_mul(self.oracle.gas_price())
            .saturating_mul(self.multiplier_pct)
            / 100;
        if self.max_fee_gas_price > 0 {
            scaled.min(value.saturating_mul(self.max_fee_gas_price))
        } else {
            scaled
        }
    }

    /// Convert a gas amount into base units of `asset_id`.
    pub fn to_asset_price(&self, asset_id: u32, gas: u64) -> u128 {
        if asset_id == NATIVE_ASSET_ID {
            return self.apply_gas_price(gas as u128);
        }
        let price = self.oracle.asset_price(asset_id);
        if price == 0 {
            return 0;
        }
        self.apply_gas_price((gas as u128).saturating_mul(pow10(self.decimals(asset_id)))) / price
    }

    /// Convert base units of `asset_id` back into the native asset.
    pub fn to_eth_price(&self, asset_id: u32, value: u128) -> u128 {
        if asset_id == NATIVE_ASSET_ID {
            return value;
        }
        value.saturating_mul(self.oracle.asset_price(asset_id)) / pow10(self.decimals(asset_id))
    }

    /// Every tx's share of the rollup publication cost, in `asset_id`.
    pub fn base_fee(&self, asset_id: u32) -> u128 {
        self.to_asset_price(asset_id, self.base_tx_gas)
    }

    /// Minimum acceptable fee for a tx of `tx_type` paying in `asset_id`.
    pub fn min_tx_fee(&self, asset_id: u32, tx_type: TxType) -> u128 {
        if tx_type == TxType::Account || self.fee_free_assets.contains(&asset_id) {
            return 0;
        }
        self.to_asset_price(asset_id, self.gas_constant(asset_id, tx_type))
            .saturating_add(self.base_fee(asset_id))
    }

    /// Published fee schedule for one asset.
    pub fn fee_quotes(&self, asset_id: u32) -> FeeQuotes {
        let base = self.base_fee(asset_id);
        FeeQuotes {
            fee_constants: TX_TYPES
                .iter()
                .map(|t| self.to_asset_price(asset_id, self.gas_constant(asset_id, *t)))
                .collect(),
            base_fee_quotes: SURPLUS_RATIOS
                .iter()
                .map(|ratio| {
                    let empty_slots =
                        (self.txs_per_rollup as f64 * (1.0 - ratio)).round() as u128;
                    BaseFeeQuote {
                        fee: base.saturating_mul(1 + empty_slots),
                        time_secs: MIN_QUOTE_TIME_SECS
                            .max((self.publish_interval_secs as f64 * ratio).round() as u64),
                    }
                })
                .collect(),
        }
    }

    /// The fee a tx actually pays. Account proofs are fee-free; defi txs
    /// pay in the bridge's input asset (see
    /// [`JoinSplitProofData::fee_asset_id`]).
    pub fn tx_fee(&self, proof: &JoinSplitProofData) -> u128 {
        match proof.tx_type {
            TxType::Account => 0,
            _ => proof.tx_fee,
        }
    }

    /// How far above minimum a candidate batch pays, clamped to `[0, 1]`.
    ///
    /// Per-tx `tx_fee - min_tx_fee` differences are summed signed, so an
    /// under-paying tx offsets an over-paying one; only the final ratio is
    /// clamped. 1 means no net surplus (an empty batch scores 1); 0 means
    /// the batch already covers a full rollup's base cost in excess fees.
    pub fn surplus_ratio<'a, I>(&self, txs: I) -> f64
    where
        I: IntoIterator<Item = &'a JoinSplitProofData>,
    {
        let full_cost = self
            .base_fee(NATIVE_ASSET_ID)
            .saturating_mul(self.txs_per_rollup as u128);
        if full_cost == 0 {
            return 1.0;
        }
        let mut surplus: i128 = 0;
        for proof in txs {
            if proof.tx_type == TxType::Account {
                continue;
            }
            let asset_id = proof.fee_asset_id();
            let fee = self.tx_fee(proof);
            let min = self.min_tx_fee(asset_id, proof.tx_type);
            let diff = if fee >= min {
                to_signed(self.to_eth_price(asset_id, fee - min))
            } else {
                -to_signed(self.to_eth_price(asset_id, min - fee))
            };
            surplus = surplus.saturating_add(diff);
        }
        (1.0 - surplus as f64 / full_cost as f64).clamp(0.0, 1.0)
    }
}

fn pow10(exp: u32) -> u128 {
    10u128.saturating_pow(exp)
}

fn to_signed(value: u128) -> i128 {
    i128::try_from(value).unwrap_or(i128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkra_common::merkle::ZERO_LEAF;

    fn oracle(gas_price: u128, asset_price: u128) -> Arc<StaticOracle> {
        Arc::new(StaticOracle {
            gas_price,
            prices: HashMap::from([(1, asset_price)]),
        })
    }

    fn config() -> FeeConfig {
        FeeConfig {
            base_tx_gas: 10_000,
            max_fee_gas_price: 0,
            fee_gas_price_multiplier: 1.0,
            publish_interval_secs: 600,
            fee_free_assets: vec![],
            assets: vec![
                AssetConfig {
                    asset_id: 0,
                    decimals: 18,
                    gas_constants: [5000, 0, 5000, 30000, 0, 0, 0],
                },
                AssetConfig {
                    asset_id: 1,
                    decimals: 18,
                    gas_constants: [5000, 0, 5000, 30000, 0, 0, 0],
                },
            ],
        }
    }

    fn proof(tx_type: TxType, asset_id: u32, tx_fee: u128) -> JoinSplitProofData {
        JoinSplitProofData {
            tx_type,
            public_input: 0,
            public_output: 0,
            asset_id,
            bridge_id: asset_id as u64,
            new_note1: ZERO_LEAF,
            new_note2: ZERO_LEAF,
            nullifier1: 1,
            nullifier2: 2,
            note_tree_root: [0u8; 32],
            tx_fee,
        }
    }

    #[test]
    fn quote_shape_matches_schedule() {
        // gas price 2, multiplier 1.0, uncapped, price 1e18, 10 txs/rollup
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        let base = calc.base_fee(1);
        assert_eq!(base, 20_000);

        let quotes = calc.fee_quotes(1);
        assert_eq!(quotes.fee_constants.len(), TX_TYPES.len());
        let tiers: Vec<(u128, u64)> = quotes
            .base_fee_quotes
            .iter()
            .map(|q| (q.fee, q.time_secs))
            .collect();
        assert_eq!(
            tiers,
            vec![
                (base, 600),
                (base * 2, 540),
                (base * 6, 300),
                (base * 11, 300),
            ]
        );
    }

    #[test]
    fn unknown_price_degrades_to_zero() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 0));
        assert_eq!(calc.base_fee(1), 0);
        assert_eq!(calc.min_tx_fee(1, TxType::Deposit), 0);
    }

    #[test]
    fn max_fee_gas_price_caps_conversion() {
        let mut config = config();
        config.max_fee_gas_price = 1;
        let calc = FeeCalculator::new(&config, 10, oracle(2, 1_000_000_000_000_000_000));
        // capped at gas * 1 instead of gas * 2
        assert_eq!(calc.base_fee(1), 10_000);
    }

    #[test]
    fn account_and_fee_free_assets_cost_nothing() {
        let mut config = config();
        config.fee_free_assets = vec![1];
        let calc = FeeCalculator::new(&config, 10, oracle(2, 1_000_000_000_000_000_000));
        assert_eq!(calc.min_tx_fee(0, TxType::Account), 0);
        assert_eq!(calc.min_tx_fee(1, TxType::Deposit), 0);
        assert_ne!(calc.min_tx_fee(0, TxType::Deposit), 0);
    }

    #[test]
    fn empty_batch_scores_one() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        assert_eq!(calc.surplus_ratio([]), 1.0);
    }

    #[test]
    fn surplus_decreases_as_fees_increase() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        let min = calc.min_tx_fee(0, TxType::Transfer);

        let at_min = calc.surplus_ratio([&proof(TxType::Transfer, 0, min)]);
        let above = calc.surplus_ratio([&proof(TxType::Transfer, 0, min + 50_000)]);
        let far_above = calc.surplus_ratio([&proof(TxType::Transfer, 0, min + 150_000)]);

        assert_eq!(at_min, 1.0);
        assert!(above < at_min);
        assert!(far_above < above);
    }

    #[test]
    fn underpayer_offsets_overpayer() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        let min = calc.min_tx_fee(0, TxType::Transfer);

        // one tx pays 15_000 over minimum, the other 15_000 under: the
        // signed terms cancel and the batch carries no net surplus
        let over = proof(TxType::Transfer, 0, min + 15_000);
        let under = proof(TxType::Transfer, 0, min - 15_000);
        assert_eq!(calc.surplus_ratio([&over, &under]), 1.0);

        // a partial offset still lowers the ratio by the net excess only
        let small_under = proof(TxType::Transfer, 0, min - 10_000);
        let partial = calc.surplus_ratio([&over, &small_under]);
        let net_only = calc.surplus_ratio([&proof(TxType::Transfer, 0, min + 5_000)]);
        assert_eq!(partial, net_only);
    }

    #[test]
    fn net_underpaying_batch_clamps_to_one() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        let min = calc.min_tx_fee(0, TxType::Transfer);
        let ratio = calc.surplus_ratio([&proof(TxType::Transfer, 0, min.saturating_sub(10_000))]);
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn surplus_clamps_to_zero() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        let huge = calc.surplus_ratio([&proof(TxType::Transfer, 0, u128::MAX / 2)]);
        assert_eq!(huge, 0.0);
    }

    #[test]
    fn account_txs_do_not_move_surplus() {
        let calc = FeeCalculator::new(&config(), 10, oracle(2, 1_000_000_000_000_000_000));
        // an account proof claiming a huge fee still counts as fee-free
        let ratio = calc.surplus_ratio([&proof(TxType::Account, 0, u128::MAX / 2)]);
        assert_eq!(ratio, 1.0);
    }
}
