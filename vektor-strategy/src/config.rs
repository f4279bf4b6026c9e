//! Per-variant strategy parameter tables, loaded from the `strategies`
//! section of the engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalperConfig {
    #[serde(default = "default_ema_short")]
    pub ema_short: usize,
    #[serde(default = "default_ema_long")]
    pub ema_long: usize,
    #[serde(default = "default_obi_threshold")]
    pub obi_threshold: Decimal,
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
    #[serde(default = "default_stop_distance")]
    pub stop_distance: Decimal,
    #[serde(default = "default_slip_offset")]
    pub slip_offset: Decimal,
}

fn default_ema_short() -> usize { 5 }
fn default_ema_long() -> usize { 20 }
fn default_obi_threshold() -> Decimal { Decimal::new(25, 2) }
fn default_risk_fraction() -> Decimal { Decimal::new(1, 2) }
fn default_stop_distance() -> Decimal { Decimal::new(5, 3) }
fn default_slip_offset() -> Decimal { Decimal::new(1, 4) }

impl Default for ScalperConfig {
    fn default() -> Self {
        Self {
            ema_short: default_ema_short(),
            ema_long: default_ema_long(),
            obi_threshold: default_obi_threshold(),
            risk_fraction: default_risk_fraction(),
            stop_distance: default_stop_distance(),
            slip_offset: default_slip_offset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMakerConfig {
    #[serde(default = "default_spread_pct")]
    pub spread_pct: Decimal,
    #[serde(default = "default_inventory_bias")]
    pub inventory_bias: Decimal,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_max_inventory")]
    pub max_inventory: Decimal,
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
}

fn default_spread_pct() -> Decimal { Decimal::new(1, 3) }
fn default_inventory_bias() -> Decimal { Decimal::new(1, 1) }
fn default_refresh_interval_secs() -> u64 { 5 }
fn default_max_inventory() -> Decimal { Decimal::from(1000) }
fn default_order_size() -> Decimal { Decimal::from(100) }
fn default_volatility_window() -> usize { 20 }

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            spread_pct: default_spread_pct(),
            inventory_bias: default_inventory_bias(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_inventory: default_max_inventory(),
            order_size: default_order_size(),
            volatility_window: default_volatility_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairsArbitrageConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_z_enter")]
    pub z_enter: Decimal,
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: Decimal,
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,
    #[serde(default = "default_base_size")]
    pub base_size: Decimal,
}

fn default_window() -> usize { 100 }
fn default_z_enter() -> Decimal { Decimal::TWO }
fn default_kelly_fraction() -> Decimal { Decimal::new(1, 1) }
fn default_max_position_ratio() -> Decimal { Decimal::new(5, 1) }
fn default_base_size() -> Decimal { Decimal::from(100) }

impl Default for PairsArbitrageConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            z_enter: default_z_enter(),
            kelly_fraction: default_kelly_fraction(),
            max_position_ratio: default_max_position_ratio(),
            base_size: default_base_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Scalper {
        name: String,
        symbols: Vec<String>,
        #[serde(flatten)]
        params: ScalperConfig,
    },
    MarketMaker {
        name: String,
        symbols: Vec<String>,
        #[serde(flatten)]
        params: MarketMakerConfig,
    },
    PairsArbitrage {
        name: String,
        pairs: Vec<(String, String)>,
        #[serde(flatten)]
        params: PairsArbitrageConfig,
    },
}
