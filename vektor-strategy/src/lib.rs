//! Strategy trait and the concrete trading strategies: `Scalper`,
//! `MarketMaker`, `PairsArbitrage`.
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod market_maker;
pub mod pairs_arbitrage;
pub mod registry;
pub mod scalper;
pub mod signal;
pub mod strategy;

pub use config::{MarketMakerConfig, PairsArbitrageConfig, ScalperConfig, StrategyConfig};
pub use market_maker::MarketMaker;
pub use pairs_arbitrage::PairsArbitrage;
pub use registry::StrategyRegistry;
pub use scalper::Scalper;
pub use signal::{PairLeg, ScalperReason, Signal, SignalMetadata};
pub use strategy::{Strategy, StrategyStats};
