//! Capability-polymorphic strategy interface shared by `Scalper`, `MarketMaker`
//! and `PairsArbitrage`.

use crate::signal::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vektor_data::{Kline, MarketData, OrderBook};
use vektor_execution::Fill;
use vektor_instrument::Symbol;

/// Point-in-time statistics a strategy reports for observability. Mirrors
/// what the engine surfaces per strategy on the status/metrics surface.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StrategyStats {
    pub name: String,
    pub enabled: bool,
    pub signals_generated: u64,
    pub trades_executed: u64,
}

/// A strategy is polymorphic over the capability set `{OnMarketData,
/// OnOrderBook, OnKline, OnFill, OnTimer}`. All event handlers default to a
/// no-op so a concrete strategy only implements what it cares about.
///
/// Lifecycle: `initialize -> enable -> (events...) -> disable`. Events
/// delivered while disabled are dropped by the engine before they reach here.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&mut self) {}

    async fn enable(&mut self) {}

    async fn disable(&mut self) {}

    async fn on_market_data(&mut self, _data: &MarketData) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_order_book(&mut self, _book: &OrderBook) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_kline(&mut self, _symbol: &Symbol, _bar: &Kline) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_fill(&mut self, _fill: &Fill) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_timer(&mut self, _now: DateTime<Utc>) -> Vec<Signal> {
        Vec::new()
    }

    fn stats(&self) -> StrategyStats;
}
