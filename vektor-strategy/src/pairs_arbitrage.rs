//! Statistical-arbitrage pairs trading over a fitted Ornstein-Uhlenbeck
//! mean-reversion model of `log(priceA / priceB)`.

use crate::signal::{PairLeg, Signal, SignalMetadata};
use crate::strategy::{Strategy, StrategyStats};
use crate::config::PairsArbitrageConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use vektor_data::{Kline, MarketData, OrderBook};
use vektor_execution::{Fill, OrderType, TimeInForce};
use vektor_instrument::{Side, Symbol};
use vektor_ta::{OuEstimate, OuEstimator};

/// A pair's hedge state: once one leg fills and the other is rejected, new
/// entries are disabled until a corrective order re-squares the position.
/// Documented as eventually-consistent, not atomic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum HedgeState {
    #[default]
    Flat,
    BothLegsOpen,
    PendingHedge,
}

#[derive(Debug)]
struct PairState {
    asset_a: Symbol,
    asset_b: Symbol,
    estimator: OuEstimator,
    last_estimate: Option<OuEstimate>,
    last_price_a: Option<Decimal>,
    last_price_b: Option<Decimal>,
    hedge: HedgeState,
}

#[derive(Debug)]
pub struct PairsArbitrage {
    name: String,
    config: PairsArbitrageConfig,
    pairs: Vec<PairState>,
    enabled: bool,
    signals_generated: u64,
    trades_executed: u64,
}

impl PairsArbitrage {
    pub fn new(name: impl Into<String>, pairs: Vec<(Symbol, Symbol)>, config: PairsArbitrageConfig) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(a, b)| PairState {
                asset_a: a,
                asset_b: b,
                estimator: OuEstimator::new(config.window),
                last_estimate: None,
                last_price_a: None,
                last_price_b: None,
                hedge: HedgeState::Flat,
            })
            .collect();
        Self { name: name.into(), config, pairs, enabled: false, signals_generated: 0, trades_executed: 0 }
    }

    fn update_symbol_price(&mut self, symbol: &Symbol, price: Decimal) -> Vec<Signal> {
        let mut signals = Vec::new();
        for index in 0..self.pairs.len() {
            let is_a = self.pairs[index].asset_a == *symbol;
            let is_b = self.pairs[index].asset_b == *symbol;
            if !is_a && !is_b {
                continue;
            }
            if is_a {
                self.pairs[index].last_price_a = Some(price);
            } else {
                self.pairs[index].last_price_b = Some(price);
            }

            let (Some(price_a), Some(price_b)) =
                (self.pairs[index].last_price_a, self.pairs[index].last_price_b)
            else {
                continue;
            };
            if price_a <= Decimal::ZERO || price_b <= Decimal::ZERO {
                continue;
            }

            let log_ratio = (price_a / price_b).ln();
            let estimate = self.pairs[index].estimator.update(log_ratio);
            if let Some(estimate) = estimate {
                self.pairs[index].last_estimate = Some(estimate);
                if let Some(signal) = self.check_pair(index, log_ratio, estimate) {
                    signals.extend(signal);
                }
            }
        }
        signals
    }

    fn check_pair(&mut self, index: usize, log_ratio: Decimal, estimate: OuEstimate) -> Option<Vec<Signal>> {
        let Some(z) = OuEstimator::z_score(&estimate, log_ratio) else { return None };
        let asset_a = self.pairs[index].asset_a.clone();
        let asset_b = self.pairs[index].asset_b.clone();
        let hedge = self.pairs[index].hedge;
        let last_price_a = self.pairs[index].last_price_a;
        let last_price_b = self.pairs[index].last_price_b;

        if hedge == HedgeState::PendingHedge {
            return None;
        }

        if z.abs() > self.config.z_enter && hedge == HedgeState::Flat {
            let (price_a, price_b) = (last_price_a?, last_price_b?);
            let hedge_ratio = price_a / price_b;
            let base_size = self.config.base_size * self.config.kelly_fraction;
            let max_size = self.config.base_size * self.config.max_position_ratio;
            let size = base_size.min(max_size);
            if size <= Decimal::ZERO {
                return None;
            }

            let (side_a, side_b, size_a, size_b) = if z > Decimal::ZERO {
                (Side::Sell, Side::Buy, size, size * hedge_ratio)
            } else {
                (Side::Buy, Side::Sell, size, size / hedge_ratio)
            };

            self.pairs[index].hedge = HedgeState::BothLegsOpen;
            self.signals_generated += 2;
            let now = Utc::now();
            return Some(vec![
                Signal {
                    symbol: asset_a.clone(),
                    side: side_a,
                    quantity: size_a,
                    price: None,
                    kind: OrderType::Market,
                    time_in_force: TimeInForce::Ioc,
                    stop_price: None,
                    strategy_name: self.name.clone(),
                    confidence: Decimal::new(8, 1),
                    metadata: SignalMetadata::PairsArbitrage {
                        pair: (asset_a.clone(), asset_b.clone()),
                        z_score: z,
                        leg: PairLeg::A,
                    },
                    emitted_at: now,
                },
                Signal {
                    symbol: asset_b.clone(),
                    side: side_b,
                    quantity: size_b,
                    price: None,
                    kind: OrderType::Market,
                    time_in_force: TimeInForce::Ioc,
                    stop_price: None,
                    strategy_name: self.name.clone(),
                    confidence: Decimal::new(8, 1),
                    metadata: SignalMetadata::PairsArbitrage {
                        pair: (asset_a, asset_b),
                        z_score: z,
                        leg: PairLeg::B,
                    },
                    emitted_at: now,
                },
            ]);
        }

        if z.abs() < self.config.z_enter / Decimal::TWO && hedge == HedgeState::BothLegsOpen {
            self.pairs[index].hedge = HedgeState::Flat;
        }

        None
    }

    /// Emits a corrective market order on the surviving leg's symbol after a
    /// partial pair fill, clearing the pending-hedge flag so new entries can
    /// resume once the hedge settles.
    pub fn emit_corrective_hedge(&mut self, symbol: &Symbol, side: Side, quantity: Decimal) -> Signal {
        if let Some(pair) = self
            .pairs
            .iter_mut()
            .find(|p| p.asset_a == *symbol || p.asset_b == *symbol)
        {
            pair.hedge = HedgeState::Flat;
        }
        Signal {
            symbol: symbol.clone(),
            side,
            quantity,
            price: None,
            kind: OrderType::Market,
            time_in_force: TimeInForce::Ioc,
            stop_price: None,
            strategy_name: self.name.clone(),
            confidence: Decimal::ONE,
            metadata: SignalMetadata::PairsArbitrage {
                pair: (symbol.clone(), symbol.clone()),
                z_score: Decimal::ZERO,
                leg: PairLeg::A,
            },
            emitted_at: Utc::now(),
        }
    }

    pub fn mark_pending_hedge(&mut self, symbol: &Symbol) {
        if let Some(pair) = self
            .pairs
            .iter_mut()
            .find(|p| p.asset_a == *symbol || p.asset_b == *symbol)
        {
            pair.hedge = HedgeState::PendingHedge;
        }
    }
}

#[async_trait]
impl Strategy for PairsArbitrage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enable(&mut self) {
        self.enabled = true;
    }

    async fn disable(&mut self) {
        self.enabled = false;
    }

    async fn on_market_data(&mut self, data: &MarketData) -> Vec<Signal> {
        if !self.enabled {
            return Vec::new();
        }
        self.update_symbol_price(&data.symbol, data.price)
    }

    async fn on_order_book(&mut self, _book: &OrderBook) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_kline(&mut self, _symbol: &Symbol, _bar: &Kline) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_fill(&mut self, fill: &Fill) -> Vec<Signal> {
        self.trades_executed += 1;
        let _ = fill;
        Vec::new()
    }

    async fn on_timer(&mut self, _now: DateTime<Utc>) -> Vec<Signal> {
        Vec::new()
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats {
            name: self.name.clone(),
            enabled: self.enabled,
            signals_generated: self.signals_generated,
            trades_executed: self.trades_executed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tick(symbol: &Symbol, price: Decimal) -> MarketData {
        MarketData { symbol: symbol.clone(), timestamp: Utc::now(), price, volume: dec!(1), aggressor_side: Side::Buy }
    }

    #[tokio::test]
    async fn diverging_ratio_triggers_two_leg_entry() {
        let a = Symbol::new("ETHBTC_A");
        let b = Symbol::new("ETHBTC_B");
        let mut config = PairsArbitrageConfig::default();
        config.window = 10;
        let mut strategy = PairsArbitrage::new("pairs-1", vec![(a.clone(), b.clone())], config);
        strategy.enable().await;

        let mut signals = Vec::new();
        for i in 0..10u32 {
            signals.extend(strategy.on_market_data(&tick(&a, dec!(100))).await);
            signals.extend(strategy.on_market_data(&tick(&b, Decimal::from(100 + i))).await);
        }
        // ratio drifts from 1.0 toward ~0.917 across the window, widening z
        let extra = strategy.on_market_data(&tick(&b, dec!(150))).await;
        signals.extend(extra);

        assert!(signals.len() >= 2);
        assert_eq!(signals[signals.len() - 2].symbol, a);
        assert_eq!(signals[signals.len() - 1].symbol, b);
    }

    #[tokio::test]
    async fn pending_hedge_suppresses_new_entries() {
        let a = Symbol::new("ETHBTC_A");
        let b = Symbol::new("ETHBTC_B");
        let config = PairsArbitrageConfig { window: 10, ..PairsArbitrageConfig::default() };
        let mut strategy = PairsArbitrage::new("pairs-1", vec![(a.clone(), b.clone())], config);
        strategy.enable().await;
        strategy.mark_pending_hedge(&a);

        let mut signals = Vec::new();
        for i in 0..12u32 {
            signals.extend(strategy.on_market_data(&tick(&a, dec!(100))).await);
            signals.extend(strategy.on_market_data(&tick(&b, Decimal::from(100 + i * 5))).await);
        }
        assert!(signals.is_empty());
    }
}
