//! Orderbook-imbalance scalper: enters on OBI + EMA-crossover confirmation,
//! manages open positions on a stop-loss / take-profit ladder.

use crate::config::ScalperConfig;
use crate::signal::{ScalperReason, Signal, SignalMetadata};
use crate::strategy::{Strategy, StrategyStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_data::{Kline, MarketData, OrderBook};
use vektor_execution::{Fill, OrderType, TimeInForce};
use vektor_instrument::{Side, Symbol};
use vektor_risk::ShadowPositionTracker;
use vektor_ta::ExponentialMovingAverage;

const OBI_DEPTH: usize = 5;
/// Mock equity used for position sizing until account balances are wired
/// through from `Accounting`; matches the fallback the strategy falls back
/// to when no live balance is available.
const FALLBACK_EQUITY: Decimal = Decimal::from_parts(10000, 0, 0, false, 0);

#[derive(Debug, Clone)]
struct SymbolState {
    ema_short: ExponentialMovingAverage,
    ema_long: ExponentialMovingAverage,
    last_obi: Decimal,
    last_price: Option<Decimal>,
}

#[derive(Debug)]
pub struct Scalper {
    name: String,
    symbols: Vec<Symbol>,
    config: ScalperConfig,
    state: HashMap<Symbol, SymbolState>,
    positions: ShadowPositionTracker,
    enabled: bool,
    signals_generated: u64,
    trades_executed: u64,
}

impl Scalper {
    pub fn new(name: impl Into<String>, symbols: Vec<Symbol>, config: ScalperConfig) -> Self {
        let state = symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    SymbolState {
                        ema_short: ExponentialMovingAverage::new(config.ema_short),
                        ema_long: ExponentialMovingAverage::new(config.ema_long),
                        last_obi: Decimal::ZERO,
                        last_price: None,
                    },
                )
            })
            .collect();
        Self {
            name: name.into(),
            symbols,
            config,
            state,
            positions: ShadowPositionTracker::new(),
            enabled: false,
            signals_generated: 0,
            trades_executed: 0,
        }
    }

    fn position_size(&self, price: Decimal) -> Decimal {
        let risk_amount = FALLBACK_EQUITY * self.config.risk_fraction;
        let stop_amount = price * self.config.stop_distance;
        if stop_amount.is_zero() {
            return Decimal::ZERO;
        }
        let size = risk_amount / stop_amount;
        let max_size = FALLBACK_EQUITY * Decimal::new(1, 1) / price;
        size.min(max_size)
    }

    fn check_entry(&mut self, symbol: &Symbol, price: Decimal) -> Vec<Signal> {
        let Some(entry) = self.state.get(symbol) else { return Vec::new() };
        let (Some(ema_short), Some(ema_long)) = (entry.ema_short.value(), entry.ema_long.value()) else {
            return Vec::new();
        };
        let obi = entry.last_obi;
        let current_position = self.positions.size(symbol);

        let side = if obi > self.config.obi_threshold
            && ema_short > ema_long
            && current_position <= Decimal::ZERO
        {
            Side::Buy
        } else if obi < -self.config.obi_threshold
            && ema_short < ema_long
            && current_position >= Decimal::ZERO
        {
            Side::Sell
        } else {
            return Vec::new();
        };

        let quantity = self.position_size(price);
        if quantity <= Decimal::ZERO {
            return Vec::new();
        }

        let slip = Decimal::ONE + Decimal::from(side.opposite().sign() as i64) * self.config.slip_offset;
        let entry_price = price * slip;

        self.signals_generated += 1;
        vec![Signal {
            symbol: symbol.clone(),
            side,
            quantity,
            price: Some(entry_price),
            kind: OrderType::Limit,
            time_in_force: TimeInForce::Ioc,
            stop_price: None,
            strategy_name: self.name.clone(),
            confidence: Decimal::new(8, 1),
            metadata: SignalMetadata::Scalper { obi, ema_short, ema_long, reason: ScalperReason::Entry },
            emitted_at: Utc::now(),
        }]
    }

    fn manage_open_position(&self, symbol: &Symbol, current_price: Decimal) -> Option<Signal> {
        let position = self.positions.position(symbol)?;
        if position.size.is_zero() {
            return None;
        }
        let pnl_pct = if position.size > Decimal::ZERO {
            (current_price - position.entry_price) / position.entry_price
        } else {
            (position.entry_price - current_price) / position.entry_price
        };

        let reason = if pnl_pct <= -self.config.stop_distance {
            ScalperReason::StopLoss
        } else if pnl_pct >= self.config.stop_distance * Decimal::TWO {
            ScalperReason::TakeProfit
        } else {
            return None;
        };

        let (side, quantity) = if position.size > Decimal::ZERO {
            (Side::Sell, position.size)
        } else {
            (Side::Buy, -position.size)
        };

        Some(Signal {
            symbol: symbol.clone(),
            side,
            quantity,
            price: None,
            kind: OrderType::Market,
            time_in_force: TimeInForce::Ioc,
            stop_price: None,
            strategy_name: self.name.clone(),
            confidence: Decimal::ONE,
            metadata: SignalMetadata::Scalper {
                obi: Decimal::ZERO,
                ema_short: Decimal::ZERO,
                ema_long: Decimal::ZERO,
                reason,
            },
            emitted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Strategy for Scalper {
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
        let Some(entry) = self.state.get_mut(&data.symbol) else { return Vec::new() };
        entry.ema_short.update(data.price);
        entry.ema_long.update(data.price);
        entry.last_price = Some(data.price);
        self.check_entry(&data.symbol, data.price)
    }

    async fn on_order_book(&mut self, book: &OrderBook) -> Vec<Signal> {
        if !self.enabled {
            return Vec::new();
        }
        let Some(obi) = book.imbalance(OBI_DEPTH) else { return Vec::new() };
        let price = match self.state.get_mut(&book.symbol) {
            Some(entry) => {
                entry.last_obi = obi;
                entry.last_price
            }
            None => None,
        };
        match price {
            Some(price) => self.check_entry(&book.symbol, price),
            None => Vec::new(),
        }
    }

    async fn on_kline(&mut self, _symbol: &Symbol, _bar: &Kline) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_fill(&mut self, fill: &Fill) -> Vec<Signal> {
        self.positions.apply_fill(&fill.symbol, fill.side, fill.quantity, fill.price);
        self.trades_executed += 1;
        Vec::new()
    }

    async fn on_timer(&mut self, _now: DateTime<Utc>) -> Vec<Signal> {
        if !self.enabled {
            return Vec::new();
        }
        self.symbols
            .iter()
            .filter_map(|symbol| {
                let price = self.state.get(symbol)?.last_price?;
                self.manage_open_position(symbol, price)
            })
            .collect()
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
