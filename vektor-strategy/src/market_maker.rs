//! Continuous two-sided quoting with volatility-scaled spread and inventory
//! skew; requotes on a timer and immediately after every fill.

use crate::config::MarketMakerConfig;
use crate::signal::{Signal, SignalMetadata};
use crate::strategy::{Strategy, StrategyStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_data::{Kline, MarketData, OrderBook};
use vektor_execution::{Fill, OrderType, TimeInForce};
use vektor_instrument::{Side, Symbol};
use vektor_risk::ShadowPositionTracker;
use vektor_ta::RealizedVolatility;

const MIN_SPREAD_BP: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

#[derive(Debug, Clone)]
struct SymbolState {
    volatility: RealizedVolatility,
    last_volatility: Decimal,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct MarketMaker {
    name: String,
    symbols: Vec<Symbol>,
    config: MarketMakerConfig,
    state: HashMap<Symbol, SymbolState>,
    positions: ShadowPositionTracker,
    enabled: bool,
    signals_generated: u64,
    trades_executed: u64,
}

impl MarketMaker {
    pub fn new(name: impl Into<String>, symbols: Vec<Symbol>, config: MarketMakerConfig) -> Self {
        let state = symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    SymbolState {
                        volatility: RealizedVolatility::new(config.volatility_window),
                        last_volatility: Decimal::ZERO,
                        last_refresh: None,
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

    fn fair_price(&self, symbol: &Symbol, mid: Decimal) -> Decimal {
        let inventory = self.positions.size(symbol);
        mid + self.config.inventory_bias * inventory
    }

    fn spread(&self, symbol: &Symbol, fair_price: Decimal) -> Decimal {
        let volatility = self.state.get(symbol).map(|s| s.last_volatility).unwrap_or(Decimal::ZERO);
        let inventory = self.positions.size(symbol);
        let base_spread = fair_price * self.config.spread_pct;
        let volatility_adjustment = Decimal::ONE + volatility * Decimal::TWO;
        let inventory_adjustment = Decimal::ONE
            + inventory.abs() / self.config.max_inventory * Decimal::new(5, 1);
        let spread = base_spread * volatility_adjustment * inventory_adjustment;
        let floor = fair_price * MIN_SPREAD_BP;
        spread.max(floor)
    }

    fn requote(&mut self, symbol: &Symbol, book: &OrderBook, now: DateTime<Utc>) -> Vec<Signal> {
        let Some(mid) = book.mid_price() else { return Vec::new() };
        let fair_price = self.fair_price(symbol, mid);
        let spread = self.spread(symbol, fair_price);
        let volatility = self.state.get(symbol).map(|s| s.last_volatility).unwrap_or(Decimal::ZERO);
        let inventory = self.positions.size(symbol);

        let quote_bid = fair_price - spread / Decimal::TWO;
        let quote_ask = fair_price + spread / Decimal::TWO;

        let mut signals = Vec::new();

        if quote_bid > Decimal::ZERO {
            let max_size = self.config.max_inventory - inventory;
            let size = self.config.order_size.min(max_size);
            if size > Decimal::ZERO {
                signals.push(Signal {
                    symbol: symbol.clone(),
                    side: Side::Buy,
                    quantity: size,
                    price: Some(quote_bid),
                    kind: OrderType::Limit,
                    time_in_force: TimeInForce::Gtc,
                    stop_price: None,
                    strategy_name: self.name.clone(),
                    confidence: Decimal::new(9, 1),
                    metadata: SignalMetadata::MarketMaker { fair_price, volatility, inventory },
                    emitted_at: now,
                });
            }
        }

        if quote_ask > Decimal::ZERO {
            let max_size = self.config.max_inventory + inventory;
            let size = self.config.order_size.min(max_size);
            if size > Decimal::ZERO {
                signals.push(Signal {
                    symbol: symbol.clone(),
                    side: Side::Sell,
                    quantity: size,
                    price: Some(quote_ask),
                    kind: OrderType::Limit,
                    time_in_force: TimeInForce::Gtc,
                    stop_price: None,
                    strategy_name: self.name.clone(),
                    confidence: Decimal::new(9, 1),
                    metadata: SignalMetadata::MarketMaker { fair_price, volatility, inventory },
                    emitted_at: now,
                });
            }
        }

        self.signals_generated += signals.len() as u64;
        if let Some(entry) = self.state.get_mut(symbol) {
            entry.last_refresh = Some(now);
        }
        signals
    }

    fn due_for_refresh(&self, symbol: &Symbol, now: DateTime<Utc>) -> bool {
        let refresh_interval = chrono::Duration::seconds(self.config.refresh_interval_secs as i64);
        match self.state.get(symbol).and_then(|s| s.last_refresh) {
            Some(last) => now - last >= refresh_interval,
            None => true,
        }
    }
}

#[async_trait]
impl Strategy for MarketMaker {
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
        if let Some(entry) = self.state.get_mut(&data.symbol) {
            if let Some(vol) = entry.volatility.update(data.price) {
                entry.last_volatility = vol;
            }
        }
        Vec::new()
    }

    async fn on_order_book(&mut self, book: &OrderBook) -> Vec<Signal> {
        if !self.enabled {
            return Vec::new();
        }
        let now = Utc::now();
        if self.due_for_refresh(&book.symbol, now) {
            self.requote(&book.symbol, book, now)
        } else {
            Vec::new()
        }
    }

    async fn on_kline(&mut self, _symbol: &Symbol, _bar: &Kline) -> Vec<Signal> {
        Vec::new()
    }

    async fn on_fill(&mut self, fill: &Fill) -> Vec<Signal> {
        self.positions.apply_fill(&fill.symbol, fill.side, fill.quantity, fill.price);
        self.trades_executed += 1;
        // The caller supplies the latest book on the subsequent on_order_book
        // tick; clearing last_refresh forces an immediate requote then.
        if let Some(entry) = self.state.get_mut(&fill.symbol) {
            entry.last_refresh = None;
        }
        Vec::new()
    }

    async fn on_timer(&mut self, _now: DateTime<Utc>) -> Vec<Signal> {
        // Requoting needs the current book; `due_for_refresh` is re-checked
        // on the next `on_order_book` tick, which arrives continuously from
        // the live stream, so the timer itself has nothing to emit.
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
    use rust_decimal_macros::dec;
    use vektor_data::OrderBookLevel;

    fn book(symbol: &Symbol) -> OrderBook {
        OrderBook {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
            bids: vec![OrderBookLevel { price: dec!(99), quantity: dec!(10) }],
            asks: vec![OrderBookLevel { price: dec!(101), quantity: dec!(10) }],
            last_update_id: 1,
        }
    }

    #[tokio::test]
    async fn quotes_both_sides_around_fair_price_when_flat() {
        let symbol = Symbol::new("BTCUSDT");
        let mut mm = MarketMaker::new("mm-1", vec![symbol.clone()], MarketMakerConfig::default());
        mm.enable().await;

        let signals = mm.on_order_book(&book(&symbol)).await;
        assert_eq!(signals.len(), 2);
        let buy = signals.iter().find(|s| s.side == Side::Buy).unwrap();
        let sell = signals.iter().find(|s| s.side == Side::Sell).unwrap();
        assert!(buy.price.unwrap() < dec!(100));
        assert!(sell.price.unwrap() > dec!(100));
    }

    #[tokio::test]
    async fn spread_widens_with_accumulated_inventory() {
        let symbol = Symbol::new("BTCUSDT");
        let mut mm = MarketMaker::new("mm-1", vec![symbol.clone()], MarketMakerConfig::default());
        mm.enable().await;

        let flat_spread = mm.spread(&symbol, dec!(100));

        let fill = Fill {
            symbol: symbol.clone(),
            client_id: vektor_execution::ClientOrderId::generate("mm-1", 1, 1),
            trade_id: 1,
            side: Side::Buy,
            quantity: dec!(500),
            price: dec!(100),
            fee: dec!(0),
            fee_asset: vektor_instrument::Asset::from("USDT"),
            timestamp: Utc::now(),
            is_maker: true,
        };
        mm.on_fill(&fill).await;

        let loaded_spread = mm.spread(&symbol, dec!(100));
        assert!(loaded_spread > flat_spread);
    }

    #[tokio::test]
    async fn refresh_interval_throttles_requotes() {
        let symbol = Symbol::new("BTCUSDT");
        let mut mm = MarketMaker::new("mm-1", vec![symbol.clone()], MarketMakerConfig::default());
        mm.enable().await;

        let first = mm.on_order_book(&book(&symbol)).await;
        assert_eq!(first.len(), 2);
        let second = mm.on_order_book(&book(&symbol)).await;
        assert!(second.is_empty());
    }
}
