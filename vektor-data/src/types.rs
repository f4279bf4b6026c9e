//! Normalized market data types produced by the [`crate::ingester::DataIngester`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use vektor_instrument::{Side, Symbol};

/// A single trade print, normalized from `@ticker` or `@aggTrade` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketData {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub aggressor_side: Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A symbol's current order book. Bids are stored descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<OrderBookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<OrderBookLevel> {
        self.asks.first().copied()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Orderbook imbalance over the top `depth` levels: signed, normalized to [-1, 1].
    pub fn imbalance(&self, depth: usize) -> Option<Decimal> {
        let bid_qty: Decimal = self.bids.iter().take(depth).map(|l| l.quantity).sum();
        let ask_qty: Decimal = self.asks.iter().take(depth).map(|l| l.quantity).sum();
        let total = bid_qty + ask_qty;
        if total.is_zero() {
            return None;
        }
        Some((bid_qty - ask_qty) / total)
    }

    /// True when book ordering invariants hold: descending bids, ascending asks,
    /// and the best bid strictly below the best ask.
    pub fn is_well_ordered(&self) -> bool {
        let bids_monotonic = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_monotonic = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let crossed = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b.price >= a.price,
            _ => false,
        };
        bids_monotonic && asks_monotonic && !crossed
    }
}

/// OHLCV candlestick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades: u64,
    pub is_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OrderBook {
        OrderBook {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            bids: bids.into_iter().map(|(price, quantity)| OrderBookLevel { price, quantity }).collect(),
            asks: asks.into_iter().map(|(price, quantity)| OrderBookLevel { price, quantity }).collect(),
            last_update_id: 1,
        }
    }

    #[test]
    fn mid_price_averages_top_of_book() {
        let b = book(vec![(dec!(99), dec!(1))], vec![(dec!(101), dec!(1))]);
        assert_eq!(b.mid_price(), Some(dec!(100)));
    }

    #[test]
    fn imbalance_is_signed_and_normalized() {
        let b = book(vec![(dec!(99), dec!(3))], vec![(dec!(101), dec!(1))]);
        assert_eq!(b.imbalance(5), Some(dec!(0.5)));
    }

    #[test]
    fn well_ordered_detects_crossed_book() {
        let good = book(vec![(dec!(99), dec!(1))], vec![(dec!(101), dec!(1))]);
        assert!(good.is_well_ordered());
        let crossed = book(vec![(dec!(102), dec!(1))], vec![(dec!(101), dec!(1))]);
        assert!(!crossed.is_well_ordered());
    }
}
