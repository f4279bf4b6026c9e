//! Normalizes [`StreamEvent`]s into orderbook/kline/VWAP state and fans the
//! resulting [`IngestedEvent`]s out to the engine.

use crate::klines::{Interval, KlineAggregator};
use crate::orderbook::{ApplyOutcome, OrderBookManager};
use crate::stream::StreamEvent;
use crate::types::{Kline, MarketData, OrderBook};
use crate::vwap::VwapTracker;
use tracing::{instrument, warn};
use vektor_instrument::Symbol;

/// A normalized event handed to downstream subscribers (the engine).
#[derive(Debug, Clone)]
pub enum IngestedEvent {
    Trade(MarketData),
    BookUpdated { symbol: Symbol },
    /// A depth update's `first_update_id` left a gap after the locally held
    /// `last_update_id`; the book is now buffering until a fresh REST
    /// snapshot resyncs it (§4.4).
    BookStale { symbol: Symbol },
    KlineClosed { symbol: Symbol, interval: Interval, bar: Kline },
}

/// Maintains derived market state (order books, kline ring buffers, VWAP) and
/// produces the normalized event stream the engine fans signals from.
pub struct DataIngester {
    books: OrderBookManager,
    klines: KlineAggregator,
    vwap: VwapTracker,
}

impl Default for DataIngester {
    fn default() -> Self {
        Self::new()
    }
}

impl DataIngester {
    pub fn new() -> Self {
        Self {
            books: OrderBookManager::new(),
            klines: KlineAggregator::new(),
            vwap: VwapTracker::default(),
        }
    }

    pub fn load_snapshot(&mut self, book: OrderBook) {
        self.books.load_snapshot(book);
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.book(symbol)
    }

    pub fn vwap(&self, symbol: &Symbol) -> Option<rust_decimal::Decimal> {
        self.vwap.vwap(symbol)
    }

    pub fn klines(&self, symbol: &Symbol, interval: Interval) -> Vec<Kline> {
        self.klines.aggregate(symbol, interval)
    }

    /// Process one raw stream event, returning the normalized events it produced.
    #[instrument(skip(self, event))]
    pub fn handle(&mut self, event: StreamEvent) -> Vec<IngestedEvent> {
        match event {
            StreamEvent::Trade(trade) => {
                self.vwap
                    .record_trade(&trade.symbol, trade.price, trade.volume, trade.timestamp);
                vec![IngestedEvent::Trade(trade)]
            }
            StreamEvent::Depth(update) => {
                let symbol = update.symbol.clone();
                match self.books.apply(update) {
                    ApplyOutcome::Applied => vec![IngestedEvent::BookUpdated { symbol }],
                    ApplyOutcome::Dropped => Vec::new(),
                    ApplyOutcome::WentStale => {
                        warn!(%symbol, "order book went stale, resync required");
                        vec![IngestedEvent::BookStale { symbol }]
                    }
                    ApplyOutcome::Buffered => Vec::new(),
                }
            }
            StreamEvent::Kline { symbol, bar } => {
                self.klines.push(&symbol, bar);
                if bar.is_closed {
                    vec![IngestedEvent::KlineClosed {
                        symbol,
                        interval: Interval::OneMinute,
                        bar,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::DepthUpdate;
    use crate::types::OrderBookLevel;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_event_updates_vwap() {
        let mut ingester = DataIngester::new();
        let symbol = Symbol::new("BTCUSDT");
        let events = ingester.handle(StreamEvent::Trade(MarketData {
            symbol: symbol.clone(),
            timestamp: chrono::Utc::now(),
            price: dec!(100),
            volume: dec!(2),
            aggressor_side: vektor_instrument::Side::Buy,
        }));
        assert_eq!(events.len(), 1);
        assert_eq!(ingester.vwap(&symbol), Some(dec!(100)));
    }

    #[test]
    fn depth_event_without_snapshot_buffers_until_resync() {
        let mut ingester = DataIngester::new();
        let symbol = Symbol::new("ETHUSDT");
        let events = ingester.handle(StreamEvent::Depth(DepthUpdate {
            symbol: symbol.clone(),
            timestamp: chrono::Utc::now(),
            first_update_id: 1,
            last_update_id: 1,
            bids: vec![OrderBookLevel { price: dec!(99), quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: dec!(101), quantity: dec!(1) }],
        }));
        assert!(events.is_empty());
        assert!(ingester.book(&symbol).is_none());
    }
}
