//! Per-symbol order book maintenance with sequence-gap detection.
//!
//! Incremental depth updates carry an update id range `[first_update_id, last_update_id]`.
//! A gap between the locally held `last_update_id` and the next update's
//! `first_update_id` means an update was missed over the wire; the book is
//! marked [`BookStatus::Stale`] and further diffs are buffered until a fresh
//! REST snapshot resyncs it.

use crate::types::{OrderBook, OrderBookLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    Live,
    Stale,
}

/// A single incremental depth update as delivered by the exchange stream.
#[derive(Debug, Clone)]
pub struct DepthUpdate {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

struct BookEntry {
    book: OrderBook,
    status: BookStatus,
    buffered: Vec<DepthUpdate>,
}

/// Maintains live order books for every subscribed symbol.
#[derive(Default)]
pub struct OrderBookManager {
    books: HashMap<Symbol, BookEntry>,
}

pub enum ApplyOutcome {
    Applied,
    Dropped,
    WentStale,
    Buffered,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh REST snapshot, clearing staleness and replaying any
    /// updates buffered while the book was stale whose range starts after the snapshot.
    pub fn load_snapshot(&mut self, book: OrderBook) {
        let symbol = book.symbol.clone();
        let last_update_id = book.last_update_id;
        let entry = self.books.entry(symbol).or_insert_with(|| BookEntry {
            book: book.clone(),
            status: BookStatus::Live,
            buffered: Vec::new(),
        });
        entry.book = book;
        entry.status = BookStatus::Live;
        let buffered = std::mem::take(&mut entry.buffered);
        for update in buffered {
            if update.last_update_id > last_update_id {
                self.apply(update);
            }
        }
    }

    pub fn status(&self, symbol: &Symbol) -> Option<BookStatus> {
        self.books.get(symbol).map(|e| e.status)
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.get(symbol).map(|e| &e.book)
    }

    /// Apply an incremental depth update, detecting sequence gaps per §4.4.
    pub fn apply(&mut self, update: DepthUpdate) -> ApplyOutcome {
        let entry = self
            .books
            .entry(update.symbol.clone())
            .or_insert_with(|| BookEntry {
                book: OrderBook {
                    symbol: update.symbol.clone(),
                    timestamp: update.timestamp,
                    bids: Vec::new(),
                    asks: Vec::new(),
                    last_update_id: 0,
                },
                status: BookStatus::Stale,
                buffered: Vec::new(),
            });

        if matches!(entry.status, BookStatus::Stale) {
            entry.buffered.push(update);
            return ApplyOutcome::Buffered;
        }

        if update.last_update_id <= entry.book.last_update_id {
            return ApplyOutcome::Dropped;
        }

        if update.first_update_id > entry.book.last_update_id + 1 {
            entry.status = BookStatus::Stale;
            entry.buffered.push(update);
            return ApplyOutcome::WentStale;
        }

        merge_levels(&mut entry.book.bids, &update.bids, true);
        merge_levels(&mut entry.book.asks, &update.asks, false);
        entry.book.timestamp = update.timestamp;
        entry.book.last_update_id = update.last_update_id;
        ApplyOutcome::Applied
    }
}

/// Merge incoming levels into the held side, removing zero-quantity levels and
/// keeping the side sorted (`descending` for bids, ascending for asks).
fn merge_levels(side: &mut Vec<OrderBookLevel>, updates: &[OrderBookLevel], descending: bool) {
    for update in updates {
        side.retain(|l| l.price != update.price);
        if update.quantity > Decimal::ZERO {
            side.push(*update);
        }
    }
    if descending {
        side.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        side.sort_by(|a, b| a.price.cmp(&b.price));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc::now()
    }

    fn update(symbol: &str, first: u64, last: u64) -> DepthUpdate {
        DepthUpdate {
            symbol: Symbol::new(symbol),
            timestamp: ts(),
            first_update_id: first,
            last_update_id: last,
            bids: vec![OrderBookLevel { price: dec!(99), quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: dec!(101), quantity: dec!(1) }],
        }
    }

    #[test]
    fn sequence_gap_marks_book_stale_and_buffers_subsequent_updates() {
        let mut mgr = OrderBookManager::new();
        mgr.load_snapshot(OrderBook {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: ts(),
            bids: vec![],
            asks: vec![],
            last_update_id: 100,
        });

        assert!(matches!(mgr.apply(update("BTCUSDT", 101, 101)), ApplyOutcome::Applied));
        assert!(matches!(mgr.apply(update("BTCUSDT", 102, 102)), ApplyOutcome::Applied));
        assert!(matches!(mgr.apply(update("BTCUSDT", 104, 104)), ApplyOutcome::WentStale));
        assert_eq!(mgr.status(&Symbol::new("BTCUSDT")), Some(BookStatus::Stale));

        assert!(matches!(mgr.apply(update("BTCUSDT", 105, 105)), ApplyOutcome::Buffered));
    }

    #[test]
    fn resync_snapshot_clears_staleness() {
        let mut mgr = OrderBookManager::new();
        mgr.load_snapshot(OrderBook {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: ts(),
            bids: vec![],
            asks: vec![],
            last_update_id: 100,
        });
        mgr.apply(update("BTCUSDT", 104, 104));
        assert_eq!(mgr.status(&Symbol::new("BTCUSDT")), Some(BookStatus::Stale));

        mgr.load_snapshot(OrderBook {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: ts(),
            bids: vec![],
            asks: vec![],
            last_update_id: 104,
        });
        assert_eq!(mgr.status(&Symbol::new("BTCUSDT")), Some(BookStatus::Live));
    }

    #[test]
    fn old_update_is_dropped() {
        let mut mgr = OrderBookManager::new();
        mgr.load_snapshot(OrderBook {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: ts(),
            bids: vec![],
            asks: vec![],
            last_update_id: 100,
        });
        assert!(matches!(mgr.apply(update("BTCUSDT", 90, 99)), ApplyOutcome::Dropped));
    }
}
