//! Abstract persistence contract consumed by accounting. Concrete durable
//! implementations (Postgres, object storage, ...) are out of scope for this
//! crate; an in-memory reference implementation is provided for tests and
//! paper-trading mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::Symbol;

/// A recorded fill, kept intentionally narrow: just enough for audit replay
/// and daily P&L rollups. The execution-side `Fill` type carries the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFill {
    pub symbol: Symbol,
    pub trade_id: u64,
    pub side_is_buy: bool,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A snapshot of a position for durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPosition {
    pub symbol: Symbol,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn record_fill(&self, fill: StoredFill) -> Result<(), String>;
    async fn upsert_position(&self, position: StoredPosition) -> Result<(), String>;
    async fn upsert_daily_pnl(&self, date: chrono::NaiveDate, symbol: &Symbol, delta: Decimal) -> Result<(), String>;
    async fn load_recent_fills(&self, limit: usize) -> Result<Vec<StoredFill>, String>;
    async fn load_positions(&self) -> Result<Vec<StoredPosition>, String>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    fills: Vec<StoredFill>,
    positions: HashMap<Symbol, StoredPosition>,
    daily_pnl: HashMap<(chrono::NaiveDate, Symbol), Decimal>,
}

/// Reference `TradeStore` backed by process memory. Used in paper-trading mode
/// and throughout tests; never durable across process restarts.
#[derive(Debug, Default)]
pub struct InMemoryTradeStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn record_fill(&self, fill: StoredFill) -> Result<(), String> {
        self.state.lock().fills.push(fill);
        Ok(())
    }

    async fn upsert_position(&self, position: StoredPosition) -> Result<(), String> {
        self.state.lock().positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    async fn upsert_daily_pnl(
        &self,
        date: chrono::NaiveDate,
        symbol: &Symbol,
        delta: Decimal,
    ) -> Result<(), String> {
        let mut state = self.state.lock();
        *state
            .daily_pnl
            .entry((date, symbol.clone()))
            .or_insert(Decimal::ZERO) += delta;
        Ok(())
    }

    async fn load_recent_fills(&self, limit: usize) -> Result<Vec<StoredFill>, String> {
        let state = self.state.lock();
        let start = state.fills.len().saturating_sub(limit);
        Ok(state.fills[start..].to_vec())
    }

    async fn load_positions(&self) -> Result<Vec<StoredPosition>, String> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn records_and_loads_fills() {
        let store = InMemoryTradeStore::new();
        store
            .record_fill(StoredFill {
                symbol: Symbol::new("BTCUSDT"),
                trade_id: 1,
                side_is_buy: true,
                quantity: dec!(1.0),
                price: dec!(100),
                fee: dec!(0.1),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let fills = store.load_recent_fills(10).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].trade_id, 1);
    }

    #[tokio::test]
    async fn daily_pnl_accumulates_per_symbol_and_date() {
        let store = InMemoryTradeStore::new();
        let date = Utc::now().date_naive();
        let symbol = Symbol::new("ETHUSDT");
        store.upsert_daily_pnl(date, &symbol, dec!(10)).await.unwrap();
        store.upsert_daily_pnl(date, &symbol, dec!(-3)).await.unwrap();
        let state = store.state.lock();
        assert_eq!(state.daily_pnl[&(date, symbol)], dec!(7));
    }
}
