//! Single-writer position and realized P&L accounting (§4.8). `Accounting`
//! owns the position book exclusively; every other component holds read-only
//! snapshots.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use vektor_execution::Fill;
use vektor_instrument::{Asset, PositionSide, Side, Symbol};
use vektor_integration::trade_store::{StoredFill, StoredPosition};
use vektor_integration::TradeStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Position {
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn side(&self) -> PositionSide {
        PositionSide::from_signed_size(self.size)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark_price - self.entry_price) * self.size
    }
}

/// Applies the §4.8 closed-form position update for a single fill leg and
/// returns the realized P&L delta it produced (zero unless the fill reduces
/// or reverses an existing position). Shared between the live `Accounting`
/// writer and the backtester's offline position book so both use identical
/// math.
pub fn apply_closed_form(position: &mut Position, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
    let signed_delta = Decimal::from(side.sign() as i64) * quantity;
    let same_direction = position.size.is_zero() || position.size.signum() == signed_delta.signum();

    let realized = if same_direction {
        let new_size = position.size + signed_delta;
        position.entry_price = if new_size.is_zero() {
            position.entry_price
        } else {
            (position.entry_price * position.size + price * signed_delta) / new_size
        };
        position.size = new_size;
        Decimal::ZERO
    } else {
        let reduction = position.size.abs().min(signed_delta.abs());
        let pnl = (price - position.entry_price) * reduction * position.size.signum();
        let new_size = position.size + signed_delta;
        if new_size.is_zero() || new_size.signum() == position.size.signum() {
            position.size = new_size;
        } else {
            // Reversal: the excess beyond closing the old position opens a
            // fresh one at the fill price.
            position.size = new_size;
            position.entry_price = price;
        }
        position.realized_pnl += pnl;
        pnl
    };
    position.mark_price = price;
    realized
}

/// Authoritative position and daily-P&L book. Writes are sequenced through
/// `&self` methods that take the internal lock, matching the single-writer
/// contract in §5; readers get a cloned snapshot.
pub struct Accounting {
    positions: RwLock<HashMap<Symbol, Position>>,
    daily_pnl: Mutex<HashMap<(NaiveDate, Symbol), Decimal>>,
    fees_by_asset: Mutex<HashMap<Asset, Decimal>>,
    store: Arc<dyn TradeStore>,
}

impl std::fmt::Debug for Accounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounting")
            .field("symbols", &self.positions.read().len())
            .finish_non_exhaustive()
    }
}

impl Accounting {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            daily_pnl: Mutex::new(HashMap::new()),
            fees_by_asset: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.read().get(symbol).copied()
    }

    pub fn positions(&self) -> Vec<(Symbol, Position)> {
        self.positions.read().iter().map(|(s, p)| (s.clone(), *p)).collect()
    }

    pub fn update_mark_price(&self, symbol: &Symbol, price: Decimal) {
        if let Some(position) = self.positions.write().get_mut(symbol) {
            position.mark_price = price;
        }
    }

    pub fn daily_pnl(&self, date: NaiveDate, symbol: &Symbol) -> Decimal {
        *self.daily_pnl.lock().get(&(date, symbol.clone())).unwrap_or(&Decimal::ZERO)
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.read().values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_fees(&self, asset: &Asset) -> Decimal {
        *self.fees_by_asset.lock().get(asset).unwrap_or(&Decimal::ZERO)
    }

    /// Applies one fill's position/P&L effect, rolls it into the daily
    /// bucket for `fill.timestamp`'s session-local date, and persists the
    /// updated position and fill through the trade store. Returns the
    /// realized P&L delta.
    #[instrument(skip(self, fill), fields(symbol = %fill.symbol))]
    pub async fn record_fill(&self, fill: &Fill) -> Decimal {
        let (realized, snapshot) = {
            let mut positions = self.positions.write();
            let position = positions.entry(fill.symbol.clone()).or_default();
            let realized = apply_closed_form(position, fill.side, fill.quantity, fill.price);
            (realized, *position)
        };

        if !realized.is_zero() {
            let date = fill.timestamp.date_naive();
            *self
                .daily_pnl
                .lock()
                .entry((date, fill.symbol.clone()))
                .or_insert(Decimal::ZERO) += realized;
        }
        if !fill.fee.is_zero() {
            *self.fees_by_asset.lock().entry(fill.fee_asset.clone()).or_insert(Decimal::ZERO) += fill.fee;
        }

        let _ = self
            .store
            .record_fill(StoredFill {
                symbol: fill.symbol.clone(),
                trade_id: fill.trade_id,
                side_is_buy: fill.side == Side::Buy,
                quantity: fill.quantity,
                price: fill.price,
                fee: fill.fee,
                timestamp: fill.timestamp,
            })
            .await;
        let _ = self
            .store
            .upsert_position(StoredPosition {
                symbol: fill.symbol.clone(),
                size: snapshot.size,
                avg_entry_price: snapshot.entry_price,
                realized_pnl: snapshot.realized_pnl,
            })
            .await;
        if !realized.is_zero() {
            let _ = self
                .store
                .upsert_daily_pnl(fill.timestamp.date_naive(), &fill.symbol, realized)
                .await;
        }

        realized
    }

    /// Bounded flush hook for the shutdown protocol (§4.9 step 5). Every
    /// write above is already durable by return per the `TradeStore`
    /// contract, so there is no buffered state to drain; this exists as the
    /// named step the engine's shutdown sequence can log and time-box.
    pub async fn flush(&self) {}

    pub async fn restore_from_store(&self) -> Result<(), String> {
        let positions = self.store.load_positions().await?;
        let mut book = self.positions.write();
        for stored in positions {
            book.insert(
                stored.symbol,
                Position {
                    size: stored.size,
                    entry_price: stored.avg_entry_price,
                    mark_price: stored.avg_entry_price,
                    realized_pnl: stored.realized_pnl,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use vektor_execution::ClientOrderId;
    use vektor_integration::InMemoryTradeStore;

    fn fill(symbol: &Symbol, side: Side, quantity: Decimal, price: Decimal, at: DateTime<Utc>) -> Fill {
        Fill {
            symbol: symbol.clone(),
            client_id: ClientOrderId::generate("test", 1, 1),
            trade_id: 1,
            side,
            quantity,
            price,
            fee: Decimal::ZERO,
            fee_asset: Asset::from("USDT"),
            timestamp: at,
            is_maker: false,
        }
    }

    #[tokio::test]
    async fn opening_then_closing_a_long_realizes_the_correct_pnl() {
        let accounting = Accounting::new(Arc::new(InMemoryTradeStore::new()));
        let symbol = Symbol::new("BTCUSDT");
        let now = Utc::now();

        let opening = accounting.record_fill(&fill(&symbol, Side::Buy, dec!(1.0), dec!(100), now)).await;
        assert_eq!(opening, Decimal::ZERO);
        assert_eq!(accounting.position(&symbol).unwrap().size, dec!(1.0));

        let closing = accounting.record_fill(&fill(&symbol, Side::Sell, dec!(1.0), dec!(110), now)).await;
        assert_eq!(closing, dec!(10));
        assert_eq!(accounting.position(&symbol).unwrap().size, Decimal::ZERO);
        assert_eq!(accounting.total_realized_pnl(), dec!(10));
    }

    #[tokio::test]
    async fn reversal_opens_a_fresh_position_at_the_fill_price() {
        let accounting = Accounting::new(Arc::new(InMemoryTradeStore::new()));
        let symbol = Symbol::new("ETHUSDT");
        let now = Utc::now();

        accounting.record_fill(&fill(&symbol, Side::Buy, dec!(1.0), dec!(100), now)).await;
        let realized = accounting.record_fill(&fill(&symbol, Side::Sell, dec!(3.0), dec!(90), now)).await;

        assert_eq!(realized, dec!(-10));
        let position = accounting.position(&symbol).unwrap();
        assert_eq!(position.size, dec!(-2.0));
        assert_eq!(position.entry_price, dec!(90));
    }

    #[tokio::test]
    async fn daily_pnl_rolls_up_only_on_realizing_fills() {
        let accounting = Accounting::new(Arc::new(InMemoryTradeStore::new()));
        let symbol = Symbol::new("BTCUSDT");
        let now = Utc::now();

        accounting.record_fill(&fill(&symbol, Side::Buy, dec!(1.0), dec!(100), now)).await;
        assert_eq!(accounting.daily_pnl(now.date_naive(), &symbol), Decimal::ZERO);

        accounting.record_fill(&fill(&symbol, Side::Sell, dec!(1.0), dec!(105), now)).await;
        assert_eq!(accounting.daily_pnl(now.date_naive(), &symbol), dec!(5));
    }
}
