//! Shadow position book the risk manager maintains independently from
//! accounting, purely to gate pre-trade checks (§5: RiskManager.shadow_positions
//! is private to the risk task).

use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::{PositionSide, Side, Symbol};

#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowPosition {
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
}

impl ShadowPosition {
    pub fn side(&self) -> PositionSide {
        PositionSide::from_signed_size(self.size)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark_price - self.entry_price) * self.size
    }
}

/// Tracks a shadow position per symbol, updated on every fill the risk
/// manager observes and on every market data tick (for mark price refresh).
#[derive(Debug, Default)]
pub struct ShadowPositionTracker {
    positions: HashMap<Symbol, ShadowPosition>,
}

impl ShadowPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self, symbol: &Symbol) -> Decimal {
        self.positions.get(symbol).map(|p| p.size).unwrap_or(Decimal::ZERO)
    }

    pub fn position(&self, symbol: &Symbol) -> Option<ShadowPosition> {
        self.positions.get(symbol).copied()
    }

    /// The resulting position size if `side`/`quantity` were applied, without mutating state.
    pub fn projected_size(&self, symbol: &Symbol, side: Side, quantity: Decimal) -> Decimal {
        self.size(symbol) + Decimal::from(side.sign() as i64) * quantity
    }

    /// Weighted-average entry on same-direction adds; entry price is left
    /// untouched on reductions and replaced with the fill price on reversals,
    /// matching the closed-form position math used by accounting.
    pub fn apply_fill(&mut self, symbol: &Symbol, side: Side, quantity: Decimal, price: Decimal) {
        let entry = self.positions.entry(symbol.clone()).or_default();
        let signed_delta = Decimal::from(side.sign() as i64) * quantity;
        let new_size = entry.size + signed_delta;
        let same_direction = entry.size == Decimal::ZERO || entry.size.signum() == signed_delta.signum();

        entry.entry_price = if new_size.is_zero() {
            entry.entry_price
        } else if same_direction {
            (entry.entry_price * entry.size + price * signed_delta) / new_size
        } else if new_size.signum() != entry.size.signum() {
            // Reversal: the excess beyond closing the old position opens a fresh one at `price`.
            price
        } else {
            entry.entry_price
        };
        entry.size = new_size;
        entry.mark_price = price;
    }

    pub fn update_mark_price(&mut self, symbol: &Symbol, price: Decimal) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.mark_price = price;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn apply_fill_opens_and_averages_position() {
        let mut tracker = ShadowPositionTracker::new();
        let symbol = Symbol::new("BTCUSDT");
        tracker.apply_fill(&symbol, Side::Buy, dec!(1.0), dec!(100));
        assert_eq!(tracker.size(&symbol), dec!(1.0));
        tracker.apply_fill(&symbol, Side::Buy, dec!(1.0), dec!(110));
        assert_eq!(tracker.size(&symbol), dec!(2.0));
        assert_eq!(tracker.position(&symbol).unwrap().entry_price, dec!(105));
    }

    #[test]
    fn projected_size_does_not_mutate() {
        let mut tracker = ShadowPositionTracker::new();
        let symbol = Symbol::new("BTCUSDT");
        tracker.apply_fill(&symbol, Side::Buy, dec!(1.0), dec!(100));
        assert_eq!(tracker.projected_size(&symbol, Side::Buy, dec!(1.0)), dec!(2.0));
        assert_eq!(tracker.size(&symbol), dec!(1.0));
    }
}
