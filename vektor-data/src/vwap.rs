//! Per-symbol volume-weighted average price, reset at a configurable session boundary.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::Symbol;

struct Accumulator {
    price_volume_sum: Decimal,
    volume_sum: Decimal,
    session_start: DateTime<Utc>,
}

/// Tracks VWAP per symbol, resetting accumulators whenever a trade crosses
/// the configured session boundary (default UTC midnight).
pub struct VwapTracker {
    session_boundary: NaiveTime,
    per_symbol: HashMap<Symbol, Accumulator>,
}

impl Default for VwapTracker {
    fn default() -> Self {
        Self::new(NaiveTime::from_hms_opt(0, 0, 0).expect("valid midnight"))
    }
}

impl VwapTracker {
    pub fn new(session_boundary: NaiveTime) -> Self {
        Self {
            session_boundary,
            per_symbol: HashMap::new(),
        }
    }

    fn session_start_for(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let today_boundary = at.date_naive().and_time(self.session_boundary).and_utc();
        if at >= today_boundary {
            today_boundary
        } else {
            (at.date_naive() - chrono::Duration::days(1))
                .and_time(self.session_boundary)
                .and_utc()
        }
    }

    pub fn record_trade(&mut self, symbol: &Symbol, price: Decimal, volume: Decimal, at: DateTime<Utc>) {
        let session_start = self.session_start_for(at);
        let acc = self
            .per_symbol
            .entry(symbol.clone())
            .or_insert_with(|| Accumulator {
                price_volume_sum: Decimal::ZERO,
                volume_sum: Decimal::ZERO,
                session_start,
            });
        if acc.session_start != session_start {
            acc.price_volume_sum = Decimal::ZERO;
            acc.volume_sum = Decimal::ZERO;
            acc.session_start = session_start;
        }
        acc.price_volume_sum += price * volume;
        acc.volume_sum += volume;
    }

    pub fn vwap(&self, symbol: &Symbol) -> Option<Decimal> {
        let acc = self.per_symbol.get(symbol)?;
        if acc.volume_sum.is_zero() {
            None
        } else {
            Some(acc.price_volume_sum / acc.volume_sum)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn vwap_is_volume_weighted() {
        let mut tracker = VwapTracker::default();
        let symbol = Symbol::new("BTCUSDT");
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        tracker.record_trade(&symbol, dec!(100), dec!(1), t);
        tracker.record_trade(&symbol, dec!(110), dec!(3), t);
        // (100*1 + 110*3)/4 = 107.5
        assert_eq!(tracker.vwap(&symbol), Some(dec!(107.5)));
    }

    #[test]
    fn session_boundary_resets_accumulator() {
        let mut tracker = VwapTracker::default();
        let symbol = Symbol::new("BTCUSDT");
        let day1 = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 1, 2, 1, 0, 0).unwrap();
        tracker.record_trade(&symbol, dec!(100), dec!(1), day1);
        tracker.record_trade(&symbol, dec!(200), dec!(1), day2);
        assert_eq!(tracker.vwap(&symbol), Some(dec!(200)));
    }
}
