//! 1-minute kline ring buffers per symbol, with aligned-window aggregation
//! into higher intervals (5m/15m/1h/4h/1d).

use crate::types::Kline;
use chrono::Duration as ChronoDuration;
use std::collections::{HashMap, VecDeque};
use vektor_instrument::Symbol;

const RING_CAPACITY: usize = 1000;

/// Higher intervals derived from the 1-minute base bar, expressed in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl Interval {
    pub fn minutes(self) -> i64 {
        match self {
            Interval::OneMinute => 1,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
            Interval::OneHour => 60,
            Interval::FourHours => 240,
            Interval::OneDay => 1440,
        }
    }
}

#[derive(Default)]
struct SymbolKlines {
    one_minute: VecDeque<Kline>,
}

/// Holds the 1-minute ring buffer for every subscribed symbol and derives
/// higher-interval bars on demand.
#[derive(Default)]
pub struct KlineAggregator {
    per_symbol: HashMap<Symbol, SymbolKlines>,
}

impl KlineAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a newly closed (or still-open, most-recent) 1-minute bar.
    pub fn push(&mut self, symbol: &Symbol, bar: Kline) {
        let entry = self.per_symbol.entry(symbol.clone()).or_default();
        if let Some(last) = entry.one_minute.back_mut() {
            if last.open_time == bar.open_time {
                *last = bar;
                return;
            }
        }
        entry.one_minute.push_back(bar);
        if entry.one_minute.len() > RING_CAPACITY {
            entry.one_minute.pop_front();
        }
    }

    pub fn one_minute_bars(&self, symbol: &Symbol) -> &[Kline] {
        self.per_symbol
            .get(symbol)
            .map(|s| s.one_minute.as_slices().0)
            .unwrap_or(&[])
    }

    /// Aggregate the held 1-minute bars into the requested interval, aligned to
    /// interval boundaries from the first held bar's `open_time`.
    pub fn aggregate(&self, symbol: &Symbol, interval: Interval) -> Vec<Kline> {
        let Some(symbol_state) = self.per_symbol.get(symbol) else {
            return Vec::new();
        };
        if interval == Interval::OneMinute {
            return symbol_state.one_minute.iter().copied().collect();
        }

        let window = ChronoDuration::minutes(interval.minutes());
        let mut out: Vec<Kline> = Vec::new();
        for bar in &symbol_state.one_minute {
            let bucket_start = align_down(bar.open_time, window);
            match out.last_mut() {
                Some(last) if last.open_time == bucket_start => {
                    last.high = last.high.max(bar.high);
                    last.low = last.low.min(bar.low);
                    last.close = bar.close;
                    last.close_time = bar.close_time;
                    last.volume += bar.volume;
                    last.trades += bar.trades;
                    last.is_closed = bar.close_time >= bucket_start + window;
                }
                _ => out.push(Kline {
                    open_time: bucket_start,
                    close_time: bar.close_time,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                    trades: bar.trades,
                    is_closed: bar.close_time >= bucket_start + window,
                }),
            }
        }
        out
    }
}

fn align_down(
    time: chrono::DateTime<chrono::Utc>,
    window: ChronoDuration,
) -> chrono::DateTime<chrono::Utc> {
    let epoch_minutes = time.timestamp() / 60;
    let window_minutes = window.num_minutes().max(1);
    let bucket = (epoch_minutes / window_minutes) * window_minutes;
    chrono::DateTime::from_timestamp(bucket * 60, 0).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(minute: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Kline {
        let open_time = chrono::Utc.timestamp_opt(minute * 60, 0).unwrap();
        Kline {
            open_time,
            close_time: open_time + ChronoDuration::minutes(1),
            open,
            high,
            low,
            close,
            volume: dec!(1),
            trades: 1,
            is_closed: true,
        }
    }

    #[test]
    fn aggregates_five_one_minute_bars_into_one_five_minute_bar() {
        let mut agg = KlineAggregator::new();
        let symbol = Symbol::new("BTCUSDT");
        agg.push(&symbol, bar(0, dec!(100), dec!(105), dec!(99), dec!(101)));
        agg.push(&symbol, bar(1, dec!(101), dec!(110), dec!(100), dec!(108)));
        agg.push(&symbol, bar(2, dec!(108), dec!(109), dec!(95), dec!(96)));
        agg.push(&symbol, bar(3, dec!(96), dec!(97), dec!(90), dec!(92)));
        agg.push(&symbol, bar(4, dec!(92), dec!(94), dec!(91), dec!(93)));

        let five_min = agg.aggregate(&symbol, Interval::FiveMinutes);
        assert_eq!(five_min.len(), 1);
        let bar = five_min[0];
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.close, dec!(93));
        assert_eq!(bar.high, dec!(110));
        assert_eq!(bar.low, dec!(90));
        assert_eq!(bar.volume, dec!(5));
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let mut agg = KlineAggregator::new();
        let symbol = Symbol::new("ETHUSDT");
        for i in 0..(RING_CAPACITY as i64 + 10) {
            agg.push(&symbol, bar(i, dec!(1), dec!(1), dec!(1), dec!(1)));
        }
        assert_eq!(agg.one_minute_bars(&symbol).len(), RING_CAPACITY);
    }
}
