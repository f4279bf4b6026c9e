//! Fill simulation: slippage and commission applied to a bar's synthetic
//! price, and the seeded order-latency model that delays when a pending
//! order becomes eligible to execute.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use vektor_execution::{OrderType, TimeInForce};
use vektor_instrument::{Side, Symbol};

/// A strategy-emitted order sitting in the replay's latency queue.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderType,
    pub price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub ready_at: chrono::DateTime<chrono::Utc>,
}

/// Samples non-negative order latency from a normal distribution, matching
/// the §4.10 `l ~ max(0, Normal(mean, std))` model. A `StdRng` seeded once at
/// backtest start keeps every sample — and therefore the whole replay —
/// reproducible.
pub struct LatencyModel {
    normal: Normal<f64>,
    rng: StdRng,
}

impl std::fmt::Debug for LatencyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyModel").finish_non_exhaustive()
    }
}

impl LatencyModel {
    pub fn new(mean_ms: f64, std_ms: f64, seed: u64) -> Self {
        let normal = Normal::new(mean_ms, std_ms.max(0.001))
            .expect("std_ms must be finite and positive for a valid normal distribution");
        Self { normal, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn sample(&mut self) -> Duration {
        let millis = self.normal.sample(&mut self.rng).max(0.0);
        Duration::from_secs_f64(millis / 1000.0)
    }
}

/// Applies slippage and commission to a simulated fill; §4.10's MARKET and
/// LIMIT fill rules.
#[derive(Debug, Clone, Copy)]
pub struct MarketSimulator {
    pub commission_bps: Decimal,
    pub slippage_bps: Decimal,
}

impl MarketSimulator {
    /// MARKET fill: `currentPrice * (1 +/- slippageBps)`, buyer pays more,
    /// seller receives less. Returns `(fill_price, fee)`.
    pub fn execute_market(&self, side: Side, quantity: Decimal, current_price: Decimal) -> (Decimal, Decimal) {
        let sign = Decimal::from(side.sign() as i64);
        let fill_price = current_price * (Decimal::ONE + sign * self.slippage_bps);
        let fee = fill_price * quantity * self.commission_bps;
        (fill_price, fee)
    }

    /// LIMIT fill at the resting order price; no slippage applied since the
    /// order already specified its price.
    pub fn execute_limit(&self, quantity: Decimal, order_price: Decimal) -> (Decimal, Decimal) {
        let fee = order_price * quantity * self.commission_bps;
        (order_price, fee)
    }

    /// Whether a LIMIT order crosses the current price per §4.10: a BUY
    /// fills once `currentPrice <= orderPrice`, a SELL once
    /// `currentPrice >= orderPrice`.
    pub fn limit_crosses(side: Side, order_price: Decimal, current_price: Decimal) -> bool {
        match side {
            Side::Buy => current_price <= order_price,
            Side::Sell => current_price >= order_price,
        }
    }
}

/// Converts a `Decimal` notional into `f64` for statistics math that needs
/// floating point (Sharpe, drawdown percentages); lossy but only used for
/// reporting, never for money accounting.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn market_buy_fills_above_current_price() {
        let sim = MarketSimulator { commission_bps: dec!(0.001), slippage_bps: dec!(0.0005) };
        let (price, fee) = sim.execute_market(Side::Buy, dec!(1), dec!(100));
        assert!(price > dec!(100));
        assert!(fee > Decimal::ZERO);
    }

    #[test]
    fn market_sell_fills_below_current_price() {
        let sim = MarketSimulator { commission_bps: dec!(0.001), slippage_bps: dec!(0.0005) };
        let (price, _) = sim.execute_market(Side::Sell, dec!(1), dec!(100));
        assert!(price < dec!(100));
    }

    #[test]
    fn limit_buy_crosses_only_when_price_at_or_below_order() {
        assert!(MarketSimulator::limit_crosses(Side::Buy, dec!(100), dec!(99)));
        assert!(MarketSimulator::limit_crosses(Side::Buy, dec!(100), dec!(100)));
        assert!(!MarketSimulator::limit_crosses(Side::Buy, dec!(100), dec!(101)));
    }

    #[test]
    fn latency_samples_are_never_negative() {
        let mut model = LatencyModel::new(5.0, 50.0, 1);
        for _ in 0..100 {
            assert!(model.sample() >= Duration::ZERO);
        }
    }

    #[test]
    fn same_seed_produces_identical_latency_sequence() {
        let mut a = LatencyModel::new(50.0, 15.0, 42);
        let mut b = LatencyModel::new(50.0, 15.0, 42);
        let seq_a: Vec<Duration> = (0..20).map(|_| a.sample()).collect();
        let seq_b: Vec<Duration> = (0..20).map(|_| b.sample()).collect();
        assert_eq!(seq_a, seq_b);
    }
}
