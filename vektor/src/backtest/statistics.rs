//! Backtest performance statistics: running max drawdown, daily-return
//! Sharpe, and win-rate/profit-factor trade outcome tallies. Grounded on the
//! teacher's `statistic::metric::{sharpe, drawdown::max}` and
//! `statistic::summary::pnl` modules, generalized from the teacher's typed
//! equity-curve events to this engine's plain portfolio-value series.

use rust_decimal::Decimal;

/// Tracks peak portfolio value and the running max drawdown
/// `(peak - current) / peak`.
#[derive(Debug, Clone, Copy)]
pub struct MaxDrawdownTracker {
    peak: Decimal,
    max_drawdown: Decimal,
}

impl MaxDrawdownTracker {
    pub fn new(initial_value: Decimal) -> Self {
        Self { peak: initial_value, max_drawdown: Decimal::ZERO }
    }

    pub fn update(&mut self, current_value: Decimal) {
        if current_value > self.peak {
            self.peak = current_value;
        }
        if self.peak > Decimal::ZERO {
            let drawdown = (self.peak - current_value) / self.peak;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }
}

/// Accumulates per-day portfolio returns and derives the annualization-free
/// Sharpe ratio `mean(dailyReturn) / stdev(dailyReturn)` with a zero
/// risk-free rate, per §4.10.
#[derive(Debug, Clone, Default)]
pub struct DailyReturns {
    returns: Vec<f64>,
}

impl DailyReturns {
    pub fn push(&mut self, daily_return: f64) {
        self.returns.push(daily_return);
    }

    pub fn sharpe(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        let variance = self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        let stdev = variance.sqrt();
        if stdev == 0.0 {
            0.0
        } else {
            mean / stdev
        }
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.returns.is_empty() {
            0.0
        } else {
            self.returns.iter().sum::<f64>() / self.returns.len() as f64
        }
    }
}

/// Tallies closed-segment realized P&L into win/loss counts and gross
/// profit/loss for profit-factor and win-rate reporting. Classification is
/// by realized P&L sign on the closing fill, not by order side.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeOutcomes {
    wins: u32,
    losses: u32,
    gross_profit: Decimal,
    gross_loss: Decimal,
}

impl TradeOutcomes {
    /// Records one closed segment's realized P&L. A realized P&L of exactly
    /// zero counts toward neither wins nor losses.
    pub fn record(&mut self, realized_pnl: Decimal) {
        if realized_pnl > Decimal::ZERO {
            self.wins += 1;
            self.gross_profit += realized_pnl;
        } else if realized_pnl < Decimal::ZERO {
            self.losses += 1;
            self.gross_loss += -realized_pnl;
        }
    }

    pub fn total_trades(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    pub fn win_rate(&self) -> Decimal {
        let total = self.total_trades();
        if total == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(total)
        }
    }

    /// `grossProfit / grossLoss`; `None` when there have been no losing
    /// trades (an undefined ratio rather than a misleading infinity).
    pub fn profit_factor(&self) -> Option<Decimal> {
        if self.gross_loss.is_zero() {
            None
        } else {
            Some(self.gross_profit / self.gross_loss)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_tracks_the_worst_decline_from_any_peak() {
        let mut tracker = MaxDrawdownTracker::new(dec!(100));
        tracker.update(dec!(120));
        tracker.update(dec!(90));
        tracker.update(dec!(110));
        assert_eq!(tracker.max_drawdown(), dec!(0.25));
    }

    #[test]
    fn sharpe_is_zero_with_fewer_than_two_observations() {
        let mut returns = DailyReturns::default();
        assert_eq!(returns.sharpe(), 0.0);
        returns.push(0.01);
        assert_eq!(returns.sharpe(), 0.0);
    }

    #[test]
    fn trade_outcomes_classify_by_realized_pnl_sign() {
        let mut outcomes = TradeOutcomes::default();
        outcomes.record(dec!(10));
        outcomes.record(dec!(-5));
        outcomes.record(dec!(20));
        assert_eq!(outcomes.wins(), 2);
        assert_eq!(outcomes.losses(), 1);
        assert_eq!(outcomes.win_rate(), dec!(2) / dec!(3));
        assert_eq!(outcomes.profit_factor(), Some(dec!(30) / dec!(5)));
    }

    #[test]
    fn profit_factor_is_none_without_losses() {
        let mut outcomes = TradeOutcomes::default();
        outcomes.record(dec!(10));
        assert_eq!(outcomes.profit_factor(), None);
    }
}
