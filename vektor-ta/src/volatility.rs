//! Realized volatility over log-returns, and a discrete Ornstein-Uhlenbeck
//! mean-reversion estimate used by the pairs strategy's z-score.

use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Rolling standard deviation of log-returns over a bounded window.
#[derive(Debug, Clone)]
pub struct RealizedVolatility {
    window: VecDeque<Decimal>,
    capacity: usize,
    last_price: Option<Decimal>,
}

impl RealizedVolatility {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "capacity must exceed 1 to compute a variance");
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            last_price: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        let log_return = match self.last_price {
            Some(last) if last > Decimal::ZERO && price > Decimal::ZERO => {
                ln_approx(price / last)
            }
            _ => {
                self.last_price = Some(price);
                return None;
            }
        };
        self.last_price = Some(price);

        self.window.push_back(log_return);
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }
        if self.window.len() < 2 {
            return None;
        }

        let n = Decimal::from(self.window.len() as u64);
        let mean = self.window.iter().sum::<Decimal>() / n;
        let variance = self.window.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / n;
        variance.sqrt()
    }
}

/// Natural log via `Decimal::ln`, available through the `maths` feature.
fn ln_approx(x: Decimal) -> Decimal {
    x.ln()
}

/// Sample mean/variance fit of a discrete Ornstein-Uhlenbeck process over a
/// window of `log(priceA/priceB)` observations.
///
/// `theta` (mean-reversion speed) is reported for observability only — entry
/// and exit decisions use only `mu`/`sigma` for the z-score, per the pairs
/// strategy's documented design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuEstimate {
    pub mu: Decimal,
    pub sigma: Decimal,
    pub theta: Decimal,
}

/// Fits an [`OuEstimate`] from a bounded window of log-ratio samples once the
/// window has filled; returns `None` while still warming up.
#[derive(Debug, Clone)]
pub struct OuEstimator {
    window: VecDeque<Decimal>,
    capacity: usize,
}

impl OuEstimator {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "capacity must exceed 1 to fit mean and variance");
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update(&mut self, log_ratio: Decimal) -> Option<OuEstimate> {
        self.window.push_back(log_ratio);
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }
        if self.window.len() < self.capacity {
            return None;
        }

        let n = Decimal::from(self.window.len() as u64);
        let mu = self.window.iter().sum::<Decimal>() / n;
        let variance = self.window.iter().map(|x| (*x - mu) * (*x - mu)).sum::<Decimal>() / n;
        let sigma = variance.sqrt().unwrap_or(Decimal::ZERO);

        // Discrete mean-reversion speed from lag-1 autocorrelation: theta = -ln(rho).
        let theta = self.lag1_autocorrelation(mu).map(|rho| {
            if rho > Decimal::ZERO && rho < Decimal::ONE {
                -rho.ln()
            } else {
                Decimal::ZERO
            }
        }).unwrap_or(Decimal::ZERO);

        Some(OuEstimate { mu, sigma, theta })
    }

    fn lag1_autocorrelation(&self, mu: Decimal) -> Option<Decimal> {
        if self.window.len() < 2 {
            return None;
        }
        let deviations: Vec<Decimal> = self.window.iter().map(|x| *x - mu).collect();
        let numerator: Decimal = deviations.windows(2).map(|w| w[0] * w[1]).sum();
        let denominator: Decimal = deviations.iter().map(|d| *d * *d).sum();
        if denominator.is_zero() {
            None
        } else {
            Some(numerator / denominator)
        }
    }

    /// The current z-score of `log_ratio` against the fitted estimate.
    pub fn z_score(estimate: &OuEstimate, log_ratio: Decimal) -> Option<Decimal> {
        if estimate.sigma.is_zero() {
            None
        } else {
            Some((log_ratio - estimate.mu) / estimate.sigma)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn realized_volatility_is_zero_for_constant_price() {
        let mut vol = RealizedVolatility::new(5);
        let mut last = None;
        for _ in 0..4 {
            last = vol.update(dec!(100));
        }
        assert_eq!(last, Some(Decimal::ZERO));
    }

    #[test]
    fn ou_estimator_warms_up_before_emitting() {
        let mut estimator = OuEstimator::new(4);
        assert!(estimator.update(dec!(0.01)).is_none());
        assert!(estimator.update(dec!(0.02)).is_none());
        assert!(estimator.update(dec!(-0.01)).is_none());
        assert!(estimator.update(dec!(0.0)).is_some());
    }

    #[test]
    fn z_score_is_none_for_degenerate_sigma() {
        let estimate = OuEstimate { mu: dec!(0), sigma: Decimal::ZERO, theta: Decimal::ZERO };
        assert_eq!(OuEstimator::z_score(&estimate, dec!(1)), None);
    }
}
