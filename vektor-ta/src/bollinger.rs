//! Bollinger bands: a simple moving average with symmetric bands at
//! `k` standard deviations.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bands {
    pub middle: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
}

#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    k: Decimal,
    window: VecDeque<Decimal>,
}

impl BollingerBands {
    pub fn new(period: usize, k: Decimal) -> Self {
        assert!(period > 1, "period must exceed 1 to compute a variance");
        Self {
            period,
            k,
            window: VecDeque::with_capacity(period),
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Bands> {
        self.window.push_back(price);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }

        let n = Decimal::from(self.period as u64);
        let mean = self.window.iter().sum::<Decimal>() / n;
        let variance = self
            .window
            .iter()
            .map(|p| (*p - mean) * (*p - mean))
            .sum::<Decimal>()
            / n;
        let stdev = variance.sqrt().unwrap_or(Decimal::ZERO);

        Some(Bands {
            middle: mean,
            upper: mean + self.k * stdev,
            lower: mean - self.k * stdev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn constant_price_collapses_bands_to_the_mean() {
        let mut bands = BollingerBands::new(3, dec!(2));
        bands.update(dec!(100));
        bands.update(dec!(100));
        let result = bands.update(dec!(100)).unwrap();
        assert_eq!(result.middle, dec!(100));
        assert_eq!(result.upper, dec!(100));
        assert_eq!(result.lower, dec!(100));
    }

    #[test]
    fn bands_widen_with_dispersion() {
        let mut bands = BollingerBands::new(3, dec!(2));
        bands.update(dec!(90));
        bands.update(dec!(100));
        let result = bands.update(dec!(110)).unwrap();
        assert!(result.upper > result.middle);
        assert!(result.lower < result.middle);
    }
}
