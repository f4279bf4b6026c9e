//! Wilder's relative strength index over a fixed lookback period.

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct RelativeStrengthIndex {
    period: usize,
    last_price: Option<Decimal>,
    avg_gain: Decimal,
    avg_loss: Decimal,
    samples: usize,
}

impl RelativeStrengthIndex {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "period must be positive");
        Self {
            period,
            last_price: None,
            avg_gain: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            samples: 0,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        let Some(last) = self.last_price else {
            self.last_price = Some(price);
            return None;
        };
        self.last_price = Some(price);

        let change = price - last;
        let gain = change.max(Decimal::ZERO);
        let loss = (-change).max(Decimal::ZERO);
        let period = Decimal::from(self.period as u64);

        self.samples += 1;
        if self.samples <= self.period {
            self.avg_gain += gain / period;
            self.avg_loss += loss / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - Decimal::ONE) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - Decimal::ONE) + loss) / period;
        }

        if self.samples < self.period {
            return None;
        }

        if self.avg_loss.is_zero() {
            return Some(Decimal::from(100u64));
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(Decimal::from(100u64) - Decimal::from(100u64) / (Decimal::ONE + rs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn constant_gains_drive_rsi_to_100() {
        let mut rsi = RelativeStrengthIndex::new(3);
        let mut last = None;
        for price in [dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)] {
            last = rsi.update(price);
        }
        assert_eq!(last, Some(dec!(100)));
    }

    #[test]
    fn insufficient_samples_yield_none() {
        let mut rsi = RelativeStrengthIndex::new(14);
        assert_eq!(rsi.update(dec!(100)), None);
        assert_eq!(rsi.update(dec!(101)), None);
    }
}
