//! Ring-buffer simple and exponential moving averages.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct SimpleMovingAverage {
    window: VecDeque<Decimal>,
    period: usize,
    sum: Decimal,
}

impl SimpleMovingAverage {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "period must be positive");
        Self {
            window: VecDeque::with_capacity(period),
            period,
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.window.len() < self.period {
            None
        } else {
            Some(self.sum / Decimal::from(self.period as u64))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    period: usize,
    alpha: Decimal,
    value: Option<Decimal>,
}

impl ExponentialMovingAverage {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "period must be positive");
        let alpha = Decimal::TWO / Decimal::from((period + 1) as u64);
        Self { period, alpha, value: None }
    }

    pub fn update(&mut self, price: Decimal) -> Decimal {
        let next = match self.value {
            None => price,
            Some(prev) => self.alpha * price + (Decimal::ONE - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_is_none_until_window_fills() {
        let mut sma = SimpleMovingAverage::new(3);
        assert_eq!(sma.update(dec!(1)), None);
        assert_eq!(sma.update(dec!(2)), None);
        assert_eq!(sma.update(dec!(3)), Some(dec!(2)));
    }

    #[test]
    fn sma_slides_oldest_out() {
        let mut sma = SimpleMovingAverage::new(2);
        sma.update(dec!(1));
        sma.update(dec!(3));
        assert_eq!(sma.value(), Some(dec!(2)));
        sma.update(dec!(5));
        assert_eq!(sma.value(), Some(dec!(4)));
    }

    #[test]
    fn ema_seeds_with_first_price() {
        let mut ema = ExponentialMovingAverage::new(9);
        assert_eq!(ema.update(dec!(100)), dec!(100));
        let second = ema.update(dec!(110));
        assert!(second > dec!(100) && second < dec!(110));
    }
}
