//! Indicator utilities shared by strategies: moving averages, RSI, Bollinger
//! bands, realized volatility, and a mean-reversion estimator for pairs
//! trading. Deliberately dependency-light — no async, no I/O.
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod bollinger;
pub mod moving_average;
pub mod rsi;
pub mod volatility;

pub use bollinger::BollingerBands;
pub use moving_average::{ExponentialMovingAverage, SimpleMovingAverage};
pub use rsi::RelativeStrengthIndex;
pub use volatility::{OuEstimate, OuEstimator, RealizedVolatility};
