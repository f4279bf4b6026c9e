//! Shared vocabulary types used across every `vektor-*` crate: symbols, sides, and assets.
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::cmp::Ordering;

/// A trading pair identifier, e.g. `"BTCUSDT"`.
///
/// Backed by `SmolStr` so clones are cheap regardless of how many components
/// hold a copy (order book levels, position maps, signal queues, ...).
#[derive(
    Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From,
)]
#[serde(transparent)]
pub struct Symbol(SmolStr);

impl Symbol {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(SmolStr::new(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// An asset leg of a symbol, e.g. the `"BTC"` in `"BTCUSDT"`.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Constructor,
)]
#[serde(transparent)]
pub struct Asset(SmolStr);

impl Asset {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Asset {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Order / position side.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sign used when folding a side into a signed quantity: `+1` for `Buy`, `-1` for `Sell`.
    pub fn sign(self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Net directional exposure of a position.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    Flat,
}

impl PositionSide {
    pub fn from_signed_size(size: rust_decimal::Decimal) -> Self {
        match size.cmp(&rust_decimal::Decimal::ZERO) {
            Ordering::Greater => PositionSide::Long,
            Ordering::Less => PositionSide::Short,
            Ordering::Equal => PositionSide::Flat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_equality_ignores_construction_path() {
        assert_eq!(Symbol::new("BTCUSDT"), Symbol::from("BTCUSDT"));
        assert_eq!(Symbol::from(String::from("ETHUSDT")), Symbol::new("ETHUSDT"));
    }

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn position_side_from_signed_size() {
        use rust_decimal_macros::dec;
        assert_eq!(PositionSide::from_signed_size(dec!(1.0)), PositionSide::Long);
        assert_eq!(PositionSide::from_signed_size(dec!(-1.0)), PositionSide::Short);
        assert_eq!(PositionSide::from_signed_size(dec!(0)), PositionSide::Flat);
    }
}
