//! The transient, single-consumption order of intent a strategy emits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use vektor_execution::{OrderType, TimeInForce};
use vektor_instrument::{Side, Symbol};

/// Per-origin detail carried alongside a [`Signal`], typed per strategy kind
/// rather than an untyped metadata bag. Only used for logging/telemetry; the
/// engine and risk manager never branch on it.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMetadata {
    Scalper {
        obi: Decimal,
        ema_short: Decimal,
        ema_long: Decimal,
        reason: ScalperReason,
    },
    MarketMaker {
        fair_price: Decimal,
        volatility: Decimal,
        inventory: Decimal,
    },
    PairsArbitrage {
        pair: (Symbol, Symbol),
        z_score: Decimal,
        leg: PairLeg,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScalperReason {
    Entry,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PairLeg {
    A,
    B,
}

/// An order of intent produced by a strategy, consumed exactly once by the
/// engine's risk-then-execution pipeline.
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub kind: OrderType,
    pub time_in_force: TimeInForce,
    pub stop_price: Option<Decimal>,
    pub strategy_name: String,
    /// Caller-assigned confidence in `[0, 1]`, informational only.
    pub confidence: Decimal,
    pub metadata: SignalMetadata,
    pub emitted_at: DateTime<Utc>,
}
