//! Order and fill data model plus the order lifecycle state machine (§4.7).

use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use rust_decimal::Decimal;
use vektor_instrument::{Side, Symbol};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
}

/// Order lifecycle status. `PartiallyFilled` is the only non-terminal status
/// besides `New`; every other variant is terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::PendingCancel)
    }
}

/// Locally generated order identifier: `"{strategy}_{monotonicMillis}_{rand}"`.
#[derive(Debug, Clone, Display, Eq, PartialEq, Hash, From)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    pub fn generate(strategy: &str, monotonic_millis: u128, rand: u64) -> Self {
        Self(format!("{strategy}_{monotonic_millis}_{rand:016x}"))
    }
}

/// Exchange-assigned order id, known only once accepted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Constructor)]
pub struct ExchangeOrderId(pub u64);

#[derive(Debug, Clone)]
pub struct Order {
    pub symbol: Symbol,
    pub exchange_id: Option<ExchangeOrderId>,
    pub client_id: ClientOrderId,
    pub side: Side,
    pub kind: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub avg_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.executed_quantity
    }

    /// Applies a transition, enforcing that terminal states never move again.
    pub fn transition(&mut self, status: OrderStatus, at: DateTime<Utc>) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "order {} already terminal ({:?}), cannot move to {:?}",
                self.client_id, self.status, status
            ));
        }
        self.status = status;
        self.updated_at = at;
        Ok(())
    }
}

/// An executed trade against an order. Immutable once recorded.
#[derive(Debug, Clone)]
pub struct Fill {
    pub symbol: Symbol,
    pub client_id: ClientOrderId,
    pub trade_id: u64,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_asset: vektor_instrument::Asset,
    pub timestamp: DateTime<Utc>,
    pub is_maker: bool,
}
