//! Exchange REST surface and order lifecycle management.
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod client;
pub mod manager;
pub mod order;

pub use client::{
    AccountInfo, ExchangeClient, ExchangeInfo, OrderStatusReport, PlaceOrderRequest, RestExchangeClient,
    Ticker24h,
};
pub use manager::{CancelAllReport, OrderManager, SignalRequest};
pub use order::{ClientOrderId, ExchangeOrderId, Fill, Order, OrderStatus, OrderType, TimeInForce};
