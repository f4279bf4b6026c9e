//! Market data ingress: WebSocket stream handling and the derived
//! order book / kline / VWAP state it feeds.
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod ingester;
pub mod klines;
pub mod orderbook;
pub mod stream;
pub mod types;
pub mod vwap;

pub use ingester::{DataIngester, IngestedEvent};
pub use klines::{Interval, KlineAggregator};
pub use orderbook::{ApplyOutcome, BookStatus, DepthUpdate, OrderBookManager};
pub use stream::{ConnectionState, StreamClient, StreamError, StreamEvent};
pub use types::{Kline, MarketData, OrderBook, OrderBookLevel};
pub use vwap::VwapTracker;
