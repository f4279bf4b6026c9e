//! Order lifecycle management: submission, cancellation, and reconciliation
//! against the exchange's authoritative state (§4.7).

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, instrument, warn};
use vektor_instrument::{Asset, Symbol};
use vektor_integration::EngineError;

use crate::client::{ExchangeClient, PlaceOrderRequest};
use crate::order::{ClientOrderId, Fill, Order, OrderStatus, OrderType, TimeInForce};

/// A strategy's request to enter/exit a position; the precursor to an [`Order`].
#[derive(Debug, Clone)]
pub struct SignalRequest {
    pub symbol: Symbol,
    pub side: vektor_instrument::Side,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub kind: OrderType,
    pub time_in_force: TimeInForce,
    pub strategy_name: String,
}

/// Owns the local view of every non-terminal order and derives [`Fill`]s on reconciliation.
pub struct OrderManager {
    client: Arc<dyn ExchangeClient>,
    orders: RwLock<HashMap<ClientOrderId, Order>>,
    next_trade_id: AtomicU64,
}

#[derive(Debug)]
pub struct CancelAllReport {
    pub canceled: Vec<ClientOrderId>,
    pub failed: Vec<(ClientOrderId, EngineError)>,
}

impl OrderManager {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self {
            client,
            orders: RwLock::new(HashMap::new()),
            next_trade_id: AtomicU64::new(1),
        }
    }

    fn new_client_id(strategy: &str) -> ClientOrderId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the epoch")
            .as_millis();
        let rand: u64 = rand::thread_rng().gen();
        ClientOrderId::generate(strategy, millis, rand)
    }

    pub fn order(&self, client_id: &ClientOrderId) -> Option<Order> {
        self.orders.read().get(client_id).cloned()
    }

    /// Client ids of every order not yet in a terminal status, for periodic
    /// reconciliation polling.
    pub fn open_order_ids(&self) -> Vec<ClientOrderId> {
        self.orders
            .read()
            .values()
            .filter(|o| !o.status.is_terminal())
            .map(|o| o.client_id.clone())
            .collect()
    }

    #[instrument(skip(self, signal), fields(symbol = %signal.symbol))]
    pub async fn submit_signal(&self, signal: SignalRequest) -> Result<Order, EngineError> {
        if signal.quantity <= Decimal::ZERO {
            return Err(EngineError::ValidationFailure("quantity must be positive".into()));
        }
        if matches!(signal.kind, OrderType::Limit) && signal.price.is_none() {
            return Err(EngineError::ValidationFailure("limit order requires a price".into()));
        }

        let client_id = Self::new_client_id(&signal.strategy_name);
        let now = Utc::now();
        let mut order = Order {
            symbol: signal.symbol.clone(),
            exchange_id: None,
            client_id: client_id.clone(),
            side: signal.side,
            kind: signal.kind,
            quantity: signal.quantity,
            price: signal.price,
            stop_price: signal.stop_price,
            time_in_force: signal.time_in_force,
            status: OrderStatus::New,
            executed_quantity: Decimal::ZERO,
            cumulative_quote_qty: Decimal::ZERO,
            avg_price: None,
            created_at: now,
            updated_at: now,
        };

        let report = self
            .client
            .place_order(PlaceOrderRequest {
                symbol: signal.symbol,
                client_id: client_id.clone(),
                side: signal.side,
                kind: signal.kind,
                quantity: signal.quantity,
                price: signal.price,
                stop_price: signal.stop_price,
                time_in_force: signal.time_in_force,
            })
            .await?;

        order.exchange_id = Some(report.exchange_id);
        order.status = report.status;
        order.executed_quantity = report.executed_quantity;
        order.cumulative_quote_qty = report.cumulative_quote_qty;
        order.avg_price = report.avg_price;

        info!(client_id = %client_id, status = ?order.status, "order submitted");
        self.orders.write().insert(client_id, order.clone());
        Ok(order)
    }

    /// Idempotent: canceling an already-terminal order is a no-op success.
    pub async fn cancel(&self, client_id: &ClientOrderId) -> Result<(), EngineError> {
        let symbol = {
            let orders = self.orders.read();
            match orders.get(client_id) {
                Some(order) if order.status.is_terminal() => return Ok(()),
                Some(order) => order.symbol.clone(),
                None => return Ok(()),
            }
        };
        self.client.cancel_order(&symbol, client_id).await?;
        if let Some(order) = self.orders.write().get_mut(client_id) {
            let _ = order.transition(OrderStatus::Canceled, Utc::now());
        }
        Ok(())
    }

    /// Cancels every open order, optionally scoped to one symbol. Survives
    /// partial failure: every attempted cancel is reported, successes and failures alike.
    pub async fn cancel_all(&self, symbol: Option<&Symbol>) -> CancelAllReport {
        let targets: Vec<ClientOrderId> = self
            .orders
            .read()
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| symbol.map(|s| s == &o.symbol).unwrap_or(true))
            .map(|o| o.client_id.clone())
            .collect();

        let mut canceled = Vec::new();
        let mut failed = Vec::new();
        for client_id in targets {
            match self.cancel(&client_id).await {
                Ok(()) => canceled.push(client_id),
                Err(e) => failed.push((client_id, e)),
            }
        }
        CancelAllReport { canceled, failed }
    }

    /// Fetches authoritative exchange state and derives any new [`Fill`]s since
    /// the last reconcile, i.e. `max(0, newExecutedQty - oldExecutedQty)`.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, client_id: &ClientOrderId) -> Result<Vec<Fill>, EngineError> {
        let symbol = {
            let orders = self.orders.read();
            orders
                .get(client_id)
                .map(|o| o.symbol.clone())
                .ok_or_else(|| EngineError::ValidationFailure(format!("unknown order {client_id}")))?
        };

        let report = self.client.get_order(&symbol, client_id).await?;

        let mut orders = self.orders.write();
        let order = orders
            .get_mut(client_id)
            .ok_or_else(|| EngineError::ValidationFailure(format!("unknown order {client_id}")))?;

        let delta_qty = (report.executed_quantity - order.executed_quantity).max(Decimal::ZERO);
        let fills = if delta_qty > Decimal::ZERO {
            let avg_price = report.avg_price.unwrap_or_else(|| {
                if report.executed_quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    report.cumulative_quote_qty / report.executed_quantity
                }
            });
            vec![Fill {
                symbol: order.symbol.clone(),
                client_id: client_id.clone(),
                trade_id: self.next_trade_id.fetch_add(1, AtomicOrdering::Relaxed),
                side: order.side,
                quantity: delta_qty,
                price: avg_price,
                fee: Decimal::ZERO,
                fee_asset: Asset::from(""),
                timestamp: Utc::now(),
                is_maker: false,
            }]
        } else {
            Vec::new()
        };

        order.executed_quantity = report.executed_quantity;
        order.cumulative_quote_qty = report.cumulative_quote_qty;
        order.avg_price = report.avg_price;
        if !order.status.is_terminal() || order.status == report.status {
            order.status = report.status;
            order.updated_at = Utc::now();
        } else {
            warn!(client_id = %client_id, "ignoring stale status regression during reconcile");
        }

        Ok(fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccountInfo, OrderStatusReport};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct FakeClient {
        responses: StdMutex<Vec<OrderStatusReport>>,
    }

    #[async_trait]
    impl ExchangeClient for FakeClient {
        async fn get_exchange_info(&self) -> Result<crate::client::ExchangeInfo, EngineError> {
            Ok(crate::client::ExchangeInfo::default())
        }

        async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderStatusReport, EngineError> {
            Ok(OrderStatusReport {
                exchange_id: crate::order::ExchangeOrderId(1),
                client_id: req.client_id,
                status: OrderStatus::New,
                executed_quantity: Decimal::ZERO,
                cumulative_quote_qty: Decimal::ZERO,
                avg_price: None,
            })
        }
        async fn cancel_order(&self, _symbol: &Symbol, _client_id: &ClientOrderId) -> Result<(), EngineError> {
            Ok(())
        }
        async fn get_order(&self, _symbol: &Symbol, client_id: &ClientOrderId) -> Result<OrderStatusReport, EngineError> {
            let mut responses = self.responses.lock().unwrap();
            let mut next = responses.remove(0);
            next.client_id = client_id.clone();
            Ok(next)
        }
        async fn get_open_orders(&self, _symbol: Option<&Symbol>) -> Result<Vec<OrderStatusReport>, EngineError> {
            Ok(Vec::new())
        }
        async fn get_account(&self) -> Result<AccountInfo, EngineError> {
            Ok(AccountInfo::default())
        }
        async fn get_server_time(&self) -> Result<chrono::DateTime<chrono::Utc>, EngineError> {
            Ok(Utc::now())
        }
        async fn get_24h_ticker(&self, symbol: &Symbol) -> Result<crate::client::Ticker24h, EngineError> {
            Ok(crate::client::Ticker24h {
                symbol: symbol.clone(),
                last_price: Decimal::ZERO,
                price_change_percent: Decimal::ZERO,
                volume: Decimal::ZERO,
            })
        }
        async fn get_order_book(&self, symbol: &Symbol, _limit: u32) -> Result<vektor_data::OrderBook, EngineError> {
            Ok(vektor_data::OrderBook {
                symbol: symbol.clone(),
                timestamp: Utc::now(),
                bids: Vec::new(),
                asks: Vec::new(),
                last_update_id: 0,
            })
        }
        async fn get_klines(
            &self,
            _symbol: &Symbol,
            _interval: vektor_data::Interval,
            _limit: u32,
        ) -> Result<Vec<vektor_data::Kline>, EngineError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn partial_fill_then_full_fill_derives_two_fills() {
        let client = Arc::new(FakeClient {
            responses: StdMutex::new(vec![
                OrderStatusReport {
                    exchange_id: crate::order::ExchangeOrderId(1),
                    client_id: ClientOrderId::from("x".to_string()),
                    status: OrderStatus::PartiallyFilled,
                    executed_quantity: dec!(0.4),
                    cumulative_quote_qty: dec!(40.0),
                    avg_price: Some(dec!(100.0)),
                },
                OrderStatusReport {
                    exchange_id: crate::order::ExchangeOrderId(1),
                    client_id: ClientOrderId::from("x".to_string()),
                    status: OrderStatus::Filled,
                    executed_quantity: dec!(1.0),
                    cumulative_quote_qty: dec!(100.0),
                    avg_price: Some(dec!(100.0)),
                },
            ]),
        });
        let manager = OrderManager::new(client);
        let order = manager
            .submit_signal(SignalRequest {
                symbol: Symbol::new("BTCUSDT"),
                side: vektor_instrument::Side::Buy,
                quantity: dec!(1.0),
                price: Some(dec!(100.0)),
                stop_price: None,
                kind: OrderType::Limit,
                time_in_force: TimeInForce::Gtc,
                strategy_name: "scalper".into(),
            })
            .await
            .unwrap();

        let fills1 = manager.reconcile(&order.client_id).await.unwrap();
        assert_eq!(fills1.len(), 1);
        assert_eq!(fills1[0].quantity, dec!(0.4));

        let fills2 = manager.reconcile(&order.client_id).await.unwrap();
        assert_eq!(fills2.len(), 1);
        assert_eq!(fills2[0].quantity, dec!(0.6));

        assert_eq!(manager.order(&order.client_id).unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_orders() {
        let client = Arc::new(FakeClient { responses: StdMutex::new(vec![]) });
        let manager = OrderManager::new(client);
        let order = manager
            .submit_signal(SignalRequest {
                symbol: Symbol::new("BTCUSDT"),
                side: vektor_instrument::Side::Buy,
                quantity: dec!(1.0),
                price: None,
                stop_price: None,
                kind: OrderType::Market,
                time_in_force: TimeInForce::Ioc,
                strategy_name: "scalper".into(),
            })
            .await
            .unwrap();
        manager.orders.write().get_mut(&order.client_id).unwrap().status = OrderStatus::Filled;
        assert!(manager.cancel(&order.client_id).await.is_ok());
    }
}
