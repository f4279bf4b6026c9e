//! Typed REST surface against a Binance-compatible spot exchange: signed and
//! unsigned endpoints, with the retry/backoff policy from §4.2.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use vektor_data::{Interval, Kline, OrderBook, OrderBookLevel};
use vektor_instrument::{Side, Symbol};
use vektor_integration::{sign_query, EngineError, Priority, RateLimiter, RateQuota};

use crate::order::{ClientOrderId, ExchangeOrderId, OrderStatus, OrderType, TimeInForce};

const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(4);
const MAX_ATTEMPTS: u32 = 3;
const EXCHANGE_INFO_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: Symbol,
    pub client_id: ClientOrderId,
    pub side: Side,
    pub kind: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub exchange_id: ExchangeOrderId,
    pub client_id: ClientOrderId,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub balances: Vec<(vektor_instrument::Asset, Decimal)>,
    pub can_trade: bool,
}

/// Tradable symbols plus the exchange's currently advertised rate limits, as
/// returned by `get_exchange_info`. Refreshing this is how [`RateLimiter`]
/// learns about quota changes the exchange itself makes.
#[derive(Debug, Clone, Default)]
pub struct ExchangeInfo {
    pub symbols: Vec<Symbol>,
    pub rate_limits: RateQuota,
}

#[derive(Debug, Clone)]
pub struct Ticker24h {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub volume: Decimal,
}

/// The REST operations the engine depends on; backed in production by
/// [`RestExchangeClient`] and in tests/backtests by an in-memory fake.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, EngineError>;
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderStatusReport, EngineError>;
    async fn cancel_order(&self, symbol: &Symbol, client_id: &ClientOrderId) -> Result<(), EngineError>;
    async fn get_order(&self, symbol: &Symbol, client_id: &ClientOrderId) -> Result<OrderStatusReport, EngineError>;
    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<OrderStatusReport>, EngineError>;
    async fn get_account(&self) -> Result<AccountInfo, EngineError>;
    async fn get_server_time(&self) -> Result<chrono::DateTime<chrono::Utc>, EngineError>;
    async fn get_24h_ticker(&self, symbol: &Symbol) -> Result<Ticker24h, EngineError>;
    async fn get_order_book(&self, symbol: &Symbol, limit: u32) -> Result<OrderBook, EngineError>;
    async fn get_klines(&self, symbol: &Symbol, interval: Interval, limit: u32) -> Result<Vec<Kline>, EngineError>;
}

/// Binance-compatible REST client. Every call acquires rate-limiter tokens
/// before sending and applies the retry policy from §4.2 uniformly.
pub struct RestExchangeClient {
    http: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    api_secret: String,
    rate_limiter: RateLimiter,
    exchange_info_cache: Mutex<Option<(ExchangeInfo, Instant)>>,
}

impl std::fmt::Debug for RestExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestExchangeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestExchangeClient {
    pub fn new(base_url: url::Url, api_key: String, api_secret: String, rate_limiter: RateLimiter) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builder never fails with no custom TLS config"),
            base_url,
            api_key,
            api_secret,
            rate_limiter,
            exchange_info_cache: Mutex::new(None),
        }
    }

    fn sign(&self, query: &str) -> String {
        sign_query(query, &self.api_secret)
    }

    /// Sends a request, applying the §4.2 retry policy: one retry after the
    /// server-advertised wait on 429/418, exponential backoff on 5xx up to
    /// [`MAX_ATTEMPTS`], no retry on other 4xx. Shared by both the signed and
    /// public request paths, which differ only in how `url` and `priority`
    /// were built.
    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        url: &str,
        weight: usize,
        priority: Priority,
        signed: bool,
    ) -> Result<serde_json::Value, EngineError> {
        let mut attempt = 0u32;
        loop {
            self.rate_limiter.acquire(weight, priority).await;
            let mut request = self.http.request(method.clone(), url);
            if signed {
                request = request.header("X-MBX-APIKEY", &self.api_key);
            }
            let response = request
                .send()
                .await
                .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 429 || status.as_u16() == 418 {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                self.rate_limiter.report_violation().await;
                if attempt == 0 {
                    warn!(retry_after, "rate limited, sleeping once before retrying");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    attempt += 1;
                    continue;
                }
                return Err(EngineError::RateLimited(format!("status {status}")));
            }

            if status.is_server_error() {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(EngineError::TransientNetwork(format!(
                        "exhausted {MAX_ATTEMPTS} attempts, last status {status}"
                    )));
                }
                let backoff = std::cmp::min(BASE_BACKOFF * 2u32.pow(attempt - 1), MAX_BACKOFF);
                warn!(attempt, ?backoff, %status, "server error, backing off");
                tokio::time::sleep(backoff).await;
                continue;
            }

            if status.is_client_error() {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let code = body["code"].as_i64().unwrap_or(status.as_u16() as i64);
                let message = body["msg"].as_str().unwrap_or("exchange rejected request").to_string();
                return Err(EngineError::ExchangeRejected { code, message });
            }

            return response
                .json()
                .await
                .map_err(|e| EngineError::TransientNetwork(e.to_string()));
        }
    }

    /// Signed request: appends a server-synced timestamp and an HMAC-SHA256
    /// signature over the canonical query string.
    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        mut query: Vec<(&str, String)>,
        weight: usize,
    ) -> Result<serde_json::Value, EngineError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        query.push(("timestamp", timestamp.to_string()));
        let query_string = serde_urlencoded::to_string(&query)
            .map_err(|e| EngineError::ValidationFailure(e.to_string()))?;
        let signature = self.sign(&query_string);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query_string, signature);
        self.send_with_retry(method, &url, weight, Priority::Normal, true).await
    }

    /// Unsigned request against a public endpoint.
    async fn send_public(
        &self,
        path: &str,
        query: Vec<(&str, String)>,
        weight: usize,
    ) -> Result<serde_json::Value, EngineError> {
        let query_string = serde_urlencoded::to_string(&query)
            .map_err(|e| EngineError::ValidationFailure(e.to_string()))?;
        let url = if query_string.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query_string)
        };
        self.send_with_retry(reqwest::Method::GET, &url, weight, Priority::Low, false).await
    }
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    /// Cached with TTL 1h; a refresh pushes the parsed rate limits to the
    /// [`RateLimiter`] so its buckets track whatever quota the exchange is
    /// currently advertising.
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, EngineError> {
        {
            let cache = self.exchange_info_cache.lock();
            if let Some((info, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() < EXCHANGE_INFO_TTL {
                    return Ok(info.clone());
                }
            }
        }

        let body = self.send_public("/api/v3/exchangeInfo", vec![], 10).await?;
        let symbols = body["symbols"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|s| s["symbol"].as_str().map(Symbol::new)).collect())
            .unwrap_or_default();
        let rate_limits = parse_rate_limits(&body);
        self.rate_limiter.update_quota(rate_limits).await;

        let info = ExchangeInfo { symbols, rate_limits };
        *self.exchange_info_cache.lock() = Some((info.clone(), Instant::now()));
        info!(?rate_limits, "refreshed exchange info, pushed rate limits to rate limiter");
        Ok(info)
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderStatusReport, EngineError> {
        let side = match req.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let mut query = vec![
            ("symbol", req.symbol.as_str().to_string()),
            ("side", side.to_string()),
            ("type", order_type_str(req.kind).to_string()),
            ("quantity", req.quantity.to_string()),
            ("newClientOrderId", req.client_id.to_string()),
        ];
        if let Some(price) = req.price {
            query.push(("price", price.to_string()));
            query.push(("timeInForce", tif_str(req.time_in_force).to_string()));
        }
        if let Some(stop) = req.stop_price {
            query.push(("stopPrice", stop.to_string()));
        }
        let body = self.send_signed(reqwest::Method::POST, "/api/v3/order", query, 1).await?;
        parse_order_report(&body, &req.client_id)
    }

    async fn cancel_order(&self, symbol: &Symbol, client_id: &ClientOrderId) -> Result<(), EngineError> {
        let query = vec![
            ("symbol", symbol.as_str().to_string()),
            ("origClientOrderId", client_id.to_string()),
        ];
        self.send_signed(reqwest::Method::DELETE, "/api/v3/order", query, 1).await?;
        Ok(())
    }

    async fn get_order(&self, symbol: &Symbol, client_id: &ClientOrderId) -> Result<OrderStatusReport, EngineError> {
        let query = vec![
            ("symbol", symbol.as_str().to_string()),
            ("origClientOrderId", client_id.to_string()),
        ];
        let body = self.send_signed(reqwest::Method::GET, "/api/v3/order", query, 2).await?;
        parse_order_report(&body, client_id)
    }

    async fn get_open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<OrderStatusReport>, EngineError> {
        let mut query = Vec::new();
        let weight = match symbol {
            Some(symbol) => {
                query.push(("symbol", symbol.as_str().to_string()));
                3
            }
            None => 40,
        };
        let body = self.send_signed(reqwest::Method::GET, "/api/v3/openOrders", query, weight).await?;
        body.as_array()
            .ok_or_else(|| EngineError::StaleState("openOrders response was not an array".into()))?
            .iter()
            .map(|order| {
                let fallback = ClientOrderId::from(order["clientOrderId"].as_str().unwrap_or_default().to_string());
                parse_order_report(order, &fallback)
            })
            .collect()
    }

    async fn get_account(&self) -> Result<AccountInfo, EngineError> {
        let body = self.send_signed(reqwest::Method::GET, "/api/v3/account", vec![], 10).await?;
        let balances = body["balances"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| {
                        let asset = b["asset"].as_str()?;
                        let free: Decimal = b["free"].as_str()?.parse().ok()?;
                        Some((vektor_instrument::Asset::from(asset), free))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(AccountInfo {
            balances,
            can_trade: body["canTrade"].as_bool().unwrap_or(false),
        })
    }

    async fn get_server_time(&self) -> Result<chrono::DateTime<chrono::Utc>, EngineError> {
        let body = self.send_public("/api/v3/time", vec![], 1).await?;
        let millis = body["serverTime"].as_i64().unwrap_or(0);
        Ok(chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now))
    }

    async fn get_24h_ticker(&self, symbol: &Symbol) -> Result<Ticker24h, EngineError> {
        let query = vec![("symbol", symbol.as_str().to_string())];
        let body = self.send_public("/api/v3/ticker/24hr", query, 2).await?;
        Ok(Ticker24h {
            symbol: symbol.clone(),
            last_price: decimal_field(&body, "lastPrice")?,
            price_change_percent: decimal_field(&body, "priceChangePercent")?,
            volume: decimal_field(&body, "volume")?,
        })
    }

    async fn get_order_book(&self, symbol: &Symbol, limit: u32) -> Result<OrderBook, EngineError> {
        let query = vec![("symbol", symbol.as_str().to_string()), ("limit", limit.to_string())];
        let body = self.send_public("/api/v3/depth", query, depth_weight(limit)).await?;
        let levels = |key: &str| -> Result<Vec<OrderBookLevel>, EngineError> {
            body[key]
                .as_array()
                .ok_or_else(|| EngineError::StaleState(format!("missing {key} in depth response")))?
                .iter()
                .map(|lvl| {
                    let price = Decimal::from_str(lvl[0].as_str().unwrap_or("0"))
                        .map_err(|e| EngineError::StaleState(e.to_string()))?;
                    let quantity = Decimal::from_str(lvl[1].as_str().unwrap_or("0"))
                        .map_err(|e| EngineError::StaleState(e.to_string()))?;
                    Ok(OrderBookLevel { price, quantity })
                })
                .collect()
        };
        Ok(OrderBook {
            symbol: symbol.clone(),
            timestamp: chrono::Utc::now(),
            bids: levels("bids")?,
            asks: levels("asks")?,
            last_update_id: body["lastUpdateId"].as_u64().unwrap_or(0),
        })
    }

    async fn get_klines(&self, symbol: &Symbol, interval: Interval, limit: u32) -> Result<Vec<Kline>, EngineError> {
        let query = vec![
            ("symbol", symbol.as_str().to_string()),
            ("interval", interval_str(interval).to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self.send_public("/api/v3/klines", query, 2).await?;
        body.as_array()
            .ok_or_else(|| EngineError::StaleState("klines response was not an array".into()))?
            .iter()
            .map(parse_kline_row)
            .collect()
    }
}

/// Extracts the `(REQUEST_WEIGHT|ORDERS|RAW_REQUESTS) x (SECOND|MINUTE|DAY)`
/// entries from an `exchangeInfo` response's `rateLimits` array, falling back
/// to [`RateQuota::default`] for any dimension the exchange didn't report.
fn parse_rate_limits(body: &serde_json::Value) -> RateQuota {
    let mut quota = RateQuota::default();
    let Some(limits) = body["rateLimits"].as_array() else {
        return quota;
    };
    for limit in limits {
        let kind = limit["rateLimitType"].as_str().unwrap_or("");
        let interval = limit["interval"].as_str().unwrap_or("");
        let Some(value) = limit["limit"].as_u64() else { continue };
        let value = value as usize;
        match (kind, interval) {
            ("REQUEST_WEIGHT", "SECOND") => quota.weight_per_second = value,
            ("REQUEST_WEIGHT", "MINUTE") => quota.weight_per_minute = value,
            ("REQUEST_WEIGHT", "DAY") => quota.weight_per_day = value,
            ("ORDERS" | "RAW_REQUESTS", "SECOND") => quota.requests_per_second = value,
            ("ORDERS" | "RAW_REQUESTS", "MINUTE") => quota.requests_per_minute = value,
            ("ORDERS" | "RAW_REQUESTS", "DAY") => quota.requests_per_day = value,
            _ => {}
        }
    }
    quota
}

fn decimal_field(body: &serde_json::Value, key: &str) -> Result<Decimal, EngineError> {
    body[key]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .ok_or_else(|| EngineError::StaleState(format!("missing or malformed field {key}")))
}

/// Binance's depth-snapshot weight steps with the requested `limit`.
fn depth_weight(limit: u32) -> usize {
    match limit {
        0..=100 => 1,
        101..=500 => 5,
        501..=1000 => 10,
        _ => 50,
    }
}

fn interval_str(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::OneHour => "1h",
        Interval::FourHours => "4h",
        Interval::OneDay => "1d",
    }
}

/// Parses one row of a `klines` response: `[openTime, open, high, low, close,
/// volume, closeTime, quoteVolume, trades, ...]`. Historical klines are
/// always closed bars.
fn parse_kline_row(row: &serde_json::Value) -> Result<Kline, EngineError> {
    let decimal_at = |idx: usize| -> Result<Decimal, EngineError> {
        Decimal::from_str(row[idx].as_str().unwrap_or("0")).map_err(|e| EngineError::StaleState(e.to_string()))
    };
    Ok(Kline {
        open_time: chrono::DateTime::from_timestamp_millis(row[0].as_i64().unwrap_or(0))
            .unwrap_or_else(chrono::Utc::now),
        close_time: chrono::DateTime::from_timestamp_millis(row[6].as_i64().unwrap_or(0))
            .unwrap_or_else(chrono::Utc::now),
        open: decimal_at(1)?,
        high: decimal_at(2)?,
        low: decimal_at(3)?,
        close: decimal_at(4)?,
        volume: decimal_at(5)?,
        trades: row[8].as_u64().unwrap_or(0),
        is_closed: true,
    })
}

fn order_type_str(kind: OrderType) -> &'static str {
    match kind {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::StopLoss => "STOP_LOSS",
        OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
        OrderType::TakeProfit => "TAKE_PROFIT",
        OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        OrderType::LimitMaker => "LIMIT_MAKER",
    }
}

fn tif_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
    }
}

fn parse_order_report(
    body: &serde_json::Value,
    fallback_client_id: &ClientOrderId,
) -> Result<OrderStatusReport, EngineError> {
    let status = match body["status"].as_str().unwrap_or("NEW") {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "PENDING_CANCEL" => OrderStatus::PendingCancel,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        other => return Err(EngineError::StaleState(format!("unknown order status {other}"))),
    };
    Ok(OrderStatusReport {
        exchange_id: ExchangeOrderId(body["orderId"].as_u64().unwrap_or(0)),
        client_id: body["clientOrderId"]
            .as_str()
            .map(|s| ClientOrderId::from(s.to_string()))
            .unwrap_or_else(|| fallback_client_id.clone()),
        status,
        executed_quantity: body["executedQty"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Decimal::ZERO),
        cumulative_quote_qty: body["cummulativeQuoteQty"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Decimal::ZERO),
        avg_price: body["price"].as_str().and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_order_statuses() {
        let body = serde_json::json!({
            "status": "PARTIALLY_FILLED",
            "orderId": 42,
            "clientOrderId": "scalper_1_1",
            "executedQty": "0.4",
            "cummulativeQuoteQty": "40.0",
            "price": "100.0",
        });
        let report = parse_order_report(&body, &ClientOrderId::from("fallback".to_string())).unwrap();
        assert_eq!(report.status, OrderStatus::PartiallyFilled);
        assert_eq!(report.executed_quantity, rust_decimal_macros::dec!(0.4));
    }

    #[test]
    fn rejects_unknown_status() {
        let body = serde_json::json!({ "status": "BOGUS" });
        assert!(parse_order_report(&body, &ClientOrderId::from("x".to_string())).is_err());
    }

    #[test]
    fn parses_rate_limits_from_exchange_info() {
        let body = serde_json::json!({
            "rateLimits": [
                { "rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "limit": 6000 },
                { "rateLimitType": "ORDERS", "interval": "SECOND", "limit": 50 },
            ]
        });
        let quota = parse_rate_limits(&body);
        assert_eq!(quota.weight_per_minute, 6000);
        assert_eq!(quota.requests_per_second, 50);
        assert_eq!(quota.weight_per_day, RateQuota::default().weight_per_day);
    }

    #[test]
    fn depth_weight_steps_with_limit() {
        assert_eq!(depth_weight(100), 1);
        assert_eq!(depth_weight(500), 5);
        assert_eq!(depth_weight(1000), 10);
        assert_eq!(depth_weight(5000), 50);
    }

    #[test]
    fn parses_kline_row() {
        let row = serde_json::json!([
            1499040000000i64, "0.01", "0.02", "0.005", "0.015", "148976.11", 1499644799999i64,
            "2434.19", 308, "1756.87", "28.46", "17928899.62"
        ]);
        let kline = parse_kline_row(&row).unwrap();
        assert_eq!(kline.open, rust_decimal_macros::dec!(0.01));
        assert_eq!(kline.trades, 308);
        assert!(kline.is_closed);
    }
}
