//! Layered engine configuration: a YAML file overlaid with `TRADING_*` /
//! `RISK_*` / `BINANCE_*` environment variables, grounded on
//! `original_source/bot/config.py`'s `Config.load_from_file` /
//! `Config.load_from_env` split.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vektor_instrument::Symbol;
use vektor_strategy::StrategyConfig;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
    Backtest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    pub symbols: Vec<Symbol>,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_max_daily_drawdown")]
    pub max_daily_drawdown: Decimal,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

fn default_base_currency() -> String { "USDT".to_string() }
fn default_max_position_size() -> Decimal { Decimal::from(10) }
fn default_max_daily_drawdown() -> Decimal { Decimal::from(1000) }
fn default_max_consecutive_losses() -> u32 { 5 }

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::default(),
            base_currency: default_base_currency(),
            symbols: Vec::new(),
            max_position_size: default_max_position_size(),
            max_daily_drawdown: default_max_daily_drawdown(),
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

fn default_base_url() -> String { "https://api.binance.com".to_string() }
fn default_ws_base_url() -> String { "wss://stream.binance.com:9443".to_string() }

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            base_url: default_base_url(),
            ws_base_url: default_ws_base_url(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfigSection {
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
}

fn default_max_leverage() -> Decimal { Decimal::ONE }
fn default_stop_loss_pct() -> Decimal { Decimal::new(2, 2) }
fn default_take_profit_pct() -> Decimal { Decimal::new(4, 2) }

impl Default for RiskConfigSection {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BacktestConfigSection {
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    #[serde(default = "default_commission_bps")]
    pub commission_bps: Decimal,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: Decimal,
    #[serde(default = "default_latency_mean_ms")]
    pub latency_mean_ms: f64,
    #[serde(default = "default_latency_std_ms")]
    pub latency_std_ms: f64,
}

fn default_initial_capital() -> Decimal { Decimal::from(10_000) }
fn default_commission_bps() -> Decimal { Decimal::new(10, 4) }
fn default_slippage_bps() -> Decimal { Decimal::new(5, 4) }
fn default_latency_mean_ms() -> f64 { 50.0 }
fn default_latency_std_ms() -> f64 { 15.0 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub file: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), file: None }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub prometheus_enabled: bool,
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn default_prometheus_port() -> u16 { 9090 }

/// Aggregates every configuration section the engine loads, mirroring the
/// `{trading, exchange, risk, strategies, backtest, logging, monitoring}`
/// sections of the original config object.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub risk: RiskConfigSection,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub backtest: BacktestConfigSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("reading config file {}: {e}", path.display()))?;
        serde_yaml::from_str(&contents).map_err(|e| format!("parsing config file {}: {e}", path.display()))
    }

    /// Overlays `TRADING_*` / `RISK_*` / `BINANCE_*` environment variables on
    /// top of whatever was loaded from file (or the defaults, if no file was
    /// given). Only the handful of fields the original environment loader
    /// covers are overridden; everything else keeps its file/default value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("BINANCE_API_KEY") {
            self.exchange.api_key = value;
        }
        if let Ok(value) = std::env::var("BINANCE_API_SECRET") {
            self.exchange.api_secret = value;
        }
        if let Ok(value) = std::env::var("BINANCE_TESTNET") {
            self.exchange.testnet = value.eq_ignore_ascii_case("true") || value == "1";
        }
        if let Ok(value) = std::env::var("TRADING_MODE") {
            self.trading.mode = match value.to_lowercase().as_str() {
                "live" => TradingMode::Live,
                "backtest" => TradingMode::Backtest,
                _ => TradingMode::Paper,
            };
        }
        if let Ok(value) = std::env::var("TRADING_MAX_POSITION_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.trading.max_position_size = parsed;
            }
        }
        if let Ok(value) = std::env::var("RISK_MAX_DAILY_DRAWDOWN") {
            if let Ok(parsed) = value.parse() {
                self.trading.max_daily_drawdown = parsed;
            }
        }
        if let Ok(value) = std::env::var("RISK_MAX_LEVERAGE") {
            if let Ok(parsed) = value.parse() {
                self.risk.max_leverage = parsed;
            }
        }
    }

    /// Loads the layered configuration: defaults, overlaid with `path` if
    /// given, overlaid with environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_paper_mode_config() {
        let config = Config::default();
        assert_eq!(config.trading.mode, TradingMode::Paper);
        assert_eq!(config.exchange.base_url, "https://api.binance.com");
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        std::env::set_var("TRADING_MODE", "live");
        std::env::set_var("BINANCE_API_KEY", "test-key");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.trading.mode, TradingMode::Live);
        assert_eq!(config.exchange.api_key, "test-key");
        std::env::remove_var("TRADING_MODE");
        std::env::remove_var("BINANCE_API_KEY");
    }

    #[test]
    fn yaml_round_trips_through_strategy_config_tagging() {
        let yaml = r#"
trading:
  symbols: ["BTCUSDT"]
strategies:
  - kind: scalper
    name: scalper-1
    symbols: ["BTCUSDT"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategies.len(), 1);
    }
}
