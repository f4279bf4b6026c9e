//! CLI entrypoint: `vektor run --mode={paper|live|backtest} [--config PATH]
//! [--symbols ...] [--verbose]`. Wires a loaded [`Config`] into a live
//! [`Engine`] (paper/live) or a [`Backtester`] replay, mirroring
//! `original_source/run.py`'s mode dispatch in the teacher's `clap`+`tracing`
//! idiom instead of `argparse`+`print`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vektor::accounting::Accounting;
use vektor::backtest::{BacktestConfig, Backtester};
use vektor::config::{Config, LoggingConfig, TradingMode};
use vektor::engine::Engine;
use vektor_data::{DataIngester, Kline, StreamClient};
use vektor_execution::{ExchangeClient, OrderManager, RestExchangeClient};
use vektor_instrument::{Asset, Symbol};
use vektor_integration::{EngineError, InMemoryTradeStore, RateLimiter, RateQuota};
use vektor_risk::{RiskAlertHook, RiskEvent, RiskLimits, RiskManager, Severity};
use vektor_strategy::{
    MarketMaker, PairsArbitrage, Scalper, Strategy, StrategyConfig, StrategyRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "vektor", version, about = "Algorithmic trading engine core")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Start the engine in the given trading mode.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,
    #[arg(long)]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Paper,
    Live,
    Backtest,
}

impl From<ModeArg> for TradingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Paper => TradingMode::Paper,
            ModeArg::Live => TradingMode::Live,
            ModeArg::Backtest => TradingMode::Backtest,
        }
    }
}

/// Routes every [`RiskEvent`] the risk manager emits through `tracing`, at a
/// severity matching the event's own, per §7's propagation policy.
#[derive(Debug, Default)]
struct TracingAlertHook;

impl RiskAlertHook for TracingAlertHook {
    fn alert(&self, event: RiskEvent) {
        match event.severity {
            Severity::Info => info!(kind = ?event.kind, symbol = ?event.symbol, "{}", event.message),
            Severity::Warning => warn!(kind = ?event.kind, symbol = ?event.symbol, "{}", event.message),
            Severity::Error | Severity::Critical => {
                error!(kind = ?event.kind, symbol = ?event.symbol, "{}", event.message)
            }
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let CliCommand::Run(args) = cli.command;

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {error}");
            return ExitCode::from(1);
        }
    };

    if let Some(mode) = args.mode {
        config.trading.mode = mode.into();
    }
    if !args.symbols.is_empty() {
        config.trading.symbols = args.symbols.iter().map(Symbol::new).collect();
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    init_tracing(&config.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(Outcome::Clean) => ExitCode::from(0),
        Ok(Outcome::Interrupted) => ExitCode::from(130),
        Err(error) => {
            error!(%error, "fatal error");
            ExitCode::from(1)
        }
    }
}

enum Outcome {
    Clean,
    Interrupted,
}

async fn run(config: Config) -> Result<Outcome, EngineError> {
    match config.trading.mode {
        TradingMode::Backtest => run_backtest(config).await.map(|()| Outcome::Clean),
        TradingMode::Paper | TradingMode::Live => run_live(config).await,
    }
}

fn risk_limits_from_config(config: &Config) -> RiskLimits {
    RiskLimits {
        max_position_size: config.trading.max_position_size,
        max_daily_drawdown: config.trading.max_daily_drawdown,
        max_consecutive_losses: config.trading.max_consecutive_losses,
        max_leverage: config.risk.max_leverage,
        position_limits: HashMap::new(),
    }
}

/// Builds one concrete [`Strategy`] per configured entry, matching each
/// [`StrategyConfig`] variant to its strategy type.
fn build_strategies(entries: &[StrategyConfig]) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for entry in entries {
        let strategy: Box<dyn Strategy> = match entry {
            StrategyConfig::Scalper { name, symbols, params } => Box::new(Scalper::new(
                name.clone(),
                symbols.iter().map(Symbol::new).collect(),
                params.clone(),
            )),
            StrategyConfig::MarketMaker { name, symbols, params } => Box::new(MarketMaker::new(
                name.clone(),
                symbols.iter().map(Symbol::new).collect(),
                params.clone(),
            )),
            StrategyConfig::PairsArbitrage { name, pairs, params } => Box::new(PairsArbitrage::new(
                name.clone(),
                pairs.iter().map(|(a, b)| (Symbol::new(a), Symbol::new(b))).collect(),
                params.clone(),
            )),
        };
        registry.register(strategy);
    }
    registry
}

fn strategy_config_name(config: &StrategyConfig) -> &str {
    match config {
        StrategyConfig::Scalper { name, .. }
        | StrategyConfig::MarketMaker { name, .. }
        | StrategyConfig::PairsArbitrage { name, .. } => name,
    }
}

/// Subscribes to the combined-stream suffixes the [`vektor_data::stream`]
/// parser recognizes for every configured symbol.
fn streams_for_symbols(symbols: &[Symbol]) -> Vec<String> {
    symbols
        .iter()
        .flat_map(|symbol| {
            let lower = symbol.as_str().to_lowercase();
            [format!("{lower}@aggTrade"), format!("{lower}@depth"), format!("{lower}@kline_1m")]
        })
        .collect()
}

async fn run_live(config: Config) -> Result<Outcome, EngineError> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let base_url = url::Url::parse(&config.exchange.base_url)
        .map_err(|error| EngineError::Fatal(format!("invalid exchange base url: {error}")))?;
    let ws_url = url::Url::parse(&config.exchange.ws_base_url)
        .map_err(|error| EngineError::Fatal(format!("invalid exchange websocket url: {error}")))?;

    let rate_limiter = RateLimiter::new(RateQuota::default());
    let exchange: Arc<dyn ExchangeClient> = Arc::new(RestExchangeClient::new(
        base_url,
        config.exchange.api_key.clone(),
        config.exchange.api_secret.clone(),
        rate_limiter,
    ));

    let orders = Arc::new(OrderManager::new(exchange.clone()));
    let accounting = Arc::new(Accounting::new(Arc::new(InMemoryTradeStore::new())));
    let risk = Arc::new(RiskManager::new(
        risk_limits_from_config(&config),
        config.risk.max_leverage,
        TracingAlertHook,
    ));
    let strategies = build_strategies(&config.strategies);

    let mut engine = Engine::new(DataIngester::new(), strategies, risk, orders, accounting, exchange);
    engine.initialize().await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut stream_client = StreamClient::new(ws_url, events_tx);
    stream_client.subscribe(streams_for_symbols(&config.trading.symbols));

    let (stream_shutdown_tx, stream_shutdown_rx) = oneshot::channel();
    let shutdown_token = engine.shutdown_token();
    tokio::spawn(async move {
        shutdown_token.cancelled().await;
        let _ = stream_shutdown_tx.send(());
    });
    let stream_handle = tokio::spawn(async move {
        if let Err(error) = stream_client.run(stream_shutdown_rx).await {
            warn!(%error, "stream client terminated");
        }
    });

    info!(mode = ?config.trading.mode, symbols = ?config.trading.symbols, "engine starting");
    engine.run(events_rx).await;
    engine.shutdown().await;
    let _ = stream_handle.await;

    if interrupted.load(Ordering::SeqCst) {
        Ok(Outcome::Interrupted)
    } else {
        Ok(Outcome::Clean)
    }
}

/// A single OHLCV record as it appears in a historical data file, convertible
/// into [`Kline`] (which itself carries no `serde` impls since the live path
/// never (de)serializes it).
#[derive(Debug, Clone, serde::Deserialize)]
struct KlineRecord {
    open_time: chrono::DateTime<chrono::Utc>,
    close_time: chrono::DateTime<chrono::Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    #[serde(default)]
    trades: u64,
}

impl From<KlineRecord> for Kline {
    fn from(record: KlineRecord) -> Self {
        Kline {
            open_time: record.open_time,
            close_time: record.close_time,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            trades: record.trades,
            is_closed: true,
        }
    }
}

/// Loads `<symbol>.json` (an array of [`KlineRecord`]s) from `dir` for every
/// configured symbol. The original `load_historical_data` was a placeholder
/// that returned an empty dict; this is its first real implementation.
fn load_historical_klines(dir: &std::path::Path, symbols: &[Symbol]) -> Result<HashMap<Symbol, Vec<Kline>>, EngineError> {
    let mut klines = HashMap::new();
    for symbol in symbols {
        let path = dir.join(format!("{}.json", symbol.as_str()));
        let contents = std::fs::read_to_string(&path)
            .map_err(|error| EngineError::Fatal(format!("reading historical data {}: {error}", path.display())))?;
        let records: Vec<KlineRecord> = serde_json::from_str(&contents)
            .map_err(|error| EngineError::Fatal(format!("parsing historical data {}: {error}", path.display())))?;
        klines.insert(symbol.clone(), records.into_iter().map(Kline::from).collect());
    }
    Ok(klines)
}

async fn run_backtest(config: Config) -> Result<(), EngineError> {
    if config.strategies.len() != 1 {
        return Err(EngineError::Fatal(
            "backtest mode requires exactly one configured strategy".to_string(),
        ));
    }
    let strategy_config = config.strategies[0].clone();
    let strategy_name = strategy_config_name(&strategy_config).to_string();
    let strategy_factory: Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync> = Arc::new(move || {
        build_strategies(std::slice::from_ref(&strategy_config))
            .remove(&strategy_name)
            .expect("registry was built from exactly this one config")
    });

    let data_dir = std::env::var("VEKTOR_BACKTEST_DATA_DIR").unwrap_or_else(|_| "backtest-data".to_string());
    let klines = load_historical_klines(std::path::Path::new(&data_dir), &config.trading.symbols)?;

    let backtest_config = BacktestConfig {
        initial_capital: config.backtest.initial_capital,
        commission_bps: config.backtest.commission_bps,
        slippage_bps: config.backtest.slippage_bps,
        latency_mean_ms: config.backtest.latency_mean_ms,
        latency_std_ms: config.backtest.latency_std_ms,
        fee_asset: Asset::from(config.trading.base_currency.as_str()),
    };
    let backtester = Backtester::new(strategy_factory, backtest_config);

    info!(symbols = ?config.trading.symbols, "running backtest");
    let result = backtester.run(&klines).await;

    info!(
        final_capital = %result.final_capital,
        total_return = %result.total_return,
        max_drawdown = %result.max_drawdown,
        sharpe = result.sharpe,
        win_rate = %result.win_rate,
        total_trades = result.total_trades,
        "backtest complete"
    );
    println!(
        "final_capital={} total_return={} max_drawdown={} sharpe={:.4} win_rate={} total_trades={} winning={} losing={}",
        result.final_capital,
        result.total_return,
        result.max_drawdown,
        result.sharpe,
        result.win_rate,
        result.total_trades,
        result.winning_trades,
        result.losing_trades,
    );
    Ok(())
}
