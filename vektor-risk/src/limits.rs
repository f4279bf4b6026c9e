//! Configured risk limits, grounded on `original_source/bot/config.py`'s
//! `RiskConfig`/`TradingConfig` sections.

use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::Symbol;

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_daily_drawdown: Decimal,
    pub max_consecutive_losses: u32,
    pub max_leverage: Decimal,
    /// Per-symbol cap expressed as a ratio of `max_position_size`.
    pub position_limits: HashMap<Symbol, Decimal>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::new(10, 0),
            max_daily_drawdown: Decimal::new(1000, 0),
            max_consecutive_losses: 5,
            max_leverage: Decimal::ONE,
            position_limits: HashMap::new(),
        }
    }
}
