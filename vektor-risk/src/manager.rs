//! Pre-trade risk gate (§4.6). Checks run in a fixed order with short-circuit
//! on first failure: breach gate, position limits, daily drawdown,
//! consecutive losses, leverage — matching `original_source/bot/risk.py::check_signal`.

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use vektor_instrument::{Side, Symbol};

use crate::alert::{RiskAlertHook, RiskEvent, RiskEventKind, Severity};
use crate::limits::RiskLimits;
use crate::position_tracker::ShadowPositionTracker;

/// The minimal shape of a trading signal the risk gate needs to evaluate —
/// kept independent of the strategy crate's richer `Signal` type so this
/// crate has no dependency on strategy internals.
#[derive(Debug, Clone)]
pub struct RiskCheckRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
}

#[derive(Debug, Default)]
struct State {
    daily_pnl: HashMap<Symbol, Decimal>,
    consecutive_losses: HashMap<Symbol, u32>,
    breach: bool,
    breach_reason: String,
}

/// Pre-trade gate evaluated synchronously for every signal before it reaches
/// the order manager.
pub struct RiskManager<H: RiskAlertHook> {
    limits: RiskLimits,
    leverage: Decimal,
    state: Mutex<State>,
    positions: Mutex<ShadowPositionTracker>,
    hook: H,
}

impl<H: RiskAlertHook> RiskManager<H> {
    pub fn new(limits: RiskLimits, leverage: Decimal, hook: H) -> Self {
        Self {
            limits,
            leverage,
            state: Mutex::new(State::default()),
            positions: Mutex::new(ShadowPositionTracker::new()),
            hook,
        }
    }

    fn emit(&self, kind: RiskEventKind, symbol: Option<Symbol>, message: String, severity: Severity) {
        self.hook.alert(RiskEvent {
            kind,
            symbol,
            message,
            severity,
            timestamp: Utc::now(),
        });
    }

    /// Runs the ordered check sequence; returns `true` iff the signal is allowed.
    pub fn check_signal(&self, request: &RiskCheckRequest) -> bool {
        if self.check_breach() {
            return false;
        }
        if !self.check_position_limits(request) {
            return false;
        }
        if !self.check_daily_drawdown() {
            return false;
        }
        if !self.check_consecutive_losses(&request.symbol) {
            return false;
        }
        self.check_leverage(&request.symbol)
    }

    fn check_breach(&self) -> bool {
        let state = self.state.lock();
        if state.breach {
            self.emit(
                RiskEventKind::RiskBreach { reason: state.breach_reason.clone() },
                None,
                format!("risk management disabled due to: {}", state.breach_reason),
                Severity::Critical,
            );
            true
        } else {
            false
        }
    }

    fn check_position_limits(&self, request: &RiskCheckRequest) -> bool {
        let new_size = self
            .positions
            .lock()
            .projected_size(&request.symbol, request.side, request.quantity);

        if new_size.abs() > self.limits.max_position_size {
            self.emit(
                RiskEventKind::PositionLimitExceeded { new_size, limit: self.limits.max_position_size },
                Some(request.symbol.clone()),
                format!("position size {new_size} exceeds limit {}", self.limits.max_position_size),
                Severity::Warning,
            );
            return false;
        }

        if let Some(ratio) = self.limits.position_limits.get(&request.symbol) {
            let symbol_limit = self.limits.max_position_size * ratio;
            if new_size.abs() > symbol_limit {
                self.emit(
                    RiskEventKind::SymbolPositionLimitExceeded { new_size, limit: symbol_limit },
                    Some(request.symbol.clone()),
                    format!("position size {new_size} exceeds symbol limit {symbol_limit}"),
                    Severity::Warning,
                );
                return false;
            }
        }
        true
    }

    fn check_daily_drawdown(&self) -> bool {
        let mut state = self.state.lock();
        let total: Decimal = state.daily_pnl.values().sum();
        if total < -self.limits.max_daily_drawdown {
            state.breach = true;
            state.breach_reason = "daily drawdown exceeded".to_string();
            self.emit(
                RiskEventKind::DailyDrawdownExceeded { daily_pnl: total, limit: self.limits.max_daily_drawdown },
                None,
                format!("daily P&L {total} exceeds drawdown limit {}", self.limits.max_daily_drawdown),
                Severity::Critical,
            );
            false
        } else {
            true
        }
    }

    fn check_consecutive_losses(&self, symbol: &Symbol) -> bool {
        let count = *self.state.lock().consecutive_losses.get(symbol).unwrap_or(&0);
        if count >= self.limits.max_consecutive_losses {
            self.emit(
                RiskEventKind::ConsecutiveLossesExceeded { count, limit: self.limits.max_consecutive_losses },
                Some(symbol.clone()),
                format!("consecutive losses {count} exceeds limit {}", self.limits.max_consecutive_losses),
                Severity::Warning,
            );
            false
        } else {
            true
        }
    }

    fn check_leverage(&self, symbol: &Symbol) -> bool {
        if self.leverage > self.limits.max_leverage {
            self.emit(
                RiskEventKind::LeverageLimitExceeded { leverage: self.leverage, limit: self.limits.max_leverage },
                Some(symbol.clone()),
                format!("leverage {} exceeds limit {}", self.leverage, self.limits.max_leverage),
                Severity::Warning,
            );
            false
        } else {
            true
        }
    }

    /// Updates the shadow position and, on a reduction, the realized-loss
    /// streak counter (a losing reduction increments, anything else resets).
    pub fn update_position(&self, symbol: &Symbol, side: Side, quantity: Decimal, price: Decimal, realized_pnl: Option<Decimal>) {
        self.positions.lock().apply_fill(symbol, side, quantity, price);
        if let Some(pnl) = realized_pnl {
            let mut state = self.state.lock();
            *state.daily_pnl.entry(symbol.clone()).or_insert(Decimal::ZERO) += pnl;
            let streak = state.consecutive_losses.entry(symbol.clone()).or_insert(0);
            if pnl < Decimal::ZERO {
                *streak += 1;
            } else {
                *streak = 0;
            }
        }
    }

    pub fn update_mark_price(&self, symbol: &Symbol, price: Decimal) {
        self.positions.lock().update_mark_price(symbol, price);
    }

    pub fn reset_breach(&self) {
        let mut state = self.state.lock();
        state.breach = false;
        state.breach_reason.clear();
    }

    pub fn reset_daily_pnl(&self) {
        self.state.lock().daily_pnl.clear();
    }

    pub fn is_breached(&self) -> bool {
        self.state.lock().breach
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::VecAlertHook;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn manager() -> RiskManager<Arc<VecAlertHook>> {
        RiskManager::new(
            RiskLimits {
                max_position_size: dec!(10),
                max_daily_drawdown: dec!(500),
                max_consecutive_losses: 3,
                max_leverage: dec!(1),
                position_limits: HashMap::new(),
            },
            dec!(1),
            Arc::new(VecAlertHook::new()),
        )
    }

    #[test]
    fn kill_switch_latches_and_rejects_until_reset() {
        let mgr = manager();
        mgr.update_position(&Symbol::new("BTCUSDT"), Side::Sell, dec!(1), dec!(100), Some(dec!(-501)));
        let request = RiskCheckRequest { symbol: Symbol::new("BTCUSDT"), side: Side::Buy, quantity: dec!(1) };
        assert!(!mgr.check_signal(&request));
        assert!(mgr.is_breached());
        mgr.reset_breach();
        assert!(mgr.check_signal(&request));
    }

    #[test]
    fn position_limit_rejects_oversized_signal() {
        let mgr = manager();
        let request = RiskCheckRequest { symbol: Symbol::new("BTCUSDT"), side: Side::Buy, quantity: dec!(11) };
        assert!(!mgr.check_signal(&request));
    }

    #[test]
    fn consecutive_losses_rejects_after_streak() {
        let mgr = manager();
        let symbol = Symbol::new("ETHUSDT");
        for _ in 0..3 {
            mgr.update_position(&symbol, Side::Sell, dec!(1), dec!(100), Some(dec!(-1)));
        }
        let request = RiskCheckRequest { symbol: symbol.clone(), side: Side::Buy, quantity: dec!(1) };
        assert!(!mgr.check_signal(&request));
    }

    #[test]
    fn check_order_short_circuits_at_breach_before_position_limits() {
        let mgr = manager();
        mgr.update_position(&Symbol::new("BTCUSDT"), Side::Sell, dec!(1), dec!(100), Some(dec!(-600)));
        assert!(mgr.is_breached());
        let request = RiskCheckRequest { symbol: Symbol::new("BTCUSDT"), side: Side::Buy, quantity: dec!(1000) };
        assert!(!mgr.check_signal(&request));
        let hook = &mgr.hook;
        let events = hook.events();
        assert!(matches!(events.last().unwrap().kind, RiskEventKind::RiskBreach { .. }));
    }
}
