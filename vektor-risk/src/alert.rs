//! Risk event taxonomy and the hook trait alerts are dispatched through.

use chrono::{DateTime, Utc};
use vektor_instrument::Symbol;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A closed set of risk event kinds — never a free-form string — so the
/// engine can match on them exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEventKind {
    RiskBreach { reason: String },
    PositionLimitExceeded { new_size: rust_decimal::Decimal, limit: rust_decimal::Decimal },
    SymbolPositionLimitExceeded { new_size: rust_decimal::Decimal, limit: rust_decimal::Decimal },
    DailyDrawdownExceeded { daily_pnl: rust_decimal::Decimal, limit: rust_decimal::Decimal },
    ConsecutiveLossesExceeded { count: u32, limit: u32 },
    LeverageLimitExceeded { leverage: rust_decimal::Decimal, limit: rust_decimal::Decimal },
}

#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub kind: RiskEventKind,
    pub symbol: Option<Symbol>,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Receives [`RiskEvent`]s as `RiskManager` emits them. Implemented by the
/// engine's routing layer in production, and by a recording fake in tests —
/// mirroring the teacher's alert-hook pattern for risk trackers.
pub trait RiskAlertHook: Send + Sync {
    fn alert(&self, event: RiskEvent);
}

/// Records every alert it receives; used in tests and for the in-process
/// audit trail.
#[derive(Debug, Default)]
pub struct VecAlertHook {
    events: parking_lot::Mutex<Vec<RiskEvent>>,
}

impl VecAlertHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RiskEvent> {
        self.events.lock().clone()
    }
}

impl RiskAlertHook for VecAlertHook {
    fn alert(&self, event: RiskEvent) {
        self.events.lock().push(event);
    }
}

impl<H: RiskAlertHook + ?Sized> RiskAlertHook for std::sync::Arc<H> {
    fn alert(&self, event: RiskEvent) {
        (**self).alert(event);
    }
}
