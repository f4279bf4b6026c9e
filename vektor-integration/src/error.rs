//! Shared error taxonomy. Every component-level error implements `Into<EngineError>`
//! so the engine can classify and route failures uniformly (§7).

use thiserror::Error;

/// The kind of failure, independent of which component raised it. Used by the
/// engine to decide whether to retry, notify risk, or trigger shutdown.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Connection reset, timeout, 5xx — retried internally; surfaced only after exhaustion.
    TransientNetwork,
    /// 429 / 418 — advisory backoff already applied by the caller.
    RateLimited,
    /// 4xx (non-429) with an exchange error code. Never retried.
    ExchangeRejected,
    /// Local precondition failure before anything reached the exchange.
    ValidationFailure,
    /// Denied by pre-trade risk checks.
    RiskRejection,
    /// Local state drifted from the exchange (sequence gap, reconciliation mismatch).
    StaleState,
    /// Unrecoverable: auth failure, bad config. Triggers shutdown.
    Fatal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("exchange rejected request (code {code}): {message}")]
    ExchangeRejected { code: i64, message: String },

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("risk rejected signal: {0}")]
    RiskRejection(String),

    #[error("local state stale: {0}")]
    StaleState(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            EngineError::RateLimited(_) => ErrorKind::RateLimited,
            EngineError::ExchangeRejected { .. } => ErrorKind::ExchangeRejected,
            EngineError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            EngineError::RiskRejection(_) => ErrorKind::RiskRejection,
            EngineError::StaleState(_) => ErrorKind::StaleState,
            EngineError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the engine should initiate shutdown on observing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = EngineError::ExchangeRejected {
            code: -2010,
            message: "insufficient balance".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ExchangeRejected);
        assert!(!err.is_fatal());
        assert!(EngineError::Fatal("bad api key".into()).is_fatal());
    }
}
