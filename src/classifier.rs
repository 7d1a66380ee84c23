//! Failure classification for trade execution outcomes.
//!
//! Maps raw error messages from the trading terminal onto a `RetryReason`,
//! which selects the backoff policy applied by the retry engine. The mapping
//! is a pure function over the message text so it can be unit tested without
//! any scheduler state.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Classification of why an execution failed, driving which backoff policy
/// applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryReason {
    /// No connection to the MT5 trade server
    Mt5Disconnected,

    /// The market for the requested symbol is closed
    MarketClosed,

    /// Account has insufficient free margin for the order
    InsufficientMargin,

    /// Execution price moved beyond the allowed slippage
    HighSlippage,

    /// Spread is too wide to execute at an acceptable price
    WideSpread,

    /// Unclassified failure - retried on a conservative default policy
    Unknown,
}

impl RetryReason {
    /// All reasons, for policy table iteration
    pub fn all() -> &'static [RetryReason] {
        &[
            Self::Mt5Disconnected,
            Self::MarketClosed,
            Self::InsufficientMargin,
            Self::HighSlippage,
            Self::WideSpread,
            Self::Unknown,
        ]
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Mt5Disconnected => "mt5_disconnected",
            Self::MarketClosed => "market_closed",
            Self::InsufficientMargin => "insufficient_margin",
            Self::HighSlippage => "high_slippage",
            Self::WideSpread => "wide_spread",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Classify an execution error into a retry reason.
///
/// Returns `None` for permanent errors, which are never retried. Retryable
/// errors that match no known pattern map to [`RetryReason::Unknown`] rather
/// than being dropped.
pub fn classify(error: &TaskError) -> Option<RetryReason> {
    match error {
        TaskError::Permanent(_) => None,
        TaskError::Retryable(msg) => Some(classify_message(msg)),
    }
}

/// Classify a raw error message into a retry reason.
///
/// Pattern table follows the error strings the MT5 terminal reports.
pub fn classify_message(message: &str) -> RetryReason {
    let msg = message.to_lowercase();

    if msg.contains("no connection")
        || msg.contains("trade server")
        || msg.contains("terminal not connected")
        || msg.contains("connection lost")
    {
        RetryReason::Mt5Disconnected
    } else if msg.contains("market closed") || msg.contains("market is closed") {
        RetryReason::MarketClosed
    } else if msg.contains("not enough money")
        || msg.contains("no money")
        || msg.contains("insufficient margin")
        || msg.contains("insufficient funds")
    {
        RetryReason::InsufficientMargin
    } else if msg.contains("slippage") || msg.contains("requote") || msg.contains("price changed") {
        RetryReason::HighSlippage
    } else if msg.contains("spread") {
        RetryReason::WideSpread
    } else {
        RetryReason::Unknown
    }
}
