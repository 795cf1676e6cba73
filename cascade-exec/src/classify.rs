//! Exchange error taxonomy.
//!
//! Every order failure is mapped to one [`ErrorKind`] and carried with its
//! trading context. The fingerprint `kind:code:symbol` identifies repeats
//! so logs and alerts can be de-duplicated.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use cascade_domain::{ErrorCategory, Notification, Symbol};

use crate::error::ExecError;

/// Closed set of order-failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InsufficientNotional,
    InsufficientBalance,
    RateLimited,
    ReduceOnlyRejected,
    PricePrecision,
    QuantityPrecision,
    PositionModeMismatch,
    OrderRejected,
    Unclassified,
}

impl ErrorKind {
    /// Map an exchange code (and message, for code-less variants)
    pub fn from_code(code: Option<i64>, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        match code {
            Some(-4164) => ErrorKind::InsufficientNotional,
            Some(-2019) | Some(-2018) => ErrorKind::InsufficientBalance,
            Some(-1003) | Some(-1015) | Some(429) => ErrorKind::RateLimited,
            Some(-2022) | Some(-1106) => ErrorKind::ReduceOnlyRejected,
            Some(-4014) | Some(-4013) => ErrorKind::PricePrecision,
            Some(-1111) | Some(-4003) | Some(-4005) => ErrorKind::QuantityPrecision,
            Some(-4061) => ErrorKind::PositionModeMismatch,
            Some(-2010) | Some(-2021) | Some(-5022) => ErrorKind::OrderRejected,
            _ if lower.contains("notional") => ErrorKind::InsufficientNotional,
            _ if lower.contains("too many requests") || lower.contains("rate limit") => ErrorKind::RateLimited,
            _ if lower.contains("insufficient") => ErrorKind::InsufficientBalance,
            _ => ErrorKind::Unclassified,
        }
    }

    /// Stable kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientNotional => "insufficient-notional",
            ErrorKind::InsufficientBalance => "insufficient-balance",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::ReduceOnlyRejected => "reduce-only-rejected",
            ErrorKind::PricePrecision => "price-precision",
            ErrorKind::QuantityPrecision => "quantity-precision",
            ErrorKind::PositionModeMismatch => "position-mode-mismatch",
            ErrorKind::OrderRejected => "order-rejected",
            ErrorKind::Unclassified => "unclassified",
        }
    }

    /// Human-readable hint for notifications
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientNotional => "order value below the contract minimum",
            ErrorKind::InsufficientBalance => "not enough margin available",
            ErrorKind::RateLimited => "exchange rate limit hit",
            ErrorKind::ReduceOnlyRejected => "reduce-only order rejected",
            ErrorKind::PricePrecision => "price does not match tick size",
            ErrorKind::QuantityPrecision => "quantity does not match step size",
            ErrorKind::PositionModeMismatch => "position side does not match account mode",
            ErrorKind::OrderRejected => "order rejected by exchange",
            ErrorKind::Unclassified => "unexpected exchange error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading context attached to a classified error
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub leverage: Option<u32>,
}

/// An order failure with kind, code and context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub code: Option<i64>,
    pub message: String,
    pub symbol: Symbol,
    pub context: ErrorContext,
}

impl ClassifiedError {
    /// Classify an execution error for `symbol`
    pub fn classify(error: &ExecError, symbol: &Symbol, context: ErrorContext) -> Self {
        let message = match error {
            ExecError::Api { msg, .. } => msg.clone(),
            other => other.to_string(),
        };
        Self {
            kind: ErrorKind::from_code(error.code(), &message),
            code: error.code(),
            message,
            symbol: symbol.clone(),
            context,
        }
    }

    /// `kind:code:symbol`, stable across repeats
    pub fn fingerprint(&self) -> String {
        let code = self.code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
        format!("{}:{}:{}", self.kind, code, self.symbol)
    }

    /// Notification for the broadcaster
    pub fn to_notification(&self) -> Notification {
        Notification::OrderFailed {
            symbol: self.symbol.clone(),
            kind: self.kind.as_str().to_string(),
            code: self.code,
            message: format!("{}: {}", self.kind.hint(), self.message),
        }
    }

    /// Category for error notifications
    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            ErrorKind::RateLimited | ErrorKind::Unclassified => ErrorCategory::Api,
            _ => ErrorCategory::Trading,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.fingerprint(), self.message)
    }
}

// =============================================================================
// De-duplication
// =============================================================================

/// Suppresses repeat alerts for the same fingerprint within a window.
#[derive(Debug)]
pub struct ErrorDeduper {
    window: Duration,
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ErrorDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// True for the first occurrence of `fingerprint` in the window
    pub fn should_alert(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.last_seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.retain(|_, at| now.signed_duration_since(*at) < self.window);
        if seen.contains_key(fingerprint) {
            return false;
        }
        seen.insert(fingerprint.to_string(), now);
        true
    }
}

impl Default for ErrorDeduper {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}
