//! Execution layer error types.

use thiserror::Error;

/// "Unknown order sent": cancel of an order that no longer exists
pub const CODE_UNKNOWN_ORDER: i64 = -2011;
/// "Order does not exist"
pub const CODE_NO_SUCH_ORDER: i64 = -2013;
/// "Order's position side does not match user's setting"
pub const CODE_POSITION_SIDE_MISMATCH: i64 = -4061;
/// Internal error / disconnect
pub const CODE_DISCONNECTED: i64 = -1001;
/// Timestamp outside recvWindow
pub const CODE_TIMESTAMP: i64 = -1021;

/// Errors that can occur during execution operations.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The exchange answered with an error code
    #[error("Exchange error {code}: {msg}")]
    Api {
        /// Exchange error code (negative for Binance)
        code: i64,
        /// Exchange error message
        msg: String,
    },

    /// Network or HTTP failure before an exchange answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Request could not be built (bad size, missing price, unknown symbol)
    #[error("Invalid order parameters: {0}")]
    InvalidParams(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] cascade_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] cascade_engine::EngineError),
}

impl ExecError {
    /// Exchange error code, if the exchange answered
    pub fn code(&self) -> Option<i64> {
        match self {
            ExecError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The order was already filled, cancelled or never existed
    pub fn is_order_gone(&self) -> bool {
        matches!(self.code(), Some(CODE_UNKNOWN_ORDER) | Some(CODE_NO_SUCH_ORDER))
    }

    /// Position-side parameter disagrees with the account's mode
    pub fn is_position_mode_mismatch(&self) -> bool {
        self.code() == Some(CODE_POSITION_SIDE_MISMATCH)
    }

    /// Worth retrying as-is
    pub fn is_transient(&self) -> bool {
        match self {
            ExecError::Transport(_) | ExecError::Timeout(_) => true,
            ExecError::Api { code, .. } => *code == CODE_DISCONNECTED || *code == CODE_TIMESTAMP,
            _ => false,
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64) -> ExecError {
        ExecError::Api {
            code,
            msg: "x".to_string(),
        }
    }

    #[test]
    fn test_order_gone_codes() {
        assert!(api(-2011).is_order_gone());
        assert!(api(-2013).is_order_gone());
        assert!(!api(-2010).is_order_gone());
        assert!(!ExecError::Timeout("slow".to_string()).is_order_gone());
    }

    #[test]
    fn test_mode_mismatch_code() {
        assert!(api(-4061).is_position_mode_mismatch());
        assert!(!api(-4164).is_position_mode_mismatch());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExecError::Transport("reset".to_string()).is_transient());
        assert!(api(-1001).is_transient());
        assert!(api(-1021).is_transient());
        assert!(!api(-2019).is_transient());
    }
}
