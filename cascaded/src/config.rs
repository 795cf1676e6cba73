//! Daemon configuration.
//!
//! Global settings come from `CASCADE_*` environment variables (a `.env`
//! file is loaded first if present). Per-symbol trading settings come from
//! a JSON file mapping symbol to [`SymbolConfig`].

use crate::error::{DaemonError, DaemonResult};
use cascade_domain::{ApiCredentials, OrderSide, Side, Symbol};
use cascade_engine::VolumeThresholds;
use cascade_exec::{EntryOrderType, EntryParams, ProtectionParams};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Account-wide trading settings
    pub trading: TradingConfig,

    /// Timer intervals and delays
    pub timing: TimingConfig,

    /// Per-symbol settings
    pub symbols: SymbolBook,

    /// Exchange API key pair; `None` forces paper mode without a user stream
    pub credentials: Option<ApiCredentials>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Account-wide trading settings.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Simulate entries instead of sending them
    pub paper_mode: bool,
    /// Confirmed plus pending positions allowed at once
    pub max_open_positions: usize,
    /// Initial value of the cached account position mode
    pub hedge_mode: bool,
}

/// Timer intervals and delays.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    pub listen_key_keepalive: Duration,
    pub sweep_interval: Duration,
    pub orphan_cleanup_interval: Duration,
    pub risk_check_interval: Duration,
    pub mode_resync_interval: Duration,
    pub pending_prune_interval: Duration,
    pub reconnect_delay: Duration,
    /// Delay before re-checking protection after an unchanged account update
    pub ensure_protected_debounce: Duration,
    /// First cancel retry delay; doubles on every attempt
    pub cancel_backoff_base: Duration,
    pub cancel_attempts: u32,
    /// Streamed VWAP values older than this are refetched
    pub vwap_max_age: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment (futures testnet)
    Development,
    /// Production environment (mainnet)
    Production,
}

impl Environment {
    /// REST base URL for this environment
    pub fn rest_url(&self) -> &'static str {
        match self {
            Environment::Production => cascade_connectors::MAINNET_URL,
            _ => cascade_connectors::TESTNET_URL,
        }
    }

    /// WebSocket base URL for this environment
    pub fn ws_url(&self) -> &'static str {
        match self {
            Environment::Production => cascade_connectors::FUTURES_WS_URL,
            _ => cascade_connectors::TESTNET_WS_URL,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and the symbols file.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let trading = Self::load_trading_config()?;
        let credentials = Self::load_credentials();

        let symbols_file =
            PathBuf::from(env::var("CASCADE_SYMBOLS_FILE").unwrap_or_else(|_| "symbols.json".to_string()));
        let symbols = if symbols_file.exists() {
            SymbolBook::load(&symbols_file)?
        } else {
            warn!(path = %symbols_file.display(), "Symbols file not found, no symbol will be traded");
            SymbolBook::default()
        };

        Ok(Self {
            api,
            trading,
            timing: TimingConfig::default(),
            symbols,
            credentials,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            trading: TradingConfig {
                paper_mode: false,
                max_open_positions: 5,
                hedge_mode: false,
            },
            timing: TimingConfig::test(),
            symbols: SymbolBook::default(),
            credentials: None,
            environment: Environment::Test,
        }
    }

    /// Paper mode, forced on when no credentials are configured
    pub fn effective_paper_mode(&self) -> bool {
        self.trading.paper_mode || !self.has_credentials()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(ApiCredentials::is_complete)
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("CASCADE_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid CASCADE_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("CASCADE_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("CASCADE_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid CASCADE_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_trading_config() -> DaemonResult<TradingConfig> {
        let paper_mode = Self::load_bool_env("CASCADE_PAPER_MODE", true)?;
        let hedge_mode = Self::load_bool_env("CASCADE_HEDGE_MODE", false)?;

        let max_str = env::var("CASCADE_MAX_OPEN_POSITIONS").unwrap_or_else(|_| "5".to_string());
        let max_open_positions = max_str
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| DaemonError::Config(format!("Invalid CASCADE_MAX_OPEN_POSITIONS: {}", max_str)))?;

        Ok(TradingConfig {
            paper_mode,
            max_open_positions,
            hedge_mode,
        })
    }

    fn load_credentials() -> Option<ApiCredentials> {
        let api_key = env::var("CASCADE_API_KEY").ok()?;
        let api_secret = env::var("CASCADE_API_SECRET").ok()?;
        let credentials = ApiCredentials::new(api_key, api_secret);
        credentials.is_complete().then_some(credentials)
    }

    fn load_bool_env(key: &str, default: bool) -> DaemonResult<bool> {
        match env::var(key) {
            Ok(val) => match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            },
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            trading: TradingConfig {
                paper_mode: true,
                max_open_positions: 5,
                hedge_mode: false,
            },
            timing: TimingConfig::default(),
            symbols: SymbolBook::default(),
            credentials: None,
            environment: Environment::Development,
        }
    }
}

impl TimingConfig {
    /// Short intervals and no backoff, for tests
    pub fn test() -> Self {
        Self {
            listen_key_keepalive: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(200),
            orphan_cleanup_interval: Duration::from_millis(200),
            risk_check_interval: Duration::from_millis(500),
            mode_resync_interval: Duration::from_millis(500),
            pending_prune_interval: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(50),
            ensure_protected_debounce: Duration::ZERO,
            cancel_backoff_base: Duration::ZERO,
            cancel_attempts: 4,
            vwap_max_age: Duration::from_secs(5),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            listen_key_keepalive: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30),
            orphan_cleanup_interval: Duration::from_secs(30),
            risk_check_interval: Duration::from_secs(5 * 60),
            mode_resync_interval: Duration::from_secs(2 * 60),
            pending_prune_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            ensure_protected_debounce: Duration::from_millis(100),
            cancel_backoff_base: Duration::from_secs(1),
            cancel_attempts: 4,
            vwap_max_age: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Per-symbol configuration
// =============================================================================

/// Trading settings for one symbol, as stored in the symbols file.
///
/// Every field has a default, so `{}` is a valid entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymbolConfig {
    pub leverage: u32,
    /// Trade size in margin (USDT)
    pub trade_size: Decimal,
    pub long_trade_size: Option<Decimal>,
    pub short_trade_size: Option<Decimal>,
    #[serde(rename = "tpPercent")]
    pub take_profit_percent: Decimal,
    #[serde(rename = "slPercent")]
    pub stop_loss_percent: Decimal,

    /// Per-event liquidation notional (USDT) required to trade
    pub volume_threshold: Decimal,
    pub long_volume_threshold: Option<Decimal>,
    pub short_volume_threshold: Option<Decimal>,

    /// Use the rolling-window volume instead of the per-event volume
    pub use_threshold: bool,
    pub cumulative_threshold: Decimal,
    pub long_cumulative_threshold: Option<Decimal>,
    pub short_cumulative_threshold: Option<Decimal>,
    #[serde(rename = "cooldownSeconds")]
    pub cooldown_secs: i64,

    pub order_type: EntryOrderType,
    pub price_offset_bps: Decimal,
    pub max_slippage_bps: Decimal,
    pub post_only: bool,

    /// Margin cap for this symbol across all its positions
    pub max_position_margin: Option<Decimal>,

    pub vwap_protection: bool,
    pub vwap_timeframe: String,
    pub vwap_lookback: u32,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            leverage: 10,
            trade_size: Decimal::from(100),
            long_trade_size: None,
            short_trade_size: None,
            take_profit_percent: Decimal::from(3),
            stop_loss_percent: Decimal::from(2),
            volume_threshold: Decimal::from(10_000),
            long_volume_threshold: None,
            short_volume_threshold: None,
            use_threshold: false,
            cumulative_threshold: Decimal::from(50_000),
            long_cumulative_threshold: None,
            short_cumulative_threshold: None,
            cooldown_secs: cascade_engine::threshold::DEFAULT_COOLDOWN_SECS,
            order_type: EntryOrderType::Limit,
            price_offset_bps: Decimal::ONE,
            max_slippage_bps: Decimal::from(50),
            post_only: false,
            max_position_margin: None,
            vwap_protection: false,
            vwap_timeframe: "5m".to_string(),
            vwap_lookback: 100,
        }
    }
}

impl SymbolConfig {
    /// Margin per trade for an entry in `side`
    pub fn trade_size_for(&self, side: OrderSide) -> Decimal {
        match Side::opened_by(side) {
            Side::Long => self.long_trade_size.unwrap_or(self.trade_size),
            Side::Short => self.short_trade_size.unwrap_or(self.trade_size),
        }
    }

    pub fn entry_params(&self, side: OrderSide) -> EntryParams {
        EntryParams {
            leverage: self.leverage,
            margin: self.trade_size_for(side),
            order_type: self.order_type,
            price_offset_bps: self.price_offset_bps,
            max_slippage_bps: self.max_slippage_bps,
            post_only: self.post_only,
        }
    }

    pub fn protection_params(&self) -> ProtectionParams {
        ProtectionParams {
            stop_loss_percent: self.stop_loss_percent,
            take_profit_percent: self.take_profit_percent,
        }
    }

    pub fn instant_thresholds(&self) -> VolumeThresholds {
        VolumeThresholds {
            default: self.volume_threshold,
            long: self.long_volume_threshold,
            short: self.short_volume_threshold,
        }
    }

    pub fn cumulative_thresholds(&self) -> VolumeThresholds {
        VolumeThresholds {
            default: self.cumulative_threshold,
            long: self.long_cumulative_threshold,
            short: self.short_cumulative_threshold,
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs)
    }

    /// Reject values that would make every trade fail or misbehave
    pub fn validate(&self, symbol: &Symbol) -> DaemonResult<()> {
        let invalid = |field: &str, value: &dyn std::fmt::Display| {
            Err(DaemonError::Config(format!("{}: invalid {} {}", symbol, field, value)))
        };

        if self.leverage == 0 || self.leverage > cascade_domain::Leverage::MAX {
            return invalid("leverage", &self.leverage);
        }
        for (field, value) in [("tradeSize", self.trade_size), ("tpPercent", self.take_profit_percent), ("slPercent", self.stop_loss_percent)] {
            if value <= Decimal::ZERO {
                return invalid(field, &value);
            }
        }
        if self.stop_loss_percent >= Decimal::ONE_HUNDRED {
            return invalid("slPercent", &self.stop_loss_percent);
        }
        if self.cooldown_secs < 0 {
            return invalid("cooldownSeconds", &self.cooldown_secs);
        }
        if self.max_slippage_bps < Decimal::ZERO {
            return invalid("maxSlippageBps", &self.max_slippage_bps);
        }
        Ok(())
    }
}

/// Per-symbol settings plus the fallback used for unconfigured symbols.
///
/// Unconfigured symbols are never traded, but positions on them still get
/// protection from the fallback's SL/TP percentages.
#[derive(Debug, Clone, Default)]
pub struct SymbolBook {
    symbols: HashMap<Symbol, SymbolConfig>,
    fallback: SymbolConfig,
}

impl SymbolBook {
    /// Read and validate a symbols file.
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON object of symbol → settings.
    pub fn from_json(raw: &str) -> DaemonResult<Self> {
        let parsed: HashMap<String, SymbolConfig> =
            serde_json::from_str(raw).map_err(|e| DaemonError::Config(format!("Invalid symbols file: {}", e)))?;

        let mut book = Self::default();
        for (name, config) in parsed {
            let symbol = Symbol::from_str(&name)?;
            config.validate(&symbol)?;
            book.symbols.insert(symbol, config);
        }
        Ok(book)
    }

    /// Add or replace one symbol
    pub fn with_symbol(mut self, symbol: Symbol, config: SymbolConfig) -> Self {
        self.symbols.insert(symbol, config);
        self
    }

    /// Settings of a configured symbol
    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolConfig> {
        self.symbols.get(symbol)
    }

    /// Settings of a symbol, or the fallback
    pub fn get_or_default(&self, symbol: &Symbol) -> &SymbolConfig {
        self.symbols.get(symbol).unwrap_or(&self.fallback)
    }

    pub fn is_configured(&self, symbol: &Symbol) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
