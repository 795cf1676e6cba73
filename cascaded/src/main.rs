//! Cascade Daemon
//!
//! Trades liquidation cascades on Binance USDT-M futures and keeps every
//! open position protected by a stop-loss and a take-profit.
//!
//! # Usage
//!
//! ```bash
//! # Paper trading against the testnet
//! cargo run -p cascaded
//!
//! # Live trading with a custom symbols file
//! CASCADE_PAPER_MODE=false CASCADE_SYMBOLS_FILE=symbols.json cargo run -p cascaded
//! ```
//!
//! # Environment Variables
//!
//! - `CASCADE_ENV`: Environment (test, development, production)
//! - `CASCADE_API_HOST`: API host (default: 0.0.0.0)
//! - `CASCADE_API_PORT`: API port (default: 8080)
//! - `CASCADE_API_KEY` / `CASCADE_API_SECRET`: Binance credentials (paper mode without them)
//! - `CASCADE_PAPER_MODE`: Simulate entries (default: true)
//! - `CASCADE_HEDGE_MODE`: Assumed position mode until the exchange answers (default: false)
//! - `CASCADE_MAX_OPEN_POSITIONS`: Open positions plus pending entries (default: 5)
//! - `CASCADE_SYMBOLS_FILE`: Per-symbol settings (default: symbols.json)

use cascaded::{Config, Daemon, Environment};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cascaded=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        paper_mode = config.effective_paper_mode(),
        symbols = ?config.symbols.symbols(),
        "Cascade Daemon"
    );

    // Create and run daemon
    let daemon = match config.environment {
        Environment::Test => Daemon::new_stub(config)?,
        _ => Daemon::live(config)?,
    };
    daemon.run().await?;

    Ok(())
}
