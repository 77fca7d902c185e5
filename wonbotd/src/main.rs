//! wonbot daemon
//!
//! Webhook-driven Upbit spot trader with autonomous TP/SL exits.
//!
//! # Usage
//!
//! ```bash
//! UPBIT_ACCESS_KEY=... UPBIT_SECRET_KEY=... cargo run -p wonbotd
//! ```
//!
//! # Environment Variables
//!
//! - `UPBIT_ACCESS_KEY` / `UPBIT_SECRET_KEY`: API credentials (required)
//! - `WONBOT_API_HOST`: API host (default: 0.0.0.0)
//! - `WONBOT_API_PORT`: API port (default: 8080)
//! - `MIN_ORDER_KRW`: Minimum order notional (default: 5000)
//! - `PRICE_POLL_SEC`: Watcher poll interval (default: 1.0)
//! - `RECOVERY_MARKET` / `RECOVERY_TP` / `RECOVERY_SL`: startup recovery

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wonbotd::{Config, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("wonbotd=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        api_host = %config.api.host,
        api_port = config.api.port,
        "wonbot daemon"
    );

    let daemon = Daemon::new_upbit(config);
    daemon.run().await?;

    Ok(())
}
