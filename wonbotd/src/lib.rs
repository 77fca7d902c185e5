//! wonbotd: single-position Upbit trading daemon.
//!
//! Receives TradingView webhook signals over HTTP, opens at most one
//! spot position at a time with a market buy, and autonomously exits
//! it when the take-profit or stop-loss threshold is crossed.

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod position;
pub mod recovery;
pub mod signal_guard;
pub mod telemetry;
pub mod watcher;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
