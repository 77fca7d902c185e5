//! Startup recovery.
//!
//! A crash or restart can leave a bought asset sitting in the account
//! with no in-memory position guarding it. Recovery runs once at
//! startup, before the API accepts signals: it looks for non-KRW
//! holdings and, when the operator configured a recovery market and
//! thresholds, reinstalls the holding as an OPEN position so the
//! watcher resumes guarding it.
//!
//! Recovery is best-effort: every failure path logs and leaves the
//! book empty rather than blocking startup.

use rust_decimal::Decimal;
use tracing::{error, warn};

use wonbot_domain::{Fraction, Market, Price, Quantity};
use wonbot_exec::{AccountBalance, ExchangePort};

use crate::config::RecoveryConfig;
use crate::position::PositionManager;
use crate::telemetry::{EventKind, Telemetry};

/// Attempt to recover an orphaned holding into the book.
///
/// Returns true when a position was seeded (the caller starts the
/// watcher).
pub async fn recover_position<E: ExchangePort>(
    exchange: &E,
    manager: &PositionManager,
    config: &RecoveryConfig,
    telemetry: &Telemetry,
) -> bool {
    let accounts = match exchange.get_accounts().await {
        Ok(accounts) => {
            telemetry.record_api_ok();
            accounts
        },
        Err(e) => {
            error!(error = %e, "Account fetch failed, skipping recovery");
            telemetry.record_api_error(&e.user_message());
            return false;
        },
    };

    let holdings: Vec<&AccountBalance> = accounts
        .iter()
        .filter(|a| a.currency != "KRW" && a.balance > Decimal::ZERO)
        .collect();
    if holdings.is_empty() {
        return false;
    }

    if config.skip {
        warn!("Holdings detected but recovery skipped by RECOVERY_SKIP");
        return false;
    }

    let Some(market_code) = config.market.as_deref() else {
        warn!(
            holdings = holdings.len(),
            "Holdings detected but RECOVERY_MARKET is not set, skipping recovery"
        );
        return false;
    };

    let market = match Market::from_code(market_code) {
        Ok(market) => market,
        Err(e) => {
            warn!(market = market_code, error = %e, "Invalid RECOVERY_MARKET, skipping recovery");
            return false;
        },
    };

    let Some(holding) = holdings.iter().find(|a| a.currency == market.base()) else {
        warn!(
            market = %market.as_code(),
            "RECOVERY_MARKET not found in holdings, skipping recovery"
        );
        return false;
    };
    if holdings.len() > 1 {
        warn!(
            market = %market.as_code(),
            "Additional holdings exist, recovering only the configured market"
        );
    }

    let (Ok(tp), Ok(sl)) = (Fraction::new(config.tp), Fraction::new(config.sl)) else {
        warn!("RECOVERY_TP/RECOVERY_SL not set, skipping recovery");
        return false;
    };

    // Prefer the exchange-tracked average buy price; estimate from the
    // ticker when the account does not carry one.
    let entry = if holding.avg_buy_price > Decimal::ZERO {
        holding.avg_buy_price
    } else {
        warn!(market = %market.as_code(), "avg_buy_price missing, estimating from ticker");
        match exchange.get_price(&market).await {
            Ok(price) => {
                telemetry.record_api_ok();
                price.as_decimal()
            },
            Err(e) => {
                error!(error = %e, "Ticker fetch failed, skipping recovery");
                telemetry.record_api_error(&e.user_message());
                return false;
            },
        }
    };

    let (Ok(entry_price), Ok(quantity)) = (Price::new(entry), Quantity::new(holding.balance))
    else {
        warn!(market = %market.as_code(), "Holding has no usable price/volume, skipping recovery");
        return false;
    };

    match manager.seed_recovered(market.clone(), entry_price, quantity, tp, sl).await {
        Ok(position) => {
            warn!(
                market = %market.as_code(),
                entry = %position.entry_price,
                quantity = %position.quantity,
                tp = %position.tp_price,
                sl = %position.sl_price,
                "Recovered position from holdings"
            );
            telemetry.add_event(
                &format!("Recovered {}", market.as_code()),
                EventKind::Open,
                None,
            );
            true
        },
        Err(e) => {
            warn!(error = %e, "Recovery seed rejected");
            false
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
