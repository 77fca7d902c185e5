//! Operational telemetry for the status endpoint.
//!
//! Tracks the last exchange API outcome, the last webhook received,
//! and a bounded ring of recent events. Read by `/status` only; no
//! trading decision depends on it.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Messages longer than this are truncated before storage.
const MESSAGE_LIMIT: usize = 160;

/// Events kept in the ring.
const MAX_EVENTS: usize = 5;

fn truncate(text: &str) -> String {
    if text.len() <= MESSAGE_LIMIT {
        return text.to_string();
    }
    let cut: String = text.chars().take(MESSAGE_LIMIT.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Last exchange API outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiStatus {
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

/// Last webhook received.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookStatus {
    pub last_signal_id: Option<String>,
    pub last_received_at: Option<DateTime<Utc>>,
}

/// What kind of event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Close,
    Error,
    Info,
}

/// One recent event.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub ts: DateTime<Utc>,
    pub message: String,
    pub kind: EventKind,
    /// Realized return for close events (close/entry - 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Decimal>,
}

#[derive(Default)]
struct TelemetryInner {
    api: ApiStatus,
    webhook: WebhookStatus,
    events: VecDeque<TelemetryEvent>,
}

/// Shared telemetry recorder.
#[derive(Default)]
pub struct Telemetry {
    inner: RwLock<TelemetryInner>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_api_ok(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.api.last_ok_at = Some(Utc::now());
        }
    }

    pub fn record_api_error(&self, message: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.api.last_error_at = Some(Utc::now());
            inner.api.last_error_message = Some(truncate(message));
        }
    }

    pub fn record_webhook(&self, signal_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.webhook.last_signal_id = Some(signal_id.to_string());
            inner.webhook.last_received_at = Some(Utc::now());
        }
    }

    pub fn add_event(&self, message: &str, kind: EventKind, roi: Option<Decimal>) {
        if let Ok(mut inner) = self.inner.write() {
            if inner.events.len() == MAX_EVENTS {
                inner.events.pop_front();
            }
            inner.events.push_back(TelemetryEvent {
                ts: Utc::now(),
                message: truncate(message),
                kind,
                roi,
            });
        }
    }

    pub fn api_status(&self) -> ApiStatus {
        self.inner.read().map(|i| i.api.clone()).unwrap_or_default()
    }

    pub fn webhook_status(&self) -> WebhookStatus {
        self.inner.read().map(|i| i.webhook.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.inner
            .read()
            .map(|i| i.events.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_api_status_tracks_last_outcome() {
        let telemetry = Telemetry::new();
        assert!(telemetry.api_status().last_ok_at.is_none());

        telemetry.record_api_ok();
        assert!(telemetry.api_status().last_ok_at.is_some());

        telemetry.record_api_error("boom");
        let status = telemetry.api_status();
        assert!(status.last_error_at.is_some());
        assert_eq!(status.last_error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let telemetry = Telemetry::new();
        let long = "x".repeat(400);

        telemetry.record_api_error(&long);
        let message = telemetry.api_status().last_error_message.unwrap();
        assert_eq!(message.len(), MESSAGE_LIMIT);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_event_ring_is_bounded() {
        let telemetry = Telemetry::new();
        for i in 0..10 {
            telemetry.add_event(&format!("event {i}"), EventKind::Info, None);
        }

        let events = telemetry.events();
        assert_eq!(events.len(), MAX_EVENTS);
        // Oldest events dropped
        assert_eq!(events[0].message, "event 5");
        assert_eq!(events[4].message, "event 9");
    }

    #[test]
    fn test_close_event_carries_roi() {
        let telemetry = Telemetry::new();
        telemetry.add_event("Closed KRW-BTC TP", EventKind::Close, Some(dec!(0.015)));

        let events = telemetry.events();
        assert_eq!(events[0].kind, EventKind::Close);
        assert_eq!(events[0].roi, Some(dec!(0.015)));
    }
}
