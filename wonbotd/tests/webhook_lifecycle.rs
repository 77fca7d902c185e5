//! End-to-end tests over the HTTP API.
//!
//! Each test boots a daemon on an OS-assigned port with the stub
//! exchange behind it and drives it with real HTTP requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::{json, Value};

use wonbot_exec::{AccountBalance, StubExchange};
use wonbotd::{Config, Daemon};

struct TestServer {
    addr: SocketAddr,
    exchange: Arc<StubExchange>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let daemon = Daemon::new_stub(Config::test());
        let exchange = daemon.exchange().clone();
        let addr = daemon.start_api_server().await.unwrap();
        Self { addr, exchange, client: reqwest::Client::new() }
    }

    async fn post_webhook(&self, payload: &Value) -> reqwest::Response {
        self.client
            .post(format!("http://{}/webhook/tradingview", self.addr))
            .json(payload)
            .send()
            .await
            .unwrap()
    }

    async fn status(&self) -> Value {
        self.client
            .get(format!("http://{}/status", self.addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_state(&self, wanted: &str) -> bool {
        for _ in 0..200 {
            if self.status().await["state"] == wanted {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

fn buy_signal(signal_id: &str) -> Value {
    json!({
        "market": "KRW-BTC",
        "action": "BUY",
        "signal_id": signal_id,
        "price": 10000,
        "tp": 0.02,
        "sl": 0.05,
        "timeframe": "5m"
    })
}

#[tokio::test]
async fn test_webhook_opens_position_and_take_profit_closes_it() {
    let server = TestServer::start().await;
    server.exchange.set_price("KRW-BTC", dec!(100000));

    let response = server.post_webhook(&buy_signal("tv-1")).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["position"]["market"], "KRW-BTC");
    assert_eq!(body["position"]["entry_price"].as_str().unwrap(), "100000");

    let status = server.status().await;
    assert_eq!(status["state"], "OPEN");
    assert_eq!(status["webhook"]["last_signal_id"], "tv-1");

    // Cross the 2% take-profit threshold
    server.exchange.set_price("KRW-BTC", dec!(103000));
    assert!(server.wait_for_state("NONE").await);

    let status = server.status().await;
    let events = status["events"].as_array().unwrap();
    assert!(events.iter().any(|e| e["kind"] == "close"));
}

#[tokio::test]
async fn test_stop_loss_closes_position() {
    let server = TestServer::start().await;
    server.exchange.set_price("KRW-BTC", dec!(100000));

    assert_eq!(server.post_webhook(&buy_signal("tv-1")).await.status(), 200);

    // Cross the 5% stop-loss threshold
    server.exchange.set_price("KRW-BTC", dec!(94000));
    assert!(server.wait_for_state("NONE").await);

    let status = server.status().await;
    let events = status["events"].as_array().unwrap();
    let close = events.iter().find(|e| e["kind"] == "close").unwrap();
    assert!(close["message"].as_str().unwrap().contains("SL"));
}

#[tokio::test]
async fn test_duplicate_signal_id_is_rejected() {
    let server = TestServer::start().await;

    assert_eq!(server.post_webhook(&buy_signal("tv-1")).await.status(), 200);

    let response = server.post_webhook(&buy_signal("tv-1")).await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Duplicate signal_id");
}

#[tokio::test]
async fn test_duplicate_signal_during_entry_confirmation_executes_once() {
    let server = TestServer::start().await;
    server.exchange.set_price("KRW-BTC", dec!(100000));
    // Stall the first entry in fill confirmation so it is still
    // OPENING when the replay arrives
    server.exchange.fill_after_polls(5);

    let first_signal = buy_signal("tv-1");
    let first = server.post_webhook(&first_signal);
    let replay = async {
        tokio::time::sleep(Duration::from_millis(3)).await;
        server.post_webhook(&buy_signal("tv-1")).await
    };
    let (first, replay) = tokio::join!(first, replay);

    let mut statuses = [first.status().as_u16(), replay.status().as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, [200, 409]);

    let rejected = if first.status() == 409 { first } else { replay };
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], "Duplicate signal_id");

    // Exactly one entry order reached the exchange
    assert_eq!(server.exchange.order_count(), 1);
    assert_eq!(server.status().await["state"], "OPEN");
}

#[tokio::test]
async fn test_second_entry_while_position_open_is_rejected() {
    let server = TestServer::start().await;
    // Price sits between thresholds, so the position stays open
    server.exchange.set_price("KRW-BTC", dec!(100000));

    assert_eq!(server.post_webhook(&buy_signal("tv-1")).await.status(), 200);

    let response = server.post_webhook(&buy_signal("tv-2")).await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Position already open");
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    let server = TestServer::start().await;

    let response = server
        .post_webhook(&json!({"market": "KRW-BTC", "action": "BUY"}))
        .await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Missing fields:"));
    assert!(message.contains("signal_id"));
    assert!(message.contains("price"));
}

#[tokio::test]
async fn test_sell_action_is_rejected() {
    let server = TestServer::start().await;

    let mut payload = buy_signal("tv-1");
    payload["action"] = json!("SELL");

    let response = server.post_webhook(&payload).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Only BUY action supported");
}

#[tokio::test]
async fn test_notional_below_minimum_is_rejected() {
    let server = TestServer::start().await;

    let mut payload = buy_signal("tv-1");
    payload["price"] = json!(1000);

    let response = server.post_webhook(&payload).await;
    assert_eq!(response.status(), 400);

    // Nothing reached the exchange
    assert_eq!(server.exchange.order_count(), 0);
}

#[tokio::test]
async fn test_failed_entry_frees_the_book() {
    let server = TestServer::start().await;
    server
        .exchange
        .reject_next("insufficient_funds_bid", "not enough KRW");

    let response = server.post_webhook(&buy_signal("tv-1")).await;
    assert_eq!(response.status(), 400);

    // A fresh signal can open after the rejected one
    let status = server.status().await;
    assert_eq!(status["state"], "NONE");
    assert_eq!(server.post_webhook(&buy_signal("tv-2")).await.status(), 200);
}

#[tokio::test]
async fn test_balances_endpoint() {
    let server = TestServer::start().await;
    server.exchange.set_accounts(vec![AccountBalance {
        currency: "KRW".to_string(),
        balance: dec!(150000),
        avg_buy_price: dec!(0),
    }]);

    let response = server
        .client
        .get(format!("http://{}/account/balances", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accounts"][0]["currency"], "KRW");
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(format!("http://{}/health", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}
