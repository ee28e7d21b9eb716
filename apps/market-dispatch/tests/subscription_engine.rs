//! Subscription Engine Integration Tests
//!
//! Streams scripted subscription events through the engine and checks the
//! live field table, notifications, diagnostics and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use market_dispatch::{
    ChannelObserver, CorrelationToken, Element, Event, EventKind, FieldValue, GatewayError,
    Message, Notification, Observer, ScriptedGateway, Service, SubscriptionEngine,
    SubscriptionEntry, SubscriptionError, SubscriptionState,
};

// =============================================================================
// Helpers
// =============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn data(token: u64, body: serde_json::Value) -> Event {
    Event::new(
        EventKind::SubscriptionData,
        vec![Message::new(CorrelationToken(token), Element::from(body))],
    )
}

async fn next(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    timeout(WAIT, rx.recv())
        .await
        .expect("notification within deadline")
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition within deadline");
}

/// Cancels the stream loop once a full row has been published.
struct StopAfterRow(CancellationToken);

impl Observer for StopAfterRow {
    fn update(&self, notification: &Notification) {
        if notification.field.is_all() {
            self.0.cancel();
        }
    }
}

/// Run the caller-driven loop until one queued update has been applied.
async fn run_one_update(engine: &mut SubscriptionEngine<ScriptedGateway>) {
    let cancel = CancellationToken::new();
    let stopper: Arc<dyn Observer> = Arc::new(StopAfterRow(cancel.clone()));
    engine.observers().register(Arc::clone(&stopper));

    timeout(WAIT, engine.run(cancel))
        .await
        .expect("update within deadline")
        .unwrap();

    engine.observers().unregister(&stopper);
}

/// Engine over two securities (tokens 1 and 2) subscribed to BID and ASK,
/// with a channel observer attached.
fn two_security_engine(
    gateway: &Arc<ScriptedGateway>,
) -> (
    SubscriptionEngine<ScriptedGateway>,
    Vec<SubscriptionEntry>,
    broadcast::Receiver<Notification>,
) {
    let mut engine = SubscriptionEngine::new(Arc::clone(gateway));
    let entries = engine.entries_for(["IBM US Equity", "MSFT US Equity"], &["BID", "ASK"], 0.0);

    let channel = ChannelObserver::new(64);
    let rx = channel.subscribe();
    engine.observers().register(Arc::new(channel));

    (engine, entries, rx)
}

// =============================================================================
// Streaming Updates
// =============================================================================

#[tokio::test]
async fn test_single_field_update_touches_only_its_security() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, mut rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(data(1, json!({"BID": 101.5})));

    let bid = next(&mut rx).await;
    assert_eq!(bid.security, "IBM US Equity");
    assert_eq!(bid.field.as_str(), "BID");
    assert_eq!(bid.data.as_value(), Some(&FieldValue::Float(101.5)));

    let all = next(&mut rx).await;
    assert!(all.field.is_all());
    assert_eq!(
        all.data.as_row().unwrap(),
        &[
            ("BID".to_string(), FieldValue::Float(101.5)),
            ("ASK".to_string(), FieldValue::NotAvailable),
        ]
    );
    assert!(rx.try_recv().is_err());

    let table = handle.snapshot();
    assert_eq!(
        table.value("IBM US Equity", "BID"),
        Some(&FieldValue::Float(101.5))
    );
    assert_eq!(table.row("MSFT US Equity").unwrap().updated_count(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_token_produces_no_notification() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, mut rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(data(42, json!({"BID": 1.0})));
    gateway.push_event(data(2, json!({"ASK": 310.0})));

    let first = next(&mut rx).await;
    assert_eq!(first.security, "MSFT US Equity");
    assert_eq!(first.correlation_token, CorrelationToken(2));
    assert_eq!(handle.stats().snapshot().unknown_tokens, 1);

    let table = handle.stop().await.unwrap();
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn test_provider_timestamp_and_decode_errors() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, mut rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(data(
        1,
        json!({"BID": "n/a", "ASK": 99.5, "EVENT_TIME": "14:30:01.250"}),
    ));

    let bid = next(&mut rx).await;
    assert_eq!(bid.data.as_value(), Some(&FieldValue::NotAvailable));
    assert_eq!(bid.provider_timestamp.as_deref(), Some("14:30:01.250"));

    let ask = next(&mut rx).await;
    assert_eq!(ask.data.as_value(), Some(&FieldValue::Float(99.5)));

    let all = next(&mut rx).await;
    assert!(all.field.is_all());
    assert_eq!(handle.stats().snapshot().decode_errors, 1);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unregister_all_stops_notifications_not_updates() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, mut rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(data(1, json!({"BID": 100.0})));
    next(&mut rx).await;
    next(&mut rx).await;

    handle.observers().unregister_all();
    gateway.push_event(data(1, json!({"BID": 102.0})));

    wait_until(|| {
        handle.snapshot().value("IBM US Equity", "BID") == Some(&FieldValue::Float(102.0))
    })
    .await;
    assert!(rx.try_recv().is_err());

    handle.stop().await.unwrap();
}

// =============================================================================
// Status Events
// =============================================================================

#[tokio::test]
async fn test_status_events_reach_diagnostics() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (status_tx, mut status_rx) = mpsc::channel(8);

    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway)).with_diagnostics(status_tx);
    let entries = engine.entries_for(["IBM US Equity"], &["LAST_PRICE"], 1.0);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(Event::new(
        EventKind::SubscriptionStatus,
        vec![
            Message::new(CorrelationToken(1), Element::from(json!({"streamIds": ["1"]})))
                .with_type("SubscriptionStarted"),
        ],
    ));

    let report = timeout(WAIT, status_rx.recv()).await.unwrap().unwrap();
    assert_eq!(report.kind, EventKind::SubscriptionStatus);
    assert_eq!(report.correlation_tokens, vec![CorrelationToken(1)]);
    assert_eq!(report.message_type.as_deref(), Some("SubscriptionStarted"));

    let table = handle.stop().await.unwrap();
    assert!(table.value("IBM US Equity", "LAST_PRICE").is_none());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_stop_unsubscribes_and_returns_final_table() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, mut rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.push_event(data(2, json!({"BID": 55.0, "ASK": 55.5})));
    for _ in 0..3 {
        next(&mut rx).await;
    }

    let table = handle.stop().await.unwrap();

    assert_eq!(
        table.value("MSFT US Equity", "ASK"),
        Some(&FieldValue::Float(55.5))
    );
    assert_eq!(gateway.opened(), vec![Service::MktData]);
    assert_eq!(gateway.subscribed().len(), 2);
    assert_eq!(gateway.unsubscribed().len(), 2);
}

#[tokio::test]
async fn test_closed_session_ends_stream_with_error() {
    let gateway = Arc::new(ScriptedGateway::new());
    let (engine, entries, _rx) = two_security_engine(&gateway);
    let handle = engine.start(entries).await.unwrap();

    gateway.close();
    wait_until(|| handle.is_finished()).await;

    let result = handle.stop().await;
    assert!(matches!(
        result,
        Err(SubscriptionError::Gateway(GatewayError::Closed))
    ));
    assert_eq!(gateway.unsubscribed().len(), 2);
}

#[tokio::test]
async fn test_authorization_failure_prevents_subscribe() {
    let gateway = Arc::new(ScriptedGateway::new().refusing(Service::MktData, "no entitlement"));
    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway));
    let entries = engine.entries_for(["IBM US Equity"], &["BID"], 0.0);

    let result = engine.subscribe(entries).await;

    assert!(matches!(
        result,
        Err(SubscriptionError::Gateway(
            GatewayError::AuthorizationFailed { .. }
        ))
    ));
    assert_eq!(engine.state(), SubscriptionState::Unsubscribed);
    assert!(gateway.subscribed().is_empty());
}

#[tokio::test]
async fn test_second_subscribe_is_rejected() {
    let gateway = Arc::new(ScriptedGateway::new());
    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway));
    let first = engine.entries_for(["IBM US Equity"], &["BID"], 0.0);
    let second = engine.entries_for(["MSFT US Equity"], &["BID"], 0.0);

    engine.subscribe(first).await.unwrap();
    let result = engine.subscribe(second).await;

    assert!(matches!(result, Err(SubscriptionError::InvalidState { .. })));
    assert_eq!(engine.entries().len(), 1);
}

#[tokio::test]
async fn test_caller_driven_run_applies_queued_events() {
    let gateway = Arc::new(ScriptedGateway::new());
    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway));
    let entries = vec![SubscriptionEntry::new(
        CorrelationToken(7),
        "EUR Curncy",
        ["BID", "ASK", "BID"],
    )];

    engine.subscribe(entries).await.unwrap();
    assert_eq!(engine.state(), SubscriptionState::Subscribing);

    gateway.push_event(data(7, json!({"BID": 1.0841})));
    gateway.push_event(data(7, json!({"ASK": 1.0843})));
    gateway.close();

    let result = engine.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(SubscriptionError::Gateway(GatewayError::Closed))));

    let table = engine.snapshot();
    let row = table.row_for_token(CorrelationToken(7)).unwrap();
    assert_eq!(row.fields(), ["BID", "ASK"]);
    assert_eq!(row.updated_count(), 2);
    assert_eq!(engine.stats().snapshot().notifications, 4);

    engine.unsubscribe().await.unwrap();
    assert_eq!(engine.state(), SubscriptionState::Unsubscribed);
    assert_eq!(
        engine.snapshot().value("EUR Curncy", "ASK"),
        Some(&FieldValue::Float(1.0843))
    );
}

#[tokio::test]
async fn test_resubscribe_replaces_stale_rows() {
    let gateway = Arc::new(ScriptedGateway::new());
    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway));

    let first = engine.entries_for(["X Index"], &["BID"], 0.0);
    engine.subscribe(first).await.unwrap();
    gateway.push_event(data(1, json!({"BID": 1.0})));
    run_one_update(&mut engine).await;
    engine.unsubscribe().await.unwrap();

    assert_eq!(
        engine.snapshot().value("X Index", "BID"),
        Some(&FieldValue::Float(1.0))
    );

    let second = engine.entries_for(["X Index"], &["BID"], 0.0);
    assert_eq!(second[0].correlation_token, CorrelationToken(2));
    engine.subscribe(second).await.unwrap();
    assert_eq!(engine.snapshot().value("X Index", "BID"), None);

    gateway.push_event(data(2, json!({"BID": 2.0})));
    run_one_update(&mut engine).await;

    let table = engine.snapshot();
    assert_eq!(table.len(), 1);
    assert_eq!(table.row("X Index").unwrap().correlation_token, CorrelationToken(2));
    assert_eq!(table.value("X Index", "BID"), Some(&FieldValue::Float(2.0)));
}

#[tokio::test]
async fn test_cancelled_run_returns_ok() {
    let gateway = Arc::new(ScriptedGateway::new());
    let mut engine = SubscriptionEngine::new(Arc::clone(&gateway));
    let entries = engine.entries_for(["IBM US Equity"], &["BID"], 0.0);
    engine.subscribe(entries).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(engine.run(cancel).await.is_ok());
    assert_eq!(engine.state(), SubscriptionState::Streaming);
}
