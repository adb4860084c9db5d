//! End-to-End Engine Tests
//!
//! Subscribe, tick, read back: the full control flow through the engine
//! with an in-process upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal_macros::dec;

use common::{Harness, ticker};
use market_pulse::{AlertCondition, EngineError, EngineSettings};

#[tokio::test]
async fn tick_then_snapshot_follows_price_changes() {
    let h = Harness::new(EngineSettings::default());
    h.engine.subscribe(Some("alice-token"), &["TSLA"]).await.unwrap();

    h.source.set_price("TSLA", dec!(250.00));
    h.engine.scheduler().tick().await;
    let first = h.engine.get_snapshot(Some("alice-token"), &["TSLA"]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;

    h.source.set_price("TSLA", dec!(255.00));
    h.engine.scheduler().tick().await;
    let second = h.engine.get_snapshot(Some("alice-token"), &["TSLA"]).await.unwrap();

    let first = &first[&ticker("TSLA")];
    let second = &second[&ticker("TSLA")];
    assert_eq!(first.quote.price, dec!(250.00));
    assert_eq!(second.quote.price, dec!(255.00));
    assert!(second.as_of > first.as_of);

    // Snapshots were served from cache: only the two ticks reached upstream.
    assert_eq!(h.source.calls().len(), 2);
}

#[tokio::test]
async fn tick_fetches_deduplicated_union() {
    let h = Harness::new(EngineSettings::default());
    h.engine
        .subscribe(Some("alice-token"), &["TSLA", "AAPL"])
        .await
        .unwrap();
    h.engine
        .subscribe(Some("bob-token"), &["aapl", "MSFT"])
        .await
        .unwrap();

    let report = h.engine.scheduler().tick().await;

    let expected = BTreeSet::from([ticker("AAPL"), ticker("MSFT"), ticker("TSLA")]);
    assert_eq!(report.requested, expected);
    let calls = h.source.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].iter().cloned().collect::<BTreeSet<_>>(), expected);
    assert_eq!(calls[0].len(), 3);
}

#[tokio::test]
async fn unsubscribe_before_tick_skips_fetch() {
    let h = Harness::new(EngineSettings::default());
    h.engine.subscribe(Some("alice-token"), &["TSLA"]).await.unwrap();
    h.engine.unsubscribe(Some("alice-token"), &["TSLA"]).await.unwrap();

    let report = h.engine.scheduler().tick().await;

    assert!(report.requested.is_empty());
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn idle_subscriptions_drop_out_of_the_union() {
    let mut settings = EngineSettings::default();
    settings.scheduler.idle_window = Duration::from_millis(50);
    let h = Harness::new(settings);

    h.engine.subscribe(Some("alice-token"), &["TSLA"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.engine.subscribe(Some("bob-token"), &["AAPL"]).await.unwrap();

    let report = h.engine.scheduler().tick().await;

    assert_eq!(report.evicted, 1);
    assert_eq!(report.requested, BTreeSet::from([ticker("AAPL")]));
}

#[tokio::test]
async fn snapshot_omits_tickers_that_cannot_be_fetched() {
    let h = Harness::new(EngineSettings::default());
    h.engine.subscribe(Some("alice-token"), &["AAPL"]).await.unwrap();
    h.source.set_price("AAPL", dec!(189.50));
    h.engine.scheduler().tick().await;

    h.source.fail("MSFT");
    let snapshot = h
        .engine
        .get_snapshot(Some("alice-token"), &["AAPL", "MSFT"])
        .await
        .unwrap();

    assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![ticker("AAPL")]);
    assert_eq!(snapshot[&ticker("AAPL")].quote.price, dec!(189.50));
}

#[tokio::test]
async fn upstream_outage_serves_last_known_value() {
    let mut settings = EngineSettings::default();
    settings.cache.ttl = Duration::from_millis(30);
    settings.cache.stale_grace = Duration::from_secs(60);
    let h = Harness::new(settings);

    h.engine.subscribe(Some("alice-token"), &["TSLA"]).await.unwrap();
    h.source.set_price("TSLA", dec!(250));
    h.engine.scheduler().tick().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.source.fail("TSLA");

    let report = h.engine.scheduler().tick().await;
    assert!(report.fetch_error.is_some());
    assert_eq!(
        h.engine.health().scheduler.consecutive_failures,
        1
    );

    let snapshot = h
        .engine
        .get_snapshot(Some("alice-token"), &["TSLA"])
        .await
        .unwrap();
    assert_eq!(snapshot[&ticker("TSLA")].quote.price, dec!(250));

    h.source.recover("TSLA");
    h.source.set_price("TSLA", dec!(251));
    let report = h.engine.scheduler().tick().await;
    assert!(report.fetch_error.is_none());
    assert_eq!(h.engine.health().scheduler.consecutive_failures, 0);
}

#[tokio::test]
async fn alert_fires_once_across_ticks() {
    let h = Harness::new(EngineSettings::default());
    let rule = h
        .engine
        .create_alert(Some("alice-token"), "TSLA", dec!(100), AlertCondition::Above)
        .await
        .unwrap();
    h.engine.subscribe(Some("bob-token"), &["TSLA"]).await.unwrap();

    let mut fired = Vec::new();
    for price in [dec!(95), dec!(99), dec!(101), dec!(105)] {
        h.source.set_price("TSLA", price);
        fired.push(h.engine.scheduler().tick().await.alerts_fired);
    }

    assert_eq!(fired, vec![0, 0, 1, 0]);
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.as_str(), "alice");
    assert_eq!(sent[0].1.alert_id, rule.id);
    assert_eq!(sent[0].1.triggered_price, dec!(101));

    let rules = h.engine.list_alerts(Some("alice-token")).await.unwrap();
    assert!(!rules[0].active);
    assert_eq!(rules[0].triggered_price, Some(dec!(101)));
}

#[tokio::test]
async fn alerts_are_private_to_their_owner() {
    let h = Harness::new(EngineSettings::default());
    let rule = h
        .engine
        .create_alert(Some("alice-token"), "TSLA", dec!(100), AlertCondition::Below)
        .await
        .unwrap();

    assert!(h.engine.list_alerts(Some("bob-token")).await.unwrap().is_empty());
    assert!(matches!(
        h.engine.delete_alert(Some("bob-token"), rule.id).await,
        Err(EngineError::NotFound(_))
    ));
    h.engine.delete_alert(Some("alice-token"), rule.id).await.unwrap();
    assert!(h.engine.list_alerts(Some("alice-token")).await.unwrap().is_empty());
}

#[tokio::test]
async fn readiness_follows_first_tick() {
    let h = Harness::new(EngineSettings::default());
    assert!(h.engine.is_ready());

    h.engine.subscribe(Some("alice-token"), &["TSLA"]).await.unwrap();
    assert!(!h.engine.is_ready());

    h.engine.scheduler().tick().await;
    assert!(h.engine.is_ready());
}
