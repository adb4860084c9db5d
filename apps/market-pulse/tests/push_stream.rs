//! Push Stream Integration Tests
//!
//! Stream lifecycle: first event, cadence, disconnect cleanup, token expiry
//! and server shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use common::{Harness, eventually, fast_stream_settings, ticker};
use market_pulse::{EngineError, StreamEvent};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn first_event_fetches_on_demand() {
    let h = Harness::new(fast_stream_settings());
    h.source.set_price("TSLA", dec!(250));

    let mut stream = h
        .engine
        .open_stream(Some("alice-token"), &["tsla"])
        .await
        .unwrap();

    let event = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    let snapshot = match event {
        StreamEvent::Quotes(snapshot) => snapshot,
        StreamEvent::Expired => panic!("expected quotes, got expiry"),
    };
    assert_eq!(snapshot[&ticker("TSLA")].quote.price, dec!(250));
}

#[tokio::test]
async fn later_events_follow_the_cache() {
    let h = Harness::new(fast_stream_settings());
    h.source.set_price("TSLA", dec!(250));

    let mut stream = h
        .engine
        .open_stream(Some("alice-token"), &["TSLA"])
        .await
        .unwrap();
    timeout(WAIT, stream.next()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    h.source.set_price("TSLA", dec!(255));
    h.engine.scheduler().tick().await;

    let updated = timeout(WAIT, async {
        while let Some(event) = stream.next().await {
            if let StreamEvent::Quotes(snapshot) = event
                && snapshot[&ticker("TSLA")].quote.price == dec!(255)
            {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();

    assert!(updated);
    // One on-demand fetch for the first event, one for the tick.
    assert_eq!(h.source.calls().len(), 2);
}

#[tokio::test]
async fn stream_tickers_join_the_scheduler_union() {
    let h = Harness::new(fast_stream_settings());
    h.source.set_price("NVDA", dec!(900));

    let _stream = h
        .engine
        .open_stream(Some("bob-token"), &["NVDA"])
        .await
        .unwrap();

    let report = h.engine.scheduler().tick().await;
    assert!(report.requested.contains(&ticker("NVDA")));
}

#[tokio::test]
async fn disconnect_releases_stream_resources() {
    let h = Harness::new(fast_stream_settings());
    h.source.set_price("TSLA", dec!(250));

    let mut stream = h
        .engine
        .open_stream(Some("alice-token"), &["TSLA"])
        .await
        .unwrap();
    timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(h.engine.health().active_streams, 1);
    assert_eq!(h.engine.health().subscriptions.ticker_count, 1);

    drop(stream);

    let engine = &h.engine;
    assert!(eventually(WAIT, || engine.health().active_streams == 0).await);
    assert_eq!(engine.health().subscriptions.subscriber_count, 0);
    assert!(engine.scheduler().tick().await.requested.is_empty());
}

#[tokio::test]
async fn expired_token_ends_stream() {
    let expiry = Utc::now().timestamp() + 2;
    let h = Harness::with_tokens(
        fast_stream_settings(),
        &format!("short-token=carol@{expiry}"),
    );
    h.source.set_price("TSLA", dec!(250));

    let mut stream = h
        .engine
        .open_stream(Some("short-token"), &["TSLA"])
        .await
        .unwrap();

    let last = timeout(Duration::from_secs(5), async {
        let mut last = None;
        while let Some(event) = stream.next().await {
            last = Some(event);
        }
        last
    })
    .await
    .unwrap();

    assert_eq!(last, Some(StreamEvent::Expired));
    let engine = &h.engine;
    assert!(eventually(WAIT, || engine.health().active_streams == 0).await);

    assert!(matches!(
        engine.get_snapshot(Some("short-token"), &["TSLA"]).await,
        Err(EngineError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let h = Harness::new(fast_stream_settings());
    h.source.set_price("TSLA", dec!(250));

    let mut stream = h
        .engine
        .open_stream(Some("alice-token"), &["TSLA"])
        .await
        .unwrap();
    timeout(WAIT, stream.next()).await.unwrap().unwrap();

    h.shutdown.cancel();

    let drained = timeout(WAIT, async { while stream.next().await.is_some() {} }).await;
    assert!(drained.is_ok());
    let engine = &h.engine;
    assert!(eventually(WAIT, || engine.health().active_streams == 0).await);
}

#[tokio::test]
async fn unauthorized_stream_is_rejected() {
    let h = Harness::new(fast_stream_settings());

    let result = h.engine.open_stream(Some("stolen"), &["TSLA"]).await;

    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    assert_eq!(h.engine.health().active_streams, 0);
    assert!(h.source.calls().is_empty());
}
