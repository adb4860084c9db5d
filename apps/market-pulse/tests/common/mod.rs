//! Shared fakes for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use market_pulse::{
    AlertNotification, EngineDependencies, EngineSettings, FetchError, InMemoryAlertStore,
    MarketDataEngine, MarketDataSource, Notifier, OwnerId, Quote, QuoteBatch,
    StaticTokenAuthorizer, Ticker,
};

/// Token table shared by every test engine.
pub const TOKENS: &str = "alice-token=alice,bob-token=bob";

/// Upstream double whose prices and failures are set by the test.
#[derive(Default)]
pub struct ScriptedSource {
    prices: Mutex<HashMap<Ticker, Decimal>>,
    failing: Mutex<HashSet<Ticker>>,
    calls: Mutex<Vec<Vec<Ticker>>>,
}

impl ScriptedSource {
    pub fn set_price(&self, ticker: &str, price: Decimal) {
        self.prices.lock().insert(Ticker::parse(ticker).unwrap(), price);
    }

    pub fn fail(&self, ticker: &str) {
        self.failing.lock().insert(Ticker::parse(ticker).unwrap());
    }

    pub fn recover(&self, ticker: &str) {
        self.failing.lock().remove(&Ticker::parse(ticker).unwrap());
    }

    /// Ticker lists of every `fetch_batch` call, in order.
    pub fn calls(&self) -> Vec<Vec<Ticker>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    async fn fetch_batch(&self, tickers: &[Ticker]) -> Result<QuoteBatch, FetchError> {
        self.calls.lock().push(tickers.to_vec());

        let prices = self.prices.lock();
        let failing = self.failing.lock();
        if !tickers.is_empty() && tickers.iter().all(|t| failing.contains(t)) {
            return Err(FetchError::Unavailable {
                message: "scripted outage".into(),
            });
        }

        Ok(tickers
            .iter()
            .filter(|t| !failing.contains(*t))
            .filter_map(|t| {
                prices.get(t).map(|price| {
                    (
                        t.clone(),
                        Quote {
                            price: *price,
                            change_absolute: Decimal::ZERO,
                            change_percent: Decimal::ZERO,
                            volume: 1_000,
                        },
                    )
                })
            })
            .collect())
    }
}

/// Notifier that keeps every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(OwnerId, AlertNotification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(OwnerId, AlertNotification)> {
        self.sent.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, owner: &OwnerId, notification: AlertNotification) {
        self.sent.lock().push((owner.clone(), notification));
    }
}

/// Engine wired to in-process fakes.
pub struct Harness {
    pub engine: Arc<MarketDataEngine>,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_tokens(settings, TOKENS)
    }

    pub fn with_tokens(settings: EngineSettings, tokens: &str) -> Self {
        let source = Arc::new(ScriptedSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let shutdown = CancellationToken::new();

        let engine = MarketDataEngine::new(
            EngineDependencies {
                source: source.clone(),
                distributed_cache: None,
                alerts: Arc::new(InMemoryAlertStore::new()),
                notifier: notifier.clone(),
                authorizer: Arc::new(StaticTokenAuthorizer::parse(tokens).unwrap()),
            },
            settings,
            shutdown.clone(),
        );

        Self {
            engine: Arc::new(engine),
            source,
            notifier,
            shutdown,
        }
    }
}

/// Settings with a fast push cadence for stream tests.
pub fn fast_stream_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.stream.interval = Duration::from_millis(50);
    settings
}

pub fn ticker(raw: &str) -> Ticker {
    Ticker::parse(raw).unwrap()
}

/// Poll `condition` every 10ms until it holds or `limit` passes.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
