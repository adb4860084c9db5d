//! HTTP Quote Provider
//!
//! [`MarketDataSource`] over a Financial Modeling Prep style REST API:
//!
//! ```text
//! GET {base}/quote/AAPL,MSFT,TSLA?apikey=KEY
//! [{"symbol":"AAPL","price":189.5,"change":-1.2,"changesPercentage":-0.63,"volume":51234567}, ...]
//! ```
//!
//! Tickers are split into chunks of `batch_size`. Chunks run concurrently,
//! each under the request timeout, and a failed or slow chunk only loses its
//! own tickers. Symbols are percent-encoded (`^GSPC` is sent as `%5EGSPC`).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::application::ports::{FetchError, MarketDataSource, QuoteBatch};
use crate::domain::quote::{Quote, Ticker};
use crate::infrastructure::config::ProviderSettings;

/// One element of the provider's quote array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderQuote {
    symbol: String,
    price: Option<Decimal>,
    change: Option<Decimal>,
    changes_percentage: Option<Decimal>,
    volume: Option<Decimal>,
}

impl ProviderQuote {
    fn into_quote(self) -> Option<(String, Quote)> {
        let price = self.price?;
        Some((
            self.symbol,
            Quote {
                price,
                change_absolute: self.change.unwrap_or_default(),
                change_percent: self.changes_percentage.unwrap_or_default(),
                volume: self.volume.and_then(|v| v.to_u64()).unwrap_or(0),
            },
        ))
    }
}

/// Batch quote client for the upstream provider.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    batch_size: usize,
    request_timeout: Duration,
}

impl std::fmt::Debug for HttpQuoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQuoteProvider")
            .field("base_url", &self.base_url.as_str())
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpQuoteProvider {
    /// Create a provider client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unavailable`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(settings: &ProviderSettings) -> Result<Self, FetchError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| FetchError::Unavailable {
            message: format!("invalid provider base URL {:?}: {e}", settings.base_url),
        })?;

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| FetchError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key().to_string(),
            batch_size: settings.batch_size.max(1),
            request_timeout: settings.request_timeout,
        })
    }

    async fn fetch_chunk(&self, chunk: &[Ticker]) -> Result<QuoteBatch, FetchError> {
        let response = self
            .client
            .get(self.quote_url(chunk))
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Rejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable {
                message: format!("HTTP {status}"),
            });
        }

        let body: Vec<ProviderQuote> = response
            .json()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        let requested: HashSet<&Ticker> = chunk.iter().collect();
        let mut batch = QuoteBatch::with_capacity(body.len());
        for (symbol, quote) in body.into_iter().filter_map(ProviderQuote::into_quote) {
            match Ticker::parse(&symbol) {
                Ok(ticker) if requested.contains(&ticker) => {
                    batch.insert(ticker, quote);
                }
                _ => tracing::debug!(symbol = %symbol, "Ignoring unrequested symbol"),
            }
        }
        Ok(batch)
    }

    /// `{base}/quote/{A,B,..}` with each symbol percent-encoded.
    fn quote_url(&self, chunk: &[Ticker]) -> Url {
        let symbols = chunk
            .iter()
            .map(|ticker| byte_serialize(ticker.as_str().as_bytes()).collect::<String>())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.base_url.clone();
        let path = format!("{}/quote/{symbols}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    fn map_request_error(&self, e: &reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if e.is_decode() {
            FetchError::Malformed {
                message: e.to_string(),
            }
        } else {
            FetchError::Unavailable {
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpQuoteProvider {
    async fn fetch_batch(&self, tickers: &[Ticker]) -> Result<QuoteBatch, FetchError> {
        if tickers.is_empty() {
            return Ok(QuoteBatch::new());
        }

        let chunks: Vec<&[Ticker]> = tickers.chunks(self.batch_size).collect();
        let results = join_all(chunks.iter().map(|chunk| self.fetch_chunk(chunk))).await;

        let mut batch = QuoteBatch::with_capacity(tickers.len());
        let mut first_error = None;
        let mut failed_chunks = 0usize;

        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Ok(quotes) => batch.extend(quotes),
                Err(e) => {
                    failed_chunks += 1;
                    tracing::warn!(
                        error = %e,
                        tickers = chunk.len(),
                        "Quote chunk failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if failed_chunks == chunks.len() => Err(e),
            _ => {
                tracing::debug!(
                    requested = tickers.len(),
                    fetched = batch.len(),
                    chunks = chunks.len(),
                    failed_chunks,
                    "Fetched quote batch"
                );
                Ok(batch)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ticker(s: &str) -> Ticker {
        Ticker::parse(s).unwrap()
    }

    fn provider(server: &MockServer, batch_size: usize) -> HttpQuoteProvider {
        let mut settings = ProviderSettings::new(server.uri(), "test-key");
        settings.batch_size = batch_size;
        settings.request_timeout = Duration::from_millis(500);
        HttpQuoteProvider::new(&settings).unwrap()
    }

    fn quote_json(symbol: &str, price: f64) -> serde_json::Value {
        serde_json::json!({
            "symbol": symbol,
            "price": price,
            "change": 1.5,
            "changesPercentage": 0.6,
            "volume": 1_000_000
        })
    }

    #[tokio::test]
    async fn fetches_and_maps_quotes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/AAPL,TSLA"))
            .and(query_param("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                quote_json("AAPL", 189.5),
                quote_json("TSLA", 250.0),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let batch = provider(&server, 50)
            .fetch_batch(&[ticker("AAPL"), ticker("TSLA")])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        let tsla = &batch[&ticker("TSLA")];
        assert_eq!(tsla.price, dec!(250));
        assert_eq!(tsla.change_absolute, dec!(1.5));
        assert_eq!(tsla.change_percent, dec!(0.6));
        assert_eq!(tsla.volume, 1_000_000);
    }

    #[tokio::test]
    async fn failed_chunk_only_loses_its_tickers() {
        let server = MockServer::start().await;
        Mock::given(path("/quote/AAPL,MSFT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                quote_json("AAPL", 189.5),
                quote_json("MSFT", 410.0),
            ])))
            .mount(&server)
            .await;
        Mock::given(path("/quote/TSLA"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let batch = provider(&server, 2)
            .fetch_batch(&[ticker("AAPL"), ticker("MSFT"), ticker("TSLA")])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.contains_key(&ticker("AAPL")));
        assert!(!batch.contains_key(&ticker("TSLA")));
    }

    #[tokio::test]
    async fn slow_chunk_only_loses_its_tickers() {
        let server = MockServer::start().await;
        Mock::given(path("/quote/AAPL"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([quote_json("AAPL", 189.5)])),
            )
            .mount(&server)
            .await;
        Mock::given(path("/quote/TSLA"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([quote_json("TSLA", 250.0)]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        // The request timeout (500ms) ends the slow chunk well inside the
        // batch deadline, so the fast chunk's quote survives.
        let batch = tokio::time::timeout(
            Duration::from_secs(1),
            provider(&server, 1).fetch_batch(&[ticker("AAPL"), ticker("TSLA")]),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(batch.keys().cloned().collect::<Vec<_>>(), vec![ticker("AAPL")]);
    }

    #[tokio::test]
    async fn index_and_fx_symbols_are_percent_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/quote/%5EGSPC,EURUSD%3DX"))
            .and(query_param("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                quote_json("^GSPC", 5_100.0),
                quote_json("EURUSD=X", 1.08),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = ProviderSettings::new(format!("{}/api/v3", server.uri()), "test-key");
        settings.request_timeout = Duration::from_millis(500);
        let provider = HttpQuoteProvider::new(&settings).unwrap();

        let batch = provider
            .fetch_batch(&[ticker("^GSPC"), ticker("EURUSD=X")])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[&ticker("^GSPC")].price, dec!(5100));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let settings = ProviderSettings::new("not a url", "test-key");
        assert!(matches!(
            HttpQuoteProvider::new(&settings),
            Err(FetchError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn every_chunk_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = provider(&server, 50).fetch_batch(&[ticker("AAPL")]).await;

        assert!(matches!(result, Err(FetchError::Rejected { status: 401 })));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = provider(&server, 50).fetch_batch(&[ticker("AAPL")]).await;

        assert!(matches!(result, Err(FetchError::Timeout { timeout_ms: 500 })));
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let result = provider(&server, 50).fetch_batch(&[ticker("AAPL")]).await;

        assert!(matches!(result, Err(FetchError::Malformed { .. })));
    }

    #[tokio::test]
    async fn null_prices_and_unrequested_symbols_are_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "AAPL", "price": null, "change": null, "changesPercentage": null, "volume": null},
                quote_json("GOOG", 170.0),
                quote_json("TSLA", 250.0),
            ])))
            .mount(&server)
            .await;

        let batch = provider(&server, 50)
            .fetch_batch(&[ticker("AAPL"), ticker("TSLA")])
            .await
            .unwrap();

        assert_eq!(batch.keys().cloned().collect::<Vec<_>>(), vec![ticker("TSLA")]);
    }

    #[tokio::test]
    async fn empty_request_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let batch = provider(&server, 50).fetch_batch(&[]).await.unwrap();
        assert!(batch.is_empty());
    }
}
