//! FX conversion (C3)
//!
//! Resolves an exchange rate for a (from, to, book?) triple with the
//! precedence: the book's locked rate, then a user custom override, then
//! the upstream rate API (cached ~30 minutes). Upstream fetches time out
//! and fall back to a stale cached rate when one exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::FxConfig;
use crate::error::{Error, Result};
use crate::models::Book;

/// Round half-even (banker's rounding) to `digits` fractional digits.
/// Used once, at final storage of a normalized amount; intermediate
/// values keep full precision.
pub fn round_half_even(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let scaled = value * scale;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < 1e-9 {
        // Tie: round to the even neighbor.
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / scale
}

/// Upstream source of exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64>;
}

/// Rate API response: `{"rates": {"INR": 83.2, ...}}`
#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// HTTP rate provider against a latest-rates endpoint.
pub struct HttpRateProvider {
    http_client: reqwest::Client,
    /// `{from}` is substituted with the base currency.
    endpoint: String,
}

impl HttpRateProvider {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64> {
        let url = self.endpoint.replace("{from}", &from.to_uppercase());
        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "rate API returned {}",
                response.status()
            )));
        }

        let body: RatesResponse = response.json().await?;
        body.rates
            .get(&to.to_uppercase())
            .copied()
            .ok_or_else(|| Error::RateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

/// Fixed rate table, for tests and offline use.
#[derive(Default)]
pub struct StaticRateProvider {
    rates: HashMap<String, f64>,
}

impl StaticRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: f64) -> Self {
        self.rates.insert(pair_key(from, to), rate);
        self
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64> {
        self.rates
            .get(&pair_key(from, to))
            .copied()
            .ok_or_else(|| Error::RateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

fn pair_key(from: &str, to: &str) -> String {
    format!("{}:{}", from.to_uppercase(), to.to_uppercase())
}

struct CachedRate {
    fetched: Instant,
    rate: f64,
}

/// Rate resolution service. One per store subsystem.
pub struct FxService {
    provider: Arc<dyn RateProvider>,
    cache_ttl: Duration,
    fetch_timeout: Duration,
    cache: Mutex<HashMap<String, CachedRate>>,
    /// Per-pair fetch locks: parallel requesters for the same pair share
    /// one in-flight fetch via lock + cache recheck.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FxService {
    pub fn new(provider: Arc<dyn RateProvider>, config: &FxConfig) -> Self {
        Self {
            provider,
            cache_ttl: config.cache_ttl(),
            fetch_timeout: config.fetch_timeout(),
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a rate with the full precedence chain.
    ///
    /// `book` participates only when its locked rate actually covers the
    /// requested conversion; `overrides` are the user's custom rates keyed
    /// `FROM:TO`.
    pub async fn rate(
        &self,
        from: &str,
        to: &str,
        book: Option<&Book>,
        overrides: &HashMap<String, f64>,
    ) -> Result<f64> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(1.0);
        }

        if let Some(book) = book {
            if book.locked_exchange_rate > 0.0
                && book.currency.eq_ignore_ascii_case(from)
                && book.target_currency.eq_ignore_ascii_case(to)
            {
                return Ok(book.locked_exchange_rate);
            }
        }

        if let Some(rate) = overrides.get(&pair_key(from, to)) {
            return Ok(*rate);
        }

        self.provider_rate(from, to).await
    }

    async fn provider_rate(&self, from: &str, to: &str) -> Result<f64> {
        let key = pair_key(from, to);

        if let Some(rate) = self.cached(&key, false) {
            return Ok(rate);
        }

        let lock = {
            let mut locks = self.locks.lock().expect("fx lock poisoned");
            locks.entry(key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        // Another task may have fetched while we waited for the lock.
        if let Some(rate) = self.cached(&key, false) {
            return Ok(rate);
        }

        let fetched = timeout(self.fetch_timeout, self.provider.fetch_rate(from, to)).await;
        match fetched {
            Ok(Ok(rate)) if rate > 0.0 => {
                debug!(from, to, rate, "Fetched upstream rate");
                self.cache.lock().expect("fx cache poisoned").insert(
                    key,
                    CachedRate {
                        fetched: Instant::now(),
                        rate,
                    },
                );
                Ok(rate)
            }
            Ok(Ok(rate)) => Err(Error::Integrity(format!(
                "upstream returned non-positive rate {} for {}->{}",
                rate, from, to
            ))),
            Ok(Err(e)) => self.stale_or(&key, from, to, e),
            Err(_) => self.stale_or(
                &key,
                from,
                to,
                Error::Network(format!(
                    "rate fetch for {}->{} timed out after {:?}",
                    from, to, self.fetch_timeout
                )),
            ),
        }
    }

    /// `allow_stale = false` returns only fresh entries; `true` returns
    /// whatever is there.
    fn cached(&self, key: &str, allow_stale: bool) -> Option<f64> {
        let cache = self.cache.lock().expect("fx cache poisoned");
        cache.get(key).and_then(|c| {
            if allow_stale || c.fetched.elapsed() < self.cache_ttl {
                Some(c.rate)
            } else {
                None
            }
        })
    }

    fn stale_or(&self, key: &str, from: &str, to: &str, err: Error) -> Result<f64> {
        if let Some(rate) = self.cached(key, true) {
            warn!(from, to, error = %err, "Rate fetch failed; using stale cached rate");
            return Ok(rate);
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: AtomicU32,
        rate: f64,
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn fetch_rate(&self, _from: &str, _to: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rate)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl RateProvider for FailingProvider {
        async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64> {
            Err(Error::RateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn service(provider: Arc<dyn RateProvider>) -> FxService {
        FxService::new(provider, &FxConfig::default())
    }

    fn sample_book(currency: &str, target: &str, rate: f64) -> Book {
        use crate::ids::{BookId, UserId};
        use crate::models::SyncMeta;
        let now = chrono::Utc::now();
        Book {
            id: BookId::from("b1"),
            meta: SyncMeta::new(&UserId::from("u1"), now),
            name: "Trip".to_string(),
            description: String::new(),
            currency: currency.to_string(),
            locked_exchange_rate: rate,
            target_currency: target.to_string(),
            rate_locked_at: now,
            archived: false,
            archived_at: None,
        }
    }

    #[test]
    fn half_even_rounding() {
        assert_eq!(round_half_even(2.5, 0), 2.0);
        assert_eq!(round_half_even(3.5, 0), 4.0);
        assert_eq!(round_half_even(-2.5, 0), -2.0);
        assert_eq!(round_half_even(1.23455, 4), 1.2346);
        assert_eq!(round_half_even(1.23445, 4), 1.2344);
        assert_eq!(round_half_even(1.23001, 4), 1.23);
    }

    #[tokio::test]
    async fn identity_conversion_is_one() {
        let fx = service(Arc::new(FailingProvider));
        let rate = fx.rate("INR", "inr", None, &HashMap::new()).await.unwrap();
        assert_eq!(rate, 1.0);
    }

    #[tokio::test]
    async fn locked_book_rate_wins() {
        let fx = service(Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 99.0,
        }));
        let book = sample_book("SGD", "INR", 54.31);
        let rate = fx
            .rate("SGD", "INR", Some(&book), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rate, 54.31);
    }

    #[tokio::test]
    async fn locked_rate_ignored_for_other_target() {
        // Book locks SGD->INR; asking for SGD->USD must consult upstream.
        let fx = service(Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 0.74,
        }));
        let book = sample_book("SGD", "INR", 54.31);
        let rate = fx
            .rate("SGD", "USD", Some(&book), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(rate, 0.74);
    }

    #[tokio::test]
    async fn custom_override_beats_provider() {
        let fx = service(Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 99.0,
        }));
        let mut overrides = HashMap::new();
        overrides.insert("SGD:INR".to_string(), 60.0);
        let rate = fx.rate("SGD", "INR", None, &overrides).await.unwrap();
        assert_eq!(rate, 60.0);
    }

    #[tokio::test]
    async fn provider_result_is_cached() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 83.2,
        });
        let fx = service(provider.clone());
        for _ in 0..5 {
            let rate = fx.rate("USD", "INR", None, &HashMap::new()).await.unwrap();
            assert_eq!(rate, 83.2);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parallel_requesters_share_one_fetch() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 83.2,
        });
        let fx = Arc::new(service(provider.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move {
                fx.rate("USD", "INR", None, &HashMap::new()).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 83.2);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_without_cache_fails() {
        let fx = service(Arc::new(FailingProvider));
        let err = fx
            .rate("SGD", "INR", None, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateUnavailable { .. }));
    }

    #[tokio::test]
    async fn non_positive_rate_is_rejected() {
        let fx = service(Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rate: 0.0,
        }));
        let err = fx
            .rate("SGD", "INR", None, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
