//! Dashboard service: the cache in front of every upstream
//!
//! Each operation validates its input, derives a cache key, serves a fresh
//! entry when one exists and otherwise runs the upstream candidates. Only
//! live results are written back; placeholders and static fallbacks are
//! served once and never cached, so the next request retries the upstreams.

use std::convert::Infallible;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::key::request_symbols;
use crate::cache::{CacheKey, Fill, Lookup, Namespace, TtlCache};
use crate::fetch::{ExhaustionError, Fetched};
use crate::upstream::finance::{
    align_quotes, normalize_modules, placeholder_quotes, validate_region, validate_symbol,
    FundamentalsItem, History, HistoryRange, NewsItem, OverviewItem, Quote, SearchHit,
    FUNDAMENTALS_LIMIT, OVERVIEW_NOTICE, QUOTE_LIMIT,
};
use crate::upstream::news::Headline;
use crate::upstream::weather::validate_coords;
use crate::upstream::{FinanceClient, HeadlinesClient, Units, WeatherClient, WeatherResource};

/// Longest accepted search query
pub const MAX_QUERY_LEN: usize = 100;

/// Errors surfaced to callers of the dashboard
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Exhausted(#[from] ExhaustionError),
}

/// A value with its cache and provenance metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,
    /// True when served from the cache without contacting an upstream
    pub cached: bool,
    /// When the value was fetched, epoch milliseconds
    pub ts: i64,
    pub source: Option<String>,
    /// True for placeholders and static fallbacks
    pub degraded: bool,
    pub notice: Option<String>,
}

impl<T> Served<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            value: f(self.value),
            cached: self.cached,
            ts: self.ts,
            source: self.source,
            degraded: self.degraded,
            notice: self.notice,
        }
    }
}

/// What is written to the cache: the value and the candidate that produced it
#[derive(Serialize, Deserialize)]
struct Record<T> {
    source: String,
    value: T,
    #[serde(default)]
    degraded: bool,
}

impl<T> Record<T> {
    /// Live results are cached; placeholders and fallbacks are served once
    fn fill(fetched: Fetched<T>) -> Fill<Self> {
        let record = Record {
            source: fetched.source,
            value: fetched.value,
            degraded: fetched.degraded,
        };
        if record.degraded {
            Fill::transient(record)
        } else {
            Fill::keep(record)
        }
    }

    fn serve(lookup: Lookup<Self>) -> Served<T> {
        Served {
            value: lookup.value.value,
            cached: lookup.cached,
            ts: lookup.fetched_at,
            source: Some(lookup.value.source),
            degraded: lookup.value.degraded,
            notice: None,
        }
    }
}

/// Weather, finance and headline data behind one TTL cache
#[derive(Debug, Clone)]
pub struct Dashboard {
    cache: TtlCache,
    weather: WeatherClient,
    finance: FinanceClient,
    headlines: HeadlinesClient,
}

impl Dashboard {
    pub fn new(
        cache: TtlCache,
        weather: WeatherClient,
        finance: FinanceClient,
        headlines: HeadlinesClient,
    ) -> Self {
        Self {
            cache,
            weather,
            finance,
            headlines,
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    async fn resolve<T, E, Fut>(&self, namespace: Namespace, key: &str, fetch: Fut) -> Result<Served<T>, E>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<Fetched<T>, E>>,
    {
        let lookup = self
            .cache
            .get_or_fetch(namespace, key, move || async move { fetch.await.map(Record::fill) })
            .await?;
        Ok(Record::serve(lookup))
    }

    /// Like `resolve`, but never reads the cache
    async fn refresh<T, E, Fut>(&self, namespace: Namespace, key: &str, fetch: Fut) -> Result<Served<T>, E>
    where
        T: Serialize,
        Fut: Future<Output = Result<Fetched<T>, E>>,
    {
        debug!(%namespace, key, "cache read skipped");
        let lookup = self
            .cache
            .fetch_and_store(namespace, key, move || async move { fetch.await.map(Record::fill) })
            .await?;
        Ok(Record::serve(lookup))
    }

    /// `resolve` for fetches that always produce something, if only a fallback
    async fn resolve_always<T, Fut>(&self, namespace: Namespace, key: &str, fetch: Fut) -> Served<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Fetched<T>>,
    {
        let fetch = async move { Ok::<_, Infallible>(fetch.await) };
        match self.resolve(namespace, key, fetch).await {
            Ok(served) => served,
            Err(never) => match never {},
        }
    }

    /// Current conditions, forecast or air quality for a coordinate pair
    pub async fn weather(
        &self,
        resource: WeatherResource,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<Served<Value>, DashboardError> {
        validate_coords(lat, lon).map_err(DashboardError::InvalidInput)?;
        let key = resource.cache_key(lat, lon, units);
        let fetch = self.weather.fetch(resource, lat, lon, units);
        Ok(self.resolve(resource.namespace(), &key, fetch).await?)
    }

    /// Quotes in request order, at most `QUOTE_LIMIT` symbols
    ///
    /// Never fails on upstream trouble: when every backend is down each
    /// symbol comes back as a placeholder.
    pub async fn quotes(&self, raw_symbols: &str) -> Result<Served<Vec<Quote>>, DashboardError> {
        let symbols = parse_symbols(raw_symbols, QUOTE_LIMIT)?;
        let key = CacheKey::new("q").symbols("symbols", &symbols).build();

        let served = self
            .resolve_always(Namespace::QUOTES, &key, self.finance.quotes(&symbols))
            .await;
        if !served.cached {
            return Ok(served);
        }
        // Same symbol set, possibly requested in a different order
        Ok(served.map(|quotes| {
            align_quotes(&symbols, quotes).unwrap_or_else(|_| placeholder_quotes(&symbols))
        }))
    }

    pub async fn search(&self, query: &str) -> Result<Served<Vec<SearchHit>>, DashboardError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DashboardError::InvalidInput("q is required".to_string()));
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(DashboardError::InvalidInput(format!(
                "q must be at most {} characters",
                MAX_QUERY_LEN
            )));
        }
        let key = CacheKey::new("s").query("q", query).build();
        Ok(self.resolve(Namespace::SEARCH, &key, self.finance.search(query)).await?)
    }

    pub async fn history(&self, symbol: &str, range: &str) -> Result<Served<History>, DashboardError> {
        let symbol = validate_symbol(symbol).map_err(DashboardError::InvalidInput)?;
        let range: HistoryRange = range.parse().map_err(DashboardError::InvalidInput)?;
        let key = CacheKey::new("h")
            .param("symbol", symbol.as_str())
            .param("range", range.as_str())
            .build();
        let fetch = self.finance.history(&symbol, range);
        Ok(self.resolve(Namespace::HISTORY, &key, fetch).await?)
    }

    pub async fn news(&self, symbol: &str) -> Result<Served<Vec<NewsItem>>, DashboardError> {
        let symbol = validate_symbol(symbol).map_err(DashboardError::InvalidInput)?;
        let key = CacheKey::new("n").param("symbol", symbol.as_str()).build();
        Ok(self.resolve(Namespace::NEWS, &key, self.finance.news(&symbol)).await?)
    }

    /// quoteSummary modules for up to `FUNDAMENTALS_LIMIT` symbols
    ///
    /// Symbols are resolved concurrently and independently: a symbol no
    /// backend can serve becomes a placeholder item without failing the
    /// batch. `force` skips the cache read but still refreshes the cache.
    pub async fn fundamentals(
        &self,
        raw_symbols: &str,
        modules: Option<&str>,
        force: bool,
    ) -> Result<Served<Vec<FundamentalsItem>>, DashboardError> {
        let symbols = parse_symbols(raw_symbols, FUNDAMENTALS_LIMIT)?;
        let modules = normalize_modules(modules).map_err(DashboardError::InvalidInput)?;

        let lookups = symbols
            .iter()
            .map(|symbol| self.fundamentals_item(symbol, &modules, force));
        let items: Vec<FundamentalsItem> = futures::future::join_all(lookups).await;

        let placeholders = items.iter().filter(|i| i.placeholder).count();
        if placeholders > 0 {
            info!(placeholders, total = items.len(), "fundamentals batch partially degraded");
        }

        Ok(Served {
            cached: items.iter().all(|i| i.cached),
            degraded: placeholders > 0,
            ts: self.cache.now_ms(),
            source: None,
            notice: None,
            value: items,
        })
    }

    async fn fundamentals_item(&self, symbol: &str, modules: &[String], force: bool) -> FundamentalsItem {
        let key = CacheKey::new("fu")
            .param("symbol", symbol)
            .param("modules", modules.join(","))
            .build();

        let fetch = self.finance.fundamentals(symbol, modules);
        let result = if force {
            self.refresh(Namespace::FUNDAMENTALS, &key, fetch).await
        } else {
            self.resolve(Namespace::FUNDAMENTALS, &key, fetch).await
        };

        match result {
            Ok(served) => FundamentalsItem {
                symbol: symbol.to_string(),
                cached: served.cached,
                placeholder: false,
                data: Some(served.value),
                source: served.source,
                ts: served.ts,
            },
            Err(e) => {
                warn!(symbol, error = %e, "fundamentals unavailable, placeholder item");
                FundamentalsItem {
                    symbol: symbol.to_string(),
                    cached: false,
                    placeholder: true,
                    data: None,
                    source: None,
                    ts: self.cache.now_ms(),
                }
            }
        }
    }

    pub async fn trending(&self, region: Option<&str>) -> Result<Served<Vec<String>>, DashboardError> {
        let region = validate_region(region).map_err(DashboardError::InvalidInput)?;
        let key = CacheKey::new("t").param("region", region.as_str()).build();
        let fetch = self.finance.trending(&region);
        Ok(self.resolve(Namespace::TRENDING, &key, fetch).await?)
    }

    /// Weather-sensitive commodities; static rows with a notice when offline
    pub async fn overview(&self) -> Served<Vec<OverviewItem>> {
        let key = CacheKey::new("o").build();
        let mut served = self
            .resolve_always(Namespace::OVERVIEW, &key, self.finance.overview())
            .await;
        if served.degraded {
            served.notice = Some(OVERVIEW_NOTICE.to_string());
        }
        served
    }

    /// Climate headlines; a static list when no feed answers
    pub async fn headlines(&self) -> Served<Vec<Headline>> {
        let key = CacheKey::new("hl").build();
        self.resolve_always(Namespace::HEADLINES, &key, self.headlines.fetch())
            .await
    }

    /// Removes entries older than `ttl * multiplier` in every namespace
    pub fn cleanup(&self, multiplier: u32) -> usize {
        self.cache.cleanup(multiplier)
    }
}

/// Splits a comma/space separated symbol list and validates each symbol
fn parse_symbols(raw: &str, limit: usize) -> Result<Vec<String>, DashboardError> {
    let symbols = request_symbols([raw], limit);
    if symbols.is_empty() {
        return Err(DashboardError::InvalidInput("symbols is required".to_string()));
    }
    symbols
        .iter()
        .map(|s| validate_symbol(s).map_err(DashboardError::InvalidInput))
        .collect()
}
