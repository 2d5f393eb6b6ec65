//! Client for a running skydesk proxy
//!
//! Requests go to each configured proxy base in order until one answers.
//! Quotes and symbol searches are also kept in a short-lived local cache so
//! a dashboard polling every few seconds does not hammer the proxy.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheKey, CachePolicy, Fill, Namespace, TtlCache};
use crate::fetch::{fetch_first, Candidate, CandidateError, ExhaustionError, HttpSource};
use crate::sequence::RequestSequence;
use crate::upstream::finance::{FundamentalsItem, History, HistoryRange, NewsItem, OverviewItem, Quote, SearchHit};
use crate::upstream::news::Headline;
use crate::upstream::{Units, WeatherResource};

/// Where a dashboard looks for its proxy when nothing is configured
pub const DEFAULT_PROXY_BASES: [&str; 2] = ["http://localhost:4000", "http://127.0.0.1:4000"];

#[derive(Debug, Error)]
pub enum ClientError {
    /// The proxy answered 400; retrying elsewhere will not help
    #[error("Request rejected: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Exhausted(#[from] ExhaustionError),

    /// A newer search was issued while this one was in flight
    #[error("Search superseded by a newer request")]
    Superseded,
}

/// Finance overview rows and the notice attached to static fallbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub data: Vec<OverviewItem>,
    #[serde(default)]
    pub notice: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: HttpSource,
    bases: Vec<String>,
    cache: TtlCache,
    searches: Arc<RequestSequence>,
}

impl ProxyClient {
    /// A client with the default local cache (quotes 10 s, search 60 s)
    ///
    /// Bases are tried in order; duplicates are dropped and an empty list
    /// means `DEFAULT_PROXY_BASES`.
    pub fn new(http: HttpSource, bases: Vec<String>) -> Self {
        Self::with_cache(http, bases, TtlCache::in_memory(CachePolicy::client_defaults()))
    }

    pub fn with_cache(http: HttpSource, bases: Vec<String>, cache: TtlCache) -> Self {
        Self {
            http,
            bases: normalize_bases(bases),
            cache,
            searches: Arc::new(RequestSequence::new()),
        }
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    async fn call<T, F>(
        &self,
        resource: &str,
        method: reqwest::Method,
        path: &str,
        query: Vec<(&'static str, String)>,
        extract: F,
    ) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: Fn(Value) -> Result<T, CandidateError> + Clone + Send + 'static,
    {
        let candidates = self
            .bases
            .iter()
            .map(|base| {
                let http = self.http.clone();
                let url = format!("{}{}", base, path);
                let query = query.clone();
                let extract = extract.clone();
                let method = method.clone();
                Candidate::new(base.clone(), move || async move {
                    let body = if method == reqwest::Method::POST {
                        http.post_json(&url, &query).await?
                    } else {
                        http.get_json(&url, &query, &[]).await?
                    };
                    extract(body)
                })
            })
            .collect();

        match fetch_first(resource, candidates).await {
            Ok(fetched) => Ok(fetched.value),
            Err(exhausted) => Err(rejected(&exhausted).unwrap_or(ClientError::Exhausted(exhausted))),
        }
    }

    async fn get<T, F>(
        &self,
        resource: &str,
        path: &str,
        query: Vec<(&'static str, String)>,
        extract: F,
    ) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: Fn(Value) -> Result<T, CandidateError> + Clone + Send + 'static,
    {
        self.call(resource, reqwest::Method::GET, path, query, extract).await
    }

    /// Quotes in the order given; served from the local cache when fresh
    pub async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, ClientError> {
        let key = CacheKey::new("q").symbols("symbols", symbols).build();
        let lookup = self
            .cache
            .get_or_fetch(Namespace::QUOTES, &key, move || async move {
                let quotes: Vec<Quote> = self
                    .get(
                        "quotes",
                        "/api/quotes",
                        vec![("symbols", symbols.join(","))],
                        |body| field(body, &["quotes", "data"]),
                    )
                    .await?;
                // Placeholders are retried on the next poll
                let live = quotes.iter().all(|q| !q.placeholder);
                Ok::<_, ClientError>(if live { Fill::keep(quotes) } else { Fill::transient(quotes) })
            })
            .await?;
        if lookup.cached {
            debug!(%key, "quotes served from local cache");
        }
        Ok(in_order(symbols, lookup.value))
    }

    /// Symbol search; only the most recently issued search returns results
    ///
    /// An older search that completes after a newer one was started yields
    /// `ClientError::Superseded` so its results are never shown.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ClientError> {
        let ticket = self.searches.next();
        let key = CacheKey::new("s").query("q", query).build();
        let lookup = self
            .cache
            .get_or_fetch(Namespace::SEARCH, &key, move || async move {
                let hits: Vec<SearchHit> = self
                    .get(
                        "search",
                        "/api/quotes/search",
                        vec![("q", query.trim().to_string())],
                        |body| field(body, &["results", "items"]),
                    )
                    .await?;
                Ok::<_, ClientError>(Fill::keep(hits))
            })
            .await?;

        if lookup.cached || self.searches.is_current(ticket) {
            Ok(lookup.value)
        } else {
            debug!(query, "dropping superseded search results");
            Err(ClientError::Superseded)
        }
    }

    pub async fn history(&self, symbol: &str, range: HistoryRange) -> Result<History, ClientError> {
        self.get(
            "history",
            "/api/quotes/history",
            vec![("symbol", symbol.to_string()), ("range", range.as_str().to_string())],
            decode::<History>,
        )
        .await
    }

    pub async fn news(&self, symbol: &str) -> Result<Vec<NewsItem>, ClientError> {
        self.get(
            "news",
            "/api/quotes/news",
            vec![("symbol", symbol.to_string())],
            |body| field(body, &["news", "items"]),
        )
        .await
    }

    pub async fn fundamentals(
        &self,
        symbols: &[String],
        modules: &[String],
        force: bool,
    ) -> Result<Vec<FundamentalsItem>, ClientError> {
        let mut query = vec![("symbols", symbols.join(","))];
        if !modules.is_empty() {
            query.push(("modules", modules.join(",")));
        }
        if force {
            query.push(("force", "1".to_string()));
        }
        self.get("fundamentals", "/api/quotes/fundamentals/batch", query, |body| {
            field(body, &["items"])
        })
        .await
    }

    pub async fn overview(&self) -> Result<Overview, ClientError> {
        self.get("overview", "/api/finance/overview", Vec::new(), decode::<Overview>)
            .await
    }

    pub async fn headlines(&self) -> Result<Vec<Headline>, ClientError> {
        self.get("headlines", "/api/news/headlines", Vec::new(), |body| {
            field(body, &["items"])
        })
        .await
    }

    /// Raw OpenWeather payload for the given resource
    pub async fn weather(
        &self,
        resource: WeatherResource,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<Value, ClientError> {
        let path = match resource {
            WeatherResource::Current => "/api/cache/weather",
            WeatherResource::Forecast => "/api/cache/forecast",
            WeatherResource::AirQuality => "/api/cache/air",
        };
        let query = vec![
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("units", units.as_str().to_string()),
        ];
        self.get("weather", path, query, |body| field(body, &["data"]))
            .await
    }

    /// Asks the proxy to purge old entries; returns how many were removed
    pub async fn cleanup(&self, multiplier: u32) -> Result<usize, ClientError> {
        self.call(
            "cleanup",
            reqwest::Method::POST,
            "/api/cache/cleanup",
            vec![("multiplier", multiplier.to_string())],
            |body| field(body, &["removed"]),
        )
        .await
    }
}

fn normalize_bases(bases: Vec<String>) -> Vec<String> {
    let source: Vec<String> = if bases.is_empty() {
        DEFAULT_PROXY_BASES.iter().map(|b| b.to_string()).collect()
    } else {
        bases
    };

    let mut out: Vec<String> = Vec::new();
    for base in source {
        let base = base.trim().trim_end_matches('/').to_string();
        if !base.is_empty() && !out.contains(&base) {
            out.push(base);
        }
    }
    out
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, CandidateError> {
    serde_json::from_value(body).map_err(|e| CandidateError::Decode(e.to_string()))
}

/// Decodes the first of `names` present in the response body
fn field<T: DeserializeOwned>(mut body: Value, names: &[&str]) -> Result<T, CandidateError> {
    for name in names {
        if let Some(value) = body.get_mut(*name).map(Value::take) {
            return decode(value);
        }
    }
    Err(CandidateError::Decode(format!("response has no {} field", names.join("/"))))
}

/// A 400 from the proxy is the caller's fault, not the transport's
fn rejected(exhausted: &ExhaustionError) -> Option<ClientError> {
    exhausted.attempts.iter().find_map(|attempt| match &attempt.error {
        CandidateError::UpstreamStatus { status: 400, body } => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.clone());
            Some(ClientError::BadRequest(message))
        }
        _ => None,
    })
}

fn in_order(symbols: &[String], quotes: Vec<Quote>) -> Vec<Quote> {
    symbols
        .iter()
        .map(|s| {
            quotes
                .iter()
                .find(|q| q.symbol.eq_ignore_ascii_case(s))
                .cloned()
                .unwrap_or_else(|| Quote::placeholder(s))
        })
        .collect()
}
