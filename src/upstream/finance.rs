//! Finance data from Yahoo Finance and RapidAPI mirrors
//!
//! Every resource class is tried against the public Yahoo host first, then
//! against each configured RapidAPI host with the shared key. Each upstream
//! response is normalized into a typed shape before the empty-result check
//! runs, so the check never has to guess field names.
//!
//! Empty-result policy per class:
//! - quotes, history, trending, fundamentals: empty is a candidate failure
//! - search, news: empty is a valid answer

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::fetch::{
    fetch_first, fetch_or_placeholder, require_non_empty, Candidate, CandidateError,
    ExhaustionError, Fetched, HttpSource,
};

/// Public Yahoo Finance query host
pub const YAHOO_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// RapidAPI hosts mirroring the Yahoo Finance API, in preference order
pub const DEFAULT_RAPIDAPI_HOSTS: [&str; 2] = [
    "yh-finance.p.rapidapi.com",
    "apidojo-yahoo-finance-v1.p.rapidapi.com",
];

/// Maximum symbols per quotes request
pub const QUOTE_LIMIT: usize = 30;

/// Maximum symbols per fundamentals batch
pub const FUNDAMENTALS_LIMIT: usize = 25;

/// quoteSummary modules requested when none are given
pub const DEFAULT_MODULES: &str = "assetProfile,summaryProfile";

pub const DEFAULT_REGION: &str = "US";

/// Notice attached to the static overview fallback
pub const OVERVIEW_NOTICE: &str = "Fallback static data - live fetch failed";

/// Weather-sensitive instruments shown on the finance overview:
/// (symbol, display name, live note, fallback note)
pub const OVERVIEW_SYMBOLS: [(&str, &str, &str, &str); 3] = [
    ("NG=F", "Natural Gas", "Temperature-driven demand", "Cooling demand context"),
    ("CL=F", "Crude Oil", "Energy demand context", "Energy demand context"),
    ("ZW=F", "Wheat", "Crop weather watch", "Crop weather watch"),
];

/// A normalized stock quote
///
/// Field names follow Yahoo's camelCase so dashboards written against Yahoo
/// render these unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default)]
    pub regular_market_price: Option<f64>,
    #[serde(default)]
    pub regular_market_change: Option<f64>,
    #[serde(default)]
    pub regular_market_change_percent: Option<f64>,
    #[serde(default)]
    pub regular_market_day_high: Option<f64>,
    #[serde(default)]
    pub regular_market_day_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Epoch milliseconds of the last trade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular_market_time: Option<i64>,
    /// Synthetic entry standing in for a symbol no backend could quote
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

impl Quote {
    /// A "data unavailable" entry for `symbol`
    pub fn placeholder(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            short_name: None,
            long_name: None,
            regular_market_price: None,
            regular_market_change: None,
            regular_market_change_percent: None,
            regular_market_day_high: None,
            regular_market_day_low: None,
            currency: None,
            regular_market_time: None,
            placeholder: true,
        }
    }

    fn from_upstream(raw: &Value) -> Option<Self> {
        Some(Self {
            symbol: field_str(raw, "symbol")?,
            short_name: field_str(raw, "shortName"),
            long_name: field_str(raw, "longName"),
            regular_market_price: field_f64(raw, "regularMarketPrice"),
            regular_market_change: field_f64(raw, "regularMarketChange"),
            regular_market_change_percent: field_f64(raw, "regularMarketChangePercent"),
            regular_market_day_high: field_f64(raw, "regularMarketDayHigh"),
            regular_market_day_low: field_f64(raw, "regularMarketDayLow"),
            currency: field_str(raw, "currency"),
            regular_market_time: field_f64(raw, "regularMarketTime").and_then(epoch_ms),
            placeholder: false,
        })
    }
}

/// One symbol-search match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, rename = "quoteType", skip_serializing_if = "Option::is_none")]
    pub quote_type: Option<String>,
}

/// One OHLCV bar; `t` is epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    #[serde(default)]
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular_market_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub meta: ChartMeta,
    pub candles: Vec<Candle>,
}

/// A headline attached to a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
}

/// Per-symbol entry of a fundamentals batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsItem {
    pub symbol: String,
    pub cached: bool,
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub ts: i64,
}

/// A row of the weather-sensitive finance overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewItem {
    pub symbol: String,
    pub name: String,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_abs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_time: Option<i64>,
    pub weather_note: String,
}

/// Chart range with the bar interval used for it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRange {
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "max")]
    Max,
}

impl HistoryRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRange::OneDay => "1d",
            HistoryRange::FiveDays => "5d",
            HistoryRange::OneMonth => "1mo",
            HistoryRange::ThreeMonths => "3mo",
            HistoryRange::SixMonths => "6mo",
            HistoryRange::OneYear => "1y",
            HistoryRange::FiveYears => "5y",
            HistoryRange::Max => "max",
        }
    }

    pub fn interval(&self) -> &'static str {
        match self {
            HistoryRange::OneDay => "5m",
            HistoryRange::FiveDays => "15m",
            HistoryRange::OneMonth => "1h",
            HistoryRange::ThreeMonths | HistoryRange::SixMonths | HistoryRange::OneYear => "1d",
            HistoryRange::FiveYears => "1wk",
            HistoryRange::Max => "1mo",
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "1d" => Ok(HistoryRange::OneDay),
            "5d" => Ok(HistoryRange::FiveDays),
            "1mo" => Ok(HistoryRange::OneMonth),
            "3mo" => Ok(HistoryRange::ThreeMonths),
            "6mo" => Ok(HistoryRange::SixMonths),
            "1y" => Ok(HistoryRange::OneYear),
            "5y" => Ok(HistoryRange::FiveYears),
            "max" => Ok(HistoryRange::Max),
            other => Err(format!(
                "Invalid range: '{}'. Valid ranges: 1d, 5d, 1mo, 3mo, 6mo, 1y, 5y, max",
                other
            )),
        }
    }
}

/// Upper-cases and validates a ticker symbol (`^GSPC`, `CL=F`, `BRK-B`, ...)
pub fn validate_symbol(raw: &str) -> Result<String, String> {
    let symbol = raw.trim().to_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 20
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(format!("Invalid symbol: '{}'", raw.trim()))
    }
}

/// Normalizes a two-letter market region, defaulting to `US`
pub fn validate_region(raw: Option<&str>) -> Result<String, String> {
    let region = raw.map(str::trim).filter(|r| !r.is_empty()).unwrap_or(DEFAULT_REGION);
    if region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(region.to_uppercase())
    } else {
        Err(format!("Invalid region: '{}'", region))
    }
}

/// Splits, validates, deduplicates and sorts quoteSummary module names
pub fn normalize_modules(raw: Option<&str>) -> Result<Vec<String>, String> {
    let raw = raw.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODULES);
    let mut modules = Vec::new();
    for module in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        if !module.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("Invalid module: '{}'", module));
        }
        modules.push(module.to_string());
    }
    modules.sort();
    modules.dedup();
    Ok(modules)
}

/// One request description, resolved against a base URL per candidate
#[derive(Debug, Clone)]
struct Endpoint {
    segments: Vec<String>,
    query: Vec<(&'static str, String)>,
}

impl Endpoint {
    fn new(path: &str) -> Self {
        Self {
            segments: path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            query: Vec::new(),
        }
    }

    /// Appends a single path segment; a `/` inside `value` is escaped
    fn segment(mut self, value: &str) -> Self {
        self.segments.push(value.to_string());
        self
    }

    fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    fn url(&self, base: &str) -> Result<Url, CandidateError> {
        let mut url = Url::parse(base)
            .map_err(|e| CandidateError::Transport(format!("invalid base URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| CandidateError::Transport(format!("base URL {} cannot take a path", base)))?
            .pop_if_empty()
            .extend(&self.segments);
        Ok(url)
    }
}

/// A RapidAPI host and the URL it is reached at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RapidHost {
    /// Value of the `X-RapidAPI-Host` header
    pub host: String,
    pub base_url: String,
}

impl RapidHost {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let base_url = format!("https://{}", host);
        Self { host, base_url }
    }

    /// Host header and URL differ, e.g. when pointing at a local mock
    pub fn with_base_url(host: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            base_url: base_url.into(),
        }
    }
}

/// Client producing finance candidates in tier order: Yahoo, then RapidAPI hosts
#[derive(Debug, Clone)]
pub struct FinanceClient {
    http: HttpSource,
    yahoo_base: String,
    rapid_key: Option<String>,
    rapid_hosts: Vec<RapidHost>,
}

impl FinanceClient {
    pub fn new(
        http: HttpSource,
        yahoo_base: impl Into<String>,
        rapid_key: Option<String>,
        rapid_hosts: Vec<RapidHost>,
    ) -> Self {
        Self {
            http,
            yahoo_base: yahoo_base.into(),
            rapid_key,
            rapid_hosts,
        }
    }

    fn candidates<T, N>(
        &self,
        yahoo: Endpoint,
        rapid: Endpoint,
        normalize: N,
    ) -> Vec<Candidate<'static, T>>
    where
        T: Send + 'static,
        N: Fn(Value) -> Result<T, CandidateError> + Clone + Send + 'static,
    {
        let mut out = vec![self.candidate(
            "yahoo".to_string(),
            &self.yahoo_base,
            yahoo,
            Vec::new(),
            normalize.clone(),
        )];

        match &self.rapid_key {
            Some(key) => {
                for host in &self.rapid_hosts {
                    let headers = vec![
                        ("X-RapidAPI-Key", key.clone()),
                        ("X-RapidAPI-Host", host.host.clone()),
                    ];
                    out.push(self.candidate(
                        format!("rapidapi:{}", host.host),
                        &host.base_url,
                        rapid.clone(),
                        headers,
                        normalize.clone(),
                    ));
                }
            }
            None if !self.rapid_hosts.is_empty() => {
                debug!("RapidAPI key not configured, keyed hosts skipped");
            }
            None => {}
        }
        out
    }

    fn candidate<T, N>(
        &self,
        name: String,
        base: &str,
        endpoint: Endpoint,
        headers: Vec<(&'static str, String)>,
        normalize: N,
    ) -> Candidate<'static, T>
    where
        T: Send + 'static,
        N: Fn(Value) -> Result<T, CandidateError> + Send + 'static,
    {
        let http = self.http.clone();
        let base = base.to_string();
        Candidate::new(name, move || async move {
            let url = endpoint.url(&base)?;
            let payload = http.get_json(url.as_str(), &endpoint.query, &headers).await?;
            normalize(payload)
        })
    }

    fn quote_candidates(&self, symbols: &[String]) -> Vec<Candidate<'static, Vec<Quote>>> {
        let joined = symbols.join(",");
        let requested = symbols.to_vec();
        self.candidates(
            Endpoint::new("/v7/finance/quote").query("symbols", joined.clone()),
            Endpoint::new("/market/v2/get-quotes")
                .query("region", DEFAULT_REGION)
                .query("symbols", joined),
            move |payload| align_quotes(&requested, normalize_quotes(&payload)),
        )
    }

    /// Quotes for `symbols` in input order; never fails
    ///
    /// When every backend fails, each symbol gets a placeholder entry.
    pub async fn quotes(&self, symbols: &[String]) -> Fetched<Vec<Quote>> {
        fetch_or_placeholder("quotes", self.quote_candidates(symbols), |_| {
            placeholder_quotes(symbols)
        })
        .await
    }

    pub async fn search(&self, query: &str) -> Result<Fetched<Vec<SearchHit>>, ExhaustionError> {
        let candidates = self.candidates(
            Endpoint::new("/v1/finance/search")
                .query("q", query)
                .query("quotesCount", "10")
                .query("newsCount", "0"),
            Endpoint::new("/auto-complete")
                .query("q", query)
                .query("region", DEFAULT_REGION),
            |payload| Ok(normalize_search(&payload)),
        );
        fetch_first("search", candidates).await
    }

    pub async fn history(
        &self,
        symbol: &str,
        range: HistoryRange,
    ) -> Result<Fetched<History>, ExhaustionError> {
        let candidates = self.candidates(
            Endpoint::new("/v8/finance/chart")
                .segment(symbol)
                .query("range", range.as_str())
                .query("interval", range.interval()),
            Endpoint::new("/stock/v3/get-chart")
                .query("symbol", symbol)
                .query("range", range.as_str())
                .query("interval", range.interval())
                .query("region", DEFAULT_REGION),
            |payload| normalize_history(&payload),
        );
        fetch_first("history", candidates).await
    }

    pub async fn news(&self, symbol: &str) -> Result<Fetched<Vec<NewsItem>>, ExhaustionError> {
        let candidates = self.candidates(
            Endpoint::new("/v1/finance/search")
                .query("q", symbol)
                .query("quotesCount", "0")
                .query("newsCount", "10"),
            Endpoint::new("/auto-complete")
                .query("q", symbol)
                .query("region", DEFAULT_REGION),
            |payload| Ok(normalize_news(&payload)),
        );
        fetch_first("news", candidates).await
    }

    /// quoteSummary modules for a single symbol
    pub async fn fundamentals(
        &self,
        symbol: &str,
        modules: &[String],
    ) -> Result<Fetched<Value>, ExhaustionError> {
        let wanted = modules.to_vec();
        let candidates = self.candidates(
            Endpoint::new("/v10/finance/quoteSummary")
                .segment(symbol)
                .query("modules", modules.join(",")),
            Endpoint::new("/stock/v2/get-summary")
                .query("symbol", symbol)
                .query("region", DEFAULT_REGION),
            move |payload| normalize_summary(&payload, &wanted),
        );
        fetch_first("fundamentals", candidates).await
    }

    pub async fn trending(&self, region: &str) -> Result<Fetched<Vec<String>>, ExhaustionError> {
        let candidates = self.candidates(
            Endpoint::new("/v1/finance/trending")
                .segment(region)
                .query("count", "20"),
            Endpoint::new("/market/get-trending-tickers").query("region", region),
            |payload| require_non_empty(normalize_trending(&payload), "trending symbols"),
        );
        fetch_first("trending", candidates).await
    }

    /// Live overview rows, or the static fallback when no backend answers
    pub async fn overview(&self) -> Fetched<Vec<OverviewItem>> {
        let symbols: Vec<String> = OVERVIEW_SYMBOLS.iter().map(|(s, ..)| s.to_string()).collect();
        let joined = symbols.join(",");
        let candidates = self.candidates(
            Endpoint::new("/v7/finance/quote").query("symbols", joined.clone()),
            Endpoint::new("/market/v2/get-quotes")
                .query("region", DEFAULT_REGION)
                .query("symbols", joined),
            move |payload| {
                let quotes = align_quotes(&symbols, normalize_quotes(&payload))?;
                require_non_empty(overview_from_quotes(&quotes), "overview quotes")
            },
        );
        fetch_or_placeholder("overview", candidates, |_| overview_fallback()).await
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        // RapidAPI mirrors sometimes wrap numbers as {"raw": 1.0, "fmt": "1.00"}
        Value::Object(obj) => obj.get("raw").and_then(Value::as_f64),
        _ => None,
    }
}

fn field_f64(obj: &Value, name: &str) -> Option<f64> {
    obj.get(name).and_then(number)
}

/// Epoch seconds to milliseconds; out-of-range times are dropped
fn epoch_ms(secs: f64) -> Option<i64> {
    if !secs.is_finite() {
        return None;
    }
    (secs as i64).checked_mul(1000)
}

fn field_str(obj: &Value, name: &str) -> Option<String> {
    obj.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads `quoteResponse.result[]`
pub fn normalize_quotes(payload: &Value) -> Vec<Quote> {
    payload
        .pointer("/quoteResponse/result")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(Quote::from_upstream).collect())
        .unwrap_or_default()
}

/// Orders `live` like `requested`, filling gaps with placeholders
///
/// Fails with `EmptyResult` when none of the requested symbols came back.
pub fn align_quotes(requested: &[String], live: Vec<Quote>) -> Result<Vec<Quote>, CandidateError> {
    let aligned: Vec<Quote> = requested
        .iter()
        .map(|symbol| {
            live.iter()
                .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
                .cloned()
                .unwrap_or_else(|| Quote::placeholder(symbol))
        })
        .collect();

    if aligned.iter().all(|q| q.placeholder) {
        return Err(CandidateError::EmptyResult(format!(
            "no quotes for {}",
            requested.join(",")
        )));
    }
    Ok(aligned)
}

/// One placeholder per requested symbol, in request order
pub fn placeholder_quotes(requested: &[String]) -> Vec<Quote> {
    requested.iter().map(|s| Quote::placeholder(s)).collect()
}

/// Reads `quotes[]` from a search/auto-complete response
pub fn normalize_search(payload: &Value) -> Vec<SearchHit> {
    payload
        .get("quotes")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|raw| {
                    Some(SearchHit {
                        symbol: field_str(raw, "symbol")?,
                        shortname: field_str(raw, "shortname"),
                        longname: field_str(raw, "longname"),
                        exchange: field_str(raw, "exchDisp").or_else(|| field_str(raw, "exchange")),
                        quote_type: field_str(raw, "quoteType"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Reads `chart.result[0]` into candles, skipping bars with missing prices
pub fn normalize_history(payload: &Value) -> Result<History, CandidateError> {
    let Some(result) = payload.pointer("/chart/result/0") else {
        let reason = payload
            .pointer("/chart/error/description")
            .and_then(Value::as_str)
            .unwrap_or("missing chart result");
        return Err(CandidateError::EmptyResult(reason.to_string()));
    };

    let meta_raw = result.get("meta").cloned().unwrap_or(Value::Null);
    let meta = ChartMeta {
        symbol: field_str(&meta_raw, "symbol"),
        exchange: field_str(&meta_raw, "exchangeName"),
        currency: field_str(&meta_raw, "currency"),
        regular_market_price: field_f64(&meta_raw, "regularMarketPrice"),
    };

    let empty = Vec::new();
    let timestamps = result
        .get("timestamp")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let bars = result.pointer("/indicators/quote/0").cloned().unwrap_or(Value::Null);
    let series = |name: &str| -> Vec<Option<f64>> {
        bars.get(name)
            .and_then(Value::as_array)
            .map(|values| values.iter().map(number).collect())
            .unwrap_or_default()
    };
    let (open, high, low, close, volume) = (
        series("open"),
        series("high"),
        series("low"),
        series("close"),
        series("volume"),
    );
    let at = |values: &Vec<Option<f64>>, i: usize| values.get(i).copied().flatten();

    let candles: Vec<Candle> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(Candle {
                t: ts.as_i64()?.checked_mul(1000)?,
                o: at(&open, i)?,
                h: at(&high, i)?,
                l: at(&low, i)?,
                c: at(&close, i)?,
                v: at(&volume, i),
            })
        })
        .collect();

    Ok(History {
        meta,
        candles: require_non_empty(candles, "candles")?,
    })
}

/// Reads `news[]` from a search/auto-complete response
pub fn normalize_news(payload: &Value) -> Vec<NewsItem> {
    payload
        .get("news")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|raw| {
                    Some(NewsItem {
                        title: field_str(raw, "title")?,
                        link: field_str(raw, "link")?,
                        publisher: field_str(raw, "publisher"),
                        published_at: field_f64(raw, "providerPublishTime").and_then(epoch_ms),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts the requested quoteSummary modules
///
/// Accepts both Yahoo's `quoteSummary.result[0]` envelope and the flat
/// module map returned by RapidAPI's get-summary.
pub fn normalize_summary(payload: &Value, modules: &[String]) -> Result<Value, CandidateError> {
    if let Some(summary) = payload.get("quoteSummary") {
        return match summary.pointer("/result/0") {
            Some(result) if result.as_object().map(|o| !o.is_empty()).unwrap_or(false) => {
                Ok(result.clone())
            }
            _ => {
                let reason = summary
                    .pointer("/error/description")
                    .and_then(Value::as_str)
                    .unwrap_or("no quoteSummary result");
                Err(CandidateError::EmptyResult(reason.to_string()))
            }
        };
    }

    let Some(flat) = payload.as_object() else {
        return Err(CandidateError::Decode("expected a JSON object".to_string()));
    };
    let picked: Map<String, Value> = modules
        .iter()
        .filter_map(|m| flat.get(m).map(|v| (m.clone(), v.clone())))
        .filter(|(_, v)| !v.is_null())
        .collect();
    if picked.is_empty() {
        Err(CandidateError::EmptyResult(format!(
            "none of {} present",
            modules.join(",")
        )))
    } else {
        Ok(Value::Object(picked))
    }
}

/// Reads `finance.result[0].quotes[].symbol`
pub fn normalize_trending(payload: &Value) -> Vec<String> {
    payload
        .pointer("/finance/result/0/quotes")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(|q| field_str(q, "symbol")).collect())
        .unwrap_or_default()
}

/// Overview rows for the live (non-placeholder) quotes among `quotes`
pub fn overview_from_quotes(quotes: &[Quote]) -> Vec<OverviewItem> {
    quotes
        .iter()
        .filter(|q| !q.placeholder)
        .map(|q| {
            let known = OVERVIEW_SYMBOLS.iter().find(|(s, ..)| *s == q.symbol);
            OverviewItem {
                symbol: q.symbol.clone(),
                name: q
                    .short_name
                    .clone()
                    .or_else(|| known.map(|(_, name, ..)| name.to_string()))
                    .unwrap_or_else(|| q.symbol.clone()),
                price: q.regular_market_price,
                change_pct: q.regular_market_change_percent.map(round2),
                change_abs: q.regular_market_change.map(round2),
                high: q.regular_market_day_high,
                low: q.regular_market_day_low,
                currency: q.currency.clone(),
                market_time: q.regular_market_time,
                weather_note: known
                    .map(|(_, _, note, _)| note.to_string())
                    .unwrap_or_else(|| "Weather sensitivity".to_string()),
            }
        })
        .collect()
}

/// Static overview rows served when no live data is available
pub fn overview_fallback() -> Vec<OverviewItem> {
    OVERVIEW_SYMBOLS
        .iter()
        .map(|(symbol, name, _, fallback_note)| OverviewItem {
            symbol: symbol.to_string(),
            name: name.to_string(),
            price: None,
            change_pct: None,
            change_abs: None,
            high: None,
            low: None,
            currency: None,
            market_time: None,
            weather_note: fallback_note.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quote_json(symbol: &str, price: f64) -> Value {
        json!({
            "symbol": symbol,
            "shortName": format!("{} Inc.", symbol),
            "regularMarketPrice": price,
            "regularMarketChange": 1.234,
            "regularMarketChangePercent": 0.5678,
            "regularMarketTime": 1_700_000_000
        })
    }

    fn quote_response(quotes: Vec<Value>) -> Value {
        json!({"quoteResponse": {"result": quotes, "error": null}})
    }

    fn client(yahoo: &str, key: Option<&str>, hosts: Vec<RapidHost>) -> FinanceClient {
        let http = HttpSource::new(Duration::from_secs(5)).unwrap();
        FinanceClient::new(http, yahoo, key.map(str::to_string), hosts)
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_quotes_handles_raw_wrapped_numbers() {
        let payload = quote_response(vec![json!({
            "symbol": "AAPL",
            "regularMarketPrice": {"raw": 189.5, "fmt": "189.50"}
        })]);
        let quotes = normalize_quotes(&payload);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].regular_market_price, Some(189.5));
        assert!(!quotes[0].placeholder);
    }

    #[test]
    fn test_align_quotes_fills_gaps_in_input_order() {
        let live = vec![
            Quote::from_upstream(&quote_json("MSFT", 2.0)).unwrap(),
            Quote::from_upstream(&quote_json("AAPL", 1.0)).unwrap(),
        ];
        let aligned = align_quotes(&syms(&["AAPL", "ZZZZ", "MSFT"]), live).unwrap();

        let order: Vec<_> = aligned.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(order, vec!["AAPL", "ZZZZ", "MSFT"]);
        assert!(aligned[1].placeholder);
        assert_eq!(aligned[2].regular_market_price, Some(2.0));
    }

    #[test]
    fn test_align_quotes_with_no_matches_is_empty_result() {
        let err = align_quotes(&syms(&["AAPL"]), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), "empty_result");
    }

    #[tokio::test]
    async fn test_quotes_fall_back_to_rapidapi_with_headers() {
        let yahoo = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&yahoo)
            .await;

        let rapid = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/market/v2/get-quotes"))
            .and(query_param("symbols", "AAPL,MSFT"))
            .and(header("X-RapidAPI-Key", "secret"))
            .and(header("X-RapidAPI-Host", "yh-finance.p.rapidapi.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_response(vec![
                quote_json("AAPL", 100.0),
                quote_json("MSFT", 200.0),
            ])))
            .mount(&rapid)
            .await;

        let finance = client(
            &yahoo.uri(),
            Some("secret"),
            vec![RapidHost::with_base_url("yh-finance.p.rapidapi.com", rapid.uri())],
        );
        let fetched = finance.quotes(&syms(&["AAPL", "MSFT"])).await;

        assert!(!fetched.degraded);
        assert_eq!(fetched.source, "rapidapi:yh-finance.p.rapidapi.com");
        assert_eq!(fetched.value[0].regular_market_price, Some(100.0));
        assert_eq!(fetched.value[0].regular_market_time, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_quotes_all_backends_down_yield_placeholders_in_order() {
        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_response(vec![])))
            .mount(&down)
            .await;

        let finance = client(
            &down.uri(),
            Some("secret"),
            vec![RapidHost::with_base_url("h1", down.uri()), RapidHost::with_base_url("h2", down.uri())],
        );
        let fetched = finance.quotes(&syms(&["AAPL", "ZZZZINVALID"])).await;

        assert!(fetched.degraded);
        assert_eq!(fetched.value.len(), 2);
        assert_eq!(fetched.value[0].symbol, "AAPL");
        assert_eq!(fetched.value[1].symbol, "ZZZZINVALID");
        assert!(fetched.value.iter().all(|q| q.placeholder));
    }

    #[tokio::test]
    async fn test_rapid_hosts_skipped_without_key() {
        let yahoo = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&yahoo)
            .await;

        let finance = client(&yahoo.uri(), None, vec![RapidHost::new("yh-finance.p.rapidapi.com")]);
        let err = finance.search("apple").await.unwrap_err();

        assert_eq!(err.attempted(), vec!["yahoo"]);
    }

    #[tokio::test]
    async fn test_search_accepts_empty_results() {
        let yahoo = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/finance/search"))
            .and(query_param("q", "nothing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"quotes": []})))
            .mount(&yahoo)
            .await;

        let fetched = client(&yahoo.uri(), None, Vec::new()).search("nothing").await.unwrap();
        assert!(fetched.value.is_empty());
        assert_eq!(fetched.source, "yahoo");
    }

    #[tokio::test]
    async fn test_history_symbol_is_path_encoded() {
        let yahoo = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v8/finance/chart/(\^|%5E)GSPC$"))
            .and(query_param("range", "5d"))
            .and(query_param("interval", "15m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {"result": [{
                    "meta": {"symbol": "^GSPC", "exchangeName": "SNP", "currency": "USD"},
                    "timestamp": [10, 20],
                    "indicators": {"quote": [{
                        "open": [1.0, 2.0], "high": [1.5, 2.5],
                        "low": [0.5, 1.5], "close": [1.2, 2.2], "volume": [100, 200]
                    }]}
                }], "error": null}
            })))
            .mount(&yahoo)
            .await;

        let fetched = client(&yahoo.uri(), None, Vec::new())
            .history("^GSPC", HistoryRange::FiveDays)
            .await
            .unwrap();

        assert_eq!(fetched.value.candles.len(), 2);
        assert_eq!(fetched.value.meta.exchange.as_deref(), Some("SNP"));
    }

    #[test]
    fn test_normalize_history_skips_incomplete_bars() {
        let payload = json!({"chart": {"result": [{
            "meta": {},
            "timestamp": [1, 2, 3],
            "indicators": {"quote": [{
                "open": [1.0, null, 3.0], "high": [1.0, 2.0, 3.0],
                "low": [1.0, 2.0, 3.0], "close": [1.0, 2.0, 3.0]
            }]}
        }]}});
        let history = normalize_history(&payload).unwrap();
        let times: Vec<_> = history.candles.iter().map(|c| c.t).collect();
        assert_eq!(times, vec![1_000, 3_000]);
        assert!(history.candles[0].v.is_none());
    }

    #[test]
    fn test_out_of_range_timestamps_are_dropped() {
        let payload = json!({"chart": {"result": [{
            "meta": {},
            "timestamp": [i64::MAX, 2],
            "indicators": {"quote": [{
                "open": [1.0, 2.0], "high": [1.0, 2.0],
                "low": [1.0, 2.0], "close": [1.0, 2.0]
            }]}
        }]}});
        let times: Vec<_> = normalize_history(&payload).unwrap().candles.iter().map(|c| c.t).collect();
        assert_eq!(times, vec![2_000]);

        let mut raw = quote_json("AAPL", 1.0);
        raw["regularMarketTime"] = json!(1e300);
        let quote = Quote::from_upstream(&raw).unwrap();
        assert_eq!(quote.regular_market_time, None);
        assert_eq!(quote.regular_market_price, Some(1.0));

        let news = normalize_news(&json!({"news": [
            {"title": "Late", "link": "https://x/2", "providerPublishTime": 9.3e18}
        ]}));
        assert_eq!(news[0].published_at, None);
    }

    #[test]
    fn test_normalize_history_reports_chart_error() {
        let payload = json!({"chart": {"result": null, "error": {"description": "No data found"}}});
        let err = normalize_history(&payload).unwrap_err();
        assert_eq!(err, CandidateError::EmptyResult("No data found".to_string()));
    }

    #[test]
    fn test_normalize_news_requires_title_and_link() {
        let payload = json!({"news": [
            {"title": "Up", "link": "https://x/1", "publisher": "Wire", "providerPublishTime": 5},
            {"title": "No link"}
        ]});
        let news = normalize_news(&payload);
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].published_at, Some(5_000));
    }

    #[test]
    fn test_normalize_summary_accepts_both_shapes() {
        let modules = syms(&["assetProfile"]);
        let yahoo = json!({"quoteSummary": {"result": [{"assetProfile": {"sector": "Tech"}}]}});
        assert_eq!(
            normalize_summary(&yahoo, &modules).unwrap(),
            json!({"assetProfile": {"sector": "Tech"}})
        );

        let rapid = json!({"assetProfile": {"sector": "Tech"}, "price": {}});
        assert_eq!(
            normalize_summary(&rapid, &modules).unwrap(),
            json!({"assetProfile": {"sector": "Tech"}})
        );

        let missing = json!({"price": {}});
        assert_eq!(normalize_summary(&missing, &modules).unwrap_err().kind(), "empty_result");
    }

    #[test]
    fn test_normalize_trending() {
        let payload = json!({"finance": {"result": [{"quotes": [{"symbol": "NVDA"}, {"symbol": "TSLA"}]}]}});
        assert_eq!(normalize_trending(&payload), vec!["NVDA", "TSLA"]);
        assert!(normalize_trending(&json!({})).is_empty());
    }

    #[test]
    fn test_overview_rounds_and_annotates() {
        let quotes = vec![Quote::from_upstream(&quote_json("CL=F", 80.0)).unwrap(), Quote::placeholder("NG=F")];
        let rows = overview_from_quotes(&quotes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_pct, Some(0.57));
        assert_eq!(rows[0].change_abs, Some(1.23));
        assert_eq!(rows[0].weather_note, "Energy demand context");
    }

    #[test]
    fn test_overview_fallback_has_no_prices() {
        let rows = overview_fallback();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.price.is_none()));
        assert_eq!(rows[0].weather_note, "Cooling demand context");
    }

    #[test]
    fn test_history_range_parsing_and_intervals() {
        assert_eq!("".parse::<HistoryRange>().unwrap(), HistoryRange::OneDay);
        assert_eq!("1MO".parse::<HistoryRange>().unwrap().interval(), "1h");
        assert!("2w".parse::<HistoryRange>().is_err());
    }

    #[test]
    fn test_symbol_region_and_module_validation() {
        assert_eq!(validate_symbol(" brk-b ").unwrap(), "BRK-B");
        assert!(validate_symbol("AAPL; DROP").is_err());
        assert_eq!(validate_region(None).unwrap(), "US");
        assert_eq!(validate_region(Some("gb")).unwrap(), "GB");
        assert!(validate_region(Some("usa")).is_err());
        assert_eq!(
            normalize_modules(Some("summaryProfile, assetProfile,assetProfile")).unwrap(),
            syms(&["assetProfile", "summaryProfile"])
        );
        assert_eq!(normalize_modules(None).unwrap(), syms(&["assetProfile", "summaryProfile"]));
        assert!(normalize_modules(Some("asset/Profile")).is_err());
    }

    #[test]
    fn test_quote_placeholder_serializes_flag() {
        let value = serde_json::to_value(Quote::placeholder("AAPL")).unwrap();
        assert_eq!(value["placeholder"], json!(true));
        assert_eq!(value["regularMarketPrice"], Value::Null);

        let live = serde_json::to_value(Quote::from_upstream(&quote_json("AAPL", 1.0)).unwrap()).unwrap();
        assert!(live.get("placeholder").is_none());
    }
}
