// API routes

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::envelope::{ApiError, Data, Envelope};
use super::state::AppState;
use crate::upstream::finance::{FundamentalsItem, History, NewsItem, OverviewItem, Quote, SearchHit};
use crate::upstream::news::Headline;
use crate::upstream::{Units, WeatherResource};

// ==================== Response Bodies ====================

#[derive(Debug, Serialize)]
struct QuotesBody {
    quotes: Vec<Quote>,
    /// Alias kept for dashboards that read `data`
    data: Vec<Quote>,
}

#[derive(Debug, Serialize)]
struct ResultsBody {
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct NewsBody {
    news: Vec<NewsItem>,
}

#[derive(Debug, Serialize)]
struct ItemsBody<T> {
    items: Vec<T>,
}

// ==================== Query Parameters ====================

#[derive(Debug, Deserialize)]
struct CoordsQuery {
    lat: Option<String>,
    lon: Option<String>,
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolsQuery {
    symbols: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    symbol: Option<String>,
    range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolQuery {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundamentalsQuery {
    symbols: Option<String>,
    modules: Option<String>,
    force: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegionQuery {
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CleanupQuery {
    multiplier: Option<String>,
}

// ==================== Helpers ====================

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", name)))
}

fn coordinate(value: Option<String>, name: &str) -> Result<f64, ApiError> {
    required(value, name)?
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{} must be a number", name)))
}

fn units(value: Option<&str>) -> Result<Units, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(Units::default()),
        Some(raw) => raw.parse().map_err(ApiError::BadRequest),
    }
}

fn truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

// ==================== Route Handlers ====================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "ok": true, "uptimeSecs": state.uptime_secs() }))
}

async fn weather_resource(
    state: &AppState,
    resource: WeatherResource,
    params: CoordsQuery,
) -> Result<Envelope<Data<Value>>, ApiError> {
    let lat = coordinate(params.lat, "lat")?;
    let lon = coordinate(params.lon, "lon")?;
    let units = units(params.units.as_deref())?;
    let served = state.dashboard.weather(resource, lat, lon, units).await?;
    Ok(Envelope::from_served(served, |data| Data { data }))
}

async fn weather_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CoordsQuery>,
) -> Result<Envelope<Data<Value>>, ApiError> {
    weather_resource(&state, WeatherResource::Current, params).await
}

async fn forecast_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CoordsQuery>,
) -> Result<Envelope<Data<Value>>, ApiError> {
    weather_resource(&state, WeatherResource::Forecast, params).await
}

async fn air_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CoordsQuery>,
) -> Result<Envelope<Data<Value>>, ApiError> {
    weather_resource(&state, WeatherResource::AirQuality, params).await
}

async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CleanupQuery>,
) -> Result<Json<Value>, ApiError> {
    let multiplier = match params.multiplier.as_deref().map(str::trim) {
        None | Some("") => state.cleanup_multiplier,
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|m| *m >= 1)
            .ok_or_else(|| ApiError::BadRequest("multiplier must be a positive integer".into()))?,
    };
    let removed = state.dashboard.cleanup(multiplier);
    info!(removed, multiplier, "cache cleanup requested");
    Ok(Json(json!({ "ok": true, "removed": removed, "multiplier": multiplier })))
}

async fn quotes_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SymbolsQuery>,
) -> Result<Envelope<QuotesBody>, ApiError> {
    let symbols = required(params.symbols, "symbols")?;
    let served = state.dashboard.quotes(&symbols).await?;
    Ok(Envelope::from_served(served, |quotes| QuotesBody {
        data: quotes.clone(),
        quotes,
    }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Envelope<ResultsBody>, ApiError> {
    let q = required(params.q, "q")?;
    let served = state.dashboard.search(&q).await?;
    Ok(Envelope::from_served(served, |results| ResultsBody { results }))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Envelope<History>, ApiError> {
    let symbol = required(params.symbol, "symbol")?;
    let range = params.range.unwrap_or_default();
    let served = state.dashboard.history(&symbol, &range).await?;
    Ok(Envelope::from_served(served, |history| history))
}

async fn news_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SymbolQuery>,
) -> Result<Envelope<NewsBody>, ApiError> {
    let symbol = required(params.symbol, "symbol")?;
    let served = state.dashboard.news(&symbol).await?;
    Ok(Envelope::from_served(served, |news| NewsBody { news }))
}

async fn fundamentals_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FundamentalsQuery>,
) -> Result<Envelope<ItemsBody<FundamentalsItem>>, ApiError> {
    let symbols = required(params.symbols, "symbols")?;
    let served = state
        .dashboard
        .fundamentals(&symbols, params.modules.as_deref(), truthy(params.force.as_deref()))
        .await?;
    Ok(Envelope::from_served(served, |items| ItemsBody { items }))
}

async fn trending_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegionQuery>,
) -> Result<Envelope<Data<Vec<String>>>, ApiError> {
    let served = state.dashboard.trending(params.region.as_deref()).await?;
    Ok(Envelope::from_served(served, |data| Data { data }))
}

async fn overview_handler(
    State(state): State<Arc<AppState>>,
) -> Envelope<Data<Vec<OverviewItem>>> {
    let served = state.dashboard.overview().await;
    Envelope::from_served(served, |data| Data { data })
}

async fn headlines_handler(State(state): State<Arc<AppState>>) -> Envelope<ItemsBody<Headline>> {
    let served = state.dashboard.headlines().await;
    Envelope::from_served(served, |items| ItemsBody { items })
}

/// Every `/api` route
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_handler))
        // Weather proxy
        .route("/cache/weather", get(weather_handler))
        .route("/cache/forecast", get(forecast_handler))
        .route("/cache/air", get(air_handler))
        .route("/cache/cleanup", post(cleanup_handler))
        // Finance
        .route("/quotes", get(quotes_handler))
        .route("/quotes/search", get(search_handler))
        .route("/quotes/history", get(history_handler))
        .route("/quotes/news", get(news_handler))
        .route("/quotes/fundamentals/batch", get(fundamentals_handler))
        .route("/quotes/trending", get(trending_handler))
        .route("/finance/overview", get(overview_handler))
        // News
        .route("/news/headlines", get(headlines_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(None, "q").is_err());
        assert!(required(Some("  ".into()), "q").is_err());
        assert_eq!(required(Some("x".into()), "q").unwrap(), "x");
    }

    #[test]
    fn test_coordinate_parsing() {
        assert_eq!(coordinate(Some(" -33.5 ".into()), "lat").unwrap(), -33.5);
        let err = coordinate(Some("north".into()), "lat").unwrap_err();
        assert_eq!(err.to_string(), "lat must be a number");
    }

    #[test]
    fn test_units_default_to_metric() {
        assert_eq!(units(None).unwrap(), Units::Metric);
        assert_eq!(units(Some("imperial")).unwrap(), Units::Imperial);
        assert!(units(Some("kelvin")).is_err());
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(Some("1")));
        assert!(truthy(Some("TRUE")));
        assert!(!truthy(Some("0")));
        assert!(!truthy(None));
    }
}
