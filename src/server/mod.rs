//! HTTP proxy server
//!
//! Serves the dashboard API under `/api` with permissive CORS so a static
//! dashboard on any origin can call it.

pub mod envelope;
pub mod routes;
mod state;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use state::AppState;
use sweeper::{SweepConfig, SweepHandle};

use crate::config::{ConfigError, ServerConfig};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the application router around `state`
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the proxy until Ctrl-C
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let dashboard = config.build_dashboard()?;

    let sweeper = config.sweep_interval.map(|interval| {
        info!(interval_secs = interval.as_secs(), "starting background cache sweeps");
        SweepHandle::spawn(
            dashboard.cache().clone(),
            SweepConfig {
                interval,
                multiplier: config.cleanup_multiplier,
            },
        )
    });

    let state = Arc::new(AppState::new(dashboard, config.cleanup_multiplier));
    let app = build_router(state);

    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.addr,
            source,
        })?;
    info!("skydesk listening on http://{}", config.addr);

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal, stopping server");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, ManualClock, MemoryStore, TtlCache};
    use crate::dashboard::Dashboard;
    use crate::fetch::HttpSource;
    use crate::upstream::{FinanceClient, HeadlineFeed, HeadlinesClient, WeatherClient};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_app(upstream: &str) -> Router {
        let http = HttpSource::new(Duration::from_secs(5)).unwrap();
        let cache = TtlCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            CachePolicy::server_defaults(),
        );
        let dashboard = Dashboard::new(
            cache,
            WeatherClient::new(http.clone(), vec![upstream.to_string()], Some("key".into())),
            FinanceClient::new(http.clone(), upstream, None, Vec::new()),
            HeadlinesClient::new(http, vec![HeadlineFeed::nasa_at(format!("{}/rss.xml", upstream))]),
        );
        build_router(Arc::new(AppState::new(dashboard, 4)))
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(create_test_app("http://127.0.0.1:9"), "GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_weather_envelope_and_cache_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Berlin"})))
            .expect(1)
            .mount(&server)
            .await;

        let app = create_test_app(&server.uri());
        let uri = "/api/cache/weather?lat=52.52&lon=13.40&units=metric";

        let (status, first) = call(app.clone(), "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cached"], false);
        assert_eq!(first["data"]["name"], "Berlin");
        assert_eq!(first["ts"], 1_700_000_000_000i64);

        let (_, second) = call(app, "GET", uri).await;
        assert_eq!(second["cached"], true);
    }

    #[tokio::test]
    async fn test_missing_coordinates_is_bad_request() {
        let (status, body) =
            call(create_test_app("http://127.0.0.1:9"), "GET", "/api/cache/forecast?lat=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "lon is required");
    }

    #[tokio::test]
    async fn test_exhaustion_is_bad_gateway() {
        let (status, body) = call(
            create_test_app("http://127.0.0.1:9"),
            "GET",
            "/api/quotes/search?q=apple",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["attempts"][0]["candidate"], "yahoo");
    }

    #[tokio::test]
    async fn test_quotes_placeholders_flagged_as_fallback() {
        let (status, body) = call(
            create_test_app("http://127.0.0.1:9"),
            "GET",
            "/api/quotes?symbols=AAPL,MSFT",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fallback"], true);
        assert_eq!(body["source"], "placeholder");
        assert_eq!(body["quotes"][1]["symbol"], "MSFT");
        assert_eq!(body["data"][1]["placeholder"], true);
    }

    #[tokio::test]
    async fn test_overview_fallback_notice() {
        let (_, body) = call(create_test_app("http://127.0.0.1:9"), "GET", "/api/finance/overview").await;
        assert_eq!(body["notice"], "Fallback static data - live fetch failed");
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_headlines_fallback_flag() {
        let (_, body) = call(create_test_app("http://127.0.0.1:9"), "GET", "/api/news/headlines").await;
        assert_eq!(body["fallback"], true);
        assert_eq!(body["items"][0]["id"], "f1");
    }

    #[tokio::test]
    async fn test_cleanup_requires_post_and_positive_multiplier() {
        let app = create_test_app("http://127.0.0.1:9");

        let (status, body) = call(app.clone(), "POST", "/api/cache/cleanup").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "removed": 0, "multiplier": 4}));

        let (status, _) = call(app.clone(), "POST", "/api/cache/cleanup?multiplier=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app, "GET", "/api/cache/cleanup").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_headers_present() {
        let response = create_test_app("http://127.0.0.1:9")
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
