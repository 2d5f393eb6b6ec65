//! OpenWeather API client
//!
//! Builds the candidate list for current conditions, the 5 day / 3 hour
//! forecast and air quality, one candidate per configured base URL. Payloads
//! are passed through verbatim; only a minimal shape check decides whether a
//! candidate succeeded.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheKey, Namespace};
use crate::fetch::{fetch_first, Candidate, CandidateError, ExhaustionError, Fetched, HttpSource};

/// Base URL for the OpenWeather 2.5 API
pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Measurement system requested from OpenWeather
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "metric" | "m" => Ok(Units::Metric),
            "imperial" | "i" => Ok(Units::Imperial),
            "standard" | "s" => Ok(Units::Standard),
            other => Err(format!(
                "Invalid units: '{}'. Valid units: metric, imperial, standard",
                other
            )),
        }
    }
}

/// The OpenWeather resources the dashboard proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherResource {
    Current,
    Forecast,
    AirQuality,
}

impl WeatherResource {
    fn path(&self) -> &'static str {
        match self {
            WeatherResource::Current => "weather",
            WeatherResource::Forecast => "forecast",
            WeatherResource::AirQuality => "air_pollution",
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            WeatherResource::Current => Namespace::WEATHER,
            WeatherResource::Forecast => Namespace::FORECAST,
            WeatherResource::AirQuality => Namespace::AIR,
        }
    }

    /// Air quality does not depend on units
    fn uses_units(&self) -> bool {
        !matches!(self, WeatherResource::AirQuality)
    }

    /// Cache key for a request; coordinates are rounded so nearby points share it
    pub fn cache_key(&self, lat: f64, lon: f64, units: Units) -> String {
        let tag = match self {
            WeatherResource::Current => "w",
            WeatherResource::Forecast => "f",
            WeatherResource::AirQuality => "a",
        };
        let key = CacheKey::new(tag).coord("lat", lat).coord("lon", lon);
        if self.uses_units() {
            key.param("units", units.as_str()).build()
        } else {
            key.build()
        }
    }

    /// Minimal usefulness check on a decoded payload
    fn check(&self, payload: &Value) -> Result<(), CandidateError> {
        if !payload.is_object() {
            return Err(CandidateError::Decode("expected a JSON object".to_string()));
        }
        match self {
            WeatherResource::Current => Ok(()),
            WeatherResource::Forecast | WeatherResource::AirQuality => {
                let has_rows = payload
                    .get("list")
                    .and_then(Value::as_array)
                    .map(|list| !list.is_empty())
                    .unwrap_or(false);
                if has_rows {
                    Ok(())
                } else {
                    Err(CandidateError::EmptyResult(format!("no {} rows", self.path())))
                }
            }
        }
    }
}

/// Validates a latitude/longitude pair
pub fn validate_coords(lat: f64, lon: f64) -> Result<(), String> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("Invalid latitude: {}", lat));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("Invalid longitude: {}", lon));
    }
    Ok(())
}

/// Client for fetching weather data from one or more OpenWeather bases
#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: HttpSource,
    bases: Vec<String>,
    api_key: Option<String>,
}

impl WeatherClient {
    /// Create a client trying `bases` in order
    pub fn new(http: HttpSource, bases: Vec<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            bases,
            api_key,
        }
    }

    /// Candidates for one request, in preference order
    pub fn candidates(
        &self,
        resource: WeatherResource,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Vec<Candidate<'static, Value>> {
        let Some(api_key) = self.api_key.clone() else {
            return vec![Candidate::unavailable(
                "openweather",
                CandidateError::MissingCredential("OPENWEATHER_KEY".to_string()),
            )];
        };

        self.bases
            .iter()
            .map(|base| {
                let http = self.http.clone();
                let url = format!("{}/{}", base.trim_end_matches('/'), resource.path());
                let mut query = vec![
                    ("lat", lat.to_string()),
                    ("lon", lon.to_string()),
                    ("appid", api_key.clone()),
                ];
                if resource.uses_units() {
                    query.push(("units", units.as_str().to_string()));
                }
                Candidate::new(candidate_name(base), move || async move {
                    let payload = http.get_json(&url, &query, &[]).await?;
                    resource.check(&payload)?;
                    Ok(payload)
                })
            })
            .collect()
    }

    /// Fetch `resource` for the given coordinates
    ///
    /// # Returns
    /// * `Ok(Fetched<Value>)` - Raw OpenWeather payload and the base that served it
    /// * `Err(ExhaustionError)` - Every base failed
    pub async fn fetch(
        &self,
        resource: WeatherResource,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<Fetched<Value>, ExhaustionError> {
        fetch_first(resource.path(), self.candidates(resource, lat, lon, units)).await
    }
}

/// Human-readable candidate name: `openweather@host`
fn candidate_name(base: &str) -> String {
    let host = base
        .split("://")
        .nth(1)
        .unwrap_or(base)
        .split('/')
        .next()
        .unwrap_or(base);
    format!("openweather@{}", host)
}

/// The handful of current-conditions fields the CLI prints
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentSummary {
    #[serde(default)]
    pub name: String,
    pub main: MainReadings,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub wind: Option<Wind>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MainReadings {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Wind {
    pub speed: f64,
}

impl CurrentSummary {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn description(&self) -> &str {
        self.weather
            .first()
            .map(|c| c.description.as_str())
            .unwrap_or("")
    }
}

/// One 3-hour forecast slot
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForecastSlot {
    pub dt: i64,
    pub main: MainReadings,
    #[serde(default)]
    pub weather: Vec<Condition>,
    /// Probability of precipitation, 0..1
    #[serde(default)]
    pub pop: Option<f64>,
}

/// Extracts the forecast slots from a forecast payload
pub fn forecast_slots(payload: &Value) -> Vec<ForecastSlot> {
    payload
        .get("list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|slot| serde_json::from_value(slot.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// OpenWeather's 1-5 air quality index as a label
pub fn aqi_label(index: u64) -> &'static str {
    match index {
        1 => "Good",
        2 => "Fair",
        3 => "Moderate",
        4 => "Poor",
        _ => "Very Poor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(bases: Vec<String>, key: Option<&str>) -> WeatherClient {
        let http = HttpSource::new(Duration::from_secs(5)).unwrap();
        WeatherClient::new(http, bases, key.map(str::to_string))
    }

    #[test]
    fn test_units_parsing() {
        assert_eq!("metric".parse::<Units>().unwrap(), Units::Metric);
        assert_eq!("I".parse::<Units>().unwrap(), Units::Imperial);
        assert!("kelvinish".parse::<Units>().is_err());
    }

    #[test]
    fn test_cache_key_rounds_and_includes_units() {
        let key = WeatherResource::Current.cache_key(50.07551, 14.43781, Units::Metric);
        assert_eq!(key, "w:lat=50.08&lon=14.44&units=metric");
        let air = WeatherResource::AirQuality.cache_key(50.07551, 14.43781, Units::Imperial);
        assert_eq!(air, "a:lat=50.08&lon=14.44");
    }

    #[test]
    fn test_validate_coords() {
        assert!(validate_coords(49.27, -123.15).is_ok());
        assert!(validate_coords(91.0, 0.0).is_err());
        assert!(validate_coords(0.0, -181.0).is_err());
        assert!(validate_coords(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_candidate_name_uses_host() {
        assert_eq!(
            candidate_name("https://api.openweathermap.org/data/2.5"),
            "openweather@api.openweathermap.org"
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let err = client(vec![OPENWEATHER_BASE_URL.to_string()], None)
            .fetch(WeatherResource::Current, 1.0, 2.0, Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.attempted(), vec!["openweather"]);
        assert_eq!(err.last().unwrap().error.kind(), "missing_credential");
    }

    #[tokio::test]
    async fn test_falls_back_to_next_base() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        let public = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("appid", "k"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"main": {"temp": 20}})))
            .mount(&public)
            .await;

        let backup = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"main": {"temp": 99}})))
            .expect(0)
            .mount(&backup)
            .await;

        let fetched = client(vec![primary.uri(), public.uri(), backup.uri()], Some("k"))
            .fetch(WeatherResource::Current, 50.0, 14.0, Units::Metric)
            .await
            .unwrap();

        assert_eq!(fetched.value, json!({"main": {"temp": 20}}));
        assert!(fetched.source.starts_with("openweather@127.0.0.1"));
    }

    #[tokio::test]
    async fn test_empty_forecast_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"list": []})))
            .mount(&server)
            .await;

        let err = client(vec![server.uri()], Some("k"))
            .fetch(WeatherResource::Forecast, 0.0, 0.0, Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.last().unwrap().error.kind(), "empty_result");
    }

    #[test]
    fn test_current_summary_from_payload() {
        let payload = json!({
            "name": "Prague",
            "main": {"temp": 21.5, "feels_like": 20.0, "humidity": 40},
            "weather": [{"description": "clear sky", "icon": "01d"}],
            "wind": {"speed": 3.2}
        });
        let summary = CurrentSummary::from_payload(&payload).unwrap();
        assert_eq!(summary.name, "Prague");
        assert!((summary.main.temp - 21.5).abs() < 0.001);
        assert_eq!(summary.description(), "clear sky");
    }

    #[test]
    fn test_forecast_slots_skip_malformed_rows() {
        let payload = json!({"list": [
            {"dt": 1, "main": {"temp": 10.0}, "pop": 0.2},
            {"dt": "bad"}
        ]});
        let slots = forecast_slots(&payload);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].dt, 1);
    }

    #[test]
    fn test_aqi_labels() {
        assert_eq!(aqi_label(1), "Good");
        assert_eq!(aqi_label(4), "Poor");
        assert_eq!(aqi_label(5), "Very Poor");
    }
}
