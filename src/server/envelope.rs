//! JSON response shapes shared by every route
//!
//! Payload responses are `{cached, ts, source?, notice?, fallback?, ...body}`;
//! failures are `{error}` with 400, or `{error, attempts}` with 502 when every
//! upstream failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::dashboard::{DashboardError, Served};
use crate::fetch::ExhaustionError;

#[derive(Debug, Serialize)]
pub struct Envelope<B> {
    pub cached: bool,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Set when the body is a placeholder or static fallback
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(flatten)]
    pub body: B,
}

impl<B: Serialize> Envelope<B> {
    /// Wraps `served`, turning its value into the response body with `body`
    pub fn from_served<T>(served: Served<T>, body: impl FnOnce(T) -> B) -> Self {
        Self {
            cached: served.cached,
            ts: served.ts,
            source: served.source,
            notice: served.notice,
            fallback: served.degraded,
            body: body(served.value),
        }
    }
}

impl<B: Serialize> IntoResponse for Envelope<B> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Exhausted(ExhaustionError),
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        match err {
            DashboardError::InvalidInput(message) => ApiError::BadRequest(message),
            DashboardError::Exhausted(exhausted) => ApiError::Exhausted(exhausted),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Exhausted(exhausted) => {
                let attempts: Vec<_> = exhausted
                    .attempts
                    .iter()
                    .map(|a| {
                        json!({
                            "candidate": a.candidate,
                            "kind": a.error.kind(),
                            "error": a.error.to_string(),
                        })
                    })
                    .collect();
                let body = json!({
                    "error": format!("all upstreams failed for {}", exhausted.resource),
                    "attempts": attempts,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Attempt, CandidateError};
    use serde_json::Value;

    fn served(degraded: bool) -> Served<Vec<i32>> {
        Served {
            value: vec![1, 2],
            cached: true,
            ts: 42,
            source: Some("yahoo".to_string()),
            degraded,
            notice: None,
        }
    }

    #[test]
    fn test_envelope_flattens_body() {
        let envelope = Envelope::from_served(served(false), |data| Data { data });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"cached": true, "ts": 42, "source": "yahoo", "data": [1, 2]})
        );
    }

    #[test]
    fn test_envelope_marks_fallback() {
        let envelope = Envelope::from_served(served(true), |data| Data { data });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["fallback"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_exhaustion_is_bad_gateway_with_attempts() {
        let err = ApiError::Exhausted(ExhaustionError {
            resource: "search".to_string(),
            attempts: vec![Attempt {
                candidate: "yahoo".to_string(),
                error: CandidateError::Transport("refused".to_string()),
            }],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["attempts"][0]["candidate"], "yahoo");
        assert_eq!(body["attempts"][0]["kind"], "transport");
    }

    #[test]
    fn test_invalid_input_is_bad_request() {
        let response = ApiError::from(DashboardError::InvalidInput("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
