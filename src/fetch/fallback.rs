//! Ordered-candidate fetching
//!
//! A logical request is described as a list of candidates, most preferred
//! first. Candidates run one at a time; the first success wins and the rest
//! are never started. Individual failures are collected and only surface,
//! all together, when every candidate has failed.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source name reported for placeholder results
pub const PLACEHOLDER_SOURCE: &str = "placeholder";

/// Why a single candidate did not produce a usable value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    /// Connection refused, DNS failure, timeout, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend reachable but answered with a non-success status
    #[error("upstream returned HTTP {status}{}", body_suffix(.body))]
    UpstreamStatus { status: u16, body: String },

    /// Response decoded but failed the minimal-content check
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// Response body was not the expected format
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The candidate needs a key that is not configured
    #[error("missing credential: {0}")]
    MissingCredential(String),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

impl CandidateError {
    /// Short machine-readable label for the error class
    pub fn kind(&self) -> &'static str {
        match self {
            CandidateError::Transport(_) => "transport",
            CandidateError::UpstreamStatus { .. } => "upstream_status",
            CandidateError::EmptyResult(_) => "empty_result",
            CandidateError::Decode(_) => "decode",
            CandidateError::MissingCredential(_) => "missing_credential",
        }
    }
}

/// One failed candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub candidate: String,
    pub error: CandidateError,
}

/// Every candidate for `resource` failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExhaustionError {
    pub resource: String,
    /// Failures in the order the candidates were tried
    pub attempts: Vec<Attempt>,
}

impl ExhaustionError {
    /// The final failure observed, if any candidate ran at all
    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Names of the candidates that were tried
    pub fn attempted(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.candidate.as_str()).collect()
    }
}

impl fmt::Display for ExhaustionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no candidates available for {}", self.resource);
        }
        write!(
            f,
            "all {} candidates failed for {}: ",
            self.attempts.len(),
            self.resource
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", attempt.candidate, attempt.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExhaustionError {}

type CandidateFuture<'a, T> = BoxFuture<'a, Result<T, CandidateError>>;

/// A named, one-shot fetch operation
pub struct Candidate<'a, T> {
    name: String,
    run: Box<dyn FnOnce() -> CandidateFuture<'a, T> + Send + 'a>,
}

impl<'a, T> Candidate<'a, T> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, CandidateError>> + Send + 'a,
    {
        Self {
            name: name.into(),
            run: Box::new(move || f().boxed()),
        }
    }

    /// A candidate that fails immediately without doing any I/O
    pub fn unavailable(name: impl Into<String>, error: CandidateError) -> Self
    where
        T: Send + 'a,
    {
        Self::new(name, move || async move { Err(error) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> fmt::Debug for Candidate<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate").field("name", &self.name).finish()
    }
}

/// A value together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    /// Name of the winning candidate, or `PLACEHOLDER_SOURCE`
    pub source: String,
    /// True when the value is a synthetic stand-in for missing data
    pub degraded: bool,
}

/// Tries each candidate in order and returns the first success
pub async fn fetch_first<T>(
    resource: &str,
    candidates: Vec<Candidate<'_, T>>,
) -> Result<Fetched<T>, ExhaustionError> {
    let mut attempts = Vec::with_capacity(candidates.len());

    for Candidate { name, run } in candidates {
        match run().await {
            Ok(value) => {
                if attempts.is_empty() {
                    debug!(resource, source = %name, "fetched from first candidate");
                } else {
                    info!(resource, source = %name, failed = attempts.len(), "fallback candidate succeeded");
                }
                return Ok(Fetched {
                    value,
                    source: name,
                    degraded: false,
                });
            }
            Err(error) => {
                warn!(resource, candidate = %name, %error, "candidate failed");
                attempts.push(Attempt {
                    candidate: name,
                    error,
                });
            }
        }
    }

    Err(ExhaustionError {
        resource: resource.to_string(),
        attempts,
    })
}

/// Like `fetch_first`, with a placeholder of last resort that always succeeds
pub async fn fetch_or_placeholder<T, P>(
    resource: &str,
    candidates: Vec<Candidate<'_, T>>,
    placeholder: P,
) -> Fetched<T>
where
    P: FnOnce(&ExhaustionError) -> T,
{
    match fetch_first(resource, candidates).await {
        Ok(fetched) => fetched,
        Err(exhausted) => {
            warn!(resource, attempted = ?exhausted.attempted(), "all candidates failed, serving placeholder");
            Fetched {
                value: placeholder(&exhausted),
                source: PLACEHOLDER_SOURCE.to_string(),
                degraded: true,
            }
        }
    }
}

/// Fails with `EmptyResult` when `items` is empty
pub fn require_non_empty<T>(items: Vec<T>, what: &str) -> Result<Vec<T>, CandidateError> {
    if items.is_empty() {
        Err(CandidateError::EmptyResult(format!("no {} returned", what)))
    } else {
        Ok(items)
    }
}
