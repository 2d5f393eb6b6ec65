//! Resilient fetching across multiple backends
//!
//! `fallback` holds the ordered-candidate control routine and its error
//! types; `http` maps raw HTTP outcomes onto those errors.

pub mod fallback;
pub mod http;

pub use fallback::{
    fetch_first, fetch_or_placeholder, require_non_empty, Attempt, Candidate, CandidateError,
    ExhaustionError, Fetched, PLACEHOLDER_SOURCE,
};
pub use http::HttpSource;
