//! Cache key derivation
//!
//! Keys are pure functions of the logical request. Requests that mean the same
//! thing must collapse onto one key: symbol sets are order- and
//! case-insensitive, coordinates are rounded, parameters are sorted by name.

use std::collections::BTreeMap;

/// Decimal places kept for latitude/longitude in keys
pub const COORD_PRECISION: usize = 2;

/// Builder for `tag:name=value&name=value` keys with sorted parameter names
#[derive(Debug, Clone)]
pub struct CacheKey {
    tag: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter verbatim
    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Adds a coordinate rounded to `COORD_PRECISION` decimals
    pub fn coord(self, name: &str, value: f64) -> Self {
        self.param(name, round_coord(value))
    }

    /// Adds a normalized symbol set (see `symbol_set`)
    pub fn symbols<I, S>(self, name: &str, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.param(name, symbol_set(symbols))
    }

    /// Adds a free-text query, trimmed and lower-cased
    pub fn query(self, name: &str, text: &str) -> Self {
        self.param(name, normalize_query(text))
    }

    pub fn build(&self) -> String {
        let joined = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}", self.tag, joined)
    }
}

/// Trims, upper-cases, drops empties, deduplicates and sorts symbols,
/// then joins them with commas
pub fn symbol_set<I, S>(symbols: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list: Vec<String> = symbols
        .into_iter()
        .map(|s| s.as_ref().trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    list.sort();
    list.dedup();
    list.join(",")
}

/// Splits raw user input on commas and whitespace, upper-cases, drops empties
/// and duplicates while keeping first-seen order, and truncates to `limit`
///
/// This is the request-side counterpart of `symbol_set`: the upstream call
/// and the per-symbol results follow this order, the cache key does not.
pub fn request_symbols<I, S>(raw: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for chunk in raw {
        for sym in chunk
            .as_ref()
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
        {
            if !out.contains(&sym) {
                out.push(sym);
            }
        }
    }
    out.truncate(limit);
    out
}

/// Formats a coordinate with `COORD_PRECISION` decimals, folding `-0.00` into `0.00`
pub fn round_coord(value: f64) -> String {
    let formatted = format!("{:.*}", COORD_PRECISION, value);
    if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.') {
        formatted[1..].to_string()
    } else {
        formatted
    }
}

pub fn normalize_query(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_set_is_order_and_case_independent() {
        let a = symbol_set(["MSFT", "AAPL"]);
        let b = symbol_set(["AAPL", "MSFT"]);
        let c = symbol_set(["aapl", "msft"]);
        assert_eq!(a, "AAPL,MSFT");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_symbol_set_deduplicates_and_drops_blanks() {
        assert_eq!(symbol_set(["msft", " MSFT ", "", "aapl"]), "AAPL,MSFT");
    }

    #[test]
    fn test_coordinates_collapse_within_precision() {
        let near = CacheKey::new("w").coord("lat", 50.07551).coord("lon", 14.43781).build();
        let exact = CacheKey::new("w").coord("lat", 50.08).coord("lon", 14.44).build();
        assert_eq!(near, exact);
        assert_eq!(exact, "w:lat=50.08&lon=14.44");
    }

    #[test]
    fn test_negative_zero_is_folded() {
        assert_eq!(round_coord(-0.001), "0.00");
        assert_eq!(round_coord(-0.006), "-0.01");
        assert_eq!(round_coord(-123.1544), "-123.15");
    }

    #[test]
    fn test_params_are_sorted_by_name() {
        let a = CacheKey::new("f").param("units", "metric").coord("lon", 1.0).coord("lat", 2.0);
        let b = CacheKey::new("f").coord("lat", 2.0).coord("lon", 1.0).param("units", "metric");
        assert_eq!(a.build(), b.build());
        assert_eq!(a.build(), "f:lat=2.00&lon=1.00&units=metric");
    }

    #[test]
    fn test_query_key_ignores_case_and_padding() {
        let a = CacheKey::new("s").query("q", "  Apple ").build();
        let b = CacheKey::new("s").query("q", "apple").build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_request_symbols_keeps_input_order() {
        let syms = request_symbols(["msft, aapl\tMSFT", "goog"], 30);
        assert_eq!(syms, vec!["MSFT", "AAPL", "GOOG"]);
    }

    #[test]
    fn test_request_symbols_truncates() {
        let syms = request_symbols(["A,B,C,D"], 2);
        assert_eq!(syms, vec!["A", "B"]);
    }
}
