//! Climate headlines from RSS feeds
//!
//! Only titles and links are extracted; anything fancier than that is left
//! to a real feed reader.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fetch::{fetch_or_placeholder, require_non_empty, Candidate, Fetched, HttpSource};

/// NASA climate news feed
pub const NASA_RSS_URL: &str = "https://climate.nasa.gov/news/rss.xml";

/// Items kept from the top of a feed
pub const MAX_HEADLINES: usize = 6;

/// A headline as rendered by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An RSS feed and how its items are labelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlineFeed {
    /// Candidate name, e.g. `nasa_rss`
    pub name: String,
    /// Publisher shown next to each headline
    pub label: String,
    pub category: String,
    pub url: String,
}

impl HeadlineFeed {
    pub fn nasa() -> Self {
        Self::nasa_at(NASA_RSS_URL)
    }

    /// The NASA feed served from another URL
    pub fn nasa_at(url: impl Into<String>) -> Self {
        Self {
            name: "nasa_rss".to_string(),
            label: "NASA".to_string(),
            category: "Climate".to_string(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadlinesClient {
    http: HttpSource,
    feeds: Vec<HeadlineFeed>,
}

impl HeadlinesClient {
    pub fn new(http: HttpSource, feeds: Vec<HeadlineFeed>) -> Self {
        Self { http, feeds }
    }

    /// Headlines from the first feed that yields any items
    ///
    /// Falls back to a short static list when every feed fails.
    pub async fn fetch(&self) -> Fetched<Vec<Headline>> {
        let candidates = self
            .feeds
            .iter()
            .cloned()
            .map(|feed| {
                let http = self.http.clone();
                Candidate::new(feed.name.clone(), move || async move {
                    let xml = http.get_text(&feed.url, &[], &[]).await?;
                    require_non_empty(parse_feed(&xml, &feed), "feed items")
                })
            })
            .collect();

        fetch_or_placeholder("headlines", candidates, |_| fallback_headlines()).await
    }
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("item pattern"))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<link[^>]*>(.*?)</link>").expect("link pattern"))
}

fn strip_cdata(text: &str) -> String {
    text.replace("<![CDATA[", "").replace("]]>", "").trim().to_string()
}

/// Extracts up to `MAX_HEADLINES` items from an RSS document
pub fn parse_feed(xml: &str, feed: &HeadlineFeed) -> Vec<Headline> {
    item_re()
        .captures_iter(xml)
        .take(MAX_HEADLINES)
        .enumerate()
        .map(|(i, item)| {
            let block = &item[1];
            let title = title_re()
                .captures(block)
                .map(|c| strip_cdata(&c[1]))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let url = link_re()
                .captures(block)
                .map(|c| strip_cdata(&c[1]))
                .filter(|l| !l.is_empty());

            Headline {
                id: format!("{}{}", feed.name, i),
                title,
                category: feed.category.clone(),
                source: Some(feed.label.clone()),
                url,
            }
        })
        .collect()
}

/// Static list served when no feed is reachable
pub fn fallback_headlines() -> Vec<Headline> {
    [
        ("f1", "Fallback: Monitoring global climate signals", "Climate"),
        ("f2", "Fallback: Seasonal outlook update pending", "Outlook"),
        ("f3", "Fallback: Severe weather preparedness tips", "Advisory"),
    ]
    .into_iter()
    .map(|(id, title, category)| Headline {
        id: id.to_string(),
        title: title.to_string(),
        category: category.to_string(),
        source: None,
        url: None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0"?>
<rss><channel>
  <title>Channel title is not an item</title>
  <item>
    <title><![CDATA[ Sea ice hits record low ]]></title>
    <link>https://climate.nasa.gov/news/1</link>
  </item>
  <item><title>Second</title></item>
</channel></rss>"#;

    #[test]
    fn test_parse_feed_strips_cdata_and_skips_channel_title() {
        let items = parse_feed(FEED, &HeadlineFeed::nasa());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "nasa_rss0");
        assert_eq!(items[0].title, "Sea ice hits record low");
        assert_eq!(items[0].url.as_deref(), Some("https://climate.nasa.gov/news/1"));
        assert_eq!(items[0].source.as_deref(), Some("NASA"));
        assert!(items[1].url.is_none());
    }

    #[test]
    fn test_parse_feed_caps_item_count() {
        let xml: String = (0..10)
            .map(|i| format!("<item><title>t{}</title></item>", i))
            .collect();
        assert_eq!(parse_feed(&xml, &HeadlineFeed::nasa()).len(), MAX_HEADLINES);
    }

    #[tokio::test]
    async fn test_fetch_serves_live_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let http = HttpSource::new(Duration::from_secs(5)).unwrap();
        let client = HeadlinesClient::new(http, vec![HeadlineFeed::nasa_at(format!("{}/rss.xml", server.uri()))]);
        let fetched = client.fetch().await;

        assert!(!fetched.degraded);
        assert_eq!(fetched.source, "nasa_rss");
        assert_eq!(fetched.value.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_falls_back_on_empty_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss></rss>"))
            .mount(&server)
            .await;

        let http = HttpSource::new(Duration::from_secs(5)).unwrap();
        let client = HeadlinesClient::new(http, vec![HeadlineFeed::nasa_at(server.uri())]);
        let fetched = client.fetch().await;

        assert!(fetched.degraded);
        assert_eq!(fetched.value, fallback_headlines());
    }
}
