//! Upstream fetcher: builds the source-specific request and returns the body

use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::deal_engine::{SourceKind, UpstreamConfig};
use crate::error::{Error, Result};

const API_USER_AGENT: &str = concat!("deal-notifier/", env!("CARGO_PKG_VERSION"));

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Error bodies are logged, so keep them short.
const MAX_ERROR_BODY: usize = 512;

pub struct Scraper {
    source: SourceKind,
    config: UpstreamConfig,
    client: Client,
}

impl Scraper {
    pub fn new(source: SourceKind, config: UpstreamConfig) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-GB,en;q=0.9"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            source,
            config,
            client,
        }
    }

    /// Full request URL for the configured source, credentials included.
    pub fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| Error::Config(format!("invalid upstream URL {:?}: {}", self.config.url, e)))?;

        match self.source {
            SourceKind::ApiStats => {
                let selection = json!({
                    "current_AMAZON_gte": 100,
                    "current_AMAZON_lte": 50000,
                    "avg90_AMAZON_gte": 100,
                    "sort": [["current_SALES", "asc"]],
                    "productType": [0, 1],
                    "page": 0,
                    "perPage": 50
                });
                url.query_pairs_mut()
                    .append_pair("key", self.config.api_key.as_deref().unwrap_or_default())
                    .append_pair("domain", &self.config.keepa_domain.to_string())
                    .append_pair("stats", "90")
                    .append_pair("selection", &selection.to_string());
            }
            SourceKind::ApiDelta => {
                let selection = json!({
                    "page": 0,
                    "domainId": self.config.keepa_domain,
                    "priceTypes": [0],
                    "deltaPercentRange": [self.config.min_discount, 100],
                    "isRangeEnabled": true
                });
                url.query_pairs_mut()
                    .append_pair("key", self.config.api_key.as_deref().unwrap_or_default())
                    .append_pair("selection", &selection.to_string());
            }
            SourceKind::Feed | SourceKind::Scrape => {}
        }

        Ok(url)
    }

    pub async fn fetch_content(&self) -> Result<String> {
        let url = self.request_url()?;
        let user_agent = match self.source {
            SourceKind::ApiStats | SourceKind::ApiDelta => API_USER_AGENT,
            SourceKind::Feed | SourceKind::Scrape => BROWSER_USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(API_USER_AGENT),
        };

        info!(source = %self.source, host = url.host_str().unwrap_or(""), "fetching upstream");

        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT, self.accept());

        if self.source == SourceKind::Feed {
            request = request.header(reqwest::header::REFERER, url.origin().ascii_serialization());
        }

        let response = request.send().await?;

        // Check status
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let content = response.text().await?;

        if content.trim().is_empty() {
            return Err(Error::Content("empty response body".into()));
        }

        debug!(bytes = content.len(), content_type = ?detect_content_type(&content), "fetched upstream");
        Ok(content)
    }

    fn accept(&self) -> &'static str {
        match self.source {
            SourceKind::ApiStats | SourceKind::ApiDelta => "application/json",
            SourceKind::Feed => {
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/html;q=0.8"
            }
            SourceKind::Scrape => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
            }
        }
    }
}

/// Content type detection
pub fn detect_content_type(content: &str) -> ContentType {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        ContentType::Json
    } else if trimmed.starts_with("<?xml") || trimmed.starts_with("<rss") || trimmed.starts_with("<feed") {
        ContentType::Xml
    } else if trimmed.starts_with('<') {
        ContentType::Html
    } else {
        ContentType::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Json,
    Xml,
    Unknown,
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> UpstreamConfig {
        UpstreamConfig {
            url: url.to_string(),
            api_key: Some("secret".to_string()),
            keepa_domain: 2,
            min_discount: 70,
            request_timeout_secs: 5,
            card_selector: "[data-asin]".to_string(),
        }
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_detect_content_type() {
        assert_eq!(detect_content_type("  {\"a\":1}"), ContentType::Json);
        assert_eq!(detect_content_type("[]"), ContentType::Json);
        assert_eq!(detect_content_type("<?xml version=\"1.0\"?><rss/>"), ContentType::Xml);
        assert_eq!(detect_content_type("<!DOCTYPE html><html/>"), ContentType::Html);
        assert_eq!(detect_content_type("plain text"), ContentType::Unknown);
    }

    #[test]
    fn test_stats_request_url() {
        let scraper = Scraper::new(SourceKind::ApiStats, config("https://api.keepa.com/query"));
        let url = scraper.request_url().unwrap();

        assert_eq!(url.path(), "/query");
        assert_eq!(query_value(&url, "key").as_deref(), Some("secret"));
        assert_eq!(query_value(&url, "domain").as_deref(), Some("2"));
        let selection: serde_json::Value =
            serde_json::from_str(&query_value(&url, "selection").unwrap()).unwrap();
        assert_eq!(selection["page"], 0);
    }

    #[test]
    fn test_delta_request_url_carries_min_discount() {
        let scraper = Scraper::new(SourceKind::ApiDelta, config("https://api.keepa.com/deal"));
        let url = scraper.request_url().unwrap();

        let selection: serde_json::Value =
            serde_json::from_str(&query_value(&url, "selection").unwrap()).unwrap();
        assert_eq!(selection["domainId"], 2);
        assert_eq!(selection["deltaPercentRange"][0], 70);
    }

    #[test]
    fn test_feed_url_is_untouched() {
        let scraper = Scraper::new(
            SourceKind::Feed,
            config("https://camelcamelcamel.com/popular?deal=1"),
        );
        assert_eq!(
            scraper.request_url().unwrap().as_str(),
            "https://camelcamelcamel.com/popular?deal=1"
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        use axum::{http::StatusCode, routing::get, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/popular",
            get(|| async { (StatusCode::FORBIDDEN, "blocked") }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let scraper = Scraper::new(SourceKind::Feed, config(&format!("http://{}/popular", addr)));
        let result = scraper.fetch_content().await;
        assert!(matches!(
            result,
            Err(Error::UpstreamStatus { status: 403, ref body }) if body == "blocked"
        ));
    }

    #[tokio::test]
    async fn test_transport_error_hides_api_key() {
        let mut config = config("http://127.0.0.1:1/query");
        config.api_key = Some("SUPERSECRETKEY".to_string());
        let scraper = Scraper::new(SourceKind::ApiStats, config);

        let err = scraper.fetch_content().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!format!("{:?}", err).contains("SUPERSECRETKEY"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
