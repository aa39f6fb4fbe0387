//! Deal normalization pipeline
//!
//! Fetches one upstream payload, locates the candidate product records in it,
//! normalizes them into [`Deal`]s, ranks the eligible ones and posts a summary
//! to the chat webhook. Every stage except fetch and delivery is synchronous.

pub mod deduplicator;
pub mod formatter;
pub mod locator;
pub mod notifier;
pub mod parser;
pub mod ranker;
pub mod scheduler;
pub mod scraper;
pub mod validator;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{Error, Result};

/// Canonical, validated deal record. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    pub id: String,
    pub title: String,
    pub current_price: f64,
    pub reference_price: f64,
    pub discount_percent: u8,
    pub link: String,
    pub confidence: Confidence,
}

/// How the discount of a [`Deal`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Computed locally from current and reference prices.
    Recomputed,
    /// Taken from an upstream discount field because no reference price was available.
    UpstreamDiscount,
}

/// Which upstream the pipeline is polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Product query API with price-history arrays.
    ApiStats,
    /// Browsing-deals API with delta fields.
    ApiDelta,
    /// RSS feed with prices embedded in the item description.
    Feed,
    /// Scraped HTML deal cards.
    Scrape,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ApiStats => "api-stats",
            SourceKind::ApiDelta => "api-delta",
            SourceKind::Feed => "feed",
            SourceKind::Scrape => "scrape",
        }
    }

    pub fn needs_api_key(&self) -> bool {
        matches!(self, SourceKind::ApiStats | SourceKind::ApiDelta)
    }

    pub fn default_upstream_url(&self) -> &'static str {
        match self {
            SourceKind::ApiStats => "https://api.keepa.com/query",
            SourceKind::ApiDelta => "https://api.keepa.com/deal",
            SourceKind::Feed => "https://camelcamelcamel.com/popular?deal=1",
            SourceKind::Scrape => "https://www.amazon.co.uk/deals",
        }
    }

    pub fn default_min_discount(&self) -> u8 {
        match self {
            SourceKind::ApiStats => 20,
            SourceKind::ApiDelta => 70,
            SourceKind::Feed | SourceKind::Scrape => 50,
        }
    }

    pub fn default_interval_secs(&self) -> u64 {
        match self {
            SourceKind::ApiStats | SourceKind::ApiDelta => 6 * 60 * 60,
            SourceKind::Feed | SourceKind::Scrape => 60 * 60,
        }
    }

    pub fn default_product_base_url(&self) -> &'static str {
        match self {
            SourceKind::Feed => "https://amazon.com/dp/",
            _ => "https://amazon.co.uk/dp/",
        }
    }

    pub fn default_currency_symbol(&self) -> &'static str {
        match self {
            SourceKind::Feed => "$",
            _ => "£",
        }
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "api-stats" | "stats" | "query" => Ok(SourceKind::ApiStats),
            "api-delta" | "delta" | "deals" => Ok(SourceKind::ApiDelta),
            "feed" | "rss" => Ok(SourceKind::Feed),
            "scrape" | "html" => Ok(SourceKind::Scrape),
            other => Err(Error::Config(format!(
                "unknown SOURCE_KIND {other:?} (expected api-stats, api-delta, feed or scrape)"
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selection thresholds applied by the ranker.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub min_discount: u8,
    pub max_discount: u8,
    pub min_price: Option<f64>,
    pub top_n: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_discount: 20,
            max_discount: 100,
            min_price: None,
            top_n: 5,
        }
    }
}

/// Field-extraction settings for the normalizer.
#[derive(Debug, Clone)]
pub struct NormalizeRules {
    /// Divisor turning integer minor units into major units.
    pub price_scale: f64,
    /// Index into upstream price arrays (Keepa price type).
    pub price_index: usize,
    pub product_base_url: String,
}

impl Default for NormalizeRules {
    fn default() -> Self {
        Self {
            price_scale: 100.0,
            price_index: 0,
            product_base_url: "https://amazon.co.uk/dp/".to_string(),
        }
    }
}

/// How to reach the upstream source.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub keepa_domain: u32,
    /// Minimum discount requested from APIs that filter server-side.
    pub min_discount: u8,
    pub request_timeout_secs: u64,
    pub card_selector: String,
}

/// Settings for the chat message.
#[derive(Debug, Clone)]
pub struct FormatSettings {
    pub affiliate_tag: String,
    pub currency_symbol: String,
    pub username: String,
    pub avatar_url: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            affiliate_tag: String::new(),
            currency_symbol: "£".to_string(),
            username: "Deal Finder Bot".to_string(),
            avatar_url: "https://cdn-icons-png.flaticon.com/512/2721/2721215.png".to_string(),
        }
    }
}

/// Immutable configuration for the deal engine, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub source: SourceKind,
    pub upstream: UpstreamConfig,
    pub rules: NormalizeRules,
    pub thresholds: Thresholds,
    pub format: FormatSettings,
    pub webhook_url: String,
    pub locator_max_depth: usize,
    pub dry_run: bool,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Schedule,
    Manual,
    Once,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Schedule => "schedule",
            Trigger::Manual => "manual",
            Trigger::Once => "once",
        })
    }
}

/// Pipeline stages, in order. Any stage may fall straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Fetching,
    Locating,
    Normalizing,
    Ranking,
    Formatting,
    Delivering,
}

/// Result of one run. Runs never fail; every failure degrades to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    FetchFailed,
    NoCandidates,
    NothingEligible { candidates: usize },
    DryRun { deals: usize },
    Delivered { deals: usize },
    DeliveryFailed { deals: usize },
}

/// Normalized output of one payload, before ranking.
#[derive(Debug)]
struct Collection {
    candidates: usize,
    deals: Vec<Deal>,
}

/// Main deal pipeline
pub struct DealEngine {
    config: EngineConfig,
    scraper: scraper::Scraper,
    parser: parser::Parser,
    notifier: notifier::WebhookNotifier,
}

impl DealEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let scraper = scraper::Scraper::new(config.source, config.upstream.clone());
        let parser = parser::Parser::new(
            config.source,
            config.rules.clone(),
            &config.upstream.card_selector,
        )?;
        let notifier = notifier::WebhookNotifier::new(
            config.webhook_url.clone(),
            config.upstream.request_timeout_secs,
        );

        Ok(Self {
            config,
            scraper,
            parser,
            notifier,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the whole pipeline once.
    pub async fn run_once(&self, trigger: Trigger) -> RunOutcome {
        let span = info_span!("run", %trigger, source = %self.config.source);
        async move {
            let outcome = self.run_stages().await;
            enter(RunStage::Idle);
            info!(?outcome, "run finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self) -> RunOutcome {
        enter(RunStage::Fetching);
        let body = match self.scraper.fetch_content().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to fetch upstream: {}", e);
                return RunOutcome::FetchFailed;
            }
        };

        let collection = match self.collect(&body) {
            Ok(collection) => collection,
            Err(e @ Error::UpstreamApi(_)) => {
                warn!("{}", e);
                return RunOutcome::FetchFailed;
            }
            Err(e) => {
                warn!("Failed to parse upstream payload: {}", e);
                return RunOutcome::NoCandidates;
            }
        };

        if collection.candidates == 0 {
            return RunOutcome::NoCandidates;
        }

        enter(RunStage::Ranking);
        let ranked = ranker::select(&collection.deals, &self.config.thresholds);
        info!(
            candidates = collection.candidates,
            normalized = collection.deals.len(),
            selected = ranked.len(),
            "ranked deals"
        );

        enter(RunStage::Formatting);
        let Some(payload) = formatter::format(&ranked, &self.config.format) else {
            info!(
                "No deals with {}%+ off this run",
                self.config.thresholds.min_discount
            );
            return RunOutcome::NothingEligible {
                candidates: collection.candidates,
            };
        };

        if self.config.dry_run {
            match serde_json::to_string_pretty(&payload) {
                Ok(json) => info!("Dry run, not delivering:\n{}", json),
                Err(e) => warn!("Failed to render dry-run payload: {}", e),
            }
            return RunOutcome::DryRun {
                deals: ranked.len(),
            };
        }

        enter(RunStage::Delivering);
        match self.notifier.deliver(&payload).await {
            Ok(()) => {
                info!("Posted {} deals to webhook", ranked.len());
                RunOutcome::Delivered {
                    deals: ranked.len(),
                }
            }
            Err(e) => {
                warn!("Failed to post to webhook: {}", e);
                RunOutcome::DeliveryFailed {
                    deals: ranked.len(),
                }
            }
        }
    }

    /// Locate and normalize every candidate in one payload.
    ///
    /// Kept synchronous so parsed documents never live across an await point.
    fn collect(&self, body: &str) -> Result<Collection> {
        enter(RunStage::Locating);
        let payload = self.parser.parse_payload(body)?;
        let records = self.parser.candidates(&payload, self.config.locator_max_depth);

        enter(RunStage::Normalizing);
        let candidates = records.len();
        let deals: Vec<Deal> = records
            .iter()
            .filter_map(|record| self.parser.normalize(record))
            .inspect(|deal| {
                debug!(
                    "{} | {}% | {:.2}",
                    deal.title.chars().take(40).collect::<String>(),
                    deal.discount_percent,
                    deal.current_price
                )
            })
            .collect();

        debug!(candidates, normalized = deals.len(), "normalized payload");
        Ok(Collection { candidates, deals })
    }
}

fn enter(stage: RunStage) {
    debug!(?stage, "entering stage");
}
