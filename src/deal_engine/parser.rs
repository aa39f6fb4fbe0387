//! Payload parsing and record normalization for every upstream source

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use crate::deal_engine::scraper::{detect_content_type, ContentType};
use crate::deal_engine::{locator, Confidence, Deal, NormalizeRules, SourceKind};
use crate::error::{Error, Result};

const PLACEHOLDER_TITLE: &str = "Unknown Product";

const TITLE_KEYS: &[&str] = &["title", "name", "productTitle"];

lazy_static! {
    static ref PRODUCT_LINK: Regex = Regex::new(r"/(?:product|dp)/([A-Z0-9]{6,})").unwrap();
    static ref CURRENT_PRICE: Regex =
        Regex::new(r"(?i)Current\s+Price:.*?[$£€]?\s*(\d[\d,]*(?:\.\d+)?)").unwrap();
    static ref AVG_PRICE: Regex =
        Regex::new(r"(?i)Avg\.?\s*Price:.*?[$£€]?\s*(\d[\d,]*(?:\.\d+)?)").unwrap();
    static ref LIST_PRICE: Regex =
        Regex::new(r"(?i)List\s+Price:.*?[$£€]?\s*(\d[\d,]*(?:\.\d+)?)").unwrap();
    static ref MONEY: Regex = Regex::new(r"[$£€]\s?(\d[\d,]*(?:\.\d{1,2})?)").unwrap();
    static ref WAS_PRICE: Regex =
        Regex::new(r"(?i)(?:was|list price|rrp)[:\s]*[$£€]\s?(\d[\d,]*(?:\.\d{1,2})?)").unwrap();
    static ref PERCENT_OFF: Regex = Regex::new(r"(?i)(\d{1,3})\s*%\s*off").unwrap();
    static ref CARD_TITLE: Selector =
        Selector::parse("h2, h3, [class*='title'], [class*='Title']").unwrap();
}

/// Parsed upstream payload, before candidate extraction.
pub enum RawPayload {
    Json(Value),
    Feed(Vec<FeedItem>),
    Html(Html),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
}

/// One candidate product in its source-specific shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateRecord<'a> {
    Json(&'a Value),
    FeedItem(&'a FeedItem),
    Card {
        id: Option<String>,
        title: Option<String>,
        text: String,
    },
}

pub struct Parser {
    source: SourceKind,
    rules: NormalizeRules,
    card_selector: Selector,
}

impl Parser {
    pub fn new(source: SourceKind, rules: NormalizeRules, card_selector: &str) -> Result<Self> {
        let card_selector = Selector::parse(card_selector).map_err(|e| {
            Error::Config(format!("invalid SCRAPE_CARD_SELECTOR {card_selector:?}: {e}"))
        })?;

        Ok(Self {
            source,
            rules,
            card_selector,
        })
    }

    /// Parse the raw response body according to the configured source.
    pub fn parse_payload(&self, content: &str) -> Result<RawPayload> {
        let content_type = detect_content_type(content);

        match self.source {
            SourceKind::ApiStats | SourceKind::ApiDelta => {
                if !matches!(content_type, ContentType::Json) {
                    return Err(Error::Content(format!(
                        "expected JSON from pricing API, got {:?}",
                        content_type
                    )));
                }
                let value: Value = serde_json::from_str(content)?;
                if let Some(err) = value.get("error") {
                    let message = err
                        .get("message")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| err.to_string());
                    return Err(Error::UpstreamApi(message));
                }
                Ok(RawPayload::Json(value))
            }
            SourceKind::Feed => {
                if matches!(content_type, ContentType::Json) {
                    return Err(Error::Content("expected an RSS feed, got JSON".into()));
                }
                Ok(RawPayload::Feed(parse_feed_items(content)?))
            }
            SourceKind::Scrape => Ok(RawPayload::Html(Html::parse_document(content))),
        }
    }

    /// Extract candidate records from a parsed payload.
    pub fn candidates<'a>(
        &self,
        payload: &'a RawPayload,
        max_depth: usize,
    ) -> Vec<CandidateRecord<'a>> {
        match payload {
            RawPayload::Json(value) => locator::locate(value, max_depth)
                .into_iter()
                .map(CandidateRecord::Json)
                .collect(),
            RawPayload::Feed(items) => items.iter().map(CandidateRecord::FeedItem).collect(),
            RawPayload::Html(document) => document
                .select(&self.card_selector)
                .map(card_record)
                .collect(),
        }
    }

    /// Normalize one candidate into a [`Deal`]; `None` when it is unusable.
    pub fn normalize(&self, record: &CandidateRecord<'_>) -> Option<Deal> {
        match (record, self.source) {
            (CandidateRecord::Json(value), SourceKind::ApiDelta) => {
                self.normalize_delta(value.as_object()?)
            }
            (CandidateRecord::Json(value), _) => self.normalize_stats(value.as_object()?),
            (CandidateRecord::FeedItem(item), _) => self.normalize_feed_item(item),
            (CandidateRecord::Card { id, title, text }, _) => {
                self.normalize_card(id.as_deref(), title.as_deref(), text)
            }
        }
    }

    fn normalize_stats(&self, obj: &Map<String, Value>) -> Option<Deal> {
        let id = json_id(obj)?;
        let current = self.scaled_price(obj.get("current")?)?;
        let reference = ["historyPrice", "avg", "listPrice"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(|v| self.scaled_price(v)));
        let upstream = obj
            .get("percent")
            .and_then(signed_number)
            .map(|percent| percent.max(0.0));

        build_deal(id, json_title(obj), current, reference, upstream, &self.rules)
    }

    fn normalize_delta(&self, obj: &Map<String, Value>) -> Option<Deal> {
        let id = json_id(obj)?;
        let current = self.scaled_price(obj.get("current")?)?;
        let reference = obj
            .get("avg")
            .and_then(|v| self.scaled_price(v))
            .or_else(|| {
                // Negative delta is a drop below the average; a rise means no discount.
                let delta = obj.get("delta").and_then(|v| self.signed_at_index(v))?;
                Some(current - delta.min(0.0) / self.rules.price_scale)
            });
        let upstream = match obj.get("deltaPercent").and_then(|v| self.signed_at_index(v)) {
            Some(delta_percent) => Some((-delta_percent).max(0.0)),
            None => obj
                .get("percent")
                .and_then(signed_number)
                .map(|percent| percent.max(0.0)),
        };

        build_deal(id, json_title(obj), current, reference, upstream, &self.rules)
    }

    fn normalize_feed_item(&self, item: &FeedItem) -> Option<Deal> {
        let link = item.link.as_deref()?;
        let id = PRODUCT_LINK.captures(link)?.get(1)?.as_str().to_string();
        let description = item.description.as_deref().unwrap_or_default();

        let current = capture_amount(&CURRENT_PRICE, description)?;
        let reference = capture_amount(&AVG_PRICE, description)
            .or_else(|| capture_amount(&LIST_PRICE, description));

        build_deal(id, item.title.clone(), current, reference, None, &self.rules)
    }

    fn normalize_card(&self, id: Option<&str>, title: Option<&str>, text: &str) -> Option<Deal> {
        let id = id.map(str::trim).filter(|s| !s.is_empty())?.to_string();

        let was = WAS_PRICE.captures(text).and_then(|cap| cap.get(1));
        let amounts: Vec<f64> = MONEY
            .captures_iter(text)
            .filter_map(|cap| cap.get(1))
            .filter(|m| was.map_or(true, |w| m.start() != w.start()))
            .filter_map(|m| parse_amount(m.as_str()))
            .collect();

        let current = *amounts.first()?;
        let reference = was
            .and_then(|m| parse_amount(m.as_str()))
            .or_else(|| {
                amounts
                    .iter()
                    .copied()
                    .filter(|amount| *amount > current)
                    .reduce(f64::max)
            });
        let upstream = PERCENT_OFF
            .captures(text)
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        build_deal(id, title.map(String::from), current, reference, upstream, &self.rules)
    }

    /// Minor-unit price at the configured index, converted to major units.
    fn scaled_price(&self, value: &Value) -> Option<f64> {
        self.signed_at_index(value)
            .filter(|v| *v > 0.0)
            .map(|v| v / self.rules.price_scale)
    }

    /// Number at the configured index of a (possibly nested) price array.
    ///
    /// `[[a, b], [c, d]]` reads the first range, so `avg` arrays keyed by
    /// interval resolve to their shortest interval.
    fn signed_at_index(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Array(items) => match items.first()? {
                nested @ Value::Array(_) => self.signed_at_index(nested),
                _ => items.get(self.rules.price_index).and_then(signed_number),
            },
            other => signed_number(other),
        }
    }
}

/// Build a deal from extracted fields, recomputing the discount when possible.
fn build_deal(
    id: String,
    title: Option<String>,
    current: f64,
    reference: Option<f64>,
    upstream_discount: Option<f64>,
    rules: &NormalizeRules,
) -> Option<Deal> {
    if !(current.is_finite() && current > 0.0) {
        return None;
    }

    let (reference_price, discount_percent, confidence) = match reference {
        Some(reference) if reference.is_finite() && reference > 0.0 => (
            reference,
            discount_percent(current, reference),
            Confidence::Recomputed,
        ),
        _ => {
            let discount = upstream_discount?.clamp(0.0, 100.0);
            let implied = if discount < 100.0 {
                current / (1.0 - discount / 100.0)
            } else {
                current
            };
            (implied, discount.round() as u8, Confidence::UpstreamDiscount)
        }
    };

    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string());
    let link = format!("{}{}", rules.product_base_url, id);

    Some(Deal {
        id,
        title,
        current_price: current,
        reference_price,
        discount_percent,
        link,
        confidence,
    })
}

/// `round((reference - current) / reference * 100)`, clamped to `[0, 100]`.
pub fn discount_percent(current: f64, reference: f64) -> u8 {
    if reference <= 0.0 {
        return 0;
    }
    ((reference - current) / reference * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

fn json_id(obj: &Map<String, Value>) -> Option<String> {
    locator::ID_KEYS.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_title(obj: &Map<String, Value>) -> Option<String> {
    TITLE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str).map(String::from))
}

fn signed_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn capture_amount(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|cap| cap.get(1))
        .and_then(|m| parse_amount(m.as_str()))
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().replace(',', "").parse::<f64>().ok()
}

fn card_record<'a>(element: ElementRef<'_>) -> CandidateRecord<'a> {
    let id = element.value().attr("data-asin").map(String::from);
    let title = element
        .select(&CARD_TITLE)
        .next()
        .map(|title| collapse_whitespace(&title.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            element
                .value()
                .attr("title")
                .or(element.value().attr("aria-label"))
                .map(String::from)
        });
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));

    CandidateRecord::Card { id, title, text }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect `<item>` (RSS) and `<entry>` (Atom) elements.
fn parse_feed_items(xml: &str) -> Result<Vec<FeedItem>> {
    let doc = roxmltree::Document::parse(xml)?;

    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("item") || node.has_tag_name("entry"))
        .map(|node| FeedItem {
            title: child_text(&node, &["title"]),
            link: child_link(&node),
            description: child_text(&node, &["description", "summary", "content"]),
        })
        .collect())
}

fn child_text(node: &roxmltree::Node<'_, '_>, names: &[&str]) -> Option<String> {
    node.children()
        .filter(|child| child.is_element())
        .filter(|child| {
            names
                .iter()
                .any(|name| child.tag_name().name().eq_ignore_ascii_case(name))
        })
        .find_map(|child| {
            let text: String = child
                .descendants()
                .filter(|d| d.is_text())
                .filter_map(|d| d.text())
                .collect();
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
}

fn child_link(node: &roxmltree::Node<'_, '_>) -> Option<String> {
    node.children()
        .filter(|child| child.is_element() && child.tag_name().name().eq_ignore_ascii_case("link"))
        .find_map(|child| {
            child
                .attribute("href")
                .or(child.text())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
}
