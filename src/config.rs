//! Configuration loader: `.env` file plus environment variables.

use std::time::Duration;

use crate::deal_engine::{
    locator, EngineConfig, FormatSettings, NormalizeRules, SourceKind, Thresholds, UpstreamConfig,
};
use crate::error::{Error, Result};

const DEFAULT_AFFILIATE_TAG: &str = "pricedropuk0c-21";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_KEEPA_DOMAIN: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CARD_SELECTOR: &str = "[data-asin]";

/// Process configuration, immutable once loaded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub port: u16,
    pub run_interval: Duration,
}

/// Load config from `.env` (if present) and the process environment.
pub fn load_config() -> Result<AppConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(Error::Config(format!(".env could not be read: {e}"))),
    }

    from_lookup(|key| std::env::var(key).ok())
}

/// Build config from any key lookup, so tests never touch the real environment.
pub fn from_lookup<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let source = match get("SOURCE_KIND") {
        Some(raw) => raw.parse::<SourceKind>()?,
        None => SourceKind::ApiStats,
    };

    let mut issues: Vec<String> = Vec::new();

    let webhook_url = get("DISCORD_WEBHOOK_URL").unwrap_or_default();
    if webhook_url.is_empty() {
        issues.push("DISCORD_WEBHOOK_URL not set".into());
    } else if !(webhook_url.starts_with("https://") || webhook_url.starts_with("http://")) {
        issues.push("DISCORD_WEBHOOK_URL must be an http(s) URL".into());
    }

    let api_key = get("KEEPA_API_KEY");
    if source.needs_api_key() && api_key.is_none() {
        issues.push(format!("KEEPA_API_KEY not set (required for SOURCE_KIND={source})"));
    }

    let min_discount = parse_or(&get, "MIN_DISCOUNT", source.default_min_discount(), &mut issues);
    let max_discount = parse_or(&get, "MAX_DISCOUNT", 100u8, &mut issues);
    let min_price = parse_opt::<f64>(&get, "MIN_PRICE", &mut issues);
    let top_n = parse_or(&get, "TOP_N", 5usize, &mut issues);
    let port = parse_or(&get, "PORT", DEFAULT_PORT, &mut issues);
    let interval_secs = parse_or(
        &get,
        "RUN_INTERVAL_SECS",
        source.default_interval_secs(),
        &mut issues,
    );
    let keepa_domain = parse_or(&get, "KEEPA_DOMAIN", DEFAULT_KEEPA_DOMAIN, &mut issues);
    let price_scale = parse_or(&get, "PRICE_SCALE", 100.0f64, &mut issues);
    let price_index = parse_or(&get, "PRICE_INDEX", 0usize, &mut issues);
    let max_depth = parse_or(&get, "LOCATOR_MAX_DEPTH", locator::DEFAULT_MAX_DEPTH, &mut issues);
    let timeout_secs = parse_or(&get, "REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS, &mut issues);

    if max_discount > 100 {
        issues.push("MAX_DISCOUNT must be <= 100".into());
    }
    if min_discount > max_discount {
        issues.push(format!(
            "MIN_DISCOUNT ({min_discount}) must be <= MAX_DISCOUNT ({max_discount})"
        ));
    }
    if min_price.is_some_and(|p| !(p >= 0.0)) {
        issues.push("MIN_PRICE must be a number >= 0".into());
    }
    if top_n == 0 {
        issues.push("TOP_N must be > 0".into());
    }
    if interval_secs == 0 {
        issues.push("RUN_INTERVAL_SECS must be > 0".into());
    }
    if !(price_scale.is_finite() && price_scale > 0.0) {
        issues.push("PRICE_SCALE must be > 0".into());
    }
    if max_depth == 0 {
        issues.push("LOCATOR_MAX_DEPTH must be > 0".into());
    }
    if timeout_secs == 0 {
        issues.push("REQUEST_TIMEOUT_SECS must be > 0".into());
    }

    let upstream_url = get("UPSTREAM_URL").unwrap_or_else(|| source.default_upstream_url().to_string());
    if url::Url::parse(&upstream_url).is_err() {
        issues.push(format!("UPSTREAM_URL {upstream_url:?} is not a valid URL"));
    }

    let card_selector = get("SCRAPE_CARD_SELECTOR").unwrap_or_else(|| DEFAULT_CARD_SELECTOR.to_string());
    if scraper::Selector::parse(&card_selector).is_err() {
        issues.push(format!("SCRAPE_CARD_SELECTOR {card_selector:?} is not a valid CSS selector"));
    }

    if !issues.is_empty() {
        return Err(Error::Config(issues.join("; ")));
    }

    let engine = EngineConfig {
        source,
        upstream: UpstreamConfig {
            url: upstream_url,
            api_key,
            keepa_domain,
            min_discount,
            request_timeout_secs: timeout_secs,
            card_selector,
        },
        rules: NormalizeRules {
            price_scale,
            price_index,
            product_base_url: get("PRODUCT_BASE_URL")
                .unwrap_or_else(|| source.default_product_base_url().to_string()),
        },
        thresholds: Thresholds {
            min_discount,
            max_discount,
            min_price,
            top_n,
        },
        format: FormatSettings {
            affiliate_tag: lookup("AMAZON_ASSOCIATES_ID")
                .map(|tag| tag.trim().to_string())
                .unwrap_or_else(|| DEFAULT_AFFILIATE_TAG.to_string()),
            currency_symbol: get("CURRENCY_SYMBOL")
                .unwrap_or_else(|| source.default_currency_symbol().to_string()),
            ..FormatSettings::default()
        },
        webhook_url,
        locator_max_depth: max_depth,
        dry_run: false,
    };

    Ok(AppConfig {
        engine,
        port,
        run_interval: Duration::from_secs(interval_secs),
    })
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    issues: &mut Vec<String>,
) -> Option<T> {
    let raw = get(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            issues.push(format!("{key} has invalid value {raw:?}"));
            None
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    issues: &mut Vec<String>,
) -> T {
    parse_opt(get, key, issues).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|key| map.get(key).cloned())
    }

    const WEBHOOK: (&str, &str) = ("DISCORD_WEBHOOK_URL", "https://discord.com/api/webhooks/1/abc");
    const KEY: (&str, &str) = ("KEEPA_API_KEY", "k");

    #[test]
    fn test_defaults_for_api_stats() {
        let cfg = load(&[WEBHOOK, KEY]).unwrap();
        assert_eq!(cfg.engine.source, SourceKind::ApiStats);
        assert_eq!(cfg.engine.thresholds.min_discount, 20);
        assert_eq!(cfg.engine.thresholds.max_discount, 100);
        assert_eq!(cfg.engine.thresholds.top_n, 5);
        assert_eq!(cfg.engine.format.affiliate_tag, DEFAULT_AFFILIATE_TAG);
        assert_eq!(cfg.engine.format.currency_symbol, "£");
        assert_eq!(cfg.engine.upstream.url, "https://api.keepa.com/query");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.run_interval, Duration::from_secs(21600));
    }

    #[test]
    fn test_feed_needs_no_api_key() {
        let cfg = load(&[WEBHOOK, ("SOURCE_KIND", "feed")]).unwrap();
        assert_eq!(cfg.engine.source, SourceKind::Feed);
        assert_eq!(cfg.engine.thresholds.min_discount, 50);
        assert_eq!(cfg.engine.format.currency_symbol, "$");
        assert_eq!(cfg.run_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let err = load(&[]).unwrap_err().to_string();
        assert!(err.contains("DISCORD_WEBHOOK_URL"));
        assert!(err.contains("KEEPA_API_KEY"));

        assert!(load(&[WEBHOOK, ("KEEPA_API_KEY", "   ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            WEBHOOK,
            KEY,
            ("SOURCE_KIND", "api-delta"),
            ("MIN_DISCOUNT", "40"),
            ("MAX_DISCOUNT", "90"),
            ("MIN_PRICE", "2.5"),
            ("TOP_N", "3"),
            ("PRICE_SCALE", "100000"),
            ("PORT", "8080"),
            ("AMAZON_ASSOCIATES_ID", ""),
        ])
        .unwrap();

        assert_eq!(cfg.engine.thresholds.min_discount, 40);
        assert_eq!(cfg.engine.thresholds.max_discount, 90);
        assert_eq!(cfg.engine.thresholds.min_price, Some(2.5));
        assert_eq!(cfg.engine.thresholds.top_n, 3);
        assert_eq!(cfg.engine.upstream.min_discount, 40);
        assert_eq!(cfg.engine.rules.price_scale, 100000.0);
        assert_eq!(cfg.engine.format.affiliate_tag, "");
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_invalid_values_are_collected() {
        let err = load(&[
            WEBHOOK,
            KEY,
            ("MIN_DISCOUNT", "80"),
            ("MAX_DISCOUNT", "60"),
            ("TOP_N", "0"),
            ("PORT", "not-a-port"),
        ])
        .unwrap_err()
        .to_string();

        assert!(err.contains("MIN_DISCOUNT"));
        assert!(err.contains("TOP_N"));
        assert!(err.contains("PORT"));
    }

    #[test]
    fn test_unknown_source_kind() {
        assert!(matches!(load(&[WEBHOOK, ("SOURCE_KIND", "browser")]), Err(Error::Config(_))));
    }
}
