//! Chat webhook payload built from ranked deals

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use url::Url;

use crate::deal_engine::{Confidence, Deal, FormatSettings};

pub const MAX_TITLE_CHARS: usize = 100;
const SHARE_TITLE_CHARS: usize = 50;
/// Discord rejects messages with more embeds than this.
pub const MAX_EMBEDS: usize = 10;

const EMBED_COLOR: u32 = 0xFF0000;
const FOOTER: &str = "Deal Finder Bot";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub username: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
    pub color: u32,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Build the webhook payload, or `None` when there is nothing to send.
pub fn format(deals: &[Deal], settings: &FormatSettings) -> Option<NotificationPayload> {
    format_at(deals, settings, Utc::now())
}

pub fn format_at(
    deals: &[Deal],
    settings: &FormatSettings,
    now: DateTime<Utc>,
) -> Option<NotificationPayload> {
    if deals.is_empty() {
        return None;
    }

    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let embeds: Vec<Embed> = deals
        .iter()
        .take(MAX_EMBEDS)
        .map(|deal| embed(deal, settings, &timestamp))
        .collect();

    let noun = if embeds.len() == 1 { "Deal" } else { "Deals" };
    Some(NotificationPayload {
        content: format!(
            "🎉 **Found {} Hot {}!** 🔥\n_Last updated: {}_",
            embeds.len(),
            noun,
            now.format("%Y-%m-%d %H:%M UTC")
        ),
        embeds,
        username: settings.username.clone(),
        avatar_url: settings.avatar_url.clone(),
    })
}

fn embed(deal: &Deal, settings: &FormatSettings, timestamp: &str) -> Embed {
    let symbol = &settings.currency_symbol;
    let mut fields = vec![
        EmbedField {
            name: "💰 Current Price".to_string(),
            value: format!("{}{:.2}", symbol, deal.current_price),
            inline: true,
        },
        EmbedField {
            name: "Was".to_string(),
            value: format!("{}{:.2}", symbol, deal.reference_price),
            inline: true,
        },
        EmbedField {
            name: "📊 Discount".to_string(),
            value: format!("{}%", deal.discount_percent),
            inline: true,
        },
    ];

    if deal.confidence == Confidence::UpstreamDiscount {
        fields.push(EmbedField {
            name: "ℹ️ Note".to_string(),
            value: "Discount reported by source".to_string(),
            inline: true,
        });
    }

    fields.push(EmbedField {
        name: "📱 Share on X".to_string(),
        value: format!(
            "{} 🔥 {}% OFF! {}{:.2} #AmazonDeals",
            truncate_title(&deal.title, SHARE_TITLE_CHARS),
            deal.discount_percent,
            symbol,
            deal.current_price
        ),
        inline: false,
    });

    fields.push(EmbedField {
        name: "🔗 Buy Now".to_string(),
        value: format!(
            "[View Deal]({})",
            affiliate_link(&deal.link, &settings.affiliate_tag)
        ),
        inline: false,
    });

    Embed {
        title: format!("🔥 {}", truncate_title(&deal.title, MAX_TITLE_CHARS)),
        description: format!("**{}% OFF**", deal.discount_percent),
        fields,
        color: EMBED_COLOR,
        footer: EmbedFooter {
            text: FOOTER.to_string(),
        },
        timestamp: timestamp.to_string(),
    }
}

/// Cut `title` to `max_chars` characters, marking the cut with `...`.
pub fn truncate_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        return title.to_string();
    }
    let mut out: String = title.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Append the affiliate tag as a `tag` query parameter.
pub fn affiliate_link(link: &str, tag: &str) -> String {
    if tag.is_empty() {
        return link.to_string();
    }

    match Url::parse(link) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("tag", tag);
            url.to_string()
        }
        Err(_) => {
            let separator = if link.contains('?') { '&' } else { '?' };
            format!("{}{}tag={}", link, separator, tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn deal(id: &str, title: &str, discount: u8) -> Deal {
        Deal {
            id: id.to_string(),
            title: title.to_string(),
            current_price: 40.0,
            reference_price: 100.0,
            discount_percent: discount,
            link: format!("https://amazon.co.uk/dp/{}", id),
            confidence: Confidence::Recomputed,
        }
    }

    fn settings() -> FormatSettings {
        FormatSettings {
            affiliate_tag: "pricedrop-21".to_string(),
            ..FormatSettings::default()
        }
    }

    #[test]
    fn test_empty_is_noop() {
        assert!(format(&[], &settings()).is_none());
    }

    #[test]
    fn test_payload_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let payload = format_at(
            &[deal("B0AAA", "Kettle", 60), deal("B0BBB", "Toaster", 55)],
            &settings(),
            now,
        )
        .unwrap();

        assert!(payload.content.contains("Found 2 Hot Deals"));
        assert_eq!(payload.embeds.len(), 2);
        assert_eq!(payload.username, "Deal Finder Bot");

        let first = &payload.embeds[0];
        assert_eq!(first.title, "🔥 Kettle");
        assert_eq!(first.description, "**60% OFF**");
        assert_eq!(first.timestamp, "2024-03-01T12:00:00.000Z");
        assert_eq!(first.fields[0].value, "£40.00");
        assert_eq!(first.fields[1].value, "£100.00");
        assert_eq!(first.fields[2].value, "60%");
        assert_eq!(
            first.fields.last().unwrap().value,
            "[View Deal](https://amazon.co.uk/dp/B0AAA?tag=pricedrop-21)"
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["embeds"][1]["footer"]["text"], FOOTER);
        assert_eq!(json["embeds"][1]["fields"][0]["inline"], true);
    }

    #[test]
    fn test_share_line_and_last_updated() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap();
        let long = format!("{} Edition", "Stainless Steel Electric Kettle ".repeat(2));
        let payload = format_at(
            &[deal("B0AAA", "Kettle", 60), deal("B0BBB", &long, 55)],
            &settings(),
            now,
        )
        .unwrap();

        assert!(payload.content.ends_with("_Last updated: 2024-03-01 12:05 UTC_"));

        let share = |embed: &Embed| {
            embed
                .fields
                .iter()
                .find(|f| f.name == "📱 Share on X")
                .map(|f| f.value.clone())
                .unwrap()
        };
        assert_eq!(share(&payload.embeds[0]), "Kettle 🔥 60% OFF! £40.00 #AmazonDeals");
        assert_eq!(
            share(&payload.embeds[1]),
            format!("{}... 🔥 55% OFF! £40.00 #AmazonDeals", &long[..SHARE_TITLE_CHARS])
        );
    }

    #[test]
    fn test_singular_summary() {
        let payload = format(&[deal("B0AAA", "Kettle", 60)], &settings()).unwrap();
        assert!(payload.content.contains("Found 1 Hot Deal!"));
    }

    #[test]
    fn test_long_title_is_truncated() {
        let long = "x".repeat(150);
        let payload = format(&[deal("B0AAA", &long, 60)], &settings()).unwrap();
        let title = &payload.embeds[0].title;
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().filter(|c| *c == 'x').count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_truncate_title_counts_chars() {
        assert_eq!(truncate_title("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_title("short", 5), "short");
    }

    #[test]
    fn test_embed_cap() {
        let deals: Vec<Deal> = (0..15).map(|i| deal(&format!("B{i}"), "Item", 60)).collect();
        let payload = format(&deals, &settings()).unwrap();
        assert_eq!(payload.embeds.len(), MAX_EMBEDS);
    }

    #[test]
    fn test_upstream_discount_is_flagged() {
        let mut flagged = deal("B0AAA", "Kettle", 60);
        flagged.confidence = Confidence::UpstreamDiscount;
        let payload = format(&[flagged], &settings()).unwrap();
        assert!(payload.embeds[0].fields.iter().any(|f| f.name.contains("Note")));
    }

    #[test]
    fn test_affiliate_link() {
        assert_eq!(
            affiliate_link("https://amazon.com/dp/B01?ref=x", "t-20"),
            "https://amazon.com/dp/B01?ref=x&tag=t-20"
        );
        assert_eq!(affiliate_link("https://amazon.com/dp/B01", ""), "https://amazon.com/dp/B01");
        assert_eq!(affiliate_link("not a url", "t-20"), "not a url?tag=t-20");
    }
}
