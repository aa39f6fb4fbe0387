//! Deal deduplication by product identifier

use crate::deal_engine::Deal;
use std::collections::HashSet;

/// Keep the first deal seen for each id, preserving input order.
pub fn deduplicate<'a, I>(deals: I) -> Vec<&'a Deal>
where
    I: IntoIterator<Item = &'a Deal>,
{
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut unique_deals = Vec::new();

    for deal in deals {
        if seen.insert(deal.id.as_str()) {
            unique_deals.push(deal);
        }
    }

    unique_deals
}
