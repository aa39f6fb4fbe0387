//! Deal selection: filter, dedupe, rank, truncate

use tracing::debug;

use crate::deal_engine::{deduplicator, validator, Deal, Thresholds};

/// Pick the best deals.
///
/// Drops ineligible deals, keeps the first deal per id, sorts by discount
/// descending (stable, so ties keep input order) and truncates to `top_n`.
/// Pure: the input is left untouched and equal inputs give equal outputs.
pub fn select(deals: &[Deal], thresholds: &Thresholds) -> Vec<Deal> {
    let eligible = deals.iter().filter(|deal| {
        let ok = validator::is_eligible(deal, thresholds);
        if !ok {
            debug!(
                id = %deal.id,
                reasons = ?validator::rejection_reasons(deal, thresholds),
                "dropping ineligible deal"
            );
        }
        ok
    });

    let mut ranked = deduplicator::deduplicate(eligible);
    ranked.sort_by(|a, b| b.discount_percent.cmp(&a.discount_percent));
    ranked.truncate(thresholds.top_n);

    ranked.into_iter().cloned().collect()
}
