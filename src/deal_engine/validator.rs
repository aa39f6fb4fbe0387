//! Deal eligibility checks

use crate::deal_engine::{Deal, Thresholds};

/// A deal is eligible when its prices are sane and its discount is inside the configured band.
pub fn is_eligible(deal: &Deal, thresholds: &Thresholds) -> bool {
    validate_prices(deal)
        && validate_discount(deal.discount_percent, thresholds)
        && validate_min_price(deal.current_price, thresholds.min_price)
}

fn validate_prices(deal: &Deal) -> bool {
    deal.current_price.is_finite()
        && deal.reference_price.is_finite()
        && deal.current_price > 0.0
        && deal.reference_price > deal.current_price
}

fn validate_discount(discount: u8, thresholds: &Thresholds) -> bool {
    discount >= thresholds.min_discount && discount <= thresholds.max_discount.min(100)
}

fn validate_min_price(current_price: f64, min_price: Option<f64>) -> bool {
    min_price.map_or(true, |min| current_price >= min)
}

/// Reasons a deal was rejected, for debug logging.
pub fn rejection_reasons(deal: &Deal, thresholds: &Thresholds) -> Vec<String> {
    let mut reasons = Vec::new();

    if !validate_prices(deal) {
        reasons.push(format!(
            "prices not sane (current {:.2}, reference {:.2})",
            deal.current_price, deal.reference_price
        ));
    }

    if !validate_discount(deal.discount_percent, thresholds) {
        reasons.push(format!(
            "discount {}% outside {}..={}",
            deal.discount_percent, thresholds.min_discount, thresholds.max_discount
        ));
    }

    if !validate_min_price(deal.current_price, thresholds.min_price) {
        reasons.push(format!("price {:.2} below minimum", deal.current_price));
    }

    reasons
}
