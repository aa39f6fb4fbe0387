//! Depth-bounded structural search for the product array inside an upstream payload

use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Keys whose presence marks an object as a product record.
pub const ID_KEYS: &[&str] = &["asin", "ASIN", "id", "productId", "product_id", "sku"];

pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Find the first array of product-like records within `max_depth` levels.
///
/// Returns an empty sequence when nothing matches. That is a normal
/// "no deals this run" outcome and is only reported through the log.
pub fn locate(payload: &Value, max_depth: usize) -> Vec<&Value> {
    match find_candidate_array(payload, max_depth) {
        Some(items) => {
            debug!(count = items.len(), "located candidate array");
            items.iter().collect()
        }
        None => {
            warn!(max_depth, "no candidate array found in upstream payload");
            Vec::new()
        }
    }
}

/// Breadth-first search, so the shallowest match wins.
fn find_candidate_array(payload: &Value, max_depth: usize) -> Option<&Vec<Value>> {
    let mut queue: VecDeque<(&Value, usize)> = VecDeque::new();
    queue.push_back((payload, 0));

    while let Some((value, depth)) = queue.pop_front() {
        match value {
            Value::Array(items) => {
                if looks_like_records(items) {
                    return Some(items);
                }
                if depth < max_depth {
                    for item in items {
                        queue.push_back((item, depth + 1));
                    }
                }
            }
            Value::Object(map) => {
                if depth < max_depth {
                    for child in map.values() {
                        queue.push_back((child, depth + 1));
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn looks_like_records(items: &[Value]) -> bool {
    items
        .first()
        .and_then(Value::as_object)
        .map(|obj| ID_KEYS.iter().any(|key| obj.contains_key(*key)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_and_malformed_payloads() {
        assert!(locate(&json!({}), DEFAULT_MAX_DEPTH).is_empty());
        assert!(locate(&json!({"foo": 1}), DEFAULT_MAX_DEPTH).is_empty());
        assert!(locate(&json!(null), DEFAULT_MAX_DEPTH).is_empty());
        assert!(locate(&json!([1, 2, 3]), DEFAULT_MAX_DEPTH).is_empty());
        assert!(locate(&json!({"products": []}), DEFAULT_MAX_DEPTH).is_empty());
    }

    #[test]
    fn test_root_array() {
        let payload = json!([{"asin": "B000000001"}, {"asin": "B000000002"}]);
        assert_eq!(locate(&payload, DEFAULT_MAX_DEPTH).len(), 2);
    }

    #[test]
    fn test_nested_deal_response() {
        let payload = json!({
            "tokensLeft": 10,
            "deals": {
                "categoryIds": [1, 2, 3],
                "dr": [{"asin": "B000000001", "current": [1000]}]
            }
        });
        let found = locate(&payload, DEFAULT_MAX_DEPTH);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["asin"], "B000000001");
    }

    #[test]
    fn test_shallowest_match_wins() {
        let payload = json!({
            "a": {"b": {"items": [{"id": "deep"}]}},
            "products": [{"id": "shallow"}]
        });
        assert_eq!(locate(&payload, DEFAULT_MAX_DEPTH)[0]["id"], "shallow");
    }

    #[test]
    fn test_depth_limit() {
        let payload = json!({"a": {"b": {"c": {"d": {"e": [{"id": "x"}]}}}}});
        assert!(locate(&payload, 3).is_empty());
        assert_eq!(locate(&payload, 5).len(), 1);
    }

    #[test]
    fn test_array_without_identifier_is_skipped() {
        let payload = json!({
            "categories": [{"name": "Books"}],
            "result": {"products": [{"productId": 42}]}
        });
        assert_eq!(locate(&payload, DEFAULT_MAX_DEPTH)[0]["productId"], 42);
    }
}
