use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Placeholder title for orders whose source segment carries none.
pub const NO_TITLE: &str = "No title available";

const ID_PREFIX: &str = "NYORDER";

/// One order's metadata as parsed from the listing page, prior to any
/// persistence. The export payload is keyed by `order_id`, so the id itself
/// is not serialized into the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDescriptor {
    #[serde(skip)]
    pub order_id: String,
    pub order_num: String,
    pub title: String,
    pub signed_date: String,
    pub pdf_url: String,
    pub src: String,
    pub governor: String,
}

/// Derive the stable order id: source prefix + order number with `.` → `_`.
pub fn order_id(order_num: &str) -> String {
    format!("{}{}", ID_PREFIX, order_num.replace('.', "_"))
}

/// Normalize a date like "January 1, 2011" to "2011-01-01". A string that
/// does not parse is returned unchanged (degraded state, logged).
pub fn parse_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw, "%B %d, %Y") {
        Ok(d) => d.format("%Y-%m-%d").to_string(),
        Err(e) => {
            warn!("Could not parse date '{}': {}", raw, e);
            raw.to_string()
        }
    }
}

/// Numeric form of an order number, with an explicit marker for inputs that
/// failed to parse and fell back to zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedOrderNum {
    pub value: f64,
    pub defaulted: bool,
}

/// A string containing `.` parses as floating, one without parses as
/// integer; anything else yields exactly 0 with `defaulted` set.
pub fn normalize_order_num(raw: &str) -> NormalizedOrderNum {
    let trimmed = raw.trim();
    let parsed = if trimmed.contains('.') {
        trimmed.parse::<f64>().ok()
    } else {
        trimmed.parse::<i64>().map(|n| n as f64).ok()
    };
    match parsed {
        Some(value) => NormalizedOrderNum {
            value,
            defaulted: false,
        },
        None => NormalizedOrderNum {
            value: 0.0,
            defaulted: true,
        },
    }
}

/// Row for the order-metadata table, audit columns included. Every write is
/// an upsert-as-of-now, so creation and update columns are both set.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub order_id: String,
    pub title: String,
    pub signed_date: String,
    pub description: Option<String>,
    pub src: String,
    pub row_ct_dt: String,
    pub row_ct_user: String,
    pub row_updt_dt: String,
    pub row_updt_user: String,
    pub order_num: f64,
}

/// Row for the order-text table. Empty `text` is a valid, storable outcome
/// distinct from "row absent".
#[derive(Debug, Clone)]
pub struct OrderTextEntry {
    pub order_id: String,
    pub text: String,
    pub src: String,
    pub row_ct_dt: String,
    pub row_ct_user: String,
    pub row_updt_dt: String,
    pub row_updt_user: String,
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_replaces_dots() {
        assert_eq!(order_id("147.28"), "NYORDER147_28");
        assert_eq!(order_id("147"), "NYORDER147");
    }

    #[test]
    fn parse_date_normalizes_english_months() {
        assert_eq!(parse_date("January 1, 2011"), "2011-01-01");
        assert_eq!(parse_date("October 4, 2019"), "2019-10-04");
        assert_eq!(parse_date("December 31, 1999"), "1999-12-31");
    }

    #[test]
    fn parse_date_passes_through_unparseable() {
        assert_eq!(parse_date("sometime in 2011"), "sometime in 2011");
        assert_eq!(parse_date(""), "");
    }

    #[test]
    fn order_num_with_dot_parses_as_float() {
        let n = normalize_order_num("147.28");
        assert_eq!(n.value, 147.28);
        assert!(!n.defaulted);
    }

    #[test]
    fn order_num_without_dot_parses_as_integer() {
        let n = normalize_order_num("147");
        assert_eq!(n.value, 147.0);
        assert!(!n.defaulted);
    }

    #[test]
    fn order_num_unparseable_defaults_to_zero() {
        for bad in ["", "abc", "147.28.1", "1 2"] {
            let n = normalize_order_num(bad);
            assert_eq!(n.value, 0.0, "input {:?}", bad);
            assert!(n.defaulted, "input {:?}", bad);
        }
    }

    #[test]
    fn descriptor_serializes_without_order_id() {
        let d = OrderDescriptor {
            order_id: "NYORDER1".into(),
            order_num: "1".into(),
            title: "Test".into(),
            signed_date: "2011-01-01".into(),
            pdf_url: "https://example.com/a.pdf".into(),
            src: "governor.ny.gov".into(),
            governor: "Andrew M. Cuomo".into(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("order_id").is_none());
        assert_eq!(v["order_num"], "1");
    }
}
