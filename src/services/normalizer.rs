//! Webhook response normalization
//!
//! The external automation system has shipped several payload shapes over
//! time and still does. This module is the single place that knows about all
//! of them; everything downstream only ever sees `NormalizedReport`.
//!
//! Shapes handled:
//! - an object with direct `activeListings` / `recentSales` / `editFields3` /
//!   `pricingStrategy` / `pdfUrl` fields
//! - an array whose first element carries property records under numeric
//!   string keys ("0", "1", ...) and/or `*Comparables*`-named keys
//! - a `pricingStrategy.PricingStrategy` array nested one level too deep
//!   (a producer defect, unwrapped here and never propagated)
//! - a plain-text trial-limit body (detected, not parsed)
//!
//! Malformed input degrades to an empty-but-well-formed report; it never
//! throws and never blocks rendering.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{Comparable, MarketData, NormalizedReport, PricingOption, SubjectProperty};

/// Stable core of the trial-limit message; surrounding text has varied
pub const TRIAL_LIMIT_PHRASE: &str = "reached your free trial limit";

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Implementation
// ==========================================================================

/// True when a raw response body is the plain-text trial-limit rejection
pub fn detect_trial_limit(body: &str) -> bool {
    body.to_ascii_lowercase().contains(TRIAL_LIMIT_PHRASE)
}

/// Convert a raw external payload into the canonical report shape.
/// Never panics; unrecognized input degrades to an empty report.
pub fn normalize(raw: &Value) -> NormalizedReport {
    let root = match root_object(raw) {
        Some(obj) => obj,
        None => {
            warn!("Valuation payload has no report-shaped root, returning empty report");
            return NormalizedReport {
                success: false,
                message: "Unrecognized response shape".to_string(),
                ..Default::default()
            };
        }
    };

    let mut active_listings = comparables_from(root, "activeListings");
    if active_listings.is_empty() {
        // Historical shape: records keyed directly on the envelope object
        active_listings = flatten_keyed_records(root);
    }
    let recent_sales = comparables_from(root, "recentSales");

    let market_data = root
        .get("editFields3")
        .map(parse_market_data)
        .unwrap_or_default();

    let pricing_strategy = parse_pricing_strategy(root.get("pricingStrategy"));

    let subject = root
        .get("subjectProperty")
        .or_else(|| root.get("property"))
        .map(parse_subject)
        .unwrap_or_default();

    let pdf_url = root
        .get("pdfUrl")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    NormalizedReport {
        success: root.get("success").and_then(Value::as_bool).unwrap_or(true),
        message: root
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        subject,
        active_listings,
        recent_sales,
        market_data,
        pricing_strategy,
        pdf_url,
    }
}

/// Unwrap the historical array envelope: some payload versions arrive as a
/// one-element array around the actual report object.
fn root_object(raw: &Value) -> Option<&Map<String, Value>> {
    match raw {
        Value::Object(obj) => Some(obj),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

fn comparables_from(obj: &Map<String, Value>, key: &str) -> Vec<Comparable> {
    match obj.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(parse_comparable).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            debug!("Field '{}' is not a list ({}), ignoring", key, type_name(other));
            Vec::new()
        }
    }
}

/// Flatten records keyed by numeric strings and `*Comparables*` names into a
/// single ordered list. Numeric keys come first, pattern-matched keys are
/// appended, each group in the order the producer emitted them. The ordering
/// is an artifact of evolving payload formats, kept for compatibility.
fn flatten_keyed_records(obj: &Map<String, Value>) -> Vec<Comparable> {
    let mut records = Vec::new();

    for (key, value) in obj {
        if is_numeric_key(key) {
            push_records(&mut records, value);
        }
    }
    for (key, value) in obj {
        if !is_numeric_key(key) && key.contains("Comparables") {
            push_records(&mut records, value);
        }
    }

    records
}

fn push_records(records: &mut Vec<Comparable>, value: &Value) {
    match value {
        Value::Array(items) => records.extend(items.iter().filter_map(parse_comparable)),
        other => records.extend(parse_comparable(other)),
    }
}

fn is_numeric_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn parse_comparable(value: &Value) -> Option<Comparable> {
    let obj = value.as_object()?;
    match serde_json::from_value(value.clone()) {
        Ok(comparable) => Some(comparable),
        Err(e) => {
            warn!("Comparable record did not parse cleanly ({}), keeping raw fields", e);
            Some(Comparable {
                extra: obj.clone(),
                ..Default::default()
            })
        }
    }
}

fn parse_market_data(value: &Value) -> MarketData {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!("Market data did not parse cleanly ({}), using empty summary", e);
            MarketData::default()
        }),
        _ => MarketData::default(),
    }
}

fn parse_subject(value: &Value) -> SubjectProperty {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_default(),
        _ => SubjectProperty::default(),
    }
}

/// Extract the pricing strategy list, unwrapping the producer's occasional
/// double nesting: `PricingStrategy: [{ PricingStrategy: [...] }]`.
fn parse_pricing_strategy(value: Option<&Value>) -> Vec<PricingOption> {
    let value = match value {
        Some(v) => v,
        None => return Vec::new(),
    };

    let options = match value {
        // Bare list, seen from one producer version
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("PricingStrategy").and_then(Value::as_array) {
            Some(items) => unwrap_double_nesting(items),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    options.iter().filter_map(parse_pricing_option).collect()
}

fn unwrap_double_nesting(items: &[Value]) -> &[Value] {
    if let Some(first) = items.first().and_then(Value::as_object) {
        if first.len() == 1 {
            if let Some(inner) = first.get("PricingStrategy").and_then(Value::as_array) {
                if !inner.is_empty() {
                    debug!("Unwrapping double-nested pricing strategy payload");
                    return inner;
                }
            }
        }
    }
    items
}

fn parse_pricing_option(value: &Value) -> Option<PricingOption> {
    let obj = value.as_object()?;
    match serde_json::from_value(value.clone()) {
        Ok(option) => Some(option),
        Err(e) => {
            warn!("Pricing option did not parse cleanly ({}), keeping raw fields", e);
            Some(PricingOption {
                extra: obj.clone(),
                ..Default::default()
            })
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
