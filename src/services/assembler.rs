//! Report assembly
//!
//! Pure merge of the normalized async result with what the client already
//! knows. Precedence per field: user-entered edits > normalized subject
//! property > known address fallback. No network or storage access.

use serde_json::{Map, Value};

use crate::types::{coerce_f64, Address, NormalizedReport, ReportData};

/// Merge a normalized report with the known address and the user's edits
pub fn assemble(
    normalized: &NormalizedReport,
    known_address: &Address,
    overrides: &Map<String, Value>,
) -> ReportData {
    let mut subject = normalized.subject.clone();

    // Address fallback: fill only what the external system left blank
    fill_if_empty(&mut subject.address, &known_address.street);
    fill_if_empty(&mut subject.city, &known_address.city);
    fill_if_empty(&mut subject.state, &known_address.state);
    fill_if_empty(&mut subject.zip, &known_address.zip);

    // User edits win over everything
    for (key, value) in overrides {
        match key.as_str() {
            "address" | "street" => subject.address = as_non_empty_string(value),
            "city" => subject.city = as_non_empty_string(value),
            "state" => subject.state = as_non_empty_string(value),
            "zip" => subject.zip = as_non_empty_string(value),
            "price" => subject.price = coerce_f64(value),
            "beds" => subject.beds = coerce_f64(value),
            "baths" => subject.baths = coerce_f64(value),
            "sqft" => subject.sqft = coerce_f64(value),
            "yearBuilt" => subject.year_built = coerce_f64(value),
            _ => {
                subject.extra.insert(key.clone(), value.clone());
            }
        }
    }

    ReportData {
        success: normalized.success,
        message: normalized.message.clone(),
        subject,
        active_listings: normalized.active_listings.clone(),
        recent_sales: normalized.recent_sales.clone(),
        market_data: normalized.market_data.clone(),
        pricing_strategy: normalized.pricing_strategy.clone(),
        pdf_url: normalized.pdf_url.clone(),
        view_url: None,
    }
}

fn fill_if_empty(slot: &mut Option<String>, fallback: &str) {
    let is_empty = slot.as_deref().map_or(true, str::is_empty);
    if is_empty && !fallback.is_empty() {
        *slot = Some(fallback.to_string());
    }
}

fn as_non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
