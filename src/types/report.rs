//! Canonical report types
//!
//! The external automation system produces loosely-shaped JSON; these are the
//! stable internal shapes everything downstream renders from. Deserialization
//! is deliberately lenient (numeric fields accept numbers or formatted
//! strings like "$1,234,500"; list fields accept a single string or an array)
//! because the producer has shipped all of those at one time or another.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One reference property (active listing or recent sale)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparable {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub beds: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub baths: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub sqft: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sold_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub distance_miles: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Everything the producer sent that we do not model explicitly
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Market summary for the subject's area
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub median_list_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub median_sold_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub average_days_on_market: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub months_of_inventory: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One named pricing strategy (e.g. "Aggressive", "Market", "Premium")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingOption {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub pros: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub cons: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The property the report is about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProperty {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub beds: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub baths: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub sqft: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub year_built: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canonical report shape produced by the normalizer.
/// Derived from a job's response payload, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReport {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub subject: SubjectProperty,
    #[serde(default)]
    pub active_listings: Vec<Comparable>,
    #[serde(default)]
    pub recent_sales: Vec<Comparable>,
    #[serde(default)]
    pub market_data: MarketData,
    #[serde(default)]
    pub pricing_strategy: Vec<PricingOption>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

/// Final structure handed to presentation: the normalized report merged with
/// the address the client already knows and the user's edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportData {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub subject: SubjectProperty,
    pub active_listings: Vec<Comparable>,
    pub recent_sales: Vec<Comparable>,
    pub market_data: MarketData,
    pub pricing_strategy: Vec<PricingOption>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    /// Shareable link for this report, filled in once the job id is known
    #[serde(default)]
    pub view_url: Option<String>,
}

/// Lenient deserializers for producer quirks
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Parse "$1,234,500", "1234500", 1234500 or 1234500.0 into Some(f64);
    /// anything unparseable becomes None instead of an error.
    pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(coerce_f64))
    }

    pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse().ok()
                }
            }
            _ => None,
        }
    }

    /// Accept `["a", "b"]`, `"a"` or null; non-string array entries are
    /// stringified rather than dropped.
    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s],
            _ => Vec::new(),
        })
    }
}

pub(crate) use lenient::coerce_f64;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comparable_accepts_formatted_price_string() {
        let comparable: Comparable = serde_json::from_value(json!({
            "address": "4 Elm St",
            "price": "$1,234,500",
            "beds": "4",
            "sqft": 2100,
        }))
        .unwrap();

        assert_eq!(comparable.price, Some(1_234_500.0));
        assert_eq!(comparable.beds, Some(4.0));
        assert_eq!(comparable.sqft, Some(2100.0));
    }

    #[test]
    fn test_comparable_unparseable_price_becomes_none() {
        let comparable: Comparable = serde_json::from_value(json!({
            "price": "call for price",
        }))
        .unwrap();

        assert_eq!(comparable.price, None);
    }

    #[test]
    fn test_comparable_keeps_unknown_fields_in_extra() {
        let comparable: Comparable = serde_json::from_value(json!({
            "address": "4 Elm St",
            "schoolDistrict": "Eanes ISD",
        }))
        .unwrap();

        assert_eq!(
            comparable.extra.get("schoolDistrict"),
            Some(&json!("Eanes ISD"))
        );
    }

    #[test]
    fn test_pricing_option_accepts_single_string_pros() {
        let option: PricingOption = serde_json::from_value(json!({
            "name": "Aggressive",
            "price": 450000,
            "pros": "Fast sale",
            "cons": ["Leaves money on the table"],
        }))
        .unwrap();

        assert_eq!(option.pros, vec!["Fast sale".to_string()]);
        assert_eq!(option.cons.len(), 1);
    }

    #[test]
    fn test_normalized_report_serializes_to_camel_case() {
        let report = NormalizedReport {
            success: true,
            ..Default::default()
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("activeListings"));
        assert!(json.contains("recentSales"));
        assert!(json.contains("marketData"));
        assert!(json.contains("pricingStrategy"));
        assert!(!json.contains("active_listings"));
    }
}
