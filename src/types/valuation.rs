//! Valuation request types
//!
//! A `ValuationRequest` is the frontend's snapshot of what the user confirmed:
//! the parsed address, contact details, uploaded photo URLs and any property
//! fields the user edited by hand. It is immutable once submitted.

use serde::{Deserialize, Serialize};

/// Parsed property address
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
}

impl Address {
    /// Single-line display form, skipping empty parts
    pub fn display(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in [&self.street, &self.city, &self.state, &self.zip] {
            if !part.is_empty() {
                parts.push(part);
            }
        }
        parts.join(", ")
    }
}

/// User contact info captured alongside the request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ContactInfo {
    /// Name used in user-facing messages (trial-limit modal etc.)
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "there".to_string())
    }
}

/// A confirmed valuation request, ready for submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRequest {
    pub address: Address,
    #[serde(default)]
    pub contact: ContactInfo,
    /// Photo URLs already uploaded by the frontend
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Free-form property fields the user edited before confirming
    #[serde(default)]
    pub edited_fields: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valuation_request_serializes_to_camel_case() {
        let request = ValuationRequest {
            address: Address {
                street: "12 Oak Ln".to_string(),
                city: "Austin".to_string(),
                state: "TX".to_string(),
                zip: "78701".to_string(),
            },
            contact: ContactInfo {
                first_name: Some("Dana".to_string()),
                ..Default::default()
            },
            image_urls: vec!["https://img.example/1.jpg".to_string()],
            edited_fields: serde_json::Map::new(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("imageUrls"));
        assert!(json.contains("editedFields"));
        assert!(json.contains("firstName"));
        assert!(!json.contains("image_urls"));
    }

    #[test]
    fn test_valuation_request_deserializes_with_missing_optionals() {
        let json = r#"{"address":{"street":"12 Oak Ln","zip":"78701"}}"#;
        let request: ValuationRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.address.street, "12 Oak Ln");
        assert_eq!(request.address.city, "");
        assert!(request.image_urls.is_empty());
        assert!(request.edited_fields.is_empty());
    }

    #[test]
    fn test_address_display_skips_empty_parts() {
        let address = Address {
            street: "12 Oak Ln".to_string(),
            city: "".to_string(),
            state: "TX".to_string(),
            zip: "78701".to_string(),
        };
        assert_eq!(address.display(), "12 Oak Ln, TX, 78701");
    }

    #[test]
    fn test_contact_display_name_falls_back() {
        assert_eq!(ContactInfo::default().display_name(), "there");
        let contact = ContactInfo {
            first_name: Some("Dana".to_string()),
            ..Default::default()
        };
        assert_eq!(contact.display_name(), "Dana");
    }
}
