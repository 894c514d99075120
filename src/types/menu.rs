//! Menu items and inbound price updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// The menu a fresh store is seeded with
pub const DEFAULT_MENU: [(&str, f64); 19] = [
    ("Big Mac", 5.99),
    ("McChicken", 4.99),
    ("Filet-O-Fish", 5.49),
    ("Spicy McCrispy", 5.99),
    ("Quarter Pounder with Cheese", 5.79),
    ("Chicken McNuggets (10 pcs)", 4.49),
    ("World Famous Fries (Medium)", 2.19),
    ("McDouble", 2.0),
    ("Bacon, Egg & Cheese Biscuit", 3.19),
    ("Egg McMuffin", 3.59),
    ("Sausage Burrito", 1.29),
    ("Hotcakes", 3.19),
    ("Apple Pie", 1.49),
    ("Vanilla Cone", 1.0),
    ("Strawberry Shake (Medium)", 2.99),
    ("Mocha Frappe (Medium)", 3.39),
    ("Iced Caramel Macchiato (Medium)", 3.39),
    ("Sweet Tea (Large)", 1.0),
    ("Coca-Cola (Large)", 1.89),
];

/// A priced menu entry; `name` is unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    /// Store-assigned id
    pub id: i64,
    /// Item name
    pub name: String,
    /// Current price
    pub price: f64,
}

/// A validated `{name, price}` update pulled from the update subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    /// Menu item name
    pub name: String,
    /// New price
    pub price: f64,
}

impl PriceUpdate {
    /// Parse and validate a raw message payload.
    ///
    /// The payload must be a JSON object with a non-empty string `name` and a
    /// numeric `price`. Anything else is a [`Error::Validation`].
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Validation(format!("payload is not JSON: {}", e)))?;

        let name = match value.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(Error::Validation("missing required field: name".into()))
            }
            Some(other) => {
                return Err(Error::Validation(format!("name must be a string, got {}", other)))
            }
        };

        let price = match value.get("price") {
            None | Some(Value::Null) => {
                return Err(Error::Validation("missing required field: price".into()))
            }
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| Error::Validation(format!("price out of range: {}", n)))?,
            Some(other) => {
                return Err(Error::Validation(format!("price must be a number, got {}", other)))
            }
        };

        Ok(Self { name, price })
    }
}

/// Message fanned out to live subscribers after a price change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateNotice {
    /// Human readable change description
    pub message: String,
}

impl From<&PriceUpdate> for PriceUpdateNotice {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            message: format!("Updated price for {} to {}", update.name, update.price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_update() {
        let update = PriceUpdate::parse(br#"{"name":"Big Mac","price":6.49}"#).unwrap();
        assert_eq!(update.name, "Big Mac");
        assert!((update.price - 6.49).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_zero_price_is_valid() {
        let update = PriceUpdate::parse(br#"{"name":"Vanilla Cone","price":0}"#).unwrap();
        assert_eq!(update.price, 0.0);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let payloads: [&[u8]; 7] = [
            br#"{"name":"Big Mac"}"#,
            br#"{"name":"Big Mac","price":null}"#,
            br#"{"price":6.49}"#,
            br#"{"name":"","price":6.49}"#,
            br#"{"name":"Big Mac","price":"6.49"}"#,
            br#"null"#,
            b"not json",
        ];
        for payload in payloads {
            let err = PriceUpdate::parse(payload).unwrap_err();
            assert!(
                matches!(err, Error::Validation(_)),
                "expected validation error for {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_notice_text() {
        let update = PriceUpdate {
            name: "Big Mac".into(),
            price: 6.49,
        };
        let notice = PriceUpdateNotice::from(&update);
        assert_eq!(notice.message, "Updated price for Big Mac to 6.49");
        assert_eq!(
            serde_json::to_string(&notice).unwrap(),
            r#"{"message":"Updated price for Big Mac to 6.49"}"#
        );
    }

    #[test]
    fn test_default_menu_names_are_unique() {
        let mut names: Vec<_> = DEFAULT_MENU.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), DEFAULT_MENU.len());
    }
}
