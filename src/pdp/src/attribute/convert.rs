//! Value conversion between serde_json::Value and typed attribute values

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde_json::Value as JsonValue;
use std::net::IpAddr;

use super::{AttributeType, AttributeValue, DomainName, Element, ElementType};
use crate::error::TypeError;

/// Name of the JSON shape of a raw value, for error messages
fn json_kind(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => format!("boolean {b}"),
        JsonValue::Number(n) => format!("number {n}"),
        JsonValue::String(s) => format!("string {s:?}"),
        JsonValue::Array(_) => "array".to_string(),
        JsonValue::Object(_) => "object".to_string(),
    }
}

/// Coerce a raw JSON value into a typed attribute value
///
/// Addresses, networks, domains and times are given as strings; collections
/// as arrays of their element representation.
pub fn coerce(ty: AttributeType, raw: &JsonValue) -> Result<AttributeValue, TypeError> {
    let mismatch = || TypeError::new(ty, json_kind(raw));

    match ty {
        AttributeType::Boolean => raw.as_bool().map(AttributeValue::Boolean).ok_or_else(mismatch),
        AttributeType::String => raw
            .as_str()
            .map(|s| AttributeValue::String(s.to_string()))
            .ok_or_else(mismatch),
        AttributeType::Integer => raw.as_i64().map(AttributeValue::Integer).ok_or_else(mismatch),
        AttributeType::Float => raw.as_f64().map(AttributeValue::Float).ok_or_else(mismatch),
        AttributeType::Time => {
            let s = raw.as_str().ok_or_else(mismatch)?;
            DateTime::parse_from_rfc3339(s)
                .map(|t| AttributeValue::Time(t.with_timezone(&Utc)))
                .map_err(|_| mismatch())
        }
        AttributeType::Address
        | AttributeType::Network
        | AttributeType::Domain => {
            let element = ty.as_element().ok_or_else(mismatch)?;
            coerce_element(element, raw).map(Element::into_value)
        }
        AttributeType::Set(element) => {
            let items = raw.as_array().ok_or_else(mismatch)?;
            let members = items
                .iter()
                .map(|item| coerce_element(element, item))
                .collect::<Result<_, _>>()?;
            Ok(AttributeValue::Set(element, members))
        }
        AttributeType::List(element) => {
            let items = raw.as_array().ok_or_else(mismatch)?;
            let members = items
                .iter()
                .map(|item| coerce_element(element, item))
                .collect::<Result<_, _>>()?;
            Ok(AttributeValue::List(element, members))
        }
    }
}

/// Coerce a raw JSON value into a collection element
pub fn coerce_element(element: ElementType, raw: &JsonValue) -> Result<Element, TypeError> {
    let mismatch = || TypeError::new(element.scalar(), json_kind(raw));

    match element {
        ElementType::String => raw
            .as_str()
            .map(|s| Element::String(s.to_string()))
            .ok_or_else(mismatch),
        ElementType::Integer => raw.as_i64().map(Element::Integer).ok_or_else(mismatch),
        ElementType::Address => raw
            .as_str()
            .and_then(|s| s.parse::<IpAddr>().ok())
            .map(Element::Address)
            .ok_or_else(mismatch),
        ElementType::Network => raw
            .as_str()
            .and_then(|s| s.parse::<IpNet>().ok())
            .map(|n| Element::Network(n.trunc()))
            .ok_or_else(mismatch),
        ElementType::Domain => {
            let s = raw.as_str().ok_or_else(mismatch)?;
            DomainName::new(s).map(Element::Domain).map_err(|_| mismatch())
        }
    }
}

fn element_to_json(element: &Element) -> JsonValue {
    match element {
        Element::String(s) => JsonValue::String(s.clone()),
        Element::Integer(i) => JsonValue::Number((*i).into()),
        Element::Address(a) => JsonValue::String(a.to_string()),
        Element::Network(n) => JsonValue::String(n.to_string()),
        Element::Domain(d) => JsonValue::String(d.to_string()),
    }
}

/// Convert a typed attribute value back to its raw JSON representation
///
/// This is the inverse of [`coerce`] for every representable value.
pub fn value_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Boolean(b) => JsonValue::Bool(*b),
        AttributeValue::String(s) => JsonValue::String(s.clone()),
        AttributeValue::Integer(i) => JsonValue::Number((*i).into()),
        AttributeValue::Float(x) => serde_json::Number::from_f64(*x)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AttributeValue::Address(a) => JsonValue::String(a.to_string()),
        AttributeValue::Network(n) => JsonValue::String(n.to_string()),
        AttributeValue::Domain(d) => JsonValue::String(d.to_string()),
        AttributeValue::Time(t) => JsonValue::String(t.to_rfc3339()),
        AttributeValue::Set(_, items) => {
            JsonValue::Array(items.iter().map(element_to_json).collect())
        }
        AttributeValue::List(_, items) => {
            JsonValue::Array(items.iter().map(element_to_json).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_scalars() {
        assert_eq!(
            coerce(AttributeType::Boolean, &json!(true)).unwrap(),
            AttributeValue::Boolean(true)
        );
        assert_eq!(
            coerce(AttributeType::Integer, &json!(42)).unwrap(),
            AttributeValue::Integer(42)
        );
        assert_eq!(
            coerce(AttributeType::Float, &json!(1)).unwrap(),
            AttributeValue::Float(1.0)
        );
    }

    #[test]
    fn test_coerce_network_is_normalized() {
        let value = coerce(AttributeType::Network, &json!("10.1.2.3/8")).unwrap();
        assert_eq!(value.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_coerce_time() {
        let value = coerce(AttributeType::Time, &json!("2024-05-01T12:00:00+02:00")).unwrap();
        assert_eq!(value_to_json(&value), json!("2024-05-01T10:00:00+00:00"));
    }

    #[test]
    fn test_coerce_rejects_malformed_literals() {
        let err = coerce(AttributeType::Address, &json!("300.1.1.1")).unwrap_err();
        assert_eq!(err.expected, "address");
        assert!(err.actual.contains("300.1.1.1"));

        assert!(coerce(AttributeType::Integer, &json!("12")).is_err());
        assert!(coerce(AttributeType::Integer, &json!(1.5)).is_err());
        assert!(coerce(AttributeType::Domain, &json!("bad..domain")).is_err());
    }

    #[test]
    fn test_coerce_collections() {
        let set = coerce(
            AttributeType::Set(ElementType::String),
            &json!(["b", "a", "b"]),
        )
        .unwrap();
        assert_eq!(set.len(), Some(2));

        let list = coerce(
            AttributeType::List(ElementType::Domain),
            &json!(["Example.com", "a.example.com"]),
        )
        .unwrap();
        assert_eq!(value_to_json(&list), json!(["example.com", "a.example.com"]));

        let err =
            coerce(AttributeType::Set(ElementType::Address), &json!(["10.0.0.1", 7])).unwrap_err();
        assert_eq!(err.expected, "address");
    }
}
