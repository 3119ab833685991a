//! Typed attribute values and their per-type operations

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use super::{AttributeType, DomainName, ElementType};

/// A single member of a set or list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    String(String),
    Integer(i64),
    Address(IpAddr),
    Network(IpNet),
    Domain(DomainName),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::String(_) => ElementType::String,
            Element::Integer(_) => ElementType::Integer,
            Element::Address(_) => ElementType::Address,
            Element::Network(_) => ElementType::Network,
            Element::Domain(_) => ElementType::Domain,
        }
    }

    pub fn into_value(self) -> AttributeValue {
        match self {
            Element::String(s) => AttributeValue::String(s),
            Element::Integer(i) => AttributeValue::Integer(i),
            Element::Address(a) => AttributeValue::Address(a),
            Element::Network(n) => AttributeValue::Network(n),
            Element::Domain(d) => AttributeValue::Domain(d),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::String(s) => write!(f, "{s:?}"),
            Element::Integer(i) => write!(f, "{i}"),
            Element::Address(a) => write!(f, "{a}"),
            Element::Network(n) => write!(f, "{n}"),
            Element::Domain(d) => write!(f, "{d}"),
        }
    }
}

/// A typed attribute value
///
/// Sets keep their elements sorted and de-duplicated, lists keep insertion
/// order. Every value knows its [`AttributeType`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Float(f64),
    Address(IpAddr),
    Network(IpNet),
    Domain(DomainName),
    Time(DateTime<Utc>),
    Set(ElementType, BTreeSet<Element>),
    List(ElementType, Vec<Element>),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Boolean(_) => AttributeType::Boolean,
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Integer(_) => AttributeType::Integer,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Address(_) => AttributeType::Address,
            AttributeValue::Network(_) => AttributeType::Network,
            AttributeValue::Domain(_) => AttributeType::Domain,
            AttributeValue::Time(_) => AttributeType::Time,
            AttributeValue::Set(e, _) => AttributeType::Set(*e),
            AttributeValue::List(e, _) => AttributeType::List(*e),
        }
    }

    /// Build a set from any iterator of elements of the same type
    pub fn set_of(element: ElementType, items: impl IntoIterator<Item = Element>) -> Self {
        AttributeValue::Set(element, items.into_iter().collect())
    }

    /// Build a list from any iterator of elements of the same type
    pub fn list_of(element: ElementType, items: impl IntoIterator<Item = Element>) -> Self {
        AttributeValue::List(element, items.into_iter().collect())
    }

    /// Convenience constructor for a set of strings
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::set_of(
            ElementType::String,
            items.into_iter().map(|s| Element::String(s.into())),
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert a scalar into a collection element
    pub fn to_element(&self) -> Option<Element> {
        match self {
            AttributeValue::String(s) => Some(Element::String(s.clone())),
            AttributeValue::Integer(i) => Some(Element::Integer(*i)),
            AttributeValue::Address(a) => Some(Element::Address(*a)),
            AttributeValue::Network(n) => Some(Element::Network(*n)),
            AttributeValue::Domain(d) => Some(Element::Domain(d.clone())),
            _ => None,
        }
    }

    /// Elements of a set or list, in iteration order
    pub fn elements(&self) -> Option<Box<dyn Iterator<Item = &Element> + '_>> {
        match self {
            AttributeValue::Set(_, items) => Some(Box::new(items.iter())),
            AttributeValue::List(_, items) => Some(Box::new(items.iter())),
            _ => None,
        }
    }

    /// Number of characters of a string or members of a collection
    pub fn len(&self) -> Option<usize> {
        match self {
            AttributeValue::String(s) => Some(s.chars().count()),
            AttributeValue::Set(_, items) => Some(items.len()),
            AttributeValue::List(_, items) => Some(items.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|n| n == 0)
    }

    /// Ordering of two values of the same ordered type
    ///
    /// Returns `None` for unordered types, mismatched types and NaN floats.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::Integer(a), AttributeValue::Integer(b)) => Some(a.cmp(b)),
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.partial_cmp(b),
            (AttributeValue::String(a), AttributeValue::String(b)) => Some(a.cmp(b)),
            (AttributeValue::Time(a), AttributeValue::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Containment test
    ///
    /// - string contains substring
    /// - network contains address
    /// - set or list contains element
    /// - set of networks contains address (any member network covers it)
    pub fn contains(&self, item: &AttributeValue) -> Option<bool> {
        match (self, item) {
            (AttributeValue::String(s), AttributeValue::String(sub)) => {
                Some(s.contains(sub.as_str()))
            }
            (AttributeValue::Network(net), AttributeValue::Address(addr)) => {
                Some(net.contains(addr))
            }
            (AttributeValue::Set(ElementType::Network, nets), AttributeValue::Address(addr)) => {
                Some(nets.iter().any(|n| matches!(n, Element::Network(net) if net.contains(addr))))
            }
            (AttributeValue::Set(e, items), value) => {
                let element = value.to_element().filter(|el| el.element_type() == *e)?;
                Some(items.contains(&element))
            }
            (AttributeValue::List(e, items), value) => {
                let element = value.to_element().filter(|el| el.element_type() == *e)?;
                Some(items.contains(&element))
            }
            _ => None,
        }
    }

    /// Intersection of two sets of the same element type
    pub fn intersect(&self, other: &AttributeValue) -> Option<AttributeValue> {
        match (self, other) {
            (AttributeValue::Set(a, left), AttributeValue::Set(b, right)) if a == b => Some(
                AttributeValue::Set(*a, left.intersection(right).cloned().collect()),
            ),
            _ => None,
        }
    }

    /// Union of two sets of the same element type
    pub fn union(&self, other: &AttributeValue) -> Option<AttributeValue> {
        match (self, other) {
            (AttributeValue::Set(a, left), AttributeValue::Set(b, right)) if a == b => {
                Some(AttributeValue::Set(*a, left.union(right).cloned().collect()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::String(s) => write!(f, "{s:?}"),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
            AttributeValue::Address(a) => write!(f, "{a}"),
            AttributeValue::Network(n) => write!(f, "{n}"),
            AttributeValue::Domain(d) => write!(f, "{d}"),
            AttributeValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            AttributeValue::Set(_, items) => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            AttributeValue::List(_, items) => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Serialized as `{"type": "<tag>", "value": <json>}`
impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("AttributeValue", 2)?;
        state.serialize_field("type", &self.attribute_type())?;
        state.serialize_field("value", &super::value_to_json(self))?;
        state.end()
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(x: f64) -> Self {
        AttributeValue::Float(x)
    }
}

impl From<IpAddr> for AttributeValue {
    fn from(a: IpAddr) -> Self {
        AttributeValue::Address(a)
    }
}

impl From<IpNet> for AttributeValue {
    fn from(n: IpNet) -> Self {
        AttributeValue::Network(n.trunc())
    }
}

impl From<DomainName> for AttributeValue {
    fn from(d: DomainName) -> Self {
        AttributeValue::Domain(d)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(t: DateTime<Utc>) -> Self {
        AttributeValue::Time(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_attribute_type_of_values() {
        assert_eq!(AttributeValue::from(true).attribute_type(), AttributeType::Boolean);
        assert_eq!(
            AttributeValue::string_set(["a"]).attribute_type(),
            AttributeType::Set(ElementType::String)
        );
    }

    #[test]
    fn test_set_is_sorted_and_deduplicated() {
        let set = AttributeValue::string_set(["b", "a", "b"]);
        assert_eq!(set.len(), Some(2));
        assert_eq!(set.to_string(), "{\"a\", \"b\"}");
    }

    #[test]
    fn test_network_contains_address() {
        let n = AttributeValue::from(net("10.0.0.0/8"));
        assert_eq!(n.contains(&AttributeValue::from(addr("10.1.2.3"))), Some(true));
        assert_eq!(n.contains(&AttributeValue::from(addr("192.168.0.1"))), Some(false));
    }

    #[test]
    fn test_set_of_networks_contains_address() {
        let nets = AttributeValue::set_of(
            ElementType::Network,
            [Element::Network(net("10.0.0.0/8")), Element::Network(net("2001:db8::/32"))],
        );
        assert_eq!(nets.contains(&AttributeValue::from(addr("2001:db8::1"))), Some(true));
        assert_eq!(nets.contains(&AttributeValue::from(addr("172.16.0.1"))), Some(false));
    }

    #[test]
    fn test_collection_membership_requires_matching_element_type() {
        let set = AttributeValue::string_set(["x"]);
        assert_eq!(set.contains(&AttributeValue::from("x")), Some(true));
        assert_eq!(set.contains(&AttributeValue::from(1_i64)), None);

        let list = AttributeValue::list_of(ElementType::Integer, [Element::Integer(3)]);
        assert_eq!(list.contains(&AttributeValue::from(3_i64)), Some(true));
    }

    #[test]
    fn test_intersect_and_union() {
        let a = AttributeValue::string_set(["x", "y"]);
        let b = AttributeValue::string_set(["y", "z"]);
        assert_eq!(a.intersect(&b), Some(AttributeValue::string_set(["y"])));
        assert_eq!(a.union(&b), Some(AttributeValue::string_set(["x", "y", "z"])));

        let ints = AttributeValue::set_of(ElementType::Integer, [Element::Integer(1)]);
        assert_eq!(a.intersect(&ints), None);
    }

    #[test]
    fn test_compare() {
        assert_eq!(
            AttributeValue::from(1_i64).compare(&AttributeValue::from(2_i64)),
            Some(Ordering::Less)
        );
        assert_eq!(
            AttributeValue::from(f64::NAN).compare(&AttributeValue::from(1.0)),
            None
        );
        assert_eq!(AttributeValue::from(true).compare(&AttributeValue::from(false)), None);
    }

    #[test]
    fn test_serialize_value() {
        let json = serde_json::to_value(AttributeValue::from(net("10.1.0.0/16"))).unwrap();
        assert_eq!(json, serde_json::json!({"type": "network", "value": "10.1.0.0/16"}));
    }
}
