//! Attribute type system
//!
//! Typed attribute values and the type tags used by policy documents and
//! requests. Scalars cover strings, numbers, booleans, IP addresses and
//! networks, domain names and time; collections are unordered sets or ordered
//! lists of a single element type.

pub mod convert;
pub mod domain;
pub mod value;

pub use convert::{coerce, value_to_json};
pub use domain::DomainName;
pub use value::{AttributeValue, Element};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

/// Element type of a collection attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    String,
    Integer,
    Address,
    Network,
    Domain,
}

impl ElementType {
    /// Plural form used in collection type tags ("set of strings")
    pub fn plural(self) -> &'static str {
        match self {
            ElementType::String => "strings",
            ElementType::Integer => "integers",
            ElementType::Address => "addresses",
            ElementType::Network => "networks",
            ElementType::Domain => "domains",
        }
    }

    /// Scalar type of a single element
    pub fn scalar(self) -> AttributeType {
        match self {
            ElementType::String => AttributeType::String,
            ElementType::Integer => AttributeType::Integer,
            ElementType::Address => AttributeType::Address,
            ElementType::Network => AttributeType::Network,
            ElementType::Domain => AttributeType::Domain,
        }
    }

    fn from_plural(s: &str) -> Option<Self> {
        const PLURALS: &[(&str, ElementType)] = &[
            ("strings", ElementType::String),
            ("integers", ElementType::Integer),
            ("addresses", ElementType::Address),
            ("networks", ElementType::Network),
            ("domains", ElementType::Domain),
        ];
        PLURALS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, ty)| *ty)
    }
}

/// Static type of an attribute or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Boolean,
    String,
    Integer,
    Float,
    Address,
    Network,
    Domain,
    Time,
    Set(ElementType),
    List(ElementType),
}

const SCALAR_TAGS: &[(&str, AttributeType)] = &[
    ("boolean", AttributeType::Boolean),
    ("string", AttributeType::String),
    ("integer", AttributeType::Integer),
    ("float", AttributeType::Float),
    ("address", AttributeType::Address),
    ("network", AttributeType::Network),
    ("domain", AttributeType::Domain),
    ("time", AttributeType::Time),
];

impl AttributeType {
    /// Element type if this is a set or list
    pub fn element(self) -> Option<ElementType> {
        match self {
            AttributeType::Set(e) | AttributeType::List(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_collection(self) -> bool {
        self.element().is_some()
    }

    /// Element type if this type can be stored in a collection
    pub fn as_element(self) -> Option<ElementType> {
        match self {
            AttributeType::String => Some(ElementType::String),
            AttributeType::Integer => Some(ElementType::Integer),
            AttributeType::Address => Some(ElementType::Address),
            AttributeType::Network => Some(ElementType::Network),
            AttributeType::Domain => Some(ElementType::Domain),
            _ => None,
        }
    }

    /// Whether values of this type have a total order usable by comparisons
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            AttributeType::Integer
                | AttributeType::Float
                | AttributeType::String
                | AttributeType::Time
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, AttributeType::Integer | AttributeType::Float)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Set(e) => write!(f, "set of {}", e.plural()),
            AttributeType::List(e) => write!(f, "list of {}", e.plural()),
            scalar => {
                let tag = SCALAR_TAGS
                    .iter()
                    .find(|(_, ty)| ty == scalar)
                    .map(|(tag, _)| *tag)
                    .unwrap_or("unknown");
                f.write_str(tag)
            }
        }
    }
}

impl FromStr for AttributeType {
    type Err = TypeError;

    /// Parse a case-insensitive type tag such as `"Set of Networks"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        match words.as_slice() {
            [tag] => SCALAR_TAGS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(tag))
                .map(|(_, ty)| *ty)
                .ok_or_else(|| TypeError::new("a known type tag", format!("\"{s}\""))),
            [kind, of, plural] if of.eq_ignore_ascii_case("of") => {
                let element = ElementType::from_plural(plural).ok_or_else(|| {
                    TypeError::new("a known collection element", format!("\"{plural}\""))
                })?;
                if kind.eq_ignore_ascii_case("set") {
                    Ok(AttributeType::Set(element))
                } else if kind.eq_ignore_ascii_case("list") {
                    Ok(AttributeType::List(element))
                } else {
                    Err(TypeError::new("\"set\" or \"list\"", format!("\"{kind}\"")))
                }
            }
            _ => Err(TypeError::new("a known type tag", format!("\"{s}\""))),
        }
    }
}

impl Serialize for AttributeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttributeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(serde::de::Error::custom)
    }
}
