//! Decision request: a flat map of attribute id to typed value

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::attribute::{coerce, AttributeType, AttributeValue};
use crate::error::{PdpError, Result};

/// Attributes describing one access attempt
///
/// Ids are case-sensitive. Attributes that no expression references are
/// carried but never looked at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    attributes: HashMap<String, AttributeValue>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequest {
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAttribute {
    id: String,
    #[serde(rename = "type")]
    ty: String,
    value: Value,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to the request
    pub fn with_attribute(
        mut self,
        id: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(id.into(), value.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<&AttributeValue> {
        self.attributes.get(id)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Decode `{"attributes": [{"id": .., "type": .., "value": ..}]}`
    ///
    /// Unknown type tags and values that do not fit their type are request
    /// errors. A repeated id keeps the last value.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawRequest =
            serde_json::from_slice(bytes).map_err(|e| PdpError::InvalidRequest(e.to_string()))?;

        let mut request = Request::new();
        for attr in raw.attributes {
            let ty: AttributeType = attr
                .ty
                .parse()
                .map_err(|e| PdpError::InvalidRequest(format!("attribute \"{}\": {e}", attr.id)))?;
            let value = coerce(ty, &attr.value)
                .map_err(|e| PdpError::InvalidRequest(format!("attribute \"{}\": {e}", attr.id)))?;
            request.attributes.insert(attr.id, value);
        }

        Ok(request)
    }
}
