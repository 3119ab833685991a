//! Single-pass policy document parser
//!
//! Documents are decoded straight from bytes into a [`PolicyTree`] with serde
//! seeds and visitors; no intermediate JSON tree is built (literal contents
//! are the only values buffered). Object keys are matched case-insensitively
//! and unknown keys are rejected.
//!
//! The parser tracks the path of keys and array indices it is inside. The
//! first schema or type error records that path; the JSON decoder supplies
//! line and column.

mod document;
mod expression;
mod node;

use serde::de::{self, DeserializeSeed};
use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::attribute::AttributeType;
use crate::config::EngineConfig;
use crate::error::{DocumentPath, ParseError};
use crate::policy::{MissingChild, PolicyTree};

/// Document vocabulary
pub(crate) mod tags {
    pub const ATTRIBUTES: &str = "attributes";
    pub const POLICIES: &str = "policies";
    pub const RULES: &str = "rules";
    pub const ID: &str = "id";
    pub const TARGET: &str = "target";
    pub const CONDITION: &str = "condition";
    pub const EFFECT: &str = "effect";
    pub const OBLIGATIONS: &str = "obligations";
    pub const ALG: &str = "alg";
    pub const MAP: &str = "map";
    pub const DEFAULT: &str = "default";
    pub const ERROR: &str = "error";
    pub const MISSING: &str = "missing";
    pub const ANY: &str = "any";
    pub const ALL: &str = "all";
    pub const ATTR: &str = "attr";
    pub const VAL: &str = "val";
    pub const TYPE: &str = "type";
    pub const CONTENT: &str = "content";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Schema,
    Type,
}

#[derive(Debug)]
struct Pending {
    class: Class,
    message: String,
    path: Vec<String>,
}

/// Shared state of one parse
pub(crate) struct ParseContext {
    max_depth: usize,
    mapper_missing: MissingChild,
    attributes: RefCell<BTreeMap<String, AttributeType>>,
    path: RefCell<Vec<String>>,
    error: RefCell<Option<Pending>>,
}

impl ParseContext {
    fn new(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            mapper_missing: config.mapper_missing,
            attributes: RefCell::new(BTreeMap::new()),
            path: RefCell::new(Vec::new()),
            error: RefCell::new(None),
        }
    }

    pub(crate) fn enter(&self, segment: impl Into<String>) {
        self.path.borrow_mut().push(segment.into());
    }

    pub(crate) fn enter_index(&self, index: usize) {
        self.enter(format!("[{index}]"));
    }

    pub(crate) fn leave(&self) {
        self.path.borrow_mut().pop();
    }

    fn fail<E: de::Error>(&self, class: Class, message: String) -> E {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(Pending {
                class,
                message: message.clone(),
                path: self.path.borrow().clone(),
            });
        }
        E::custom(message)
    }

    /// Record a schema error at the current path
    pub(crate) fn schema<E: de::Error>(&self, message: impl Into<String>) -> E {
        self.fail(Class::Schema, message.into())
    }

    /// Record a type error at the current path
    pub(crate) fn type_error<E: de::Error>(&self, message: impl Into<String>) -> E {
        self.fail(Class::Type, message.into())
    }

    /// Unknown key: the key becomes the last path segment
    pub(crate) fn unknown_tag<E: de::Error>(&self, key: &str) -> E {
        self.enter(key);
        self.schema(format!("unknown tag \"{key}\""))
    }

    pub(crate) fn duplicate_tag<E: de::Error>(&self, key: &str) -> E {
        self.schema(format!("duplicate tag \"{key}\""))
    }

    pub(crate) fn declare(&self, id: &str, ty: AttributeType) -> Result<(), String> {
        let mut attributes = self.attributes.borrow_mut();
        if attributes.contains_key(id) {
            return Err(format!("attribute \"{id}\" is already declared"));
        }
        attributes.insert(id.to_string(), ty);
        Ok(())
    }

    pub(crate) fn declared(&self, id: &str) -> Option<AttributeType> {
        self.attributes.borrow().get(id).copied()
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub(crate) fn mapper_missing(&self) -> MissingChild {
        self.mapper_missing
    }

    fn take_attributes(&self) -> BTreeMap<String, AttributeType> {
        std::mem::take(&mut *self.attributes.borrow_mut())
    }

    /// Turn a decoder error into a located parse error
    fn finish(self, err: serde_json::Error) -> ParseError {
        let line = err.line();
        let column = err.column();

        if let Some(pending) = self.error.into_inner() {
            let path = DocumentPath(pending.path);
            return match pending.class {
                Class::Schema => ParseError::Schema {
                    message: pending.message,
                    path,
                    line,
                    column,
                },
                Class::Type => ParseError::Type {
                    message: pending.message,
                    path,
                    line,
                    column,
                },
            };
        }

        let message = strip_position(&err);
        match err.classify() {
            serde_json::error::Category::Data => ParseError::Schema {
                message,
                path: DocumentPath(self.path.into_inner()),
                line,
                column,
            },
            _ => ParseError::Syntax {
                message,
                line,
                column,
            },
        }
    }
}

fn strip_position(err: &serde_json::Error) -> String {
    let full = err.to_string();
    let suffix = format!(" at line {} column {}", err.line(), err.column());
    full.strip_suffix(&suffix).map(str::to_string).unwrap_or(full)
}

/// Small helper for "set once" keys
pub(crate) fn set_once<T, E: de::Error>(
    ctx: &ParseContext,
    slot: &mut Option<T>,
    key: &str,
    value: T,
) -> Result<(), E> {
    if slot.is_some() {
        return Err(ctx.duplicate_tag(key));
    }
    *slot = Some(value);
    Ok(())
}

/// Parse a policy document with the default configuration
pub fn parse(bytes: &[u8]) -> Result<PolicyTree, ParseError> {
    parse_with(bytes, &EngineConfig::default())
}

/// Parse and validate a policy document
///
/// Either the whole tree is returned or the first error found; no partial
/// tree is ever produced.
pub fn parse_with(bytes: &[u8], config: &EngineConfig) -> Result<PolicyTree, ParseError> {
    let ctx = ParseContext::new(config);
    let mut de = serde_json::Deserializer::from_slice(bytes);

    let root = document::DocumentSeed { ctx: &ctx }
        .deserialize(&mut de)
        .and_then(|root| de.end().map(|()| root));

    match root {
        Ok(root) => Ok(PolicyTree {
            attributes: ctx.take_attributes(),
            root,
        }),
        Err(err) => Err(ctx.finish(err)),
    }
}
