//! Decision types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attribute::AttributeValue;
use crate::error::{ErrorKind, EvalError};

/// Outcome of evaluating a node or a whole tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Effect::Permit => "Permit",
            Effect::Deny => "Deny",
            Effect::NotApplicable => "NotApplicable",
            Effect::Indeterminate => "Indeterminate",
        };
        f.write_str(s)
    }
}

/// Resolved obligation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObligationValue {
    pub id: String,
    pub value: AttributeValue,
}

/// Why a decision is Indeterminate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndeterminateReason {
    pub kind: ErrorKind,
    pub message: String,
    /// Node ids from the root to the failing node
    pub path: Vec<String>,
}

/// Authorization decision
///
/// Indeterminate is never Permit: callers are expected to treat it as a
/// denial (or another safe default) unless they handle `reason` themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub effect: Effect,

    /// Obligations of the winning branch, innermost node first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<ObligationValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IndeterminateReason>,
}

impl Decision {
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            obligations: Vec::new(),
            reason: None,
        }
    }

    pub fn not_applicable() -> Self {
        Self::new(Effect::NotApplicable)
    }

    /// Indeterminate decision carrying the error and node path
    pub fn indeterminate(error: &EvalError, path: Vec<String>) -> Self {
        Self {
            effect: Effect::Indeterminate,
            obligations: Vec::new(),
            reason: Some(IndeterminateReason {
                kind: error.kind(),
                message: error.to_string(),
                path,
            }),
        }
    }

    pub fn with_obligations(mut self, obligations: Vec<ObligationValue>) -> Self {
        self.obligations = obligations;
        self
    }

    /// Only an explicit Permit allows access
    pub fn is_permit(&self) -> bool {
        self.effect == Effect::Permit
    }

    pub fn is_deny(&self) -> bool {
        self.effect == Effect::Deny
    }

    pub fn is_indeterminate(&self) -> bool {
        self.effect == Effect::Indeterminate
    }

    /// Value of the first obligation with the given id
    pub fn obligation(&self, id: &str) -> Option<&AttributeValue> {
        self.obligations.iter().find(|o| o.id == id).map(|o| &o.value)
    }
}
