//! Policy tree model
//!
//! A tree is built once by the parser and never mutated afterwards. Parents
//! own their children by value; rules appear only at the leaves.
//!
//! ```text
//! PolicyTree
//!   └─ PolicyNode ── PolicySet ── [PolicyNode ...]
//!                └─ Policy ───── [Rule ...]
//! ```

pub mod serialize;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::attribute::{AttributeType, ElementType};
use crate::expr::{Expression, Target};

/// Label used for nodes without an id in diagnostics
pub const HIDDEN_NODE: &str = "<hidden>";

/// Effect declared by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyEffect {
    Permit,
    Deny,
}

impl PolicyEffect {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("permit") {
            Some(PolicyEffect::Permit)
        } else if s.eq_ignore_ascii_case("deny") {
            Some(PolicyEffect::Deny)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyEffect::Permit => "Permit",
            PolicyEffect::Deny => "Deny",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PolicyEffect::Permit => PolicyEffect::Deny,
            PolicyEffect::Deny => PolicyEffect::Permit,
        }
    }
}

/// Attribute assignment attached to a node's effect
#[derive(Debug, Clone, PartialEq)]
pub struct Obligation {
    pub attribute: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: Option<String>,
    pub target: Target,
    pub condition: Option<Expression>,
    pub effect: PolicyEffect,
    pub obligations: Vec<Obligation>,
}

impl Rule {
    /// Rule with an empty target and no condition
    pub fn new(id: Option<String>, effect: PolicyEffect) -> Self {
        Self {
            id,
            target: Target::any(),
            condition: None,
            effect,
            obligations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub id: Option<String>,
    pub target: Target,
    pub algorithm: CombiningAlgorithm,
    pub rules: Vec<Rule>,
    pub obligations: Vec<Obligation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    pub id: Option<String>,
    pub target: Target,
    pub algorithm: CombiningAlgorithm,
    pub policies: Vec<PolicyNode>,
    pub obligations: Vec<Obligation>,
}

/// Container node: a policy of rules or a set of nested nodes
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyNode {
    Policy(Policy),
    PolicySet(PolicySet),
}

impl PolicyNode {
    pub fn id(&self) -> Option<&str> {
        match self {
            PolicyNode::Policy(p) => p.id.as_deref(),
            PolicyNode::PolicySet(s) => s.id.as_deref(),
        }
    }

    /// Number of nodes in this subtree, rules included
    pub fn node_count(&self) -> usize {
        match self {
            PolicyNode::Policy(p) => 1 + p.rules.len(),
            PolicyNode::PolicySet(s) => {
                1 + s.policies.iter().map(PolicyNode::node_count).sum::<usize>()
            }
        }
    }

    /// Nesting depth, counting this node as one
    pub fn depth(&self) -> usize {
        match self {
            PolicyNode::Policy(_) => 1,
            PolicyNode::PolicySet(s) => {
                1 + s.policies.iter().map(PolicyNode::depth).max().unwrap_or(0)
            }
        }
    }
}

/// A validated, immutable policy document
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTree {
    /// Declared attribute ids and their types
    pub attributes: BTreeMap<String, AttributeType>,
    pub root: PolicyNode,
}

impl PolicyTree {
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }
}

/// Standard combining algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    FirstApplicable,
    DenyOverrides,
    PermitOverrides,
    OnlyOneApplicable,
    DenyUnlessPermit,
    PermitUnlessDeny,
}

const ALGORITHMS: &[(&str, AlgorithmKind)] = &[
    ("FirstApplicableEffect", AlgorithmKind::FirstApplicable),
    ("DenyOverrides", AlgorithmKind::DenyOverrides),
    ("PermitOverrides", AlgorithmKind::PermitOverrides),
    ("OnlyOneApplicable", AlgorithmKind::OnlyOneApplicable),
    ("DenyUnlessPermit", AlgorithmKind::DenyUnlessPermit),
    ("PermitUnlessDeny", AlgorithmKind::PermitUnlessDeny),
];

/// Name of the mapper algorithm in documents
pub const MAPPER: &str = "Mapper";

impl AlgorithmKind {
    /// Look up a standard algorithm by case-insensitive name
    pub fn lookup(name: &str) -> Option<Self> {
        ALGORITHMS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        ALGORITHMS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome when a mapper selects a value that names no child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissingChild {
    #[default]
    NotApplicable,
    Indeterminate,
}

impl MissingChild {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("notapplicable") {
            Some(MissingChild::NotApplicable)
        } else if s.eq_ignore_ascii_case("indeterminate") {
            Some(MissingChild::Indeterminate)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MissingChild::NotApplicable => "NotApplicable",
            MissingChild::Indeterminate => "Indeterminate",
        }
    }
}

/// Selector-driven dispatch to a subset of children
///
/// The selector yields a string, a set of strings or a list of strings; each
/// value names a child by id. Indices refer to the owning container's
/// children in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapper {
    pub selector: Expression,
    pub index: HashMap<String, usize>,
    pub default: Option<usize>,
    pub on_error: Option<usize>,
    pub missing: MissingChild,
    pub algorithm: AlgorithmKind,
}

/// Mapper options as written in a document, before child ids are known
#[derive(Debug, Clone, PartialEq)]
pub struct MapperSpec {
    pub selector: Expression,
    pub default: Option<String>,
    pub on_error: Option<String>,
    pub missing: Option<MissingChild>,
    pub algorithm: AlgorithmKind,
}

impl MapperSpec {
    /// Bind the options to a container's children
    ///
    /// Children without ids are not addressable. Fails when the selector has
    /// the wrong type or `default`/`error` name no child.
    pub fn bind<'a>(
        self,
        children: impl IntoIterator<Item = Option<&'a str>>,
        fallback: MissingChild,
    ) -> Result<Mapper, String> {
        let ty = self.selector.ty();
        let selectable = matches!(
            ty,
            AttributeType::String
                | AttributeType::Set(ElementType::String)
                | AttributeType::List(ElementType::String)
        );
        if !selectable {
            return Err(format!(
                "mapper selector must be string, set of strings or list of strings but is {ty}"
            ));
        }

        let index: HashMap<String, usize> = children
            .into_iter()
            .enumerate()
            .filter_map(|(i, id)| id.map(|id| (id.to_string(), i)))
            .collect();

        let find = |id: Option<String>, what: &str| -> Result<Option<usize>, String> {
            match id {
                None => Ok(None),
                Some(id) => index
                    .get(&id)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| format!("mapper {what} \"{id}\" names no child")),
            }
        };
        let default = find(self.default, "default")?;
        let on_error = find(self.on_error, "error")?;

        Ok(Mapper {
            selector: self.selector,
            index,
            default,
            on_error,
            missing: self.missing.unwrap_or(fallback),
            algorithm: self.algorithm,
        })
    }
}

/// Combining algorithm of a container node
#[derive(Debug, Clone, PartialEq)]
pub enum CombiningAlgorithm {
    Standard(AlgorithmKind),
    Mapper(Box<Mapper>),
}

impl From<AlgorithmKind> for CombiningAlgorithm {
    fn from(kind: AlgorithmKind) -> Self {
        CombiningAlgorithm::Standard(kind)
    }
}
