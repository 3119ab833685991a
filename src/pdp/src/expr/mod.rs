//! Expression model
//!
//! Expressions are typed trees of literals, attribute designators and
//! function applications. The static type of every node is computed when the
//! node is built, so a well-formed [`Expression`] never needs type checks at
//! evaluation time.

pub mod eval;
pub mod function;
pub mod target;

pub use function::Function;
pub use target::{AllOf, AnyItem, AnyOf, Clause, Target};

use crate::attribute::{AttributeType, AttributeValue};

/// Reference to a request attribute by id and expected type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeDesignator {
    pub id: String,
    pub ty: AttributeType,
}

impl AttributeDesignator {
    pub fn new(id: impl Into<String>, ty: AttributeType) -> Self {
        Self { id: id.into(), ty }
    }
}

/// Function application with its computed result type
#[derive(Debug, Clone, PartialEq)]
pub struct Apply {
    pub function: Function,
    pub args: Vec<Expression>,
    pub ty: AttributeType,
}

/// Typed expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(AttributeValue),
    Designator(AttributeDesignator),
    Apply(Apply),
}

impl Expression {
    pub fn literal(value: impl Into<AttributeValue>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn designator(id: impl Into<String>, ty: AttributeType) -> Self {
        Expression::Designator(AttributeDesignator::new(id, ty))
    }

    /// Build a type-checked function application
    ///
    /// Returns the signature mismatch message when the argument types are not
    /// accepted by `function`.
    pub fn apply(function: Function, args: Vec<Expression>) -> Result<Self, String> {
        let types: Vec<AttributeType> = args.iter().map(Expression::ty).collect();
        let ty = function.check(&types)?;
        Ok(Expression::Apply(Apply { function, args, ty }))
    }

    /// Static type of the expression
    pub fn ty(&self) -> AttributeType {
        match self {
            Expression::Literal(value) => value.attribute_type(),
            Expression::Designator(d) => d.ty,
            Expression::Apply(apply) => apply.ty,
        }
    }
}
