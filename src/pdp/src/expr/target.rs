//! Applicability targets
//!
//! A target is a conjunction of clauses. A clause is either a boolean
//! expression or an [`AnyOf`] disjunction whose items are boolean expressions
//! or [`AllOf`] conjunctions. An empty target matches every request.

use super::Expression;

/// Conjunction of boolean expressions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllOf(pub Vec<Expression>);

/// Item of an [`AnyOf`] disjunction
#[derive(Debug, Clone, PartialEq)]
pub enum AnyItem {
    Expr(Expression),
    All(AllOf),
}

/// Disjunction of matches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnyOf(pub Vec<AnyItem>);

/// One conjunct of a target
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Expr(Expression),
    Any(AnyOf),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
    pub clauses: Vec<Clause>,
}

impl Target {
    /// Target that matches every request
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Single-expression target
    pub fn expr(expr: Expression) -> Self {
        Self {
            clauses: vec![Clause::Expr(expr)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}
