//! Expression and target evaluation
//!
//! Arguments are evaluated left to right and the first error aborts the call.
//! `and` stops at the first false operand and `or` at the first true one;
//! operands after the stopping point are never evaluated, so they cannot
//! trigger attribute resolution.

use futures::future::{BoxFuture, FutureExt};

use super::target::{AnyItem, Clause, Target};
use super::{Apply, Expression, Function};
use crate::attribute::AttributeValue;
use crate::error::EvalError;
use crate::session::EvaluationSession;

fn expect_bool(value: AttributeValue, function: &'static str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::function(
            function,
            format!("expected boolean operand but got {}", value.attribute_type()),
        )
    })
}

impl Expression {
    /// Evaluate the expression within a session
    pub fn evaluate<'a>(
        &'a self,
        session: &'a EvaluationSession,
    ) -> BoxFuture<'a, Result<AttributeValue, EvalError>> {
        async move {
            match self {
                Expression::Literal(value) => Ok(value.clone()),
                Expression::Designator(designator) => session.resolve(designator).await,
                Expression::Apply(apply) => apply.evaluate(session).await,
            }
        }
        .boxed()
    }

    /// Evaluate a boolean expression
    pub async fn evaluate_bool(&self, session: &EvaluationSession) -> Result<bool, EvalError> {
        let value = self.evaluate(session).await?;
        expect_bool(value, "condition")
    }
}

impl Apply {
    async fn evaluate(&self, session: &EvaluationSession) -> Result<AttributeValue, EvalError> {
        match self.function {
            Function::And => {
                for arg in &self.args {
                    let value = arg.evaluate(session).await?;
                    if !expect_bool(value, "and")? {
                        return Ok(AttributeValue::Boolean(false));
                    }
                }
                Ok(AttributeValue::Boolean(true))
            }
            Function::Or => {
                for arg in &self.args {
                    let value = arg.evaluate(session).await?;
                    if expect_bool(value, "or")? {
                        return Ok(AttributeValue::Boolean(true));
                    }
                }
                Ok(AttributeValue::Boolean(false))
            }
            function => {
                let mut values = Vec::with_capacity(self.args.len());
                for arg in &self.args {
                    values.push(arg.evaluate(session).await?);
                }
                function.apply(&values)
            }
        }
    }
}

impl Target {
    /// Whether the target matches the session's request
    ///
    /// Clauses are checked in order and evaluation stops at the first
    /// clause that does not match or fails.
    pub async fn matches(&self, session: &EvaluationSession) -> Result<bool, EvalError> {
        for clause in &self.clauses {
            let matched = match clause {
                Clause::Expr(expr) => expr.evaluate_bool(session).await?,
                Clause::Any(any) => {
                    let mut matched = false;
                    for item in &any.0 {
                        let item_matched = match item {
                            AnyItem::Expr(expr) => expr.evaluate_bool(session).await?,
                            AnyItem::All(all) => {
                                let mut all_matched = true;
                                for expr in &all.0 {
                                    if !expr.evaluate_bool(session).await? {
                                        all_matched = false;
                                        break;
                                    }
                                }
                                all_matched
                            }
                        };
                        if item_matched {
                            matched = true;
                            break;
                        }
                    }
                    matched
                }
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::expr::{AllOf, AnyOf};
    use crate::request::Request;

    fn boolean(id: &str) -> Expression {
        Expression::designator(id, AttributeType::Boolean)
    }

    fn call(function: Function, args: Vec<Expression>) -> Expression {
        Expression::apply(function, args).unwrap()
    }

    #[tokio::test]
    async fn test_and_short_circuits_before_missing_attribute() {
        let session = EvaluationSession::new(Request::new());
        let expr = call(
            Function::And,
            vec![Expression::literal(false), boolean("absent")],
        );
        assert_eq!(expr.evaluate(&session).await.unwrap(), AttributeValue::Boolean(false));
    }

    #[tokio::test]
    async fn test_or_short_circuits() {
        let session = EvaluationSession::new(Request::new());
        let expr = call(Function::Or, vec![Expression::literal(true), boolean("absent")]);
        assert_eq!(expr.evaluate(&session).await.unwrap(), AttributeValue::Boolean(true));
    }

    #[tokio::test]
    async fn test_errors_propagate_from_arguments() {
        let session = EvaluationSession::new(Request::new());
        let expr = call(Function::And, vec![boolean("absent"), Expression::literal(false)]);
        assert!(matches!(
            expr.evaluate(&session).await,
            Err(EvalError::Resolution { .. })
        ));

        let division = call(
            Function::Divide,
            vec![Expression::literal(10_i64), Expression::literal(0_i64)],
        );
        let expr = call(Function::Equal, vec![division, Expression::literal(1_i64)]);
        assert!(matches!(
            expr.evaluate(&session).await,
            Err(EvalError::Function { function: "divide", .. })
        ));
    }

    #[tokio::test]
    async fn test_target_clauses() {
        let session = EvaluationSession::new(
            Request::new()
                .with_attribute("a", true)
                .with_attribute("b", false),
        );

        assert!(Target::any().matches(&session).await.unwrap());
        assert!(!Target::expr(boolean("b")).matches(&session).await.unwrap());

        let any = Target::new(vec![Clause::Any(AnyOf(vec![
            AnyItem::Expr(boolean("b")),
            AnyItem::All(AllOf(vec![boolean("a"), Expression::literal(true)])),
        ]))]);
        assert!(any.matches(&session).await.unwrap());

        // the second clause is never reached
        let first_fails =
            Target::new(vec![Clause::Expr(boolean("b")), Clause::Expr(boolean("absent"))]);
        assert!(!first_fails.matches(&session).await.unwrap());
    }
}
