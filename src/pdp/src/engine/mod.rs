//! Policy evaluation engine
//!
//! Walks a [`PolicyTree`] for one [`EvaluationSession`] and produces a
//! [`Decision`].
//!
//! # Architecture
//!
//! ```text
//! PolicyNode ──target──► combine(children) ──► Outcome ──► ... ──► root
//!                                                                    │
//!                                     obligations of the winning chain
//!                                                                    ▼
//!                                                                 Decision
//! ```
//!
//! Targets are checked before anything beneath a node is touched. Obligation
//! expressions are only collected on the way up and are evaluated once, at
//! the root, for the branch that produced the final effect.

pub mod combining;
pub mod decision;
pub mod metrics;

pub use decision::{Decision, Effect, IndeterminateReason, ObligationValue};
pub use metrics::{EngineMetrics, MetricsCollector};

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, trace};

use crate::error::{ErrorKind, EvalError};
use crate::expr::Target;
use crate::policy::{
    CombiningAlgorithm, Obligation, PolicyEffect, PolicyNode, PolicyTree, Rule, HIDDEN_NODE,
};
use crate::session::EvaluationSession;

impl From<PolicyEffect> for Effect {
    fn from(effect: PolicyEffect) -> Self {
        match effect {
            PolicyEffect::Permit => Effect::Permit,
            PolicyEffect::Deny => Effect::Deny,
        }
    }
}

/// Obligations of one node waiting to be evaluated
#[derive(Debug, Clone)]
pub(crate) struct Pending<'t> {
    /// Owning node first, then its ancestors
    pub path: Vec<&'t str>,
    pub obligations: &'t [Obligation],
}

/// Evaluation error with the ids of the nodes it passed through
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    pub error: EvalError,
    /// Innermost node first
    pub path: Vec<String>,
}

impl Failure {
    pub fn new(error: EvalError) -> Self {
        Self {
            error,
            path: Vec::new(),
        }
    }
}

/// Result of evaluating one node
#[derive(Debug)]
pub(crate) enum Outcome<'t> {
    NotApplicable,
    Decided {
        effect: PolicyEffect,
        obligations: Vec<Pending<'t>>,
    },
    Indeterminate(Failure),
}

impl<'t> Outcome<'t> {
    pub fn failed(error: EvalError) -> Self {
        Outcome::Indeterminate(Failure::new(error))
    }

    pub fn effect(&self) -> Effect {
        match self {
            Outcome::NotApplicable => Effect::NotApplicable,
            Outcome::Decided { effect, .. } => (*effect).into(),
            Outcome::Indeterminate(_) => Effect::Indeterminate,
        }
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Outcome::NotApplicable)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Indeterminate(f) if f.error == EvalError::Cancelled)
    }

    /// Record that the outcome passed through `node`
    fn through(mut self, node: &'t str, obligations: &'t [Obligation]) -> Self {
        match &mut self {
            Outcome::NotApplicable => {}
            Outcome::Decided { obligations: pending, .. } => {
                for p in pending.iter_mut() {
                    p.path.push(node);
                }
                if !obligations.is_empty() {
                    pending.push(Pending {
                        path: vec![node],
                        obligations,
                    });
                }
            }
            Outcome::Indeterminate(failure) => failure.path.push(node.to_string()),
        }
        self
    }
}

/// A node that can be evaluated against a session
pub(crate) trait Evaluable: Send + Sync {
    fn id(&self) -> Option<&str>;

    fn label(&self) -> &str {
        self.id().unwrap_or(HIDDEN_NODE)
    }

    fn evaluate<'t>(&'t self, session: &'t EvaluationSession) -> BoxFuture<'t, Outcome<'t>>;
}

impl Evaluable for Rule {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn evaluate<'t>(&'t self, session: &'t EvaluationSession) -> BoxFuture<'t, Outcome<'t>> {
        async move {
            let label = self.label();
            match self.target.matches(session).await {
                Ok(true) => {}
                Ok(false) => return Outcome::NotApplicable,
                Err(error) => return Outcome::failed(error).through(label, &[]),
            }

            if let Some(condition) = &self.condition {
                match condition.evaluate_bool(session).await {
                    Ok(true) => {}
                    Ok(false) => return Outcome::NotApplicable,
                    Err(error) => return Outcome::failed(error).through(label, &[]),
                }
            }

            Outcome::Decided {
                effect: self.effect,
                obligations: Vec::new(),
            }
            .through(label, &self.obligations)
        }
        .boxed()
    }
}

async fn evaluate_container<'t, C: Evaluable>(
    label: &'t str,
    target: &'t Target,
    algorithm: &'t CombiningAlgorithm,
    children: &'t [C],
    obligations: &'t [Obligation],
    session: &'t EvaluationSession,
) -> Outcome<'t> {
    match target.matches(session).await {
        Ok(true) => {}
        Ok(false) => return Outcome::NotApplicable,
        Err(error) => return Outcome::failed(error).through(label, &[]),
    }

    let outcome = combining::combine(algorithm, children, session).await;
    trace!(node = label, effect = %outcome.effect(), "Combined children");
    outcome.through(label, obligations)
}

impl Evaluable for PolicyNode {
    fn id(&self) -> Option<&str> {
        PolicyNode::id(self)
    }

    fn evaluate<'t>(&'t self, session: &'t EvaluationSession) -> BoxFuture<'t, Outcome<'t>> {
        let label = self.label();
        match self {
            PolicyNode::Policy(policy) => evaluate_container(
                label,
                &policy.target,
                &policy.algorithm,
                &policy.rules,
                &policy.obligations,
                session,
            )
            .boxed(),
            PolicyNode::PolicySet(set) => evaluate_container(
                label,
                &set.target,
                &set.algorithm,
                &set.policies,
                &set.obligations,
                session,
            )
            .boxed(),
        }
    }
}

impl PolicyTree {
    /// Evaluate the tree and resolve the winning branch's obligations
    ///
    /// A session cancelled at any point yields an Indeterminate decision,
    /// never the effect computed before or after the cancellation.
    pub async fn evaluate(&self, session: &EvaluationSession) -> Decision {
        let decision = self.evaluate_uncancelled(session).await;
        let reported = decision.reason.as_ref().map(|r| r.kind);
        if session.is_cancelled() && reported != Some(ErrorKind::Cancelled) {
            let mut failure = Failure::new(EvalError::Cancelled);
            failure.path.push(self.root.label().to_string());
            return indeterminate(failure);
        }
        decision
    }

    async fn evaluate_uncancelled(&self, session: &EvaluationSession) -> Decision {
        let (effect, pending) = match self.root.evaluate(session).await {
            Outcome::NotApplicable => return Decision::not_applicable(),
            Outcome::Indeterminate(failure) => return indeterminate(failure),
            Outcome::Decided { effect, obligations } => (effect, obligations),
        };

        let mut values = Vec::new();
        for Pending { path, obligations } in pending {
            for obligation in obligations {
                match obligation.expression.evaluate(session).await {
                    Ok(value) => values.push(ObligationValue {
                        id: obligation.attribute.clone(),
                        value,
                    }),
                    Err(error) => {
                        return indeterminate(Failure {
                            error,
                            path: path.iter().map(|node| node.to_string()).collect(),
                        })
                    }
                }
            }
        }

        Decision::new(effect.into()).with_obligations(values)
    }
}

fn indeterminate(failure: Failure) -> Decision {
    let mut path = failure.path;
    path.reverse();
    debug!(
        kind = ?failure.error.kind(),
        path = %path.join(" > "),
        error = %failure.error,
        "Indeterminate decision"
    );
    Decision::indeterminate(&failure.error, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::request::Request;

    async fn decide(doc: &str, request: Request) -> Decision {
        let tree = parse(doc.as_bytes()).unwrap();
        tree.evaluate(&EvaluationSession::new(request)).await
    }

    #[tokio::test]
    async fn test_rule_condition_false_is_not_applicable() {
        let decision = decide(
            r#"{"attributes": {"a": "boolean"},
                "policies": {"alg": "FirstApplicableEffect", "rules": [
                    {"effect": "Deny", "condition": {"attr": "a"}}
                ]}}"#,
            Request::new().with_attribute("a", false),
        )
        .await;
        assert_eq!(decision.effect, Effect::NotApplicable);
    }

    #[tokio::test]
    async fn test_container_target_skips_children() {
        // the rule would fail on the missing attribute if it were evaluated
        let decision = decide(
            r#"{"attributes": {"a": "boolean", "missing": "boolean"},
                "policies": {"alg": "DenyOverrides", "target": [{"attr": "a"}], "rules": [
                    {"effect": "Deny", "condition": {"attr": "missing"}}
                ]}}"#,
            Request::new().with_attribute("a", false),
        )
        .await;
        assert_eq!(decision.effect, Effect::NotApplicable);
    }

    #[tokio::test]
    async fn test_indeterminate_path() {
        let decision = decide(
            r#"{"attributes": {"missing": "boolean"},
                "policies": {"id": "root", "alg": "DenyOverrides", "policies": [
                    {"id": "p", "alg": "DenyOverrides", "rules": [
                        {"id": "r", "effect": "Deny", "condition": {"attr": "missing"}}
                    ]}
                ]}}"#,
            Request::new(),
        )
        .await;

        assert_eq!(decision.effect, Effect::Indeterminate);
        let reason = decision.reason.unwrap();
        assert_eq!(reason.kind, crate::error::ErrorKind::Resolution);
        assert_eq!(reason.path, vec!["root", "p", "r"]);
    }

    #[tokio::test]
    async fn test_obligations_innermost_first() {
        let decision = decide(
            r#"{"attributes": {"o": "string"},
                "policies": {"alg": "FirstApplicableEffect",
                    "obligations": [{"o": {"val": {"type": "string", "content": "policy"}}}],
                    "rules": [
                        {"effect": "Permit",
                         "obligations": [{"o": {"val": {"type": "string", "content": "rule"}}}]}
                    ]}}"#,
            Request::new(),
        )
        .await;

        assert_eq!(decision.effect, Effect::Permit);
        let values: Vec<String> =
            decision.obligations.iter().map(|o| o.value.to_string()).collect();
        assert_eq!(values, vec!["\"rule\"", "\"policy\""]);
    }

    #[tokio::test]
    async fn test_failing_obligation_is_indeterminate() {
        let decision = decide(
            r#"{"attributes": {"o": "string", "absent": "string"},
                "policies": {"alg": "FirstApplicableEffect", "rules": [
                    {"id": "r", "effect": "Permit", "obligations": [{"o": {"attr": "absent"}}]}
                ]}}"#,
            Request::new(),
        )
        .await;

        assert_eq!(decision.effect, Effect::Indeterminate);
        assert_eq!(decision.reason.unwrap().path, vec![HIDDEN_NODE, "r"]);
    }

    #[tokio::test]
    async fn test_failing_obligation_path_from_root() {
        let doc = r#"{"attributes": {"o": "string", "absent": "string"},
            "policies": {"id": "root", "alg": "DenyOverrides", "policies": [
                {"id": "p", "alg": "FirstApplicableEffect", "rules": [
                    {"id": "r", "effect": "Permit", "obligations": [{"o": {"attr": "absent"}}]}
                ]}
            ]}}"#;
        let decision = decide(doc, Request::new()).await;
        let reason = decision.reason.unwrap();
        assert_eq!(reason.kind, crate::error::ErrorKind::Resolution);
        assert_eq!(reason.path, vec!["root", "p", "r"]);

        let doc = r#"{"attributes": {"o": "string", "absent": "string"},
            "policies": {"id": "root", "alg": "DenyOverrides", "policies": [
                {"id": "p", "alg": "FirstApplicableEffect",
                 "obligations": [{"o": {"attr": "absent"}}],
                 "rules": [{"id": "r", "effect": "Permit"}]}
            ]}}"#;
        let decision = decide(doc, Request::new()).await;
        assert_eq!(decision.reason.unwrap().path, vec!["root", "p"]);
    }

    #[tokio::test]
    async fn test_cancelled_session_never_permits() {
        use tokio_util::sync::CancellationToken;

        let token = CancellationToken::new();
        token.cancel();
        let tree = parse(
            br#"{"policies": {"id": "root", "alg": "FirstApplicableEffect", "rules": [
                {"effect": "Permit"}
            ]}}"#,
        )
        .unwrap();
        let session = EvaluationSession::new(Request::new()).with_cancellation(token);

        let decision = tree.evaluate(&session).await;
        assert_eq!(decision.effect, Effect::Indeterminate);
        let reason = decision.reason.unwrap();
        assert_eq!(reason.kind, crate::error::ErrorKind::Cancelled);
        assert_eq!(reason.path, vec!["root"]);
    }
}
