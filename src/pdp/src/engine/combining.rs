//! Combining algorithms
//!
//! Every algorithm walks its children in document order and stops as soon
//! as the result can no longer change. The mapper narrows the children to
//! the subset named by its selector and then applies a standard algorithm.
//! A cancelled child ends every algorithm at once, whatever it would
//! otherwise do with an Indeterminate child.

use std::collections::HashSet;
use tracing::trace;

use super::{Evaluable, Failure, Outcome, Pending};
use crate::attribute::{AttributeValue, Element};
use crate::error::EvalError;
use crate::policy::{AlgorithmKind, CombiningAlgorithm, Mapper, MissingChild, PolicyEffect};
use crate::session::EvaluationSession;

/// Combine a container's children with its algorithm
pub(crate) async fn combine<'t, C: Evaluable>(
    algorithm: &'t CombiningAlgorithm,
    children: &'t [C],
    session: &'t EvaluationSession,
) -> Outcome<'t> {
    match algorithm {
        CombiningAlgorithm::Standard(kind) => combine_kind(*kind, children.iter(), session).await,
        CombiningAlgorithm::Mapper(mapper) => mapped(mapper, children, session).await,
    }
}

async fn combine_kind<'t, C, I>(
    kind: AlgorithmKind,
    children: I,
    session: &'t EvaluationSession,
) -> Outcome<'t>
where
    C: Evaluable + 't,
    I: Iterator<Item = &'t C> + Send,
{
    match kind {
        AlgorithmKind::FirstApplicable => first_applicable(children, session).await,
        AlgorithmKind::DenyOverrides => overrides(PolicyEffect::Deny, children, session).await,
        AlgorithmKind::PermitOverrides => overrides(PolicyEffect::Permit, children, session).await,
        AlgorithmKind::OnlyOneApplicable => only_one_applicable(children, session).await,
        AlgorithmKind::DenyUnlessPermit => unless(PolicyEffect::Permit, children, session).await,
        AlgorithmKind::PermitUnlessDeny => unless(PolicyEffect::Deny, children, session).await,
    }
}

/// First child that is not NotApplicable, Indeterminate included
async fn first_applicable<'t, C, I>(
    children: I,
    session: &'t EvaluationSession,
) -> Outcome<'t>
where
    C: Evaluable + 't,
    I: Iterator<Item = &'t C> + Send,
{
    for child in children {
        let outcome = child.evaluate(session).await;
        if !outcome.is_not_applicable() {
            trace!(child = child.label(), effect = %outcome.effect(), "First applicable child");
            return outcome;
        }
    }
    Outcome::NotApplicable
}

/// `winner` > Indeterminate > the other effect > NotApplicable
///
/// Stops at the first child producing `winner`. When the other effect wins,
/// the obligations of every child that produced it are kept in order.
async fn overrides<'t, C, I>(
    winner: PolicyEffect,
    children: I,
    session: &'t EvaluationSession,
) -> Outcome<'t>
where
    C: Evaluable + 't,
    I: Iterator<Item = &'t C> + Send,
{
    let mut other: Option<Vec<Pending<'t>>> = None;
    let mut failure: Option<Failure> = None;

    for child in children {
        let outcome = child.evaluate(session).await;
        if outcome.is_cancelled() {
            return outcome;
        }
        match outcome {
            Outcome::Decided { effect, obligations } if effect == winner => {
                trace!(child = child.label(), effect = winner.as_str(), "Overriding child");
                return Outcome::Decided { effect, obligations };
            }
            Outcome::Decided { obligations, .. } => {
                other.get_or_insert_with(Vec::new).extend(obligations);
            }
            Outcome::Indeterminate(f) => {
                if failure.is_none() {
                    failure = Some(f);
                }
            }
            Outcome::NotApplicable => {}
        }
    }

    if let Some(failure) = failure {
        return Outcome::Indeterminate(failure);
    }
    match other {
        Some(obligations) => Outcome::Decided {
            effect: winner.opposite(),
            obligations,
        },
        None => Outcome::NotApplicable,
    }
}

/// At most one child may be applicable
async fn only_one_applicable<'t, C, I>(
    children: I,
    session: &'t EvaluationSession,
) -> Outcome<'t>
where
    C: Evaluable + 't,
    I: Iterator<Item = &'t C> + Send,
{
    let mut selected: Option<(&'t str, Outcome<'t>)> = None;

    for child in children {
        let outcome = child.evaluate(session).await;
        if outcome.is_cancelled() {
            return outcome;
        }
        if outcome.is_not_applicable() {
            continue;
        }
        if let Some((first, _)) = &selected {
            return Outcome::failed(EvalError::Ambiguity {
                first: first.to_string(),
                second: child.label().to_string(),
            });
        }
        selected = Some((child.label(), outcome));
    }

    selected.map(|(_, outcome)| outcome).unwrap_or(Outcome::NotApplicable)
}

/// `winner` if any child produces it, otherwise the opposite effect
///
/// NotApplicable and Indeterminate children are never surfaced, with the
/// exception of cancellation, which always propagates.
async fn unless<'t, C, I>(
    winner: PolicyEffect,
    children: I,
    session: &'t EvaluationSession,
) -> Outcome<'t>
where
    C: Evaluable + 't,
    I: Iterator<Item = &'t C> + Send,
{
    let mut fallback: Vec<Pending<'t>> = Vec::new();

    for child in children {
        let outcome = child.evaluate(session).await;
        if outcome.is_cancelled() {
            return outcome;
        }
        match outcome {
            Outcome::Decided { effect, obligations } if effect == winner => {
                return Outcome::Decided { effect, obligations };
            }
            Outcome::Decided { obligations, .. } => fallback.extend(obligations),
            Outcome::NotApplicable | Outcome::Indeterminate(_) => {}
        }
    }

    Outcome::Decided {
        effect: winner.opposite(),
        obligations: fallback,
    }
}

enum Selection {
    /// Child indices in evaluation order
    Children(Vec<usize>),
    /// Selector produced an empty collection
    Nothing,
    /// Selector value names no child
    Missing(String),
}

fn select(mapper: &Mapper, value: &AttributeValue) -> Selection {
    let lookup = |element: &Element| match element {
        Element::String(key) => mapper.index.get(key).copied(),
        _ => None,
    };

    let selected = match value {
        AttributeValue::String(key) => match mapper.index.get(key) {
            Some(&i) => return Selection::Children(vec![i]),
            None => return Selection::Missing(key.clone()),
        },
        _ if value.attribute_type().is_collection() && value.is_empty() == Some(true) => {
            return Selection::Nothing
        }
        AttributeValue::Set(_, items) => {
            let mut indices: Vec<usize> = items.iter().filter_map(lookup).collect();
            indices.sort_unstable();
            indices.dedup();
            indices
        }
        AttributeValue::List(_, items) => {
            let mut seen = HashSet::new();
            items
                .iter()
                .filter_map(lookup)
                .filter(|i| seen.insert(*i))
                .collect()
        }
        other => return Selection::Missing(other.to_string()),
    };

    if selected.is_empty() {
        Selection::Missing(value.to_string())
    } else {
        Selection::Children(selected)
    }
}

async fn mapped<'t, C: Evaluable>(
    mapper: &'t Mapper,
    children: &'t [C],
    session: &'t EvaluationSession,
) -> Outcome<'t> {
    let selection = match mapper.selector.evaluate(session).await {
        Ok(value) => select(mapper, &value),
        Err(EvalError::Cancelled) => return Outcome::failed(EvalError::Cancelled),
        Err(error) => match mapper.on_error {
            Some(i) => Selection::Children(vec![i]),
            None => return Outcome::failed(error),
        },
    };

    let indices = match selection {
        Selection::Children(indices) => indices,
        Selection::Nothing => return Outcome::NotApplicable,
        Selection::Missing(value) => match (mapper.default, mapper.missing) {
            (Some(i), _) => vec![i],
            (None, MissingChild::NotApplicable) => return Outcome::NotApplicable,
            (None, MissingChild::Indeterminate) => {
                return Outcome::failed(EvalError::MissingChild { value })
            }
        },
    };

    trace!(?indices, algorithm = %mapper.algorithm, "Mapper selected children");
    let selected: Vec<&'t C> = indices.iter().filter_map(|&i| children.get(i)).collect();
    combine_kind(mapper.algorithm, selected.into_iter(), session).await
}
