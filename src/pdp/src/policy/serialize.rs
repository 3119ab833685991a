//! Re-serialization of a tree into the document vocabulary
//!
//! Output always spells tags in lower case and includes every optional part
//! that differs from its default, so parsing it again yields an equal tree.

use serde_json::{Map, Value};

use super::{
    CombiningAlgorithm, Obligation, Policy, PolicyNode, PolicySet, PolicyTree, Rule, MAPPER,
};
use crate::attribute::value_to_json;
use crate::expr::{AnyItem, Clause, Expression, Target};
use crate::parser::tags;

impl PolicyTree {
    /// Serialize the tree as a policy document
    pub fn to_document(&self) -> Value {
        let attributes: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(id, ty)| (id.clone(), Value::String(ty.to_string())))
            .collect();

        let mut doc = Map::new();
        doc.insert(tags::ATTRIBUTES.into(), Value::Object(attributes));
        doc.insert(tags::POLICIES.into(), node_to_json(&self.root));
        Value::Object(doc)
    }

    /// Serialize the tree as document bytes
    pub fn to_document_bytes(&self) -> Vec<u8> {
        self.to_document().to_string().into_bytes()
    }
}

fn node_to_json(node: &PolicyNode) -> Value {
    match node {
        PolicyNode::Policy(policy) => policy_to_json(policy),
        PolicyNode::PolicySet(set) => set_to_json(set),
    }
}

fn common(
    id: Option<&str>,
    target: &Target,
    algorithm: &CombiningAlgorithm,
    children: &[Option<&str>],
) -> Map<String, Value> {
    let mut obj = Map::new();
    if let Some(id) = id {
        obj.insert(tags::ID.into(), Value::String(id.to_string()));
    }
    if !target.is_empty() {
        obj.insert(tags::TARGET.into(), target_to_json(target));
    }
    obj.insert(tags::ALG.into(), algorithm_to_json(algorithm, children));
    obj
}

fn policy_to_json(policy: &Policy) -> Value {
    let children: Vec<Option<&str>> = policy.rules.iter().map(|r| r.id.as_deref()).collect();
    let mut obj = common(policy.id.as_deref(), &policy.target, &policy.algorithm, &children);
    obj.insert(
        tags::RULES.into(),
        Value::Array(policy.rules.iter().map(rule_to_json).collect()),
    );
    insert_obligations(&mut obj, &policy.obligations);
    Value::Object(obj)
}

fn set_to_json(set: &PolicySet) -> Value {
    let children: Vec<Option<&str>> = set.policies.iter().map(PolicyNode::id).collect();
    let mut obj = common(set.id.as_deref(), &set.target, &set.algorithm, &children);
    obj.insert(
        tags::POLICIES.into(),
        Value::Array(set.policies.iter().map(node_to_json).collect()),
    );
    insert_obligations(&mut obj, &set.obligations);
    Value::Object(obj)
}

fn rule_to_json(rule: &Rule) -> Value {
    let mut obj = Map::new();
    if let Some(id) = &rule.id {
        obj.insert(tags::ID.into(), Value::String(id.clone()));
    }
    if !rule.target.is_empty() {
        obj.insert(tags::TARGET.into(), target_to_json(&rule.target));
    }
    if let Some(condition) = &rule.condition {
        obj.insert(tags::CONDITION.into(), expression_to_json(condition));
    }
    obj.insert(tags::EFFECT.into(), Value::String(rule.effect.as_str().into()));
    insert_obligations(&mut obj, &rule.obligations);
    Value::Object(obj)
}

fn algorithm_to_json(algorithm: &CombiningAlgorithm, children: &[Option<&str>]) -> Value {
    match algorithm {
        CombiningAlgorithm::Standard(kind) => Value::String(kind.name().into()),
        CombiningAlgorithm::Mapper(mapper) => {
            let child = |index: Option<usize>| {
                index
                    .and_then(|i| children.get(i).copied().flatten())
                    .map(|id| Value::String(id.to_string()))
            };

            let mut obj = Map::new();
            obj.insert(tags::ID.into(), Value::String(MAPPER.into()));
            obj.insert(tags::MAP.into(), expression_to_json(&mapper.selector));
            if let Some(default) = child(mapper.default) {
                obj.insert(tags::DEFAULT.into(), default);
            }
            if let Some(on_error) = child(mapper.on_error) {
                obj.insert(tags::ERROR.into(), on_error);
            }
            obj.insert(tags::MISSING.into(), Value::String(mapper.missing.as_str().into()));
            obj.insert(tags::ALG.into(), Value::String(mapper.algorithm.name().into()));
            Value::Object(obj)
        }
    }
}

fn insert_obligations(obj: &mut Map<String, Value>, obligations: &[Obligation]) {
    if obligations.is_empty() {
        return;
    }
    let items = obligations
        .iter()
        .map(|o| single(&o.attribute, expression_to_json(&o.expression)))
        .collect();
    obj.insert(tags::OBLIGATIONS.into(), Value::Array(items));
}

fn target_to_json(target: &Target) -> Value {
    let clauses = target
        .clauses
        .iter()
        .map(|clause| match clause {
            Clause::Expr(expr) => expression_to_json(expr),
            Clause::Any(any) => {
                let items: Vec<Value> = any
                    .0
                    .iter()
                    .map(|item| match item {
                        AnyItem::Expr(expr) => expression_to_json(expr),
                        AnyItem::All(all) => single(
                            tags::ALL,
                            Value::Array(all.0.iter().map(expression_to_json).collect()),
                        ),
                    })
                    .collect();
                single(tags::ANY, Value::Array(items))
            }
        })
        .collect();
    Value::Array(clauses)
}

fn single(key: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), value);
    Value::Object(obj)
}

/// Serialize a single expression
pub fn expression_to_json(expr: &Expression) -> Value {
    match expr {
        Expression::Literal(value) => {
            let mut literal = Map::new();
            literal.insert(tags::TYPE.into(), Value::String(value.attribute_type().to_string()));
            literal.insert(tags::CONTENT.into(), value_to_json(value));
            single(tags::VAL, Value::Object(literal))
        }
        Expression::Designator(d) => single(tags::ATTR, Value::String(d.id.clone())),
        Expression::Apply(apply) => single(
            apply.function.name(),
            Value::Array(apply.args.iter().map(expression_to_json).collect()),
        ),
    }
}
