//! Policy nodes, rules, combining algorithms and obligations

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use std::collections::HashSet;
use std::fmt;

use super::expression::{BooleanSeed, ExpressionSeed, TargetSeed};
use super::{set_once, tags, ParseContext};
use crate::expr::{Expression, Target};
use crate::policy::{
    AlgorithmKind, CombiningAlgorithm, MapperSpec, MissingChild, Obligation, Policy, PolicyEffect,
    PolicyNode, PolicySet, Rule, MAPPER,
};

/// Anything that may carry a sibling-unique id
trait Identified {
    fn ident(&self) -> Option<&str>;
}

impl Identified for Rule {
    fn ident(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl Identified for PolicyNode {
    fn ident(&self) -> Option<&str> {
        self.id()
    }
}

/// Array of children with sibling id uniqueness
struct ChildrenSeed<S> {
    seed: S,
}

impl<'de, S, T> DeserializeSeed<'de> for ChildrenSeed<S>
where
    S: Copy + DeserializeSeed<'de, Value = T> + Ctx,
    T: Identified,
{
    type Value = Vec<T>;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Vec<T>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, S, T> Visitor<'de> for ChildrenSeed<S>
where
    S: Copy + DeserializeSeed<'de, Value = T> + Ctx,
    T: Identified,
{
    type Value = Vec<T>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of child nodes")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<T>, A::Error> {
        let ctx = self.seed.ctx();
        let mut children: Vec<T> = Vec::new();
        let mut ids: HashSet<String> = HashSet::new();

        loop {
            ctx.enter_index(children.len());
            let Some(child) = seq.next_element_seed(self.seed)? else {
                ctx.leave();
                return Ok(children);
            };
            if let Some(id) = child.ident() {
                if !ids.insert(id.to_string()) {
                    return Err(ctx.type_error(format!("duplicate sibling id \"{id}\"")));
                }
            }
            children.push(child);
            ctx.leave();
        }
    }
}

/// Access to the parse context from a copyable seed
trait Ctx {
    fn ctx(&self) -> &ParseContext;
}

/// Algorithm as written, bound to children once they are known
enum AlgorithmSpec {
    Standard(AlgorithmKind),
    Mapper(MapperSpec),
}

#[derive(Clone, Copy)]
pub(crate) struct NodeSeed<'c> {
    pub ctx: &'c ParseContext,
    pub depth: usize,
}

impl Ctx for NodeSeed<'_> {
    fn ctx(&self) -> &ParseContext {
        self.ctx
    }
}

impl<'de, 'c> DeserializeSeed<'de> for NodeSeed<'c> {
    type Value = PolicyNode;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<PolicyNode, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for NodeSeed<'c> {
    type Value = PolicyNode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a policy or policy set object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PolicyNode, A::Error> {
        let ctx = self.ctx;
        if self.depth > ctx.max_depth() {
            return Err(ctx.schema(format!(
                "policy nesting exceeds the maximum depth of {}",
                ctx.max_depth()
            )));
        }

        let mut id: Option<String> = None;
        let mut target: Option<Target> = None;
        let mut algorithm: Option<AlgorithmSpec> = None;
        let mut rules: Option<Vec<Rule>> = None;
        let mut policies: Option<Vec<PolicyNode>> = None;
        let mut obligations: Option<Vec<Obligation>> = None;

        while let Some(key) = map.next_key::<String>()? {
            let tag = key.to_ascii_lowercase();
            ctx.enter(&key);
            match tag.as_str() {
                tags::ID => {
                    let value: String = map.next_value()?;
                    set_once::<_, A::Error>(ctx, &mut id, &key, value)?;
                }
                tags::TARGET => {
                    let value = map.next_value_seed(TargetSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut target, &key, value)?;
                }
                tags::ALG => {
                    let value = map.next_value_seed(AlgorithmSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut algorithm, &key, value)?;
                }
                tags::RULES => {
                    let value = map.next_value_seed(ChildrenSeed {
                        seed: RuleSeed { ctx },
                    })?;
                    set_once::<_, A::Error>(ctx, &mut rules, &key, value)?;
                }
                tags::POLICIES => {
                    let value = map.next_value_seed(ChildrenSeed {
                        seed: NodeSeed {
                            ctx,
                            depth: self.depth + 1,
                        },
                    })?;
                    set_once::<_, A::Error>(ctx, &mut policies, &key, value)?;
                }
                tags::OBLIGATIONS => {
                    let value = map.next_value_seed(ObligationsSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut obligations, &key, value)?;
                }
                _ => {
                    ctx.leave();
                    return Err(ctx.unknown_tag(&key));
                }
            }
            ctx.leave();
        }

        let spec = algorithm.ok_or_else(|| ctx.schema::<A::Error>("missing tag \"alg\""))?;
        let target = target.unwrap_or_default();
        let obligations = obligations.unwrap_or_default();

        match (rules, policies) {
            (Some(rules), None) => {
                let algorithm = bind::<A::Error>(ctx, spec, rules.iter().map(|r| r.id.as_deref()))?;
                Ok(PolicyNode::Policy(Policy {
                    id,
                    target,
                    algorithm,
                    rules,
                    obligations,
                }))
            }
            (None, Some(policies)) => {
                let algorithm = bind::<A::Error>(ctx, spec, policies.iter().map(PolicyNode::id))?;
                Ok(PolicyNode::PolicySet(PolicySet {
                    id,
                    target,
                    algorithm,
                    policies,
                    obligations,
                }))
            }
            (Some(_), Some(_)) => Err(ctx.schema("node has both \"rules\" and \"policies\"")),
            (None, None) => Err(ctx.schema("node has neither \"rules\" nor \"policies\"")),
        }
    }
}

/// Resolve the algorithm once the children's ids are known
fn bind<'a, E: de::Error>(
    ctx: &ParseContext,
    spec: AlgorithmSpec,
    children: impl IntoIterator<Item = Option<&'a str>>,
) -> Result<CombiningAlgorithm, E> {
    let mapper = match spec {
        AlgorithmSpec::Standard(kind) => return Ok(CombiningAlgorithm::Standard(kind)),
        AlgorithmSpec::Mapper(spec) => spec.bind(children, ctx.mapper_missing()),
    };
    match mapper {
        Ok(mapper) => Ok(CombiningAlgorithm::Mapper(Box::new(mapper))),
        Err(message) => {
            ctx.enter(tags::ALG);
            Err(ctx.type_error(message))
        }
    }
}

#[derive(Clone, Copy)]
struct RuleSeed<'c> {
    ctx: &'c ParseContext,
}

impl Ctx for RuleSeed<'_> {
    fn ctx(&self) -> &ParseContext {
        self.ctx
    }
}

impl<'de, 'c> DeserializeSeed<'de> for RuleSeed<'c> {
    type Value = Rule;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Rule, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for RuleSeed<'c> {
    type Value = Rule;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a rule object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Rule, A::Error> {
        let ctx = self.ctx;
        let mut id: Option<String> = None;
        let mut target: Option<Target> = None;
        let mut condition: Option<Expression> = None;
        let mut effect: Option<PolicyEffect> = None;
        let mut obligations: Option<Vec<Obligation>> = None;

        while let Some(key) = map.next_key::<String>()? {
            let tag = key.to_ascii_lowercase();
            ctx.enter(&key);
            match tag.as_str() {
                tags::ID => {
                    let value: String = map.next_value()?;
                    set_once::<_, A::Error>(ctx, &mut id, &key, value)?;
                }
                tags::TARGET => {
                    let value = map.next_value_seed(TargetSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut target, &key, value)?;
                }
                tags::CONDITION => {
                    let value = map.next_value_seed(BooleanSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut condition, &key, value)?;
                }
                tags::EFFECT => {
                    let name: String = map.next_value()?;
                    let value = PolicyEffect::parse(&name).ok_or_else(|| {
                        ctx.schema::<A::Error>(format!(
                            "unknown effect \"{name}\": expected \"Permit\" or \"Deny\""
                        ))
                    })?;
                    set_once::<_, A::Error>(ctx, &mut effect, &key, value)?;
                }
                tags::OBLIGATIONS => {
                    let value = map.next_value_seed(ObligationsSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut obligations, &key, value)?;
                }
                _ => {
                    ctx.leave();
                    return Err(ctx.unknown_tag(&key));
                }
            }
            ctx.leave();
        }

        let effect = effect.ok_or_else(|| ctx.schema::<A::Error>("rule is missing \"effect\""))?;

        Ok(Rule {
            id,
            target: target.unwrap_or_default(),
            condition,
            effect,
            obligations: obligations.unwrap_or_default(),
        })
    }
}

/// Algorithm name, or an object for the mapper
struct AlgorithmSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'c> AlgorithmSeed<'c> {
    fn standard<E: de::Error>(&self, name: &str) -> Result<AlgorithmKind, E> {
        AlgorithmKind::lookup(name)
            .ok_or_else(|| self.ctx.type_error(format!("unknown combining algorithm \"{name}\"")))
    }
}

impl<'de, 'c> DeserializeSeed<'de> for AlgorithmSeed<'c> {
    type Value = AlgorithmSpec;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<AlgorithmSpec, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'c> Visitor<'de> for AlgorithmSeed<'c> {
    type Value = AlgorithmSpec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a combining algorithm name or mapper object")
    }

    fn visit_str<E: de::Error>(self, name: &str) -> Result<AlgorithmSpec, E> {
        if name.eq_ignore_ascii_case(MAPPER) {
            return Err(self.ctx.schema("mapper algorithm requires an object with \"map\""));
        }
        self.standard(name).map(AlgorithmSpec::Standard)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AlgorithmSpec, A::Error> {
        let ctx = self.ctx;
        let mut name: Option<String> = None;
        let mut selector: Option<Expression> = None;
        let mut default: Option<String> = None;
        let mut on_error: Option<String> = None;
        let mut missing: Option<MissingChild> = None;
        let mut inner: Option<AlgorithmKind> = None;

        while let Some(key) = map.next_key::<String>()? {
            let tag = key.to_ascii_lowercase();
            ctx.enter(&key);
            match tag.as_str() {
                tags::ID => {
                    let value: String = map.next_value()?;
                    set_once::<_, A::Error>(ctx, &mut name, &key, value)?;
                }
                tags::MAP => {
                    let value = map.next_value_seed(ExpressionSeed { ctx })?;
                    set_once::<_, A::Error>(ctx, &mut selector, &key, value)?;
                }
                tags::DEFAULT => {
                    let value: String = map.next_value()?;
                    set_once::<_, A::Error>(ctx, &mut default, &key, value)?;
                }
                tags::ERROR => {
                    let value: String = map.next_value()?;
                    set_once::<_, A::Error>(ctx, &mut on_error, &key, value)?;
                }
                tags::MISSING => {
                    let value: String = map.next_value()?;
                    let parsed = MissingChild::parse(&value).ok_or_else(|| {
                        ctx.schema::<A::Error>(format!(
                            "unknown missing-child outcome \"{value}\": \
                             expected \"NotApplicable\" or \"Indeterminate\""
                        ))
                    })?;
                    set_once::<_, A::Error>(ctx, &mut missing, &key, parsed)?;
                }
                tags::ALG => {
                    let value: String = map.next_value()?;
                    let kind = self.standard::<A::Error>(&value)?;
                    set_once::<_, A::Error>(ctx, &mut inner, &key, kind)?;
                }
                _ => {
                    ctx.leave();
                    return Err(ctx.unknown_tag(&key));
                }
            }
            ctx.leave();
        }

        let name =
            name.ok_or_else(|| ctx.schema::<A::Error>("algorithm object is missing \"id\""))?;

        if !name.eq_ignore_ascii_case(MAPPER) {
            let has_options = selector.is_some()
                || default.is_some()
                || on_error.is_some()
                || missing.is_some()
                || inner.is_some();
            if has_options {
                return Err(ctx.schema(format!("algorithm \"{name}\" takes no options")));
            }
            return self.standard(&name).map(AlgorithmSpec::Standard);
        }

        let selector = selector.ok_or_else(|| ctx.schema::<A::Error>("mapper is missing \"map\""))?;

        Ok(AlgorithmSpec::Mapper(MapperSpec {
            selector,
            default,
            on_error,
            missing,
            algorithm: inner.unwrap_or(AlgorithmKind::FirstApplicable),
        }))
    }
}

/// `[{"<attribute id>": <expression>}, ...]`
struct ObligationsSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for ObligationsSeed<'c> {
    type Value = Vec<Obligation>;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'c> Visitor<'de> for ObligationsSeed<'c> {
    type Value = Vec<Obligation>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of obligation objects")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let ctx = self.ctx;
        let mut obligations = Vec::new();
        loop {
            ctx.enter_index(obligations.len());
            match seq.next_element_seed(ObligationSeed { ctx })? {
                Some(obligation) => obligations.push(obligation),
                None => {
                    ctx.leave();
                    return Ok(obligations);
                }
            }
            ctx.leave();
        }
    }
}

struct ObligationSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for ObligationSeed<'c> {
    type Value = Obligation;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Obligation, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for ObligationSeed<'c> {
    type Value = Obligation;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an obligation object with a single attribute id")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Obligation, A::Error> {
        let ctx = self.ctx;
        let attribute = map
            .next_key::<String>()?
            .ok_or_else(|| ctx.schema::<A::Error>("empty obligation object"))?;

        ctx.enter(&attribute);
        let declared = ctx.declared(&attribute).ok_or_else(|| {
            ctx.type_error::<A::Error>(format!("undeclared obligation attribute \"{attribute}\""))
        })?;
        let expression = map.next_value_seed(ExpressionSeed { ctx })?;
        if expression.ty() != declared {
            return Err(ctx.type_error(format!(
                "obligation \"{attribute}\" is declared as {declared} but assigned {}",
                expression.ty()
            )));
        }
        ctx.leave();

        if let Some(extra) = map.next_key::<String>()? {
            ctx.enter(&extra);
            return Err(ctx.schema("an obligation object has exactly one attribute id"));
        }

        Ok(Obligation {
            attribute,
            expression,
        })
    }
}
