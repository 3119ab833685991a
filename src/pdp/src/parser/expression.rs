//! Expressions and targets
//!
//! An expression is a single-key object: `{"attr": id}`, `{"val": {...}}` or
//! `{"<function>": [args]}`. Target clauses reuse the same dispatch and add
//! the `any` and `all` combinators.

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;

use super::{set_once, tags, ParseContext};
use crate::attribute::{coerce, AttributeType};
use crate::expr::{AllOf, AnyItem, AnyOf, Clause, Expression, Function, Target};

/// Decode the value of an expression whose key has already been read
fn expression_for_key<'de, A: MapAccess<'de>>(
    ctx: &ParseContext,
    key: &str,
    map: &mut A,
) -> Result<Expression, A::Error> {
    ctx.enter(key);

    let expr = if key.eq_ignore_ascii_case(tags::ATTR) {
        let id: String = map.next_value()?;
        let ty = ctx
            .declared(&id)
            .ok_or_else(|| ctx.type_error::<A::Error>(format!("undeclared attribute \"{id}\"")))?;
        Expression::designator(id, ty)
    } else if key.eq_ignore_ascii_case(tags::VAL) {
        map.next_value_seed(LiteralSeed { ctx })?
    } else {
        let function = Function::lookup(key)
            .ok_or_else(|| ctx.schema::<A::Error>(format!("unknown tag \"{key}\"")))?;
        let args = map.next_value_seed(ArgsSeed { ctx })?;
        Expression::apply(function, args).map_err(|e| ctx.type_error::<A::Error>(e))?
    };

    ctx.leave();
    Ok(expr)
}

/// Reject anything after the single key of an expression object
fn expect_end<'de, A: MapAccess<'de>>(ctx: &ParseContext, map: &mut A) -> Result<(), A::Error> {
    match map.next_key::<String>()? {
        Some(extra) => {
            ctx.enter(&extra);
            Err(ctx.schema(format!(
                "unexpected tag \"{extra}\": an expression has exactly one tag"
            )))
        }
        None => Ok(()),
    }
}

fn first_key<'de, A: MapAccess<'de>>(ctx: &ParseContext, map: &mut A) -> Result<String, A::Error> {
    map.next_key::<String>()?
        .ok_or_else(|| ctx.schema("empty expression object"))
}

pub(crate) struct ExpressionSeed<'c> {
    pub ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for ExpressionSeed<'c> {
    type Value = Expression;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Expression, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for ExpressionSeed<'c> {
    type Value = Expression;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an expression object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Expression, A::Error> {
        let key = first_key(self.ctx, &mut map)?;
        let expr = expression_for_key(self.ctx, &key, &mut map)?;
        expect_end(self.ctx, &mut map)?;
        Ok(expr)
    }
}

/// Boolean expression; anything else is a type error
pub(crate) struct BooleanSeed<'c> {
    pub ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for BooleanSeed<'c> {
    type Value = Expression;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Expression, D::Error> {
        let expr = ExpressionSeed { ctx: self.ctx }.deserialize(deserializer)?;
        check_boolean(self.ctx, expr)
    }
}

fn check_boolean<E: de::Error>(ctx: &ParseContext, expr: Expression) -> Result<Expression, E> {
    if expr.ty() != AttributeType::Boolean {
        return Err(ctx.type_error(format!("expected boolean expression but got {}", expr.ty())));
    }
    Ok(expr)
}

struct ArgsSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for ArgsSeed<'c> {
    type Value = Vec<Expression>;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'c> Visitor<'de> for ArgsSeed<'c> {
    type Value = Vec<Expression>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of argument expressions")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let ctx = self.ctx;
        let mut args = Vec::new();
        loop {
            ctx.enter_index(args.len());
            match seq.next_element_seed(ExpressionSeed { ctx })? {
                Some(arg) => args.push(arg),
                None => {
                    ctx.leave();
                    return Ok(args);
                }
            }
            ctx.leave();
        }
    }
}

/// `{"type": "<tag>", "content": <json>}`
///
/// Content may precede the type, so it is buffered until both are known.
struct LiteralSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for LiteralSeed<'c> {
    type Value = Expression;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Expression, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for LiteralSeed<'c> {
    type Value = Expression;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a literal value object with type and content")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Expression, A::Error> {
        let ctx = self.ctx;
        let mut tag: Option<String> = None;
        let mut content: Option<Value> = None;

        while let Some(key) = map.next_key::<String>()? {
            ctx.enter(&key);
            if key.eq_ignore_ascii_case(tags::TYPE) {
                let value: String = map.next_value()?;
                set_once::<_, A::Error>(ctx, &mut tag, &key, value)?;
            } else if key.eq_ignore_ascii_case(tags::CONTENT) {
                let value: Value = map.next_value()?;
                set_once::<_, A::Error>(ctx, &mut content, &key, value)?;
            } else {
                ctx.leave();
                return Err(ctx.unknown_tag(&key));
            }
            ctx.leave();
        }

        let tag = tag.ok_or_else(|| ctx.schema::<A::Error>("literal is missing \"type\""))?;
        let content =
            content.ok_or_else(|| ctx.schema::<A::Error>("literal is missing \"content\""))?;

        let ty: AttributeType = tag
            .parse()
            .map_err(|e| ctx.type_error::<A::Error>(format!("{e}")))?;
        let value = coerce(ty, &content)
            .map_err(|e| ctx.type_error::<A::Error>(format!("malformed {ty} literal: {e}")))?;

        Ok(Expression::Literal(value))
    }
}

/// `[clause, ...]`
pub(crate) struct TargetSeed<'c> {
    pub ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for TargetSeed<'c> {
    type Value = Target;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Target, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'c> Visitor<'de> for TargetSeed<'c> {
    type Value = Target;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of target clauses")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Target, A::Error> {
        let ctx = self.ctx;
        let mut clauses = Vec::new();
        loop {
            ctx.enter_index(clauses.len());
            match seq.next_element_seed(ClauseSeed { ctx })? {
                Some(clause) => clauses.push(clause),
                None => {
                    ctx.leave();
                    return Ok(Target::new(clauses));
                }
            }
            ctx.leave();
        }
    }
}

/// Boolean expression or `{"any": [...]}`
struct ClauseSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for ClauseSeed<'c> {
    type Value = Clause;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Clause, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for ClauseSeed<'c> {
    type Value = Clause;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean expression or an \"any\" clause")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Clause, A::Error> {
        let ctx = self.ctx;
        let key = first_key(ctx, &mut map)?;

        let clause = if key.eq_ignore_ascii_case(tags::ANY) {
            ctx.enter(&key);
            let items = map.next_value_seed(AnySeed { ctx })?;
            ctx.leave();
            Clause::Any(items)
        } else {
            let expr = expression_for_key(ctx, &key, &mut map)?;
            Clause::Expr(check_boolean::<A::Error>(ctx, expr)?)
        };

        expect_end(ctx, &mut map)?;
        Ok(clause)
    }
}

struct AnySeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for AnySeed<'c> {
    type Value = AnyOf;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<AnyOf, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'c> Visitor<'de> for AnySeed<'c> {
    type Value = AnyOf;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of match expressions")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<AnyOf, A::Error> {
        let ctx = self.ctx;
        let mut items = Vec::new();
        loop {
            ctx.enter_index(items.len());
            match seq.next_element_seed(AnyItemSeed { ctx })? {
                Some(item) => items.push(item),
                None => {
                    ctx.leave();
                    return Ok(AnyOf(items));
                }
            }
            ctx.leave();
        }
    }
}

/// Boolean expression or `{"all": [...]}`
struct AnyItemSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for AnyItemSeed<'c> {
    type Value = AnyItem;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<AnyItem, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for AnyItemSeed<'c> {
    type Value = AnyItem;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean expression or an \"all\" clause")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AnyItem, A::Error> {
        let ctx = self.ctx;
        let key = first_key(ctx, &mut map)?;

        let item = if key.eq_ignore_ascii_case(tags::ALL) {
            ctx.enter(&key);
            let all = map.next_value_seed(AllSeed { ctx })?;
            ctx.leave();
            AnyItem::All(all)
        } else {
            let expr = expression_for_key(ctx, &key, &mut map)?;
            AnyItem::Expr(check_boolean::<A::Error>(ctx, expr)?)
        };

        expect_end(ctx, &mut map)?;
        Ok(item)
    }
}

struct AllSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for AllSeed<'c> {
    type Value = AllOf;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<AllOf, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'c> Visitor<'de> for AllSeed<'c> {
    type Value = AllOf;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of boolean expressions")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<AllOf, A::Error> {
        let ctx = self.ctx;
        let mut exprs = Vec::new();
        loop {
            ctx.enter_index(exprs.len());
            match seq.next_element_seed(BooleanSeed { ctx })? {
                Some(expr) => exprs.push(expr),
                None => {
                    ctx.leave();
                    return Ok(AllOf(exprs));
                }
            }
            ctx.leave();
        }
    }
}
