//! Document root and attribute declarations

use serde::de::{self, DeserializeSeed, MapAccess, Visitor};
use std::fmt;

use super::node::NodeSeed;
use super::{tags, ParseContext};
use crate::attribute::AttributeType;
use crate::policy::PolicyNode;

pub(crate) struct DocumentSeed<'c> {
    pub ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for DocumentSeed<'c> {
    type Value = PolicyNode;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for DocumentSeed<'c> {
    type Value = PolicyNode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a policy document object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let ctx = self.ctx;
        let mut declared = false;
        let mut root: Option<PolicyNode> = None;

        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case(tags::ATTRIBUTES) {
                ctx.enter(&key);
                if declared {
                    return Err(ctx.duplicate_tag(&key));
                }
                map.next_value_seed(AttributesSeed { ctx })?;
                declared = true;
                ctx.leave();
            } else if key.eq_ignore_ascii_case(tags::POLICIES) {
                ctx.enter(&key);
                if root.is_some() {
                    return Err(ctx.schema("document must contain exactly one root policy"));
                }
                root = Some(map.next_value_seed(NodeSeed { ctx, depth: 1 })?);
                ctx.leave();
            } else {
                return Err(ctx.unknown_tag(&key));
            }
        }

        root.ok_or_else(|| ctx.schema("missing root policy (\"policies\")"))
    }
}

/// `{"<id>": "<type tag>", ...}`
struct AttributesSeed<'c> {
    ctx: &'c ParseContext,
}

impl<'de, 'c> DeserializeSeed<'de> for AttributesSeed<'c> {
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'c> Visitor<'de> for AttributesSeed<'c> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of attribute ids to type tags")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let ctx = self.ctx;

        while let Some(id) = map.next_key::<String>()? {
            ctx.enter(&id);
            let tag: String = map.next_value()?;
            let ty: AttributeType = tag
                .parse()
                .map_err(|e| ctx.type_error::<A::Error>(format!("attribute \"{id}\": {e}")))?;
            ctx.declare(&id, ty).map_err(|e| ctx.type_error::<A::Error>(e))?;
            ctx.leave();
        }

        Ok(())
    }
}
