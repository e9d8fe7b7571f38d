//! Resolution of schema paths against a resource block.

use thiserror::Error;

use crate::path::{SchemaPath, SchemaStep};
use crate::schema::{Attribute, Block, NestedBlock, NestingMode};
use crate::timeouts::TIMEOUTS_CONFIG_KEY;

/// Schema found at some point of a [`SchemaPath`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaContext<'a> {
    /// A block whose attributes can be stepped into.
    Block(&'a Block),
    /// A list- or set-nested block; an element step yields its block.
    BlockCollection {
        name: &'a str,
        nested: &'a NestedBlock,
    },
    /// A plain attribute. Nothing below it is schema.
    Attribute {
        name: &'a str,
        attribute: &'a Attribute,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no schema found at {path}")]
pub struct NotFound {
    pub path: String,
}

impl<'a> SchemaContext<'a> {
    /// Steps into a named attribute or nested block.
    ///
    /// Panics on nesting modes the legacy schema family cannot represent:
    /// group and map nesting, and single nesting other than `timeouts`.
    pub fn attribute(&self, name: &str) -> Option<SchemaContext<'a>> {
        let SchemaContext::Block(block) = *self else {
            return None;
        };
        if let Some((name, attribute)) = block.attributes.get_key_value(name) {
            return Some(SchemaContext::Attribute {
                name: name.as_str(),
                attribute,
            });
        }
        let (name, nested) = block.block_types.get_key_value(name)?;
        match nested.nesting {
            NestingMode::List | NestingMode::Set => {
                Some(SchemaContext::BlockCollection {
                    name: name.as_str(),
                    nested,
                })
            }
            NestingMode::Single if name == TIMEOUTS_CONFIG_KEY => {
                Some(SchemaContext::Block(&nested.block))
            }
            mode => panic!(
                "block {:?} uses {:?} nesting, which the legacy schema cannot represent",
                name, mode
            ),
        }
    }

    /// Steps into a collection element.
    pub fn element(&self) -> Option<SchemaContext<'a>> {
        match *self {
            SchemaContext::BlockCollection { nested, .. } => {
                Some(SchemaContext::Block(&nested.block))
            }
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&'a Block> {
        match *self {
            SchemaContext::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> Option<&'a Attribute> {
        match *self {
            SchemaContext::Attribute { attribute, .. } => Some(attribute),
            _ => None,
        }
    }
}

pub fn resolve<'a>(root: &'a Block, path: &SchemaPath) -> Result<SchemaContext<'a>, NotFound> {
    path.steps()
        .iter()
        .try_fold(SchemaContext::Block(root), |ctx, step| match step {
            SchemaStep::Attribute(name) => ctx.attribute(name),
            SchemaStep::Element => ctx.element(),
        })
        .ok_or_else(|| NotFound {
            path: path.to_string(),
        })
}

/// Resolves a dotted key such as `rule.0.port`.
///
/// Segments after an attribute leaf address the inside of the attribute's
/// value rather than schema, so they are accepted and the leaf is returned.
pub fn resolve_flat_key<'a>(root: &'a Block, key: &str) -> Result<SchemaContext<'a>, NotFound> {
    let not_found = || NotFound {
        path: key.to_string(),
    };
    let mut ctx = SchemaContext::Block(root);
    for segment in key.split('.') {
        ctx = match ctx {
            SchemaContext::Attribute { .. } => return Ok(ctx),
            SchemaContext::BlockCollection { .. } if segment == "#" => return Ok(ctx),
            SchemaContext::BlockCollection { .. } => ctx.element().ok_or_else(not_found)?,
            SchemaContext::Block(_) => ctx.attribute(segment).ok_or_else(not_found)?,
        };
    }
    Ok(ctx)
}
