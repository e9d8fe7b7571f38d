use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::cty::Type;
use crate::error::{Error, Result};

/// Everything a provider declares about its configuration, resources and data
/// sources, in one shape for both protocol generations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSchema {
    /// Shape of the `provider` configuration block.
    pub provider: Option<Schema>,
    /// Keyed by resource type name, e.g. `aws_instance`.
    #[serde(default)]
    pub resource_schemas: HashMap<String, Schema>,
    #[serde(default)]
    pub data_source_schemas: HashMap<String, Schema>,
}

/// A versioned block schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Version of this schema, compared against persisted state
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub block: Block,
}

/// Attributes and nested block types of one object level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Block {
    pub attributes: BTreeMap<String, Attribute>,
    pub block_types: BTreeMap<String, NestedBlock>,
    pub description: Option<String>,
    pub description_kind: DescriptionKind,
    pub deprecated: bool,
}

/// A leaf attribute. Its value may still be a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The data type of this attribute, in the JSON type notation
    pub r#type: Type,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_kind: DescriptionKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    /// Whether the provider may supply the value itself
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub block: Block,
    pub nesting: NestingMode,
    #[serde(default)]
    pub min_items: i64,
    /// Zero means unbounded
    #[serde(default)]
    pub max_items: i64,
}

/// Collection shape of a nested block type, which decides the type of its
/// value in the parent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NestingMode {
    Invalid,
    /// An object, or null when absent.
    Single,
    /// A list of objects.
    List,
    /// A set of objects.
    Set,
    /// A map of objects keyed by label.
    Map,
    /// An object that is never null.
    Group,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptionKind {
    #[default]
    Plain,
    Markdown,
}

impl ProviderSchema {
    /// Check if a specific resource type exists
    pub fn has_resource(&self, name: &str) -> bool {
        self.resource_schemas.contains_key(name)
    }

    /// Get the schema for a specific resource type
    pub fn get_resource_schema(&self, name: &str) -> Option<&Schema> {
        self.resource_schemas.get(name)
    }

    /// Like [`Self::get_resource_schema`], but an absent type is an error.
    pub fn resource(&self, name: &str) -> Result<&Schema> {
        self.get_resource_schema(name)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))
    }

    /// Resource type names in sorted order.
    pub fn resource_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resource_schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Attribute {
    pub fn new(r#type: Type) -> Self {
        Attribute {
            r#type,
            description: None,
            description_kind: DescriptionKind::Plain,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            deprecated: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

impl Block {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn nested_block(&self, name: &str) -> Option<&NestedBlock> {
        self.block_types.get(name)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, nested: NestedBlock) -> Self {
        self.block_types.insert(name.into(), nested);
        self
    }

    /// The object type that values conforming to this block have.
    pub fn implied_type(&self) -> Type {
        BlockView::implied_type(self)
    }

    /// Copies any schema source into the unified shape.
    pub fn from_view(view: &dyn BlockView) -> Block {
        let attributes = view
            .attribute_views()
            .into_iter()
            .map(|(name, a)| {
                let attribute = Attribute {
                    r#type: a.ty(),
                    description: a.description().map(str::to_string),
                    description_kind: DescriptionKind::Plain,
                    required: a.is_required(),
                    optional: a.is_optional(),
                    computed: a.is_computed(),
                    sensitive: a.is_sensitive(),
                    deprecated: a.deprecation().is_some(),
                };
                (name.to_string(), attribute)
            })
            .collect();
        let block_types = view
            .nested_block_views()
            .into_iter()
            .map(|nested| {
                let block = NestedBlock {
                    block: Block::from_view(nested.block),
                    nesting: nested.nesting,
                    min_items: nested.min_items,
                    max_items: nested.max_items,
                };
                (nested.name.to_string(), block)
            })
            .collect();
        Block {
            attributes,
            block_types,
            description: view.description().map(str::to_string),
            description_kind: DescriptionKind::Plain,
            deprecated: false,
        }
    }
}

impl NestedBlock {
    pub fn new(nesting: NestingMode, block: Block) -> Self {
        NestedBlock {
            block,
            nesting,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Type of the whole block value as it appears in its parent object.
    pub fn implied_type(&self) -> Type {
        nested_type(self.nesting, self.block.implied_type())
    }
}

fn nested_type(nesting: NestingMode, object: Type) -> Type {
    match nesting {
        NestingMode::Single | NestingMode::Group => object,
        NestingMode::List => Type::list(object),
        NestingMode::Set => Type::set(object),
        NestingMode::Map => Type::map(object),
        NestingMode::Invalid => panic!("block with invalid nesting mode has no type"),
    }
}

/// Read-only view of an attribute schema, independent of where it came from.
pub trait AttributeView {
    fn ty(&self) -> Type;
    fn is_required(&self) -> bool;
    fn is_optional(&self) -> bool;
    fn is_computed(&self) -> bool;
    fn is_sensitive(&self) -> bool;
    /// Deprecation message, if deprecated.
    fn deprecation(&self) -> Option<&str>;
    fn description(&self) -> Option<&str>;
}

/// A nested block as seen through [`BlockView::nested_block_views`].
pub struct NestedBlockView<'a> {
    pub name: &'a str,
    pub nesting: NestingMode,
    pub min_items: i64,
    pub max_items: i64,
    pub block: &'a dyn BlockView,
}

/// Read-only view of a block schema. Implemented once per schema family.
pub trait BlockView {
    /// Plain attributes, sorted by name.
    fn attribute_views(&self) -> Vec<(&str, &dyn AttributeView)>;
    /// Nested blocks, sorted by name.
    fn nested_block_views(&self) -> Vec<NestedBlockView<'_>>;

    fn description(&self) -> Option<&str> {
        None
    }

    fn implied_type(&self) -> Type {
        let mut attrs: BTreeMap<String, Type> = self
            .attribute_views()
            .into_iter()
            .map(|(name, a)| (name.to_string(), a.ty()))
            .collect();
        for nested in self.nested_block_views() {
            attrs.insert(
                nested.name.to_string(),
                nested_type(nested.nesting, nested.block.implied_type()),
            );
        }
        Type::Object(attrs)
    }
}

impl AttributeView for Attribute {
    fn ty(&self) -> Type {
        self.r#type.clone()
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_optional(&self) -> bool {
        self.optional
    }

    fn is_computed(&self) -> bool {
        self.computed
    }

    fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn deprecation(&self) -> Option<&str> {
        self.deprecated.then_some("deprecated")
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl BlockView for Block {
    fn attribute_views(&self) -> Vec<(&str, &dyn AttributeView)> {
        self.attributes
            .iter()
            .map(|(name, a)| (name.as_str(), a as &dyn AttributeView))
            .collect()
    }

    fn nested_block_views(&self) -> Vec<NestedBlockView<'_>> {
        self.block_types
            .iter()
            .map(|(name, nested)| NestedBlockView {
                name,
                nesting: nested.nesting,
                min_items: nested.min_items,
                max_items: nested.max_items,
                block: &nested.block,
            })
            .collect()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_block() -> Block {
        Block::default()
            .with_attribute("port", Attribute::new(Type::Number).required())
            .with_attribute("cidr", Attribute::new(Type::String).optional().computed())
    }

    #[test]
    fn test_implied_type_includes_nested_blocks() {
        let block = Block::default()
            .with_attribute("name", Attribute::new(Type::String).required())
            .with_block("rule", NestedBlock::new(NestingMode::List, rule_block()))
            .with_block("tag", NestedBlock::new(NestingMode::Set, rule_block()))
            .with_block("settings", NestedBlock::new(NestingMode::Single, Block::default()));

        let rule = Type::object([("port", Type::Number), ("cidr", Type::String)]);
        assert_eq!(
            block.implied_type(),
            Type::object([
                ("name", Type::String),
                ("rule", Type::list(rule.clone())),
                ("tag", Type::set(rule)),
                ("settings", Type::empty_object()),
            ])
        );
    }

    #[test]
    fn test_from_view_copies_block() {
        let block = Block::default()
            .with_attribute("id", Attribute::new(Type::String).computed())
            .with_block(
                "rule",
                NestedBlock {
                    min_items: 1,
                    max_items: 3,
                    ..NestedBlock::new(NestingMode::List, rule_block())
                },
            );
        assert_eq!(Block::from_view(&block), block);
    }

    #[test]
    fn test_deserialize_json_schema() {
        let schema: ProviderSchema = serde_json::from_str(
            r#"{
                "resource_schemas": {
                    "example_thing": {
                        "version": 2,
                        "block": {
                            "attributes": {
                                "tags": {"type": ["map", "string"], "optional": true}
                            },
                            "block_types": {
                                "rule": {
                                    "nesting": "List",
                                    "max_items": 2,
                                    "block": {"attributes": {"port": {"type": "number", "required": true}}}
                                }
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let thing = schema.resource("example_thing").unwrap();
        assert_eq!(thing.version, 2);
        assert_eq!(
            thing.block.attribute("tags").map(|a| a.r#type.clone()),
            Some(Type::map(Type::String))
        );
        let rule = thing.block.nested_block("rule").unwrap();
        assert_eq!(rule.nesting, NestingMode::List);
        assert_eq!(rule.max_items, 2);
        assert!(matches!(
            schema.resource("example_other"),
            Err(Error::UnknownResource(_))
        ));
    }
}
