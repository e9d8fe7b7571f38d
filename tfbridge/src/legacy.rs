//! Schema shape of the older provider SDK generation.
//!
//! Nested blocks are not a separate concept here: a list or set attribute
//! whose element is a [`LegacyResource`] is a block. [`LegacyResource`]
//! implements [`BlockView`] so the rest of the crate can consume it like any
//! other schema, and [`LegacyResource::core_config_schema`] produces the
//! unified [`Block`] including the synthetic `id` and `timeouts` entries.

use std::collections::{BTreeMap, BTreeSet};

use crate::cty::Type;
use crate::schema::{
    Attribute, AttributeView, Block, BlockView, NestedBlock, NestedBlockView, NestingMode,
};
use crate::timeouts::{TimeoutKey, TIMEOUTS_CONFIG_KEY};
use crate::upgrade::StateUpgrader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    List,
    Set,
    Map,
}

/// Element of a collection-typed schema.
#[derive(Debug, Clone)]
pub enum Elem {
    Schema(Box<LegacySchema>),
    Resource(Box<LegacyResource>),
}

#[derive(Debug, Clone)]
pub struct LegacySchema {
    pub value_type: ValueType,
    pub elem: Option<Elem>,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    /// Changing the value replaces the resource.
    pub force_new: bool,
    pub min_items: i64,
    pub max_items: i64,
    pub deprecated: Option<String>,
    pub description: Option<String>,
}

impl LegacySchema {
    pub fn new(value_type: ValueType) -> Self {
        LegacySchema {
            value_type,
            elem: None,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            force_new: false,
            min_items: 0,
            max_items: 0,
            deprecated: None,
            description: None,
        }
    }

    pub fn bool() -> Self {
        Self::new(ValueType::Bool)
    }

    pub fn int() -> Self {
        Self::new(ValueType::Int)
    }

    pub fn float() -> Self {
        Self::new(ValueType::Float)
    }

    pub fn string() -> Self {
        Self::new(ValueType::String)
    }

    pub fn list_of(elem: LegacySchema) -> Self {
        Self::new(ValueType::List).elem(Elem::Schema(Box::new(elem)))
    }

    pub fn set_of(elem: LegacySchema) -> Self {
        Self::new(ValueType::Set).elem(Elem::Schema(Box::new(elem)))
    }

    pub fn map_of(elem: LegacySchema) -> Self {
        Self::new(ValueType::Map).elem(Elem::Schema(Box::new(elem)))
    }

    /// A list of nested resources, i.e. a list-nested block.
    pub fn list_block(resource: LegacyResource) -> Self {
        Self::new(ValueType::List).elem(Elem::Resource(Box::new(resource)))
    }

    /// A set of nested resources, i.e. a set-nested block.
    pub fn set_block(resource: LegacyResource) -> Self {
        Self::new(ValueType::Set).elem(Elem::Resource(Box::new(resource)))
    }

    pub fn elem(mut self, elem: Elem) -> Self {
        self.elem = Some(elem);
        self
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

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn min_items(mut self, n: i64) -> Self {
        self.min_items = n;
        self
    }

    pub fn max_items(mut self, n: i64) -> Self {
        self.max_items = n;
        self
    }

    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// The nested resource, when this schema describes a block.
    pub fn block_resource(&self) -> Option<&LegacyResource> {
        match (&self.value_type, &self.elem) {
            (ValueType::List | ValueType::Set, Some(Elem::Resource(r))) => Some(r),
            _ => None,
        }
    }

    pub fn is_block(&self) -> bool {
        self.block_resource().is_some()
    }

    fn element_type(&self) -> Type {
        match &self.elem {
            Some(Elem::Schema(s)) => s.ty(),
            Some(Elem::Resource(r)) => r.implied_type(),
            None => Type::String,
        }
    }
}

impl AttributeView for LegacySchema {
    fn ty(&self) -> Type {
        match self.value_type {
            ValueType::Bool => Type::Bool,
            ValueType::Int | ValueType::Float => Type::Number,
            ValueType::String => Type::String,
            ValueType::List => Type::list(self.element_type()),
            ValueType::Set => Type::set(self.element_type()),
            // Maps of resources were never supported; their elements are strings.
            ValueType::Map => match &self.elem {
                Some(Elem::Schema(s)) => Type::map(s.ty()),
                _ => Type::map(Type::String),
            },
        }
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
        self.deprecated.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegacyResource {
    pub schema: BTreeMap<String, LegacySchema>,
    pub schema_version: i64,
    /// Applied in ascending version order to older persisted state.
    pub state_upgraders: Vec<StateUpgrader>,
    pub timeouts: BTreeSet<TimeoutKey>,
    pub description: Option<String>,
}

impl LegacyResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, schema: LegacySchema) -> Self {
        self.schema.insert(name.into(), schema);
        self
    }

    pub fn with_schema_version(mut self, version: i64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_upgrader(mut self, upgrader: StateUpgrader) -> Self {
        self.state_upgraders.push(upgrader);
        self
    }

    pub fn with_timeout(mut self, key: TimeoutKey) -> Self {
        self.timeouts.insert(key);
        self
    }

    /// The unified schema of this resource as a top-level resource.
    pub fn core_config_schema(&self) -> Block {
        let mut block = Block::from_view(self);
        block
            .attributes
            .entry("id".to_string())
            .or_insert_with(|| Attribute::new(Type::String).optional().computed());
        if !self.timeouts.is_empty() {
            let timeouts = self.timeouts.iter().fold(Block::default(), |b, key| {
                b.with_attribute(key.as_str(), Attribute::new(Type::String).optional())
            });
            block.block_types.insert(
                TIMEOUTS_CONFIG_KEY.to_string(),
                NestedBlock::new(NestingMode::Single, timeouts),
            );
        }
        block
    }

    /// Paths of every `force_new` attribute, nested blocks included.
    pub fn force_new_attributes(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        for (name, s) in &self.schema {
            if s.force_new {
                out.push(vec![name.clone()]);
            }
            if let Some(nested) = s.block_resource() {
                for mut path in nested.force_new_attributes() {
                    path.insert(0, name.clone());
                    out.push(path);
                }
            }
        }
        out
    }
}

impl BlockView for LegacyResource {
    fn attribute_views(&self) -> Vec<(&str, &dyn AttributeView)> {
        self.schema
            .iter()
            .filter(|(_, s)| !s.is_block())
            .map(|(name, s)| (name.as_str(), s as &dyn AttributeView))
            .collect()
    }

    fn nested_block_views(&self) -> Vec<NestedBlockView<'_>> {
        self.schema
            .iter()
            .filter_map(|(name, s)| {
                let resource = s.block_resource()?;
                Some(NestedBlockView {
                    name,
                    nesting: match s.value_type {
                        ValueType::Set => NestingMode::Set,
                        _ => NestingMode::List,
                    },
                    min_items: s.min_items,
                    max_items: s.max_items,
                    block: resource,
                })
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

    fn ingress() -> LegacyResource {
        LegacyResource::new()
            .with("from_port", LegacySchema::int().required())
            .with("protocol", LegacySchema::string().optional().force_new())
            .with(
                "cidr_blocks",
                LegacySchema::list_of(LegacySchema::string()).optional(),
            )
    }

    fn group() -> LegacyResource {
        LegacyResource::new()
            .with("name", LegacySchema::string().required().force_new())
            .with("arn", LegacySchema::string().computed())
            .with("tags", LegacySchema::map_of(LegacySchema::string()).optional())
            .with("ingress", LegacySchema::set_block(ingress()).optional())
            .with("egress", LegacySchema::list_block(ingress()).max_items(2))
            .with_timeout(TimeoutKey::Create)
            .with_timeout(TimeoutKey::Delete)
    }

    #[test]
    fn test_core_config_schema() {
        let block = group().core_config_schema();

        let id = block.attribute("id").unwrap();
        assert!(id.optional && id.computed);
        assert!(block.attribute("ingress").is_none());

        let ingress = block.nested_block("ingress").unwrap();
        assert_eq!(ingress.nesting, NestingMode::Set);
        assert!(ingress.block.attribute("id").is_none());

        let egress = block.nested_block("egress").unwrap();
        assert_eq!(egress.nesting, NestingMode::List);
        assert_eq!(egress.max_items, 2);

        let timeouts = block.nested_block(TIMEOUTS_CONFIG_KEY).unwrap();
        assert_eq!(timeouts.nesting, NestingMode::Single);
        assert_eq!(
            timeouts.block.attributes.keys().collect::<Vec<_>>(),
            vec!["create", "delete"]
        );
    }

    #[test]
    fn test_implied_type_matches_core_schema() {
        let resource = ingress();
        let ty = resource.core_config_schema().implied_type();
        assert_eq!(
            ty,
            Type::object([
                ("cidr_blocks", Type::list(Type::String)),
                ("from_port", Type::Number),
                ("id", Type::String),
                ("protocol", Type::String),
            ])
        );
    }

    #[test]
    fn test_force_new_attributes_reach_into_blocks() {
        let mut paths = group().force_new_attributes();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                vec!["egress".to_string(), "protocol".to_string()],
                vec!["ingress".to_string(), "protocol".to_string()],
                vec!["name".to_string()],
            ]
        );
    }
}
