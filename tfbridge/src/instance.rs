//! Values exchanged with the orchestration host: instance state, diffs and
//! configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::StateReadStrategy;
use crate::cty::Value;
use crate::error::Result;
use crate::flatmap;
use crate::projection;
use crate::schema::Block;
use crate::timeouts::TIMEOUTS_CONFIG_KEY;
use crate::upgrade::IdentityChange;

/// Provider-owned private metadata. Not interpreted here apart from the
/// schema version marker.
pub type Meta = serde_json::Map<String, serde_json::Value>;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub resource_type: String,
    /// Conforms to the implied type of the resource schema.
    pub value: Value,
    pub meta: Meta,
    /// Set once the state went through the upgrade pipeline, so that repeated
    /// upgrades within one operation are no-ops.
    pub upgraded: bool,
    /// How the last upgrade rewrote the resource id, if it did.
    pub identity_change: Option<IdentityChange>,
}

impl InstanceState {
    pub fn new(resource_type: impl Into<String>, value: Value, meta: Meta) -> Self {
        InstanceState {
            resource_type: resource_type.into(),
            value,
            meta,
            upgraded: false,
            identity_change: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.value.attr("id").and_then(Value::as_str)
    }

    /// Schema version the state was written with. Absent means 0.
    pub fn schema_version(&self) -> i64 {
        match self.meta.get(SCHEMA_VERSION_KEY) {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn set_schema_version(&mut self, version: i64) {
        self.meta.insert(
            SCHEMA_VERSION_KEY.to_string(),
            serde_json::Value::String(version.to_string()),
        );
    }

    /// The state as generic maps for the host. The reserved `timeouts`
    /// attribute is not part of it.
    pub fn object(
        &self,
        block: &Block,
        strategy: StateReadStrategy,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let value = match strategy {
            StateReadStrategy::Structural => self.value.clone(),
            StateReadStrategy::Flatmap => {
                flatmap::expand(&flatmap::flatten(&self.value), &block.implied_type())?
            }
        };
        let mut object = projection::object_map(&value);
        object.remove(TIMEOUTS_CONFIG_KEY);
        Ok(object)
    }
}

/// Change of one flattened attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttrDiff {
    pub old: String,
    pub new: String,
    /// The new value is only known after apply.
    pub new_computed: bool,
    pub new_removed: bool,
    pub requires_new: bool,
}

/// Whether the host should trust the changed-key set or the planned state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffOverride {
    #[default]
    NoOverride,
    /// Planned state equals prior state.
    NoUpdate,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffChanges {
    None,
    Some,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDiff {
    pub resource_type: String,
    pub config: Value,
    pub prior: Value,
    pub planned: Value,
    pub planned_private: Meta,
    /// Keyed by flattened attribute path.
    pub attributes: BTreeMap<String, ResourceAttrDiff>,
    /// Top-level attribute names with changes.
    pub changed_keys: BTreeSet<String>,
    /// Changed keys the provider requires replacement for.
    pub replace_keys: BTreeSet<String>,
    pub diff_override: DiffOverride,
    pub destroy: bool,
    pub requires_new: bool,
}

impl InstanceDiff {
    pub fn changes(&self) -> DiffChanges {
        if self.changed_keys.is_empty() {
            DiffChanges::None
        } else {
            DiffChanges::Some
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&ResourceAttrDiff> {
        self.attributes.get(key)
    }

    /// Drops every ignored key, and every key below one, from the changed
    /// attributes and keys.
    pub fn ignore_changes(mut self, ignored: &[String]) -> Self {
        let is_ignored = |key: &str| {
            ignored
                .iter()
                .any(|i| key == i || key.strip_prefix(i.as_str()).is_some_and(|r| r.starts_with('.')))
        };
        self.attributes.retain(|k, _| !is_ignored(k));
        self.changed_keys.retain(|k| !is_ignored(k));
        self.replace_keys.retain(|k| !is_ignored(k));
        self.requires_new = self.attributes.values().any(|d| d.requires_new)
            || !self.replace_keys.is_empty();
        self
    }
}

/// Configuration as handed over by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfig {
    pub raw: serde_json::Map<String, serde_json::Value>,
    /// Coerced against the schema, when one was available. Configuration
    /// that does not fit the schema is only approximated here; planning
    /// rejects it.
    pub value: Option<Value>,
}

impl ResourceConfig {
    pub fn new(raw: serde_json::Map<String, serde_json::Value>) -> Self {
        ResourceConfig { raw, value: None }
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.raw.get(key).is_some_and(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cty::Type;
    use crate::schema::{Attribute, NestedBlock, NestingMode};
    use crate::UNKNOWN_VARIABLE_VALUE;
    use serde_json::json;

    fn block() -> Block {
        let timeouts =
            Block::default().with_attribute("create", Attribute::new(Type::String).optional());
        Block::default()
            .with_attribute("id", Attribute::new(Type::String).computed())
            .with_attribute("size", Attribute::new(Type::Number).optional())
            .with_attribute("zones", Attribute::new(Type::set(Type::String)).optional())
            .with_block("timeouts", NestedBlock::new(NestingMode::Single, timeouts))
    }

    fn state() -> InstanceState {
        InstanceState::new(
            "example_thing",
            Value::object([
                ("id", Value::string("t-1")),
                ("size", Value::parse_number("641577219598130723").unwrap()),
                ("zones", Value::unknown(Type::set(Type::String))),
                ("timeouts", Value::null(Type::object([("create", Type::String)]))),
            ]),
            Meta::new(),
        )
    }

    #[test]
    fn test_object_projection() {
        let state = state();
        assert_eq!(state.id(), Some("t-1"));
        for strategy in [StateReadStrategy::Structural, StateReadStrategy::Flatmap] {
            let object = state.object(&block(), strategy).unwrap();
            assert_eq!(
                serde_json::Value::Object(object),
                json!({
                    "id": "t-1",
                    "size": 641577219598130723u64,
                    "zones": UNKNOWN_VARIABLE_VALUE,
                }),
                "{:?}",
                strategy
            );
        }
    }

    #[test]
    fn test_schema_version_marker() {
        let mut state = state();
        assert_eq!(state.schema_version(), 0);
        state.set_schema_version(3);
        assert_eq!(state.schema_version(), 3);
        state.meta.insert(SCHEMA_VERSION_KEY.into(), json!(4));
        assert_eq!(state.schema_version(), 4);
    }

    #[test]
    fn test_ignore_changes_is_prefix_based() {
        let attr = |requires_new| ResourceAttrDiff {
            new: "x".into(),
            requires_new,
            ..Default::default()
        };
        let diff = InstanceDiff {
            resource_type: "example_thing".into(),
            config: Value::empty_object(),
            prior: Value::empty_object(),
            planned: Value::empty_object(),
            planned_private: Meta::new(),
            attributes: BTreeMap::from([
                ("tags.%".to_string(), attr(false)),
                ("tags.env".to_string(), attr(false)),
                ("tagsextra".to_string(), attr(false)),
                ("name".to_string(), attr(true)),
            ]),
            changed_keys: ["tags", "tagsextra", "name"].map(String::from).into(),
            replace_keys: ["name"].map(String::from).into(),
            diff_override: DiffOverride::NoOverride,
            destroy: false,
            requires_new: true,
        };
        let diff = diff.ignore_changes(&["tags".to_string(), "name".to_string()]);
        assert_eq!(
            diff.attributes.keys().collect::<Vec<_>>(),
            vec!["tagsextra"]
        );
        assert_eq!(diff.changed_keys, BTreeSet::from(["tagsextra".to_string()]));
        assert!(diff.replace_keys.is_empty());
        assert!(!diff.requires_new);
        assert_eq!(diff.changes(), DiffChanges::Some);
    }
}
