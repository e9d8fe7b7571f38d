//! The bridge entry points used by the orchestration host.

use anyhow::Context;
use dashmap::DashMap;
use serde_json::Value as Json;
use tracing::warn;

use crate::config::{BridgeOptions, DiffStrategy, StateReadStrategy};
use crate::cty::{Type, Value};
use crate::diff;
use crate::error::{MultiError, Result};
use crate::flatmap;
use crate::instance::{DiffOverride, InstanceDiff, InstanceState, Meta, ResourceConfig};
use crate::objchange;
use crate::projection;
use crate::protocol::{
    ApplyResourceChangeRequest, Diagnostic, ImportResourceStateRequest,
    PlanResourceChangeRequest, ProviderServer, RawState, ReadResourceRequest, Severity,
    UpgradeResourceStateRequest,
};
use crate::schema::{ProviderSchema, Schema};
use crate::timeouts::{self, TimeoutOptions, TIMEOUTS_CONFIG_KEY};

/// Algorithm variants in effect for one resource type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStrategy {
    pub diff: DiffStrategy,
    pub state_read: StateReadStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Dotted attribute paths whose changes are suppressed.
    pub ignore_changes: Vec<String>,
    pub timeouts: Option<TimeoutOptions>,
}

/// A wrapped provider runtime, with its schema fetched once.
#[derive(Debug)]
pub struct Provider {
    server: ProviderServer,
    schema: ProviderSchema,
    options: BridgeOptions,
    strategies: DashMap<String, ResourceStrategy>,
}

impl Provider {
    pub fn new(server: ProviderServer, options: BridgeOptions) -> Result<Self> {
        let response = server.get_provider_schema()?;
        handle_diagnostics("provider", response.diagnostics)?;
        let provider = Provider {
            server,
            schema: response.schema,
            options,
            strategies: DashMap::new(),
        };
        for name in provider.schema.resource_names() {
            provider.register_strategy(
                name,
                ResourceStrategy {
                    diff: provider.options.diff_strategy_for(name),
                    state_read: provider.options.state_read_strategy_for(name),
                },
            );
        }
        Ok(provider)
    }

    pub fn schema(&self) -> &ProviderSchema {
        &self.schema
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Overrides the strategies for one resource type. Safe to call from
    /// several threads.
    pub fn register_strategy(&self, resource_type: &str, strategy: ResourceStrategy) {
        self.strategies.insert(resource_type.to_string(), strategy);
    }

    pub fn strategy(&self, resource_type: &str) -> ResourceStrategy {
        match self.strategies.get(resource_type) {
            Some(s) => *s,
            None => ResourceStrategy {
                diff: self.options.diff_strategy_for(resource_type),
                state_read: self.options.state_read_strategy_for(resource_type),
            },
        }
    }

    fn resource(&self, resource_type: &str) -> Result<(&Schema, Type)> {
        let schema = self.schema.resource(resource_type)?;
        Ok((schema, schema.block.implied_type()))
    }

    fn provider_type(&self) -> Type {
        self.schema
            .provider
            .as_ref()
            .map(|s| s.block.implied_type())
            .unwrap_or_else(Type::empty_object)
    }

    /// Lifts raw resource configuration, coercing it when the resource type
    /// is known.
    pub fn new_resource_config(
        &self,
        resource_type: &str,
        raw: serde_json::Map<String, Json>,
    ) -> ResourceConfig {
        let value = self.schema.get_resource_schema(resource_type).map(|s| {
            projection::recover_or_approximate(&Json::Object(raw.clone()), &s.block.implied_type())
        });
        ResourceConfig { raw, value }
    }

    pub fn new_provider_config(&self, raw: serde_json::Map<String, Json>) -> ResourceConfig {
        let value = projection::recover_or_approximate(&Json::Object(raw.clone()), &self.provider_type());
        ResourceConfig {
            raw,
            value: Some(value),
        }
    }

    pub fn configure(&self, config: &ResourceConfig) -> Result<()> {
        let _span = tracing::info_span!("configuring provider").entered();
        let ty = self.provider_type();
        let value = match &config.value {
            Some(v) if v.conforms_to(&ty) => v.clone(),
            _ => projection::recover(&Json::Object(config.raw.clone()), &ty)?,
        };
        let response = self.server.configure_provider(&value, &ty)?;
        handle_diagnostics("provider", response.diagnostics)
    }

    /// Instance state from persisted attributes.
    ///
    /// Attributes written by an older schema version are migrated first.
    /// Otherwise they are recovered strictly against the current schema.
    pub fn instance_state(
        &self,
        resource_type: &str,
        id: &str,
        mut attributes: serde_json::Map<String, Json>,
        meta: Meta,
    ) -> Result<InstanceState> {
        let (schema, ty) = self.resource(resource_type)?;
        if !id.is_empty() {
            attributes
                .entry("id")
                .or_insert_with(|| Json::String(id.to_string()));
        }
        let mut state = InstanceState::new(resource_type, Value::null(ty.clone()), meta);
        if state.schema_version() < schema.version {
            let raw = serde_json::to_vec(&Json::Object(attributes))
                .context("failed to serialize persisted state")?;
            return self.upgrade_raw(resource_type, state, RawState::Json(raw));
        }
        state.value = projection::recover(&Json::Object(attributes), &ty)?;
        Ok(state)
    }

    /// Brings the state up to the current schema version. A state that went
    /// through this once is returned as is.
    pub fn upgrade_state(&self, resource_type: &str, state: &InstanceState) -> Result<InstanceState> {
        if state.upgraded {
            return Ok(state.clone());
        }
        let _span = tracing::info_span!("upgrading resource state", resource_type).entered();
        let (schema, _) = self.resource(resource_type)?;
        if state.schema_version() == schema.version {
            let mut state = state.clone();
            state.upgraded = true;
            return Ok(state);
        }
        let raw = match self.strategy(resource_type).state_read {
            StateReadStrategy::Flatmap => RawState::Flatmap(flatmap::flatten(&state.value)),
            StateReadStrategy::Structural => {
                let object = Json::Object(projection::object_map(&state.value));
                RawState::Json(
                    serde_json::to_vec(&object).context("failed to serialize resource state")?,
                )
            }
        };
        self.upgrade_raw(resource_type, state.clone(), raw)
    }

    fn upgrade_raw(
        &self,
        resource_type: &str,
        mut state: InstanceState,
        raw_state: RawState,
    ) -> Result<InstanceState> {
        let (schema, ty) = self.resource(resource_type)?;
        let response = self.server.upgrade_resource_state(
            UpgradeResourceStateRequest {
                type_name: resource_type.to_string(),
                version: state.schema_version(),
                raw_state,
            },
            &ty,
        )?;
        handle_diagnostics(resource_type, response.diagnostics)?;
        state.value = response.upgraded_state;
        state.identity_change = response.identity_change;
        state.set_schema_version(schema.version);
        state.upgraded = true;
        Ok(state)
    }

    /// Plans the change from `prior` to `config`.
    pub fn diff(
        &self,
        resource_type: &str,
        prior: Option<&InstanceState>,
        config: &ResourceConfig,
        opts: &DiffOptions,
    ) -> Result<InstanceDiff> {
        let _span = tracing::info_span!("planning resource change", resource_type).entered();
        let (schema, ty) = self.resource(resource_type)?;
        let block = &schema.block;

        let (prior_value, prior_private) = match prior {
            Some(state) => {
                let state = self.upgrade_state(resource_type, state)?;
                (state.value, state.meta)
            }
            None => (Value::null(ty.clone()), Meta::new()),
        };

        // Planning needs configuration of exactly the schema's type.
        let config_value = match (&config.value, &opts.timeouts) {
            (Some(v), None) if v.conforms_to(&ty) => v.clone(),
            (_, overrides) => {
                let raw = match overrides {
                    Some(t) => timeouts::config_with_timeouts(
                        resource_type,
                        block,
                        config.raw.clone(),
                        t,
                    ),
                    None => config.raw.clone(),
                };
                projection::recover(&Json::Object(raw), &ty)?
            }
        };
        let config_value = objchange::normalize_block_collections(block, &config_value);
        let config_value =
            diff::apply_ignore_changes(block, &prior_value, &config_value, &opts.ignore_changes);
        let proposed = objchange::proposed_new(block, &prior_value, &config_value);

        let response = self.server.plan_resource_change(
            PlanResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior_value.clone(),
                proposed_new_state: proposed,
                config: config_value.clone(),
                prior_private,
            },
            &ty,
        )?;
        handle_diagnostics(resource_type, response.diagnostics)?;
        let planned = response.planned_state;

        let requires_replace =
            diff::check_requires_replace(&response.requires_replace, &prior_value, &planned);
        let (attributes, requires_new) =
            diff::attribute_diffs(&prior_value, &planned, &requires_replace);
        let changed_keys = match self.strategy(resource_type).diff {
            DiffStrategy::PlanState => diff::changed_keys(&diff::without_unknown_resolution(
                diff::value_diff(&prior_value, &planned),
            )),
            DiffStrategy::Classic => attributes
                .keys()
                .filter_map(|k| k.split('.').next())
                .map(str::to_string)
                .collect(),
        };
        let replace_keys = diff::replace_keys(&requires_replace, &changed_keys);

        let unchanged = timeouts::strip_timeouts(prior_value.unmark_deep())
            .equals(&timeouts::strip_timeouts(planned.unmark_deep()));
        let diff_override = match unchanged {
            Some(true) => DiffOverride::NoUpdate,
            _ => DiffOverride::Update,
        };

        let mut ignored = opts.ignore_changes.clone();
        ignored.push(TIMEOUTS_CONFIG_KEY.to_string());
        Ok(InstanceDiff {
            resource_type: resource_type.to_string(),
            config: config_value,
            prior: prior_value,
            planned,
            planned_private: response.planned_private,
            attributes,
            requires_new: requires_new || !replace_keys.is_empty(),
            changed_keys,
            replace_keys,
            diff_override,
            destroy: false,
        }
        .ignore_changes(&ignored))
    }

    /// A diff that deletes the resource when applied.
    pub fn new_destroy_diff(&self, resource_type: &str) -> InstanceDiff {
        InstanceDiff {
            resource_type: resource_type.to_string(),
            config: Value::null(Type::Dynamic),
            prior: Value::null(Type::Dynamic),
            planned: Value::null(Type::Dynamic),
            planned_private: Meta::new(),
            attributes: Default::default(),
            changed_keys: Default::default(),
            replace_keys: Default::default(),
            diff_override: DiffOverride::Update,
            destroy: true,
            requires_new: false,
        }
    }

    /// Applies a diff. `None` means the resource no longer exists.
    pub fn apply(
        &self,
        resource_type: &str,
        prior: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> Result<Option<InstanceState>> {
        let _span = tracing::info_span!("applying resource change", resource_type).entered();
        let (schema, ty) = self.resource(resource_type)?;
        let (prior_value, mut private) = match prior {
            Some(state) => {
                let state = self.upgrade_state(resource_type, state)?;
                (state.value, state.meta)
            }
            None if diff.prior.is_null() => (Value::null(ty.clone()), Meta::new()),
            None => (diff.prior.clone(), Meta::new()),
        };
        let (planned, config) = if diff.destroy {
            (Value::null(ty.clone()), Value::null(ty.clone()))
        } else {
            (diff.planned.clone(), diff.config.clone())
        };
        private.extend(diff.planned_private.clone());

        let response = self.server.apply_resource_change(
            ApplyResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior_value,
                planned_state: planned,
                config,
                planned_private: private,
            },
            &ty,
        )?;
        handle_diagnostics(resource_type, response.diagnostics)?;
        Ok(self.current_state(resource_type, schema, response.new_state, response.private))
    }

    /// Reads the live resource. `None` means it no longer exists.
    pub fn refresh(
        &self,
        resource_type: &str,
        state: &InstanceState,
    ) -> Result<Option<InstanceState>> {
        let _span = tracing::info_span!("refreshing resource", resource_type).entered();
        let state = self.upgrade_state(resource_type, state)?;
        let (schema, ty) = self.resource(resource_type)?;
        let response = self.server.read_resource(
            ReadResourceRequest {
                type_name: resource_type.to_string(),
                current_state: state.value,
                private: state.meta,
            },
            &ty,
        )?;
        handle_diagnostics(resource_type, response.diagnostics)?;
        Ok(self.current_state(resource_type, schema, response.new_state, response.private))
    }

    /// Imports an existing resource by id, reading back every resource the
    /// import produced.
    pub fn import(&self, resource_type: &str, id: &str) -> Result<Vec<InstanceState>> {
        let _span = tracing::info_span!("importing resource", resource_type, id).entered();
        self.schema.resource(resource_type)?;
        let response = self.server.import_resource_state(
            ImportResourceStateRequest {
                type_name: resource_type.to_string(),
                id: id.to_string(),
            },
            &self.schema,
        )?;
        handle_diagnostics(resource_type, response.diagnostics)?;

        let mut states = Vec::new();
        for imported in response.imported_resources {
            let (schema, ty) = self.resource(&imported.type_name)?;
            let read = self.server.read_resource(
                ReadResourceRequest {
                    type_name: imported.type_name.clone(),
                    current_state: imported.state,
                    private: imported.private,
                },
                &ty,
            )?;
            handle_diagnostics(&imported.type_name, read.diagnostics)?;
            states.extend(self.current_state(
                &imported.type_name,
                schema,
                read.new_state,
                read.private,
            ));
        }
        Ok(states)
    }

    /// Projection of a state for the host, with the cached read strategy of
    /// its resource type.
    pub fn resource_object(
        &self,
        state: &InstanceState,
    ) -> Result<serde_json::Map<String, Json>> {
        let (schema, _) = self.resource(&state.resource_type)?;
        state.object(&schema.block, self.strategy(&state.resource_type).state_read)
    }

    fn current_state(
        &self,
        resource_type: &str,
        schema: &Schema,
        value: Value,
        meta: Meta,
    ) -> Option<InstanceState> {
        if value.is_null() {
            return None;
        }
        let mut state = InstanceState::new(resource_type, value, meta);
        state.set_schema_version(schema.version);
        state.upgraded = true;
        Some(state)
    }
}

/// Logs warnings and turns any error diagnostics into one error.
pub fn handle_diagnostics(resource_type: &str, diagnostics: Vec<Diagnostic>) -> Result<()> {
    let mut errors = Vec::new();
    for d in diagnostics {
        match d.severity {
            Severity::Warning => warn!(resource_type, "{}", d),
            Severity::Error | Severity::Invalid => errors.push(d),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MultiError { errors }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{
        ApplyResourceChangeResponse, ConfigureProviderRequest, ConfigureProviderResponse,
        DynamicValue, GetProviderSchemaResponse, ImportResourceStateResponse, ImportedResource,
        PlanResourceChangeResponse, ProviderProtocol, ReadResourceResponse,
        UpgradeResourceStateResponse, WireValue,
    };
    use crate::schema::{Attribute, Block};
    use std::sync::Arc;

    /// Answers the schema call only.
    struct SchemaOnly(ProviderSchema);

    impl ProviderProtocol<DynamicValue> for SchemaOnly {
        fn get_provider_schema(&self) -> anyhow::Result<GetProviderSchemaResponse> {
            Ok(GetProviderSchemaResponse {
                schema: self.0.clone(),
                diagnostics: vec![Diagnostic::warning("deprecated provider", "")],
            })
        }

        fn configure_provider(
            &self,
            _: ConfigureProviderRequest<DynamicValue>,
        ) -> anyhow::Result<ConfigureProviderResponse> {
            Ok(ConfigureProviderResponse {
                diagnostics: vec![Diagnostic::error("missing token", "token is required")],
            })
        }

        fn plan_resource_change(
            &self,
            _: PlanResourceChangeRequest<DynamicValue>,
        ) -> anyhow::Result<PlanResourceChangeResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn apply_resource_change(
            &self,
            _: ApplyResourceChangeRequest<DynamicValue>,
        ) -> anyhow::Result<ApplyResourceChangeResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn read_resource(
            &self,
            _: ReadResourceRequest<DynamicValue>,
        ) -> anyhow::Result<ReadResourceResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn import_resource_state(
            &self,
            _: ImportResourceStateRequest,
        ) -> anyhow::Result<ImportResourceStateResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn upgrade_resource_state(
            &self,
            _: UpgradeResourceStateRequest,
        ) -> anyhow::Result<UpgradeResourceStateResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }
    }

    /// Imports a security group together with its rule and echoes state on
    /// read.
    struct GroupImporter(ProviderSchema);

    impl ProviderProtocol<DynamicValue> for GroupImporter {
        fn get_provider_schema(&self) -> anyhow::Result<GetProviderSchemaResponse> {
            Ok(GetProviderSchemaResponse {
                schema: self.0.clone(),
                diagnostics: Vec::new(),
            })
        }

        fn configure_provider(
            &self,
            _: ConfigureProviderRequest<DynamicValue>,
        ) -> anyhow::Result<ConfigureProviderResponse> {
            Ok(ConfigureProviderResponse::default())
        }

        fn plan_resource_change(
            &self,
            _: PlanResourceChangeRequest<DynamicValue>,
        ) -> anyhow::Result<PlanResourceChangeResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn apply_resource_change(
            &self,
            _: ApplyResourceChangeRequest<DynamicValue>,
        ) -> anyhow::Result<ApplyResourceChangeResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }

        fn read_resource(
            &self,
            request: ReadResourceRequest<DynamicValue>,
        ) -> anyhow::Result<ReadResourceResponse<DynamicValue>> {
            Ok(ReadResourceResponse {
                new_state: request.current_state,
                private: request.private,
                diagnostics: Vec::new(),
            })
        }

        fn import_resource_state(
            &self,
            request: ImportResourceStateRequest,
        ) -> anyhow::Result<ImportResourceStateResponse<DynamicValue>> {
            let group_ty = self.0.resource("example_group")?.block.implied_type();
            let rule_ty = self.0.resource("example_group_rule")?.block.implied_type();
            let group = Value::object([("id", Value::string(request.id.clone()))]);
            let rule = Value::object([
                ("id", Value::string(format!("{}-ssh", request.id))),
                ("port", Value::number(22)),
            ]);
            Ok(ImportResourceStateResponse {
                imported_resources: vec![
                    ImportedResource {
                        type_name: "example_group".into(),
                        state: DynamicValue::encode(&group, &group_ty)?,
                        private: Meta::new(),
                    },
                    ImportedResource {
                        type_name: "example_group_rule".into(),
                        state: DynamicValue::encode(&rule, &rule_ty)?,
                        private: Meta::new(),
                    },
                ],
                diagnostics: Vec::new(),
            })
        }

        fn upgrade_resource_state(
            &self,
            _: UpgradeResourceStateRequest,
        ) -> anyhow::Result<UpgradeResourceStateResponse<DynamicValue>> {
            anyhow::bail!("not implemented")
        }
    }

    fn provider(options: BridgeOptions) -> Provider {
        let mut schema = ProviderSchema::default();
        schema.resource_schemas.insert(
            "example_thing".into(),
            Schema {
                version: 0,
                block: Block::default()
                    .with_attribute("id", Attribute::new(Type::String).computed()),
            },
        );
        let server = ProviderServer::V5(Arc::new(SchemaOnly(schema)));
        Provider::new(server, options).unwrap()
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let p = provider(BridgeOptions::default());
        assert!(p.schema().has_resource("example_thing"));
    }

    #[test]
    fn test_error_diagnostics_fail_the_call() {
        let p = provider(BridgeOptions::default());
        let config = p.new_provider_config(serde_json::Map::new());
        match p.configure(&config) {
            Err(Error::Diagnostics(e)) => {
                assert_eq!(e.errors.len(), 1);
                assert_eq!(e.to_string(), "missing token: token is required");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_import_decodes_each_resource_with_its_own_schema() {
        let mut schema = ProviderSchema::default();
        schema.resource_schemas.insert(
            "example_group".into(),
            Schema {
                version: 0,
                block: Block::default()
                    .with_attribute("id", Attribute::new(Type::String).computed()),
            },
        );
        schema.resource_schemas.insert(
            "example_group_rule".into(),
            Schema {
                version: 0,
                block: Block::default()
                    .with_attribute("id", Attribute::new(Type::String).computed())
                    .with_attribute("port", Attribute::new(Type::Number).required()),
            },
        );
        let server = ProviderServer::V5(Arc::new(GroupImporter(schema)));
        let p = Provider::new(server, BridgeOptions::default()).unwrap();

        let states = p.import("example_group", "sg-1").unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].resource_type, "example_group");
        assert_eq!(states[0].id(), Some("sg-1"));
        assert_eq!(states[1].resource_type, "example_group_rule");
        assert_eq!(states[1].id(), Some("sg-1-ssh"));
        assert_eq!(states[1].value.get_attr("port"), &Value::number(22));
    }

    #[test]
    fn test_misspelled_config_is_a_convert_error() {
        let p = provider(BridgeOptions::default());
        let mut raw = serde_json::Map::new();
        raw.insert("idd".into(), Json::String("x".into()));
        let config = p.new_resource_config("example_thing", raw);
        match p.diff("example_thing", None, &config, &DiffOptions::default()) {
            Err(Error::Convert { path, message }) => {
                assert_eq!(path.to_string(), "idd");
                assert_eq!(message, "unsupported attribute");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unknown_resource_type() {
        let p = provider(BridgeOptions::default());
        assert!(matches!(
            p.diff(
                "example_missing",
                None,
                &ResourceConfig::new(Default::default()),
                &DiffOptions::default()
            ),
            Err(Error::UnknownResource(_))
        ));
        assert!(p
            .new_resource_config("example_missing", Default::default())
            .value
            .is_none());
    }

    #[test]
    fn test_strategies_from_options() {
        let mut options = BridgeOptions {
            diff_strategy: DiffStrategy::Classic,
            ..Default::default()
        };
        options
            .resource_state_read_strategies
            .insert("example_thing".into(), StateReadStrategy::Flatmap);
        let p = provider(options);
        assert_eq!(
            p.strategy("example_thing"),
            ResourceStrategy {
                diff: DiffStrategy::Classic,
                state_read: StateReadStrategy::Flatmap,
            }
        );
        assert_eq!(p.strategy("example_other").state_read, StateReadStrategy::Structural);
    }

    #[test]
    fn test_concurrent_strategy_registration() {
        let p = provider(BridgeOptions::default());
        std::thread::scope(|s| {
            for i in 0..8 {
                let p = &p;
                s.spawn(move || {
                    let name = format!("example_{}", i);
                    p.register_strategy(
                        &name,
                        ResourceStrategy {
                            diff: DiffStrategy::Classic,
                            state_read: StateReadStrategy::Flatmap,
                        },
                    );
                    assert_eq!(p.strategy(&name).diff, DiffStrategy::Classic);
                });
            }
        });
        for i in 0..8 {
            assert_eq!(
                p.strategy(&format!("example_{}", i)).state_read,
                StateReadStrategy::Flatmap
            );
        }
    }
}
