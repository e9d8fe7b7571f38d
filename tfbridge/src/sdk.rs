//! In-process provider runtime for resources declared with the legacy
//! schema family. It serves either protocol generation.
//!
//! Resource behaviour is supplied through [`ResourceLifecycle`]. The runtime
//! does the planning, requires-replace detection and state upgrades itself,
//! so a lifecycle only deals with already-planned values.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};

use crate::cty::{self, Type, Value};
use crate::diff;
use crate::instance::{Meta, SCHEMA_VERSION_KEY};
use crate::legacy::LegacyResource;
use crate::path::{AttributePath, PathStep};
use crate::protocol::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, ConfigureProviderRequest,
    ConfigureProviderResponse, Diagnostic, GetProviderSchemaResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ImportedResource,
    PlanResourceChangeRequest, PlanResourceChangeResponse, ProviderProtocol, RawState,
    ReadResourceRequest, ReadResourceResponse, UpgradeResourceStateRequest,
    UpgradeResourceStateResponse, WireValue,
};
use crate::schema::{Block, ProviderSchema, Schema};
use crate::timeouts;
use crate::upgrade::{self, PersistedState, UpgradeTarget};

/// Attribute access for one resource instance during a lifecycle call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData {
    value: Value,
}

impl ResourceData {
    pub fn new(value: Value) -> Self {
        ResourceData { value }
    }

    /// An instance of `ty` with only `id` set.
    pub fn for_id(ty: &Type, id: &str) -> Self {
        let attrs = ty
            .attribute_types()
            .into_iter()
            .flatten()
            .map(|(k, t)| {
                let v = if k == "id" {
                    Value::string(id)
                } else {
                    Value::null(t.clone())
                };
                (k.clone(), v)
            });
        ResourceData::new(Value::object(attrs))
    }

    pub fn id(&self) -> Option<&str> {
        self.value.attr("id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) -> anyhow::Result<()> {
        self.set("id", Value::string(id))
    }

    /// The value of a top-level attribute.
    ///
    /// # Panics
    ///
    /// If the resource schema has no attribute `key`.
    pub fn get(&self, key: &str) -> &Value {
        self.value.get_attr(key)
    }

    pub fn get_ok(&self, key: &str) -> Option<&Value> {
        self.value.attr(key).filter(|v| !v.is_null())
    }

    /// Sets a top-level attribute, converting `value` to its declared type.
    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let Some(current) = self.value.attr(key) else {
            bail!("resource has no attribute {:?}", key);
        };
        let value = cty::convert(&value, &current.ty())?;
        self.value = self
            .value
            .replace_at(&[PathStep::Attribute(key.to_string())], value)
            .with_context(|| format!("cannot set attribute {:?}", key))?;
        Ok(())
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The final state. Values still unknown after apply become null.
    pub fn into_state(self) -> Value {
        self.value.transform(&mut |_, v| {
            if v.is_known() {
                v
            } else {
                Value::null(v.ty())
            }
        })
    }
}

/// Create, read, update and delete for one resource type.
pub trait ResourceLifecycle: Send + Sync {
    /// Creates the resource from planned data and records its id and
    /// computed attributes.
    fn create(&self, data: &mut ResourceData) -> anyhow::Result<()>;

    /// Refreshes `data`. Returns `false` when the resource is gone.
    fn read(&self, data: &mut ResourceData) -> anyhow::Result<bool>;

    fn update(&self, data: &mut ResourceData) -> anyhow::Result<()>;

    fn delete(&self, data: &ResourceData) -> anyhow::Result<()>;

    /// Resources an import of `data` produces. By default the id alone,
    /// filled in by a subsequent read.
    fn import(&self, data: ResourceData) -> anyhow::Result<Vec<ResourceData>> {
        Ok(vec![data])
    }
}

#[derive(Clone)]
pub struct SdkResource {
    pub schema: LegacyResource,
    pub lifecycle: Arc<dyn ResourceLifecycle>,
}

impl SdkResource {
    pub fn new(schema: LegacyResource, lifecycle: impl ResourceLifecycle + 'static) -> Self {
        SdkResource {
            schema,
            lifecycle: Arc::new(lifecycle),
        }
    }
}

/// A provider runtime hosted in this process.
pub struct SdkProvider {
    schema: LegacyResource,
    resources: BTreeMap<String, SdkResource>,
    config: Mutex<Option<Value>>,
}

impl SdkProvider {
    pub fn new(schema: LegacyResource) -> Self {
        SdkProvider {
            schema,
            resources: BTreeMap::new(),
            config: Mutex::new(None),
        }
    }

    pub fn with_resource(mut self, name: impl Into<String>, resource: SdkResource) -> Self {
        self.resources.insert(name.into(), resource);
        self
    }

    /// The configuration of the last successful configure call.
    pub fn configured(&self) -> Option<Value> {
        self.config.lock().ok().and_then(|c| c.clone())
    }

    fn resource(&self, name: &str) -> anyhow::Result<(&SdkResource, Block)> {
        let resource = self
            .resources
            .get(name)
            .with_context(|| format!("unknown resource type {:?}", name))?;
        Ok((resource, resource.schema.core_config_schema()))
    }
}

fn private_with_version(mut private: Meta, version: i64) -> Meta {
    private.insert(
        SCHEMA_VERSION_KEY.to_string(),
        serde_json::Value::String(version.to_string()),
    );
    private
}

/// Missing required top-level attributes, as error diagnostics.
fn missing_required(block: &Block, config: &Value) -> Vec<Diagnostic> {
    block
        .attributes
        .iter()
        .filter(|(name, attr)| {
            attr.required && config.attr(name).map_or(true, Value::is_null)
        })
        .map(|(name, _)| {
            Diagnostic::error(
                "Missing required argument",
                format!("The argument {:?} is required, but no definition was found.", name),
            )
            .with_attribute(AttributePath::new().attribute(name.clone()))
        })
        .collect()
}

/// Concrete paths of a `force_new` attribute in `value`, one per element of
/// each enclosing nested block.
fn force_new_paths(value: &Value, names: &[String], base: AttributePath, out: &mut Vec<AttributePath>) {
    let Some((first, rest)) = names.split_first() else {
        out.push(base);
        return;
    };
    let path = base.attribute(first.clone());
    if rest.is_empty() {
        out.push(path);
        return;
    }
    match value.attr(first).map(Value::unmarked_ref) {
        Some(Value::List(_, elems)) => {
            for (i, e) in elems.iter().enumerate() {
                force_new_paths(e, rest, path.clone().index(i as i64), out);
            }
        }
        Some(Value::Set(_, elems)) => {
            for e in elems {
                force_new_paths(e, rest, path.clone().element(e.unmark_deep()), out);
            }
        }
        _ => out.push(path),
    }
}

impl<V: WireValue> ProviderProtocol<V> for SdkProvider {
    fn get_provider_schema(&self) -> anyhow::Result<GetProviderSchemaResponse> {
        let mut schema = ProviderSchema {
            provider: Some(Schema {
                version: self.schema.schema_version,
                block: Block::from_view(&self.schema),
            }),
            ..Default::default()
        };
        for (name, r) in &self.resources {
            schema.resource_schemas.insert(
                name.clone(),
                Schema {
                    version: r.schema.schema_version,
                    block: r.schema.core_config_schema(),
                },
            );
        }
        Ok(GetProviderSchemaResponse {
            schema,
            diagnostics: Vec::new(),
        })
    }

    fn configure_provider(
        &self,
        request: ConfigureProviderRequest<V>,
    ) -> anyhow::Result<ConfigureProviderResponse> {
        let block = Block::from_view(&self.schema);
        let config = request.config.decode(&block.implied_type())?;
        let diagnostics = missing_required(&block, &config);
        if diagnostics.is_empty() {
            if let Ok(mut slot) = self.config.lock() {
                *slot = Some(config);
            }
        }
        Ok(ConfigureProviderResponse { diagnostics })
    }

    fn plan_resource_change(
        &self,
        request: PlanResourceChangeRequest<V>,
    ) -> anyhow::Result<PlanResourceChangeResponse<V>> {
        let (resource, block) = self.resource(&request.type_name)?;
        let ty = block.implied_type();
        let prior = request.prior_state.decode(&ty)?;
        let config = request.config.decode(&ty)?;
        let mut planned = request.proposed_new_state.decode(&ty)?;

        let diagnostics = if config.is_null() {
            Vec::new()
        } else {
            missing_required(&block, &config)
        };
        let mut requires_replace = Vec::new();

        if !prior.is_null() && !planned.is_null() {
            let changes = diff::value_diff(
                &timeouts::strip_timeouts(prior.clone()),
                &timeouts::strip_timeouts(planned.clone()),
            );
            if !changes.is_empty() {
                // Computed-only attributes are recomputed by the update.
                for (name, attr) in &block.attributes {
                    if attr.computed && !attr.optional && name != "id" {
                        let step = [PathStep::Attribute(name.clone())];
                        if let Some(v) = planned.replace_at(&step, Value::unknown(attr.r#type.clone())) {
                            planned = v;
                        }
                    }
                }
            }
            let mut candidates = Vec::new();
            for names in resource.schema.force_new_attributes() {
                force_new_paths(&prior, &names, AttributePath::new(), &mut candidates);
                force_new_paths(&planned, &names, AttributePath::new(), &mut candidates);
            }
            for path in candidates {
                let changed = match (prior.walk_path(&path), planned.walk_path(&path)) {
                    (Some(b), Some(a)) => b.equals(a) != Some(true),
                    (None, None) => false,
                    _ => true,
                };
                if changed && !requires_replace.contains(&path) {
                    requires_replace.push(path);
                }
            }
        }

        Ok(PlanResourceChangeResponse {
            planned_state: V::encode(&planned, &ty)?,
            requires_replace,
            planned_private: private_with_version(
                request.prior_private,
                resource.schema.schema_version,
            ),
            diagnostics,
        })
    }

    fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest<V>,
    ) -> anyhow::Result<ApplyResourceChangeResponse<V>> {
        let (resource, block) = self.resource(&request.type_name)?;
        let ty = block.implied_type();
        let prior = request.prior_state.decode(&ty)?;
        let planned = request.planned_state.decode(&ty)?;
        let lifecycle = &resource.lifecycle;

        let new_state = if planned.is_null() {
            lifecycle.delete(&ResourceData::new(prior))?;
            Value::null(ty.clone())
        } else {
            let mut data = ResourceData::new(planned);
            if prior.is_null() {
                lifecycle.create(&mut data)?;
                if data.id().is_none() {
                    bail!("{} create did not set an id", request.type_name);
                }
            } else {
                lifecycle.update(&mut data)?;
            }
            data.into_state()
        };

        Ok(ApplyResourceChangeResponse {
            new_state: V::encode(&new_state, &ty)?,
            private: private_with_version(request.planned_private, resource.schema.schema_version),
            diagnostics: Vec::new(),
        })
    }

    fn read_resource(
        &self,
        request: ReadResourceRequest<V>,
    ) -> anyhow::Result<ReadResourceResponse<V>> {
        let (resource, block) = self.resource(&request.type_name)?;
        let ty = block.implied_type();
        let current = request.current_state.decode(&ty)?;
        let new_state = if current.is_null() {
            current
        } else {
            let mut data = ResourceData::new(current);
            if resource.lifecycle.read(&mut data)? {
                data.into_state()
            } else {
                Value::null(ty.clone())
            }
        };
        Ok(ReadResourceResponse {
            new_state: V::encode(&new_state, &ty)?,
            private: request.private,
            diagnostics: Vec::new(),
        })
    }

    fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> anyhow::Result<ImportResourceStateResponse<V>> {
        let (resource, block) = self.resource(&request.type_name)?;
        let ty = block.implied_type();
        let imported = resource
            .lifecycle
            .import(ResourceData::for_id(&ty, &request.id))?;
        let imported_resources = imported
            .into_iter()
            .map(|data| {
                Ok(ImportedResource {
                    type_name: request.type_name.clone(),
                    state: V::encode(data.value(), &ty)?,
                    private: private_with_version(Meta::new(), resource.schema.schema_version),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ImportResourceStateResponse {
            imported_resources,
            diagnostics: Vec::new(),
        })
    }

    fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> anyhow::Result<UpgradeResourceStateResponse<V>> {
        let (resource, block) = self.resource(&request.type_name)?;
        let ty = block.implied_type();
        let state = match request.raw_state {
            RawState::Json(bytes) => PersistedState::Raw {
                attributes: serde_json::from_slice(&bytes)
                    .context("persisted state is not a JSON object")?,
                version: request.version,
            },
            RawState::Flatmap(attributes) => PersistedState::Flatmap {
                attributes,
                version: request.version,
            },
        };
        let target = UpgradeTarget {
            resource_type: &request.type_name,
            current_version: resource.schema.schema_version,
            upgraders: &resource.schema.state_upgraders,
            ty: &ty,
        };
        let upgraded = upgrade::upgrade(&target, state)?;
        Ok(UpgradeResourceStateResponse {
            upgraded_state: V::encode(&upgraded.value, &ty)?,
            identity_change: upgraded.identity_change,
            diagnostics: Vec::new(),
        })
    }
}
