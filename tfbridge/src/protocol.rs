//! Boundary with the wrapped provider runtime.
//!
//! The runtime speaks one of two protocol generations. Version 5 exchanges
//! msgpack-encoded [`DynamicValue`]s, version 6 exchanges [`tftypes::Value`]s.
//! Both are described by the same [`ProviderProtocol`] trait, instantiated
//! with the generation's value type, and wrapped in a [`ProviderServer`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bridge;
use crate::cty::{self, msgpack, Type, Value};
use crate::error::Result;
use crate::instance::Meta;
use crate::path::AttributePath;
use crate::schema::ProviderSchema;
use crate::tftypes;
use crate::upgrade::IdentityChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Invalid,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub attribute: Option<AttributePath>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(summary, detail)
        }
    }

    pub fn with_attribute(mut self, path: AttributePath) -> Self {
        self.attribute = Some(path);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.summary)
        } else {
            write!(f, "{}: {}", self.summary, self.detail)
        }
    }
}

/// A value msgpack-encoded against a type both sides know.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicValue {
    pub msgpack: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct GetProviderSchemaResponse {
    pub schema: ProviderSchema,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ConfigureProviderRequest<V> {
    pub config: V,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigureProviderResponse {
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct PlanResourceChangeRequest<V> {
    pub type_name: String,
    pub prior_state: V,
    pub proposed_new_state: V,
    pub config: V,
    pub prior_private: Meta,
}

#[derive(Debug, Clone)]
pub struct PlanResourceChangeResponse<V> {
    pub planned_state: V,
    pub requires_replace: Vec<AttributePath>,
    pub planned_private: Meta,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ApplyResourceChangeRequest<V> {
    pub type_name: String,
    pub prior_state: V,
    pub planned_state: V,
    pub config: V,
    pub planned_private: Meta,
}

#[derive(Debug, Clone)]
pub struct ApplyResourceChangeResponse<V> {
    pub new_state: V,
    pub private: Meta,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ReadResourceRequest<V> {
    pub type_name: String,
    pub current_state: V,
    pub private: Meta,
}

#[derive(Debug, Clone)]
pub struct ReadResourceResponse<V> {
    pub new_state: V,
    pub private: Meta,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ImportResourceStateRequest {
    pub type_name: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ImportedResource<V> {
    pub type_name: String,
    pub state: V,
    pub private: Meta,
}

#[derive(Debug, Clone)]
pub struct ImportResourceStateResponse<V> {
    pub imported_resources: Vec<ImportedResource<V>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Persisted state exactly as stored: JSON bytes, or flat attributes for
/// state written by the oldest runtimes.
#[derive(Debug, Clone, PartialEq)]
pub enum RawState {
    Json(Vec<u8>),
    Flatmap(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
pub struct UpgradeResourceStateRequest {
    pub type_name: String,
    pub version: i64,
    pub raw_state: RawState,
}

#[derive(Debug, Clone)]
pub struct UpgradeResourceStateResponse<V> {
    pub upgraded_state: V,
    /// Set when an upgrader renamed or rewrote the `id` attribute.
    pub identity_change: Option<IdentityChange>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Operations consumed from the wrapped runtime, for one protocol
/// generation's value type `V`.
pub trait ProviderProtocol<V>: Send + Sync {
    fn get_provider_schema(&self) -> anyhow::Result<GetProviderSchemaResponse>;

    fn configure_provider(
        &self,
        request: ConfigureProviderRequest<V>,
    ) -> anyhow::Result<ConfigureProviderResponse>;

    fn plan_resource_change(
        &self,
        request: PlanResourceChangeRequest<V>,
    ) -> anyhow::Result<PlanResourceChangeResponse<V>>;

    fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest<V>,
    ) -> anyhow::Result<ApplyResourceChangeResponse<V>>;

    fn read_resource(&self, request: ReadResourceRequest<V>)
        -> anyhow::Result<ReadResourceResponse<V>>;

    fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> anyhow::Result<ImportResourceStateResponse<V>>;

    fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> anyhow::Result<UpgradeResourceStateResponse<V>>;
}

/// Encoding of structural values for one protocol generation.
pub trait WireValue: Sized {
    fn encode(value: &Value, ty: &Type) -> Result<Self>;
    fn decode(self, ty: &Type) -> Result<Value>;
}

impl WireValue for DynamicValue {
    fn encode(value: &Value, ty: &Type) -> Result<Self> {
        Ok(DynamicValue {
            msgpack: msgpack::encode(value, ty)?,
        })
    }

    fn decode(self, ty: &Type) -> Result<Value> {
        msgpack::decode(&self.msgpack, ty)
    }
}

impl WireValue for tftypes::Value {
    fn encode(value: &Value, ty: &Type) -> Result<Self> {
        Ok(bridge::to_tfvalue(&cty::convert(value, ty)?))
    }

    fn decode(self, ty: &Type) -> Result<Value> {
        cty::convert(&bridge::from_tfvalue(&self)?, ty)
    }
}

/// A connected provider runtime of either protocol generation.
#[derive(Clone)]
pub enum ProviderServer {
    V5(Arc<dyn ProviderProtocol<DynamicValue>>),
    V6(Arc<dyn ProviderProtocol<tftypes::Value>>),
}

impl fmt::Debug for ProviderServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderServer::V5(_) => write!(f, "ProviderServer::V5"),
            ProviderServer::V6(_) => write!(f, "ProviderServer::V6"),
        }
    }
}

/// Dispatches a call to whichever generation is connected, with `$call`
/// written once against a generic server.
macro_rules! dispatch {
    ($server:expr, $call:ident ( $($arg:expr),* )) => {
        match $server {
            ProviderServer::V5(s) => $call(&**s, $($arg),*),
            ProviderServer::V6(s) => $call(&**s, $($arg),*),
        }
    };
}

impl ProviderServer {
    pub fn get_provider_schema(&self) -> Result<GetProviderSchemaResponse> {
        let response = match self {
            ProviderServer::V5(s) => s.get_provider_schema()?,
            ProviderServer::V6(s) => s.get_provider_schema()?,
        };
        Ok(response)
    }

    pub fn configure_provider(&self, config: &Value, ty: &Type) -> Result<ConfigureProviderResponse> {
        dispatch!(self, configure_with(config, ty))
    }

    pub fn plan_resource_change(
        &self,
        request: PlanResourceChangeRequest<Value>,
        ty: &Type,
    ) -> Result<PlanResourceChangeResponse<Value>> {
        dispatch!(self, plan_with(request, ty))
    }

    pub fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest<Value>,
        ty: &Type,
    ) -> Result<ApplyResourceChangeResponse<Value>> {
        dispatch!(self, apply_with(request, ty))
    }

    pub fn read_resource(
        &self,
        request: ReadResourceRequest<Value>,
        ty: &Type,
    ) -> Result<ReadResourceResponse<Value>> {
        dispatch!(self, read_with(request, ty))
    }

    /// Imported resources are decoded against the schema of their own type,
    /// which need not be the requested one.
    pub fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
        schema: &ProviderSchema,
    ) -> Result<ImportResourceStateResponse<Value>> {
        dispatch!(self, import_with(request, schema))
    }

    pub fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
        ty: &Type,
    ) -> Result<UpgradeResourceStateResponse<Value>> {
        dispatch!(self, upgrade_with(request, ty))
    }
}

fn configure_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    config: &Value,
    ty: &Type,
) -> Result<ConfigureProviderResponse> {
    let config = V::encode(config, ty)?;
    Ok(server.configure_provider(ConfigureProviderRequest { config })?)
}

fn plan_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    request: PlanResourceChangeRequest<Value>,
    ty: &Type,
) -> Result<PlanResourceChangeResponse<Value>> {
    let response = server.plan_resource_change(PlanResourceChangeRequest {
        type_name: request.type_name,
        prior_state: V::encode(&request.prior_state, ty)?,
        proposed_new_state: V::encode(&request.proposed_new_state, ty)?,
        config: V::encode(&request.config, ty)?,
        prior_private: request.prior_private,
    })?;
    Ok(PlanResourceChangeResponse {
        planned_state: response.planned_state.decode(ty)?,
        requires_replace: response.requires_replace,
        planned_private: response.planned_private,
        diagnostics: response.diagnostics,
    })
}

fn apply_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    request: ApplyResourceChangeRequest<Value>,
    ty: &Type,
) -> Result<ApplyResourceChangeResponse<Value>> {
    let response = server.apply_resource_change(ApplyResourceChangeRequest {
        type_name: request.type_name,
        prior_state: V::encode(&request.prior_state, ty)?,
        planned_state: V::encode(&request.planned_state, ty)?,
        config: V::encode(&request.config, ty)?,
        planned_private: request.planned_private,
    })?;
    Ok(ApplyResourceChangeResponse {
        new_state: response.new_state.decode(ty)?,
        private: response.private,
        diagnostics: response.diagnostics,
    })
}

fn read_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    request: ReadResourceRequest<Value>,
    ty: &Type,
) -> Result<ReadResourceResponse<Value>> {
    let response = server.read_resource(ReadResourceRequest {
        type_name: request.type_name,
        current_state: V::encode(&request.current_state, ty)?,
        private: request.private,
    })?;
    Ok(ReadResourceResponse {
        new_state: response.new_state.decode(ty)?,
        private: response.private,
        diagnostics: response.diagnostics,
    })
}

fn import_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    request: ImportResourceStateRequest,
    schema: &ProviderSchema,
) -> Result<ImportResourceStateResponse<Value>> {
    let response = server.import_resource_state(request)?;
    let imported_resources = response
        .imported_resources
        .into_iter()
        .map(|r| {
            let ty = schema.resource(&r.type_name)?.block.implied_type();
            Ok(ImportedResource {
                state: r.state.decode(&ty)?,
                type_name: r.type_name,
                private: r.private,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ImportResourceStateResponse {
        imported_resources,
        diagnostics: response.diagnostics,
    })
}

fn upgrade_with<V: WireValue>(
    server: &dyn ProviderProtocol<V>,
    request: UpgradeResourceStateRequest,
    ty: &Type,
) -> Result<UpgradeResourceStateResponse<Value>> {
    let response = server.upgrade_resource_state(request)?;
    Ok(UpgradeResourceStateResponse {
        upgraded_state: response.upgraded_state.decode(ty)?,
        identity_change: response.identity_change,
        diagnostics: response.diagnostics,
    })
}
