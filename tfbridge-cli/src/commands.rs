//! The offline operations behind each subcommand. They return JSON so that
//! `main` only has to print.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value as Json};
use tfbridge::config::{BridgeOptions, DiffStrategy};
use tfbridge::cty::Value;
use tfbridge::instance::DiffOverride;
use tfbridge::schema::{ProviderSchema, Schema};
use tfbridge::{diff, flatmap, objchange, projection};

fn read_json(path: &Path) -> Result<Json> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub(crate) fn load_schema(path: &Path) -> Result<ProviderSchema> {
    serde_json::from_value(read_json(path)?)
        .with_context(|| format!("{} is not a provider schema", path.display()))
}

pub(crate) fn load_options(path: &Path) -> Result<BridgeOptions> {
    serde_json::from_value(read_json(path)?)
        .with_context(|| format!("{} is not a bridge options document", path.display()))
}

/// A resource schema with prior state and configuration, both recovered
/// strictly against its implied type.
pub(crate) struct Input {
    pub resource_type: String,
    pub schema: Schema,
    pub prior: Value,
    pub config: Value,
}

impl Input {
    pub(crate) fn load(
        schema: &Path,
        resource_type: &str,
        prior: Option<&Path>,
        config: Option<&Path>,
    ) -> Result<Input> {
        let provider_schema = load_schema(schema)?;
        let schema = provider_schema.resource(resource_type)?.clone();
        let ty = schema.block.implied_type();
        let prior = match prior {
            Some(path) => projection::recover(&read_json(path)?, &ty)
                .with_context(|| format!("prior state in {} does not match the schema", path.display()))?,
            None => Value::null(ty.clone()),
        };
        let config = match config {
            Some(path) => projection::recover(&read_json(path)?, &ty)
                .with_context(|| format!("configuration in {} does not match the schema", path.display()))?,
            None => Value::null(ty.clone()),
        };
        Ok(Input {
            resource_type: resource_type.to_string(),
            schema,
            prior,
            config,
        })
    }

    fn proposed(&self) -> Value {
        let config = objchange::normalize_block_collections(&self.schema.block, &self.config);
        objchange::proposed_new(&self.schema.block, &self.prior, &config)
    }
}

pub(crate) fn schema_summary(schema: &ProviderSchema) -> Json {
    let mut names = schema.resource_names();
    names.sort_unstable();
    let resources: serde_json::Map<String, Json> = names
        .into_iter()
        .filter_map(|name| {
            let s = schema.get_resource_schema(name)?;
            Some((
                name.to_string(),
                json!({
                    "version": s.version,
                    "implied_type": s.block.implied_type().to_json(),
                }),
            ))
        })
        .collect();
    json!({ "resources": resources })
}

pub(crate) fn propose(input: &Input) -> Result<Json> {
    Ok(projection::object_from_value(&input.proposed()))
}

/// Diff of prior state against the proposed state, standing in for the plan
/// a provider would return.
pub(crate) fn plan_diff(input: &Input, options: &BridgeOptions, ignore_changes: &[String]) -> Result<Json> {
    let config = diff::apply_ignore_changes(
        &input.schema.block,
        &input.prior,
        &input.config,
        ignore_changes,
    );
    let planned = objchange::proposed_new(
        &input.schema.block,
        &input.prior,
        &objchange::normalize_block_collections(&input.schema.block, &config),
    );
    let (attributes, _) = diff::attribute_diffs(&input.prior, &planned, &[]);
    let changed_keys: Vec<String> = match options.diff_strategy_for(&input.resource_type) {
        DiffStrategy::PlanState => diff::changed_keys(&diff::without_unknown_resolution(
            diff::value_diff(&input.prior, &planned),
        ))
        .into_iter()
        .filter(|k| !ignore_changes.contains(k))
        .collect(),
        DiffStrategy::Classic => attributes
            .keys()
            .filter_map(|k| k.split('.').next())
            .filter(|k| !ignore_changes.iter().any(|i| i == k))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };
    let diff_override = match input.prior.equals(&planned) {
        Some(true) => DiffOverride::NoUpdate,
        _ => DiffOverride::Update,
    };
    Ok(json!({
        "changed_keys": changed_keys,
        "attributes": serde_json::to_value(&attributes)?,
        "diff_override": serde_json::to_value(diff_override)?,
        "planned": projection::object_from_value(&planned),
    }))
}

pub(crate) fn flatten(input: &Input) -> Result<Json> {
    if input.prior.is_null() {
        anyhow::bail!("flatten needs a prior state");
    }
    Ok(serde_json::to_value(flatmap::flatten(&input.prior))?)
}
