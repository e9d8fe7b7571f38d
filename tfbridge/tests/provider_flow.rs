use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as Json};
use tfbridge::config::{BridgeOptions, DiffStrategy, StateReadStrategy};
use tfbridge::cty::{Type, Value};
use tfbridge::instance::{DiffChanges, DiffOverride, InstanceState, Meta, SCHEMA_VERSION_KEY};
use tfbridge::legacy::{LegacyResource, LegacySchema};
use tfbridge::protocol::ProviderServer;
use tfbridge::provider::{DiffOptions, Provider, ResourceStrategy};
use tfbridge::sdk::{ResourceData, ResourceLifecycle, SdkProvider, SdkResource};
use tfbridge::timeouts::{TimeoutKey, TimeoutOptions};
use tfbridge::upgrade::{IdentityChange, StateUpgrader};

const BIG: &str = "641577219598130723";

/// Servers kept in memory, keyed by id.
#[derive(Clone, Default)]
struct Servers(Arc<Mutex<BTreeMap<String, Value>>>);

impl Servers {
    fn get(&self, id: &str) -> Option<Value> {
        self.0.lock().unwrap().get(id).cloned()
    }

    fn remove(&self, id: &str) {
        self.0.lock().unwrap().remove(id);
    }
}

impl ResourceLifecycle for Servers {
    fn create(&self, data: &mut ResourceData) -> anyhow::Result<()> {
        let name = data.get("name").as_str().unwrap_or_default().to_string();
        data.set_id(format!("srv-{}", name))?;
        data.set("arn", Value::string(format!("arn:srv-{}", name)))?;
        let id = data.id().unwrap_or_default().to_string();
        self.0.lock().unwrap().insert(id, data.value().clone());
        Ok(())
    }

    fn read(&self, data: &mut ResourceData) -> anyhow::Result<bool> {
        let id = data.id().unwrap_or_default().to_string();
        match self.get(&id) {
            Some(stored) => {
                *data = ResourceData::new(stored);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update(&self, data: &mut ResourceData) -> anyhow::Result<()> {
        let id = data.id().unwrap_or_default().to_string();
        data.set("arn", Value::string(format!("arn:{}", id)))?;
        self.0.lock().unwrap().insert(id, data.value().clone());
        Ok(())
    }

    fn delete(&self, data: &ResourceData) -> anyhow::Result<()> {
        self.remove(data.id().unwrap_or_default());
        Ok(())
    }
}

fn server_schema() -> LegacyResource {
    let flags = LegacyResource::new()
        .with("universal_login", LegacySchema::bool().optional())
        .with("enable_sso", LegacySchema::bool().optional());
    LegacyResource::new()
        .with("name", LegacySchema::string().required().force_new())
        .with("size", LegacySchema::int().optional())
        .with("tags", LegacySchema::map_of(LegacySchema::string()).optional())
        .with("arn", LegacySchema::string().computed())
        .with("flags", LegacySchema::list_block(flags).optional())
        .with_timeout(TimeoutKey::Create)
        .with_schema_version(1)
        .with_upgrader(StateUpgrader::new(0, |mut state| {
            let title = state.remove("title").unwrap_or(Json::Null);
            state.insert("name".into(), title);
            Ok(state)
        }))
}

/// Version 0 stored bare names as ids.
fn legacy_id_schema() -> LegacyResource {
    LegacyResource::new()
        .with("name", LegacySchema::string().required())
        .with_schema_version(1)
        .with_upgrader(StateUpgrader::new(0, |mut state| {
            let id = match state.get("id") {
                Some(Json::String(id)) => format!("srv-{}", id),
                _ => return Ok(state),
            };
            state.insert("id".into(), Json::String(id));
            Ok(state)
        }))
}

fn runtime(servers: &Servers) -> SdkProvider {
    SdkProvider::new(LegacyResource::new())
        .with_resource("example_server", SdkResource::new(server_schema(), servers.clone()))
        .with_resource(
            "example_legacy_id",
            SdkResource::new(legacy_id_schema(), servers.clone()),
        )
}

fn provider(options: BridgeOptions) -> (Provider, Servers) {
    let servers = Servers::default();
    let server = ProviderServer::V5(Arc::new(runtime(&servers)));
    let provider = Provider::new(server, options).unwrap();
    (provider, servers)
}

fn provider_v6(options: BridgeOptions) -> (Provider, Servers) {
    let servers = Servers::default();
    let server = ProviderServer::V6(Arc::new(runtime(&servers)));
    let provider = Provider::new(server, options).unwrap();
    (provider, servers)
}

fn object(v: Json) -> serde_json::Map<String, Json> {
    v.as_object().cloned().unwrap()
}

fn base_config() -> Json {
    json!({
        "name": "web",
        "size": 641577219598130723u64,
        "flags": [{"universal_login": true}],
    })
}

fn create(provider: &Provider) -> InstanceState {
    let config = provider.new_resource_config("example_server", object(base_config()));
    let diff = provider
        .diff("example_server", None, &config, &DiffOptions::default())
        .unwrap();
    provider
        .apply("example_server", None, &diff)
        .unwrap()
        .unwrap()
}

#[test]
fn create_plans_and_applies() {
    let (provider, servers) = provider(BridgeOptions::default());
    let config = provider.new_resource_config("example_server", object(base_config()));
    let diff = provider
        .diff("example_server", None, &config, &DiffOptions::default())
        .unwrap();
    assert_eq!(diff.changes(), DiffChanges::Some);
    assert_eq!(diff.diff_override, DiffOverride::Update);
    assert!(diff.changed_keys.contains("name"));
    assert!(diff.replace_keys.is_empty());
    assert!(!diff.planned.get_attr("arn").is_known());
    assert!(diff.attribute("arn").is_some_and(|a| a.new_computed));

    let state = provider.apply("example_server", None, &diff).unwrap().unwrap();
    assert_eq!(state.id(), Some("srv-web"));
    assert_eq!(state.schema_version(), 1);
    assert!(servers.get("srv-web").is_some());

    let object = provider.resource_object(&state).unwrap();
    assert_eq!(object["arn"], json!("arn:srv-web"));
    assert_eq!(object["size"], json!(641577219598130723u64));
    assert!(!object.contains_key("timeouts"));
}

#[test]
fn nested_block_fields_stay_null() {
    let (provider, _) = provider(BridgeOptions::default());
    let config = provider.new_resource_config("example_server", object(base_config()));
    let diff = provider
        .diff("example_server", None, &config, &DiffOptions::default())
        .unwrap();
    let flags = diff.planned.get_attr("flags");
    assert_eq!(flags.length(), Some(1));
    let element = &flags.elements().unwrap()[0];
    assert_eq!(element.get_attr("universal_login"), &Value::bool(true));
    assert_eq!(element.get_attr("enable_sso"), &Value::null(Type::Bool));
}

#[test]
fn unchanged_config_is_a_no_op() {
    let (provider, _) = provider(BridgeOptions::default());
    let state = create(&provider);
    let config = provider.new_resource_config("example_server", object(base_config()));
    let diff = provider
        .diff("example_server", Some(&state), &config, &DiffOptions::default())
        .unwrap();
    assert_eq!(diff.changes(), DiffChanges::None);
    assert_eq!(diff.diff_override, DiffOverride::NoUpdate);
    assert!(diff.attributes.is_empty());
}

#[test]
fn force_new_change_requires_replacement() {
    let (provider, _) = provider(BridgeOptions::default());
    let state = create(&provider);
    let mut raw = object(base_config());
    raw.insert("name".into(), json!("api"));
    let config = provider.new_resource_config("example_server", raw);
    let diff = provider
        .diff("example_server", Some(&state), &config, &DiffOptions::default())
        .unwrap();
    assert!(diff.replace_keys.contains("name"));
    assert!(diff.requires_new);
    assert!(diff.attribute("name").is_some_and(|a| a.requires_new));
}

#[test]
fn ignored_changes_are_suppressed() {
    let (provider, _) = provider(BridgeOptions::default());
    let state = create(&provider);
    let mut raw = object(base_config());
    raw.insert("tags".into(), json!({"env": "prod"}));
    let config = provider.new_resource_config("example_server", raw);

    let diff = provider
        .diff("example_server", Some(&state), &config, &DiffOptions::default())
        .unwrap();
    assert!(diff.changed_keys.contains("tags"));

    let opts = DiffOptions {
        ignore_changes: vec!["tags".into()],
        ..Default::default()
    };
    let diff = provider
        .diff("example_server", Some(&state), &config, &opts)
        .unwrap();
    assert_eq!(diff.changes(), DiffChanges::None);
    assert!(diff.attributes.keys().all(|k| !k.starts_with("tags")));
}

#[test]
fn classic_strategy_uses_flat_keys() {
    let (provider, _) = provider(BridgeOptions::default());
    provider.register_strategy(
        "example_server",
        ResourceStrategy {
            diff: DiffStrategy::Classic,
            state_read: StateReadStrategy::Flatmap,
        },
    );
    let state = create(&provider);
    let mut raw = object(base_config());
    raw.insert("tags".into(), json!({"env": "prod"}));
    let config = provider.new_resource_config("example_server", raw);
    let diff = provider
        .diff("example_server", Some(&state), &config, &DiffOptions::default())
        .unwrap();
    assert!(diff.changed_keys.contains("tags"));
    assert_eq!(diff.attribute("tags.env").map(|a| a.new.as_str()), Some("prod"));
    assert_eq!(diff.attribute("tags.%").map(|a| a.new.as_str()), Some("1"));

    let object = provider.resource_object(&state).unwrap();
    assert_eq!(object["size"], json!(641577219598130723u64));
}

#[test]
fn timeouts_are_passed_through_config() {
    let (provider, _) = provider(BridgeOptions::default());
    let state = create(&provider);
    let config = provider.new_resource_config("example_server", object(base_config()));
    let opts = DiffOptions {
        timeouts: Some(TimeoutOptions {
            create: Some(Duration::from_secs(600)),
            delete: Some(Duration::from_secs(300)),
            ..Default::default()
        }),
        ..Default::default()
    };
    let diff = provider
        .diff("example_server", Some(&state), &config, &opts)
        .unwrap();
    assert_eq!(
        diff.planned.get_attr("timeouts").get_attr("create"),
        &Value::string("10m0s")
    );
    assert_eq!(diff.changes(), DiffChanges::None);
    assert_eq!(diff.diff_override, DiffOverride::NoUpdate);
}

#[test]
fn large_integer_survives_write_read_upgrade() {
    let (provider, _) = provider(BridgeOptions::default());
    let state = create(&provider);

    // Persist the way the host does, then read it back as a version 0 state
    // that still calls the name `title`.
    let written = serde_json::to_string(&provider.resource_object(&state).unwrap()).unwrap();
    let mut read: serde_json::Map<String, Json> = serde_json::from_str(&written).unwrap();
    let name = read.remove("name").unwrap();
    read.insert("title".into(), name);

    let mut meta = Meta::new();
    meta.insert(SCHEMA_VERSION_KEY.into(), json!("0"));
    let upgraded = provider
        .instance_state("example_server", "srv-web", read, meta)
        .unwrap();
    assert!(upgraded.upgraded);
    assert_eq!(upgraded.schema_version(), 1);
    assert_eq!(upgraded.value.get_attr("name"), &Value::string("web"));
    assert_eq!(
        upgraded.value.get_attr("size").as_number().unwrap().to_string(),
        BIG
    );
    let object = provider.resource_object(&upgraded).unwrap();
    assert_eq!(object["size"].to_string(), BIG);

    let again = provider.upgrade_state("example_server", &upgraded).unwrap();
    assert_eq!(again, upgraded);
}

#[test]
fn refresh_import_and_destroy() {
    let (provider, servers) = provider(BridgeOptions::default());
    let state = create(&provider);

    let refreshed = provider.refresh("example_server", &state).unwrap().unwrap();
    assert_eq!(refreshed.value, state.value);

    let imported = provider.import("example_server", "srv-web").unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].value.get_attr("name"), &Value::string("web"));

    let destroy = provider.new_destroy_diff("example_server");
    assert!(provider
        .apply("example_server", Some(&state), &destroy)
        .unwrap()
        .is_none());
    assert!(servers.get("srv-web").is_none());
    assert!(provider.refresh("example_server", &state).unwrap().is_none());
}

#[test]
fn misspelled_attribute_is_rejected_before_planning() {
    let (provider, servers) = provider(BridgeOptions::default());
    let mut raw = object(base_config());
    raw.insert("nmae".into(), json!("web"));
    let config = provider.new_resource_config("example_server", raw);
    match provider.diff("example_server", None, &config, &DiffOptions::default()) {
        Err(tfbridge::Error::Convert { path, message }) => {
            assert_eq!(path.to_string(), "nmae");
            assert_eq!(message, "unsupported attribute");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(servers.get("srv-web").is_none());
}

#[test]
fn upgrade_reports_rewritten_identity() {
    let (provider, _) = provider(BridgeOptions::default());
    let mut meta = Meta::new();
    meta.insert(SCHEMA_VERSION_KEY.into(), json!("0"));
    let state = provider
        .instance_state(
            "example_legacy_id",
            "web",
            object(json!({"id": "web", "name": "web"})),
            meta,
        )
        .unwrap();
    assert_eq!(state.id(), Some("srv-web"));
    assert_eq!(
        state.identity_change,
        Some(IdentityChange {
            from: Some("web".into()),
            to: Some("srv-web".into()),
        })
    );

    let mut meta = Meta::new();
    meta.insert(SCHEMA_VERSION_KEY.into(), json!("1"));
    let current = provider
        .instance_state(
            "example_legacy_id",
            "srv-web",
            object(json!({"id": "srv-web", "name": "web"})),
            meta,
        )
        .unwrap();
    assert_eq!(current.identity_change, None);
}

#[test]
fn protocol_v6_lifecycle() {
    let (provider, servers) = provider_v6(BridgeOptions::default());
    let state = create(&provider);
    assert_eq!(state.id(), Some("srv-web"));
    assert!(servers.get("srv-web").is_some());
    assert_eq!(
        state.value.get_attr("size").as_number().unwrap().to_string(),
        BIG
    );

    let refreshed = provider.refresh("example_server", &state).unwrap().unwrap();
    assert_eq!(refreshed.value, state.value);

    let config = provider.new_resource_config("example_server", object(base_config()));
    let diff = provider
        .diff("example_server", Some(&refreshed), &config, &DiffOptions::default())
        .unwrap();
    assert_eq!(diff.changes(), DiffChanges::None);

    let mut raw = object(base_config());
    raw.insert("size".into(), json!(2));
    let config = provider.new_resource_config("example_server", raw);
    let diff = provider
        .diff("example_server", Some(&refreshed), &config, &DiffOptions::default())
        .unwrap();
    assert!(diff.changed_keys.contains("size"));
    let updated = provider
        .apply("example_server", Some(&refreshed), &diff)
        .unwrap()
        .unwrap();
    assert_eq!(updated.value.get_attr("size"), &Value::number(2));
    assert_eq!(updated.value.get_attr("arn"), &Value::string("arn:srv-web"));

    let imported = provider.import("example_server", "srv-web").unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].value.get_attr("size"), &Value::number(2));
}
