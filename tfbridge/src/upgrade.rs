//! Migration of persisted state to the current schema version.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::{Map, Value as Json};
use tracing::{debug, trace};

use crate::cty::{Type, Value};
use crate::error::{Error, Result};
use crate::flatmap;
use crate::projection;

pub type RawState = Map<String, Json>;

type UpgradeFn = dyn Fn(RawState) -> anyhow::Result<RawState> + Send + Sync;

/// Migrates raw state written at `version` to `version + 1`.
#[derive(Clone)]
pub struct StateUpgrader {
    pub version: i64,
    pub upgrade: Arc<UpgradeFn>,
}

impl StateUpgrader {
    pub fn new(
        version: i64,
        upgrade: impl Fn(RawState) -> anyhow::Result<RawState> + Send + Sync + 'static,
    ) -> Self {
        StateUpgrader {
            version,
            upgrade: Arc::new(upgrade),
        }
    }
}

impl fmt::Debug for StateUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpgrader")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// State as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistedState {
    /// JSON attributes as written by some schema version.
    Raw { attributes: RawState, version: i64 },
    /// Legacy flat attributes as written by some schema version.
    Flatmap {
        attributes: BTreeMap<String, String>,
        version: i64,
    },
    /// Already upgraded earlier in the same operation.
    Upgraded(UpgradedState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradedState {
    pub value: Value,
    pub version: i64,
    pub identity_change: Option<IdentityChange>,
}

/// The `id` attribute was renamed or rewritten by an upgrader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChange {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// What the pipeline needs to know about one resource type.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeTarget<'a> {
    pub resource_type: &'a str,
    pub current_version: i64,
    pub upgraders: &'a [StateUpgrader],
    /// Implied type of the current schema.
    pub ty: &'a Type,
}

/// Threads persisted state through the upgraders between its version and the
/// current one, then recovers it strictly against the current type.
///
/// Already-upgraded input is returned as is. Any upgrader failure aborts the
/// whole pipeline.
pub fn upgrade(target: &UpgradeTarget<'_>, state: PersistedState) -> Result<UpgradedState> {
    let (mut raw, version) = match state {
        PersistedState::Upgraded(upgraded) => return Ok(upgraded),
        PersistedState::Raw {
            attributes,
            version,
        } => (attributes, version),
        PersistedState::Flatmap {
            attributes,
            version,
        } => (flatmap::lift(&attributes, target.ty), version),
    };

    if version > target.current_version {
        return Err(Error::Upgrade {
            resource_type: target.resource_type.to_string(),
            from: version,
            to: target.current_version,
            source: anyhow!(
                "state was written by schema version {}, newer than this provider's {}",
                version,
                target.current_version
            ),
        });
    }

    let id_before = identity(&raw);
    let mut steps: Vec<&StateUpgrader> = target
        .upgraders
        .iter()
        .filter(|u| u.version >= version && u.version < target.current_version)
        .collect();
    steps.sort_by_key(|u| u.version);
    for step in steps {
        trace!(
            resource_type = target.resource_type,
            from = step.version,
            "applying state upgrader"
        );
        raw = (step.upgrade)(raw).map_err(|source| Error::Upgrade {
            resource_type: target.resource_type.to_string(),
            from: step.version,
            to: step.version + 1,
            source,
        })?;
    }

    let id_after = identity(&raw);
    let identity_change = (id_before != id_after).then(|| {
        debug!(
            resource_type = target.resource_type,
            from = ?id_before,
            to = ?id_after,
            "state upgrade changed the resource identity"
        );
        IdentityChange {
            from: id_before,
            to: id_after,
        }
    });

    let value = projection::recover(&Json::Object(raw), target.ty)?;
    Ok(UpgradedState {
        value,
        version: target.current_version,
        identity_change,
    })
}

fn identity(raw: &RawState) -> Option<String> {
    match raw.get("id")? {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn raw(v: Json) -> RawState {
        match v {
            Json::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn current_type() -> Type {
        Type::object([
            ("id", Type::String),
            ("name", Type::String),
            ("ports", Type::set(Type::Number)),
        ])
    }

    /// v0 had `port` as a scalar, v1 renamed `title` to `name`.
    fn upgraders() -> Vec<StateUpgrader> {
        vec![
            StateUpgrader::new(1, |mut state| {
                let title = state.remove("title").unwrap_or(Json::Null);
                state.insert("name".into(), title);
                Ok(state)
            }),
            StateUpgrader::new(0, |mut state| {
                let port = state.remove("port").unwrap_or(Json::Null);
                state.insert("ports".into(), json!([port]));
                Ok(state)
            }),
        ]
    }

    #[test]
    fn test_upgraders_run_in_ascending_order() {
        let ty = current_type();
        let upgraders = upgraders();
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 2,
            upgraders: &upgraders,
            ty: &ty,
        };
        let state = PersistedState::Raw {
            attributes: raw(json!({"id": "t-1", "title": "web", "port": 80})),
            version: 0,
        };
        let upgraded = upgrade(&target, state).unwrap();
        assert_eq!(upgraded.version, 2);
        assert_eq!(upgraded.identity_change, None);
        assert_eq!(
            upgraded.value,
            Value::object([
                ("id", Value::string("t-1")),
                ("name", Value::string("web")),
                ("ports", Value::set(Type::Number, vec![Value::number(80)])),
            ])
        );
    }

    #[test]
    fn test_only_pending_upgraders_run() {
        let ty = current_type();
        let upgraders = upgraders();
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 2,
            upgraders: &upgraders,
            ty: &ty,
        };
        let state = PersistedState::Raw {
            attributes: raw(json!({"id": "t-1", "title": "web", "ports": [443]})),
            version: 1,
        };
        let upgraded = upgrade(&target, state).unwrap();
        assert_eq!(upgraded.value.get_attr("name"), &Value::string("web"));
    }

    #[test]
    fn test_failure_names_transition() {
        let ty = current_type();
        let upgraders = vec![StateUpgrader::new(0, |_| Err(anyhow!("bad shape")))];
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 1,
            upgraders: &upgraders,
            ty: &ty,
        };
        let state = PersistedState::Raw {
            attributes: RawState::new(),
            version: 0,
        };
        match upgrade(&target, state) {
            Err(Error::Upgrade { from, to, .. }) => assert_eq!((from, to), (0, 1)),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_newer_state_is_rejected() {
        let ty = current_type();
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 1,
            upgraders: &[],
            ty: &ty,
        };
        let state = PersistedState::Raw {
            attributes: RawState::new(),
            version: 3,
        };
        assert!(matches!(
            upgrade(&target, state),
            Err(Error::Upgrade { from: 3, to: 1, .. })
        ));
    }

    #[test]
    fn test_identity_change_is_recorded() {
        let ty = current_type();
        let upgraders = vec![StateUpgrader::new(0, |mut state| {
            state.insert("id".into(), json!("new-id"));
            Ok(state)
        })];
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 1,
            upgraders: &upgraders,
            ty: &ty,
        };
        let state = PersistedState::Raw {
            attributes: raw(json!({"id": "old-id"})),
            version: 0,
        };
        let upgraded = upgrade(&target, state).unwrap();
        assert_eq!(
            upgraded.identity_change,
            Some(IdentityChange {
                from: Some("old-id".into()),
                to: Some("new-id".into()),
            })
        );
    }

    #[test]
    fn test_flatmap_fields_of_older_versions_reach_upgraders() {
        let ty = current_type();
        let upgraders = upgraders();
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 2,
            upgraders: &upgraders,
            ty: &ty,
        };
        let attributes = BTreeMap::from([
            ("id".to_string(), "t-1".to_string()),
            ("title".to_string(), "web".to_string()),
            ("port".to_string(), "80".to_string()),
        ]);
        let upgraded = upgrade(
            &target,
            PersistedState::Flatmap {
                attributes,
                version: 0,
            },
        )
        .unwrap();
        assert_eq!(upgraded.value.get_attr("name"), &Value::string("web"));
        assert_eq!(
            upgraded.value.get_attr("ports"),
            &Value::set(Type::Number, vec![Value::number(80)])
        );
    }

    #[test]
    fn test_flatmap_state_is_expanded_first() {
        let ty = current_type();
        let target = UpgradeTarget {
            resource_type: "example_thing",
            current_version: 0,
            upgraders: &[],
            ty: &ty,
        };
        let attributes = BTreeMap::from([
            ("id".to_string(), "t-1".to_string()),
            ("name".to_string(), "web".to_string()),
        ]);
        let upgraded = upgrade(
            &target,
            PersistedState::Flatmap {
                attributes,
                version: 0,
            },
        )
        .unwrap();
        assert_eq!(upgraded.value.get_attr("name"), &Value::string("web"));
        assert_eq!(
            upgraded.value.get_attr("ports"),
            &Value::null(Type::set(Type::Number))
        );
    }

    proptest! {
        #[test]
        fn prop_upgrade_is_idempotent(name in "[a-z]{0,8}", port in 0u16..) {
            let ty = current_type();
            let upgraders = upgraders();
            let target = UpgradeTarget {
                resource_type: "example_thing",
                current_version: 2,
                upgraders: &upgraders,
                ty: &ty,
            };
            let state = PersistedState::Raw {
                attributes: raw(json!({"id": "t", "title": name, "port": port})),
                version: 0,
            };
            let once = upgrade(&target, state.clone()).unwrap();
            let again = upgrade(&target, state).unwrap();
            prop_assert_eq!(&once, &again);
            let twice = upgrade(&target, PersistedState::Upgraded(once.clone())).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
