//! Operation timeouts, carried through configuration under the reserved
//! `timeouts` key.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cty::Value;
use crate::schema::Block;

pub const TIMEOUTS_CONFIG_KEY: &str = "timeouts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKey {
    Create,
    Read,
    Update,
    Delete,
    Default,
}

impl TimeoutKey {
    pub const ALL: [TimeoutKey; 5] = [
        TimeoutKey::Create,
        TimeoutKey::Read,
        TimeoutKey::Update,
        TimeoutKey::Delete,
        TimeoutKey::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKey::Create => "create",
            TimeoutKey::Read => "read",
            TimeoutKey::Update => "update",
            TimeoutKey::Delete => "delete",
            TimeoutKey::Default => "default",
        }
    }

    pub fn from_name(name: &str) -> Option<TimeoutKey> {
        TimeoutKey::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for TimeoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation timeout overrides requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOptions {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
    pub default: Option<Duration>,
}

impl TimeoutOptions {
    pub fn get(&self, key: TimeoutKey) -> Option<Duration> {
        match key {
            TimeoutKey::Create => self.create,
            TimeoutKey::Read => self.read,
            TimeoutKey::Update => self.update,
            TimeoutKey::Delete => self.delete,
            TimeoutKey::Default => self.default,
        }
    }

    pub fn overrides(&self) -> impl Iterator<Item = (TimeoutKey, Duration)> + '_ {
        TimeoutKey::ALL
            .into_iter()
            .filter_map(|k| self.get(k).map(|d| (k, d)))
    }
}

/// Timeouts a resource declares through its `timeouts` block.
pub fn supported_timeouts(block: &Block) -> BTreeSet<TimeoutKey> {
    block
        .nested_block(TIMEOUTS_CONFIG_KEY)
        .map(|nested| {
            nested
                .block
                .attributes
                .keys()
                .filter_map(|name| TimeoutKey::from_name(name))
                .collect()
        })
        .unwrap_or_default()
}

/// Writes the overrides into the `timeouts` key of a raw configuration map.
///
/// Overrides for timeouts the resource does not declare are dropped with a
/// warning. The map is left untouched when no override applies.
pub fn config_with_timeouts(
    resource_type: &str,
    block: &Block,
    mut config: serde_json::Map<String, serde_json::Value>,
    options: &TimeoutOptions,
) -> serde_json::Map<String, serde_json::Value> {
    let supported = supported_timeouts(block);
    let mut ignored = Vec::new();
    let mut entries = serde_json::Map::new();
    for key in &supported {
        entries.insert(key.as_str().to_string(), serde_json::Value::Null);
    }
    let mut applied = 0;
    for (key, duration) in options.overrides() {
        if supported.contains(&key) {
            entries.insert(
                key.as_str().to_string(),
                serde_json::Value::String(format_duration(duration)),
            );
            applied += 1;
        } else {
            ignored.push(format!("{}={}", key, format_duration(duration)));
        }
    }
    if !ignored.is_empty() {
        warn!(
            resource_type,
            "Resource does not support custom timeouts, ignoring: {}",
            ignored.join(", ")
        );
    }
    if applied > 0 {
        config.insert(
            TIMEOUTS_CONFIG_KEY.to_string(),
            serde_json::Value::Object(entries),
        );
    }
    config
}

/// Drops the reserved `timeouts` attribute from an object value.
pub fn strip_timeouts(value: Value) -> Value {
    match value {
        Value::Object(mut attrs) => {
            attrs.remove(TIMEOUTS_CONFIG_KEY);
            Value::Object(attrs)
        }
        other => other,
    }
}

/// Formats a duration the way the provider runtime parses it, e.g. `1h2m3s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    let nanos = d.subsec_nanos();
    let seconds = if nanos == 0 {
        format!("{}s", seconds)
    } else {
        let fraction = format!("{:09}", nanos);
        format!("{}.{}s", seconds, fraction.trim_end_matches('0'))
    };
    if hours > 0 {
        format!("{}h{}m{}", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}", minutes, seconds)
    } else {
        seconds
    }
}
