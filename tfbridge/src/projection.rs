//! Projection of structural values onto untyped JSON-like data and back.
//!
//! Unknown values become [`UNKNOWN_VARIABLE_VALUE`] at any depth. Numbers are
//! carried as exact decimal text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::Value as Json;
use tracing::debug;

use crate::cty::{convert, Type, Value};
use crate::error::{Error, Result};
use crate::path::{AttributePath, PathStep};
use crate::UNKNOWN_VARIABLE_VALUE;

/// Generic nested maps and arrays of primitives for `value`.
pub fn object_from_value(value: &Value) -> Json {
    match value.unmarked_ref() {
        Value::Null(_) => Json::Null,
        Value::Unknown(_) => Json::String(UNKNOWN_VARIABLE_VALUE.to_string()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            let text = n.to_string();
            match serde_json::Number::from_str(&text) {
                Ok(number) => Json::Number(number),
                Err(_) => Json::String(text),
            }
        }
        Value::String(s) => Json::String(s.clone()),
        Value::List(_, elems) | Value::Set(_, elems) | Value::Tuple(elems) => {
            Json::Array(elems.iter().map(object_from_value).collect())
        }
        Value::Map(_, entries) | Value::Object(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), object_from_value(v)))
                .collect(),
        ),
        Value::Marked(..) => unreachable!("unmarked above"),
    }
}

/// Like [`object_from_value`] for an object value. Anything else projects to
/// an empty map.
pub fn object_map(value: &Value) -> serde_json::Map<String, Json> {
    match object_from_value(value) {
        Json::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Strict, type-directed recovery of a structural value.
pub fn recover(json: &Json, ty: &Type) -> Result<Value> {
    recover_at(json, ty, &AttributePath::new())
}

fn recover_at(json: &Json, ty: &Type, path: &AttributePath) -> Result<Value> {
    if let Json::String(s) = json {
        if s == UNKNOWN_VARIABLE_VALUE {
            return Ok(Value::Unknown(ty.clone()));
        }
    }
    if json.is_null() {
        return Ok(Value::Null(ty.clone()));
    }
    let mismatch = || {
        Error::convert(
            path,
            format!("{} is required, got {}", ty, json_kind(json)),
        )
    };
    match ty {
        Type::Bool => match json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) if s == "true" => Ok(Value::Bool(true)),
            Json::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        Type::Number => match json {
            Json::Number(n) => Value::parse_number(&n.to_string()),
            Json::String(s) => Value::parse_number(s).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        Type::String => match json {
            Json::String(s) => Ok(Value::string(s.clone())),
            Json::Number(n) => Ok(Value::string(n.to_string())),
            Json::Bool(b) => Ok(Value::string(b.to_string())),
            _ => Err(mismatch()),
        },
        Type::Dynamic => Ok(approximate(json)),
        Type::List(e) | Type::Set(e) => {
            let Json::Array(items) = json else {
                return Err(mismatch());
            };
            let elems = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    recover_at(item, e, &path.child(PathStep::ElementIndex(i as i64)))
                })
                .collect::<Result<Vec<_>>>()?;
            match ty {
                // A set cannot be partially unknown without losing its identity.
                Type::Set(_) if elems.iter().any(|v| !v.is_known()) => {
                    Ok(Value::Unknown(ty.clone()))
                }
                Type::Set(_) => Ok(Value::set((**e).clone(), elems)),
                _ => Ok(Value::List((**e).clone(), elems)),
            }
        }
        Type::Tuple(types) => {
            let Json::Array(items) = json else {
                return Err(mismatch());
            };
            if items.len() != types.len() {
                return Err(mismatch());
            }
            items
                .iter()
                .zip(types)
                .enumerate()
                .map(|(i, (item, t))| {
                    recover_at(item, t, &path.child(PathStep::ElementIndex(i as i64)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Tuple)
        }
        Type::Map(e) => {
            let Json::Object(entries) = json else {
                return Err(mismatch());
            };
            entries
                .iter()
                .map(|(k, v)| {
                    let v = recover_at(v, e, &path.child(PathStep::ElementKey(k.clone())))?;
                    Ok((k.clone(), v))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(|entries| Value::Map((**e).clone(), entries))
        }
        Type::Object(attrs) => {
            let Json::Object(entries) = json else {
                return Err(mismatch());
            };
            if let Some(extra) = entries.keys().find(|k| !attrs.contains_key(*k)) {
                return Err(Error::convert(
                    &path.child(PathStep::Attribute(extra.clone())),
                    "unsupported attribute",
                ));
            }
            attrs
                .iter()
                .map(|(k, t)| {
                    let v = match entries.get(k) {
                        Some(v) => recover_at(v, t, &path.child(PathStep::Attribute(k.clone())))?,
                        None => Value::Null(t.clone()),
                    };
                    Ok((k.clone(), v))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Object)
        }
        Type::Capsule(name) => panic!("capsule type {} is not supported", name),
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Best-effort recovery without a type: arrays become tuples and maps
/// become objects.
pub fn approximate(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null(Type::Dynamic),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            Value::parse_number(&n.to_string()).unwrap_or_else(|_| Value::string(n.to_string()))
        }
        Json::String(s) if s == UNKNOWN_VARIABLE_VALUE => Value::Unknown(Type::Dynamic),
        Json::String(s) => Value::string(s.clone()),
        Json::Array(items) => Value::Tuple(items.iter().map(approximate).collect()),
        Json::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), approximate(v)))
                .collect(),
        ),
    }
}

/// Strict recovery, falling back to an approximate value coerced as far as
/// it goes. Only for configuration; persisted state must use [`recover`].
pub fn recover_or_approximate(json: &Json, ty: &Type) -> Value {
    match recover(json, ty) {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "falling back to approximate value recovery");
            let approx = approximate(json);
            convert(&approx, ty).unwrap_or(approx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_becomes_sentinel_at_any_depth() {
        let v = Value::object([
            ("a", Value::unknown(Type::String)),
            (
                "b",
                Value::list(
                    Type::object([("c", Type::Number)]),
                    vec![Value::object([("c", Value::unknown(Type::Number))])],
                ),
            ),
            ("n", Value::null(Type::Bool)),
        ]);
        assert_eq!(
            object_from_value(&v),
            json!({
                "a": UNKNOWN_VARIABLE_VALUE,
                "b": [{"c": UNKNOWN_VARIABLE_VALUE}],
                "n": null,
            })
        );
    }

    #[test]
    fn test_large_integer_keeps_precision() {
        let ty = Type::object([("n", Type::Number)]);
        let v = Value::object([("n", Value::parse_number("641577219598130723").unwrap())]);
        let json = object_from_value(&v);
        assert_eq!(json.to_string(), r#"{"n":641577219598130723}"#);
        assert_eq!(recover(&json, &ty).unwrap(), v);
    }

    #[test]
    fn test_recover_is_type_directed() {
        let ty = Type::object([
            ("tags", Type::map(Type::String)),
            ("ports", Type::set(Type::Number)),
            ("ok", Type::Bool),
            ("missing", Type::String),
        ]);
        let v = recover(
            &json!({"tags": {"a": "b"}, "ports": [80, "443", 80], "ok": "true"}),
            &ty,
        )
        .unwrap();
        assert_eq!(
            v,
            Value::object([
                ("tags", Value::map(Type::String, [("a", Value::string("b"))])),
                (
                    "ports",
                    Value::set(Type::Number, vec![Value::number(80), Value::number(443)])
                ),
                ("ok", Value::bool(true)),
                ("missing", Value::null(Type::String)),
            ])
        );
    }

    #[test]
    fn test_recover_rejects_extra_attributes() {
        let ty = Type::object([("a", Type::String)]);
        let err = recover(&json!({"a": "x", "b": 1}), &ty).unwrap_err();
        assert_eq!(err.to_string(), "b: unsupported attribute");
    }

    #[test]
    fn test_set_with_unknown_element_is_unknown() {
        let ty = Type::set(Type::String);
        assert_eq!(
            recover(&json!(["a", UNKNOWN_VARIABLE_VALUE]), &ty).unwrap(),
            Value::unknown(ty)
        );
    }

    #[test]
    fn test_recover_or_approximate_falls_back() {
        let ty = Type::object([("a", Type::list(Type::String))]);
        let v = recover_or_approximate(&json!({"a": ["x", 1], "zzz": true}), &ty);
        assert_eq!(
            v,
            Value::object([
                ("a", Value::tuple(vec![Value::string("x"), Value::number(1)])),
                ("zzz", Value::bool(true)),
            ])
        );
    }
}
