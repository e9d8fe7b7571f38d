//! Explicit, type-directed coercion of structural values.

use super::{Type, Value};
use crate::error::{Error, Result};
use crate::path::{AttributePath, PathStep};

/// Coerces `value` into `want`.
///
/// Primitives convert through their string forms, sequences convert between
/// list, set and tuple, and maps convert to and from objects. Object
/// attributes missing from the input become null; unexpected attributes are
/// an error.
pub fn convert(value: &Value, want: &Type) -> Result<Value> {
    convert_at(value, want, &AttributePath::new())
}

fn convert_at(value: &Value, want: &Type, path: &AttributePath) -> Result<Value> {
    if let Type::Capsule(name) = want {
        panic!("capsule type {} is not supported", name);
    }
    if let Value::Marked(inner, marks) = value {
        let converted = convert_at(inner, want, path)?;
        return Ok(Value::Marked(Box::new(converted), marks.clone()));
    }
    match value {
        Value::Null(_) => return Ok(Value::Null(want.clone())),
        Value::Unknown(_) => return Ok(Value::Unknown(want.clone())),
        _ => {}
    }
    if matches!(want, Type::Dynamic) || value.conforms_to(want) {
        return Ok(value.clone());
    }

    match (value, want) {
        (Value::Number(n), Type::String) => Ok(Value::String(n.to_string())),
        (Value::Bool(b), Type::String) => Ok(Value::String(b.to_string())),
        (Value::String(s), Type::Number) => Value::parse_number(s)
            .map_err(|_| Error::convert(path, format!("a number is required, got {:?}", s))),
        (Value::String(s), Type::Bool) => match s.as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::convert(
                path,
                format!("a bool is required, got {:?}", s),
            )),
        },
        (
            Value::List(_, elems) | Value::Set(_, elems) | Value::Tuple(elems),
            Type::List(e) | Type::Set(e),
        ) => {
            let converted = elems
                .iter()
                .enumerate()
                .map(|(i, v)| convert_at(v, e, &path.child(PathStep::ElementIndex(i as i64))))
                .collect::<Result<Vec<_>>>()?;
            Ok(match want {
                Type::Set(_) => Value::set((**e).clone(), converted),
                _ => Value::List((**e).clone(), converted),
            })
        }
        (Value::List(_, elems) | Value::Tuple(elems), Type::Tuple(types)) => {
            if elems.len() != types.len() {
                return Err(Error::convert(
                    path,
                    format!(
                        "a tuple of {} elements is required, got {}",
                        types.len(),
                        elems.len()
                    ),
                ));
            }
            let converted = elems
                .iter()
                .zip(types)
                .enumerate()
                .map(|(i, (v, t))| convert_at(v, t, &path.child(PathStep::ElementIndex(i as i64))))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Tuple(converted))
        }
        (Value::Map(_, entries) | Value::Object(entries), Type::Map(e)) => {
            let converted = entries
                .iter()
                .map(|(k, v)| {
                    let v = convert_at(v, e, &path.child(PathStep::ElementKey(k.clone())))?;
                    Ok((k.clone(), v))
                })
                .collect::<Result<_>>()?;
            Ok(Value::Map((**e).clone(), converted))
        }
        (Value::Map(_, entries) | Value::Object(entries), Type::Object(attrs)) => {
            if let Some(extra) = entries.keys().find(|k| !attrs.contains_key(*k)) {
                return Err(Error::convert(
                    &path.child(PathStep::Attribute(extra.clone())),
                    "unsupported attribute",
                ));
            }
            let converted = attrs
                .iter()
                .map(|(k, t)| {
                    let v = match entries.get(k) {
                        Some(v) => convert_at(v, t, &path.child(PathStep::Attribute(k.clone())))?,
                        None => Value::Null(t.clone()),
                    };
                    Ok((k.clone(), v))
                })
                .collect::<Result<_>>()?;
            Ok(Value::Object(converted))
        }
        _ => Err(Error::convert(
            path,
            format!("{} is required, got {}", want, value.ty()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(
            convert(&Value::string("12"), &Type::Number).unwrap(),
            Value::number(12)
        );
        assert_eq!(
            convert(&Value::number(12), &Type::String).unwrap(),
            Value::string("12")
        );
        assert_eq!(
            convert(&Value::string("false"), &Type::Bool).unwrap(),
            Value::bool(false)
        );
        assert!(convert(&Value::string("maybe"), &Type::Bool).is_err());
    }

    #[test]
    fn test_large_integer_string_keeps_precision() {
        let n = convert(&Value::string("641577219598130723"), &Type::Number).unwrap();
        assert_eq!(n.as_number().unwrap().to_string(), "641577219598130723");
    }

    #[test]
    fn test_tuple_to_set_and_list() {
        let tuple = Value::tuple(vec![Value::string("b"), Value::string("a")]);
        assert_eq!(
            convert(&tuple, &Type::set(Type::String)).unwrap(),
            Value::set(Type::String, vec![Value::string("a"), Value::string("b")])
        );
        assert_eq!(
            convert(&tuple, &Type::list(Type::String)).unwrap(),
            Value::list(Type::String, vec![Value::string("b"), Value::string("a")])
        );
    }

    #[test]
    fn test_object_to_object_fills_missing_with_null() {
        let want = Type::object([("a", Type::String), ("b", Type::list(Type::Number))]);
        let converted = convert(&Value::object([("a", Value::string("x"))]), &want).unwrap();
        assert_eq!(
            converted,
            Value::object([
                ("a", Value::string("x")),
                ("b", Value::null(Type::list(Type::Number))),
            ])
        );
    }

    #[test]
    fn test_extra_attribute_is_an_error_with_path() {
        let want = Type::object([(
            "inner",
            Type::object([("a", Type::String)]),
        )]);
        let value = Value::object([(
            "inner",
            Value::object([("a", Value::string("x")), ("zzz", Value::bool(true))]),
        )]);
        let err = convert(&value, &want).unwrap_err();
        assert_eq!(err.to_string(), "inner.zzz: unsupported attribute");
    }

    #[test]
    fn test_null_and_unknown_are_retyped() {
        let want = Type::map(Type::String);
        assert_eq!(
            convert(&Value::null(Type::Dynamic), &want).unwrap(),
            Value::null(want.clone())
        );
        assert_eq!(
            convert(&Value::unknown(Type::Dynamic), &want).unwrap(),
            Value::unknown(want)
        );
    }

    #[test]
    fn test_object_to_map() {
        let value = Value::object([("x", Value::number(1)), ("y", Value::string("2"))]);
        assert_eq!(
            convert(&value, &Type::map(Type::String)).unwrap(),
            Value::map(
                Type::String,
                [("x", Value::string("1")), ("y", Value::string("2"))]
            )
        );
    }

    #[test]
    #[should_panic(expected = "capsule type")]
    fn test_capsule_panics() {
        let _ = convert(&Value::string("x"), &Type::Capsule("opaque".into()));
    }
}
