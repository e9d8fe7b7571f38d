//! Msgpack encoding of structural values against a declared type, the wire
//! format of protocol `DynamicValue`s.

use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use rmpv::Value as Mp;

use super::{Type, Value};
use crate::error::{Error, Result};
use crate::path::{AttributePath, PathStep};

/// Extension type used for unknown values.
const UNKNOWN_EXT: i8 = 0;

pub fn encode(value: &Value, ty: &Type) -> Result<Vec<u8>> {
    let mp = to_msgpack(value, ty, &AttributePath::new())?;
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &mp)
        .map_err(|e| Error::Decode(format!("failed to write msgpack: {}", e)))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8], ty: &Type) -> Result<Value> {
    let mut reader = bytes;
    let mp = rmpv::decode::read_value(&mut reader)
        .map_err(|e| Error::Decode(format!("failed to read msgpack: {}", e)))?;
    from_msgpack(&mp, ty, &AttributePath::new())
}

fn to_msgpack(value: &Value, ty: &Type, path: &AttributePath) -> Result<Mp> {
    let value = value.unmarked_ref();
    if let Type::Capsule(name) = ty {
        panic!("capsule type {} cannot be encoded", name);
    }
    if let Value::Unknown(_) = value {
        return Ok(Mp::Ext(UNKNOWN_EXT, vec![0]));
    }
    if value.is_null() {
        return Ok(Mp::Nil);
    }
    if let Type::Dynamic = ty {
        let actual = value.ty();
        let type_json = serde_json::to_vec(&actual.to_json())
            .map_err(|e| Error::convert(path, e.to_string()))?;
        return Ok(Mp::Array(vec![
            Mp::Binary(type_json),
            to_msgpack(value, &actual, path)?,
        ]));
    }

    match (value, ty) {
        (Value::Bool(b), Type::Bool) => Ok(Mp::Boolean(*b)),
        (Value::Number(n), Type::Number) => Ok(encode_number(n)),
        (Value::String(s), Type::String) => Ok(Mp::from(s.as_str())),
        (Value::List(_, elems), Type::List(e)) | (Value::Set(_, elems), Type::Set(e)) => elems
            .iter()
            .enumerate()
            .map(|(i, v)| to_msgpack(v, e, &path.child(PathStep::ElementIndex(i as i64))))
            .collect::<Result<Vec<_>>>()
            .map(Mp::Array),
        (Value::Tuple(elems), Type::Tuple(types)) if elems.len() == types.len() => elems
            .iter()
            .zip(types)
            .enumerate()
            .map(|(i, (v, t))| to_msgpack(v, t, &path.child(PathStep::ElementIndex(i as i64))))
            .collect::<Result<Vec<_>>>()
            .map(Mp::Array),
        (Value::Map(_, entries), Type::Map(e)) => entries
            .iter()
            .map(|(k, v)| {
                let v = to_msgpack(v, e, &path.child(PathStep::ElementKey(k.clone())))?;
                Ok((Mp::from(k.as_str()), v))
            })
            .collect::<Result<Vec<_>>>()
            .map(Mp::Map),
        (Value::Object(attrs), Type::Object(types)) => types
            .iter()
            .map(|(k, t)| {
                let step = path.child(PathStep::Attribute(k.clone()));
                let v = match attrs.get(k) {
                    Some(v) => to_msgpack(v, t, &step)?,
                    None => Mp::Nil,
                };
                Ok((Mp::from(k.as_str()), v))
            })
            .collect::<Result<Vec<_>>>()
            .map(Mp::Map),
        _ => Err(Error::convert(
            path,
            format!("cannot encode {} as {}", value.ty(), ty),
        )),
    }
}

fn encode_number(n: &BigDecimal) -> Mp {
    if n.with_scale(0) == *n {
        if let Some(i) = n.to_i64() {
            return Mp::from(i);
        }
        if let Some(u) = n.to_u64() {
            return Mp::from(u);
        }
    } else if let Some(f) = n.to_f64() {
        if BigDecimal::from_str(&f.to_string()).is_ok_and(|back| back == *n) {
            return Mp::F64(f);
        }
    }
    Mp::from(n.to_string().as_str())
}

fn from_msgpack(mp: &Mp, ty: &Type, path: &AttributePath) -> Result<Value> {
    if let Type::Capsule(name) = ty {
        panic!("capsule type {} cannot be decoded", name);
    }
    match mp {
        Mp::Ext(..) => return Ok(Value::Unknown(ty.clone())),
        Mp::Nil => return Ok(Value::Null(ty.clone())),
        _ => {}
    }
    let mismatch = || Error::convert(path, format!("msgpack {} is not a valid {}", kind(mp), ty));

    match ty {
        Type::Dynamic => {
            let parts = mp.as_array().filter(|p| p.len() == 2).ok_or_else(mismatch)?;
            let type_json: serde_json::Value = match &parts[0] {
                Mp::Binary(bytes) => serde_json::from_slice(bytes),
                Mp::String(s) => serde_json::from_slice(s.as_bytes()),
                _ => return Err(mismatch()),
            }
            .map_err(|e| Error::convert(path, format!("invalid dynamic type: {}", e)))?;
            let actual = Type::from_json(&type_json)?;
            from_msgpack(&parts[1], &actual, path)
        }
        Type::Bool => mp.as_bool().map(Value::Bool).ok_or_else(mismatch),
        Type::Number => decode_number(mp).ok_or_else(mismatch),
        Type::String => mp
            .as_str()
            .map(Value::string)
            .ok_or_else(mismatch),
        Type::List(e) | Type::Set(e) => {
            let elems = mp
                .as_array()
                .ok_or_else(mismatch)?
                .iter()
                .enumerate()
                .map(|(i, v)| from_msgpack(v, e, &path.child(PathStep::ElementIndex(i as i64))))
                .collect::<Result<Vec<_>>>()?;
            Ok(match ty {
                Type::Set(_) => Value::set((**e).clone(), elems),
                _ => Value::List((**e).clone(), elems),
            })
        }
        Type::Tuple(types) => {
            let elems = mp.as_array().filter(|a| a.len() == types.len()).ok_or_else(mismatch)?;
            let values = elems
                .iter()
                .zip(types)
                .enumerate()
                .map(|(i, (v, t))| from_msgpack(v, t, &path.child(PathStep::ElementIndex(i as i64))))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Tuple(values))
        }
        Type::Map(e) => {
            let entries = mp
                .as_map()
                .ok_or_else(mismatch)?
                .iter()
                .map(|(k, v)| {
                    let key = k.as_str().ok_or_else(mismatch)?;
                    let value = from_msgpack(v, e, &path.child(PathStep::ElementKey(key.into())))?;
                    Ok((key.to_string(), value))
                })
                .collect::<Result<_>>()?;
            Ok(Value::Map((**e).clone(), entries))
        }
        Type::Object(types) => {
            let entries = mp.as_map().ok_or_else(mismatch)?;
            let mut attrs = std::collections::BTreeMap::new();
            for (k, v) in entries {
                let key = k.as_str().ok_or_else(mismatch)?;
                let step = path.child(PathStep::Attribute(key.to_string()));
                let t = types
                    .get(key)
                    .ok_or_else(|| Error::convert(&step, "unsupported attribute"))?;
                attrs.insert(key.to_string(), from_msgpack(v, t, &step)?);
            }
            if let Some(missing) = types.keys().find(|k| !attrs.contains_key(*k)) {
                return Err(Error::convert(
                    &path.child(PathStep::Attribute(missing.clone())),
                    "attribute is required",
                ));
            }
            Ok(Value::Object(attrs))
        }
        Type::Capsule(_) => unreachable!("rejected above"),
    }
}

fn decode_number(mp: &Mp) -> Option<Value> {
    match mp {
        Mp::Integer(i) => i
            .as_i64()
            .map(Value::number)
            .or_else(|| i.as_u64().map(Value::number)),
        Mp::F64(f) => BigDecimal::from_str(&f.to_string())
            .ok()
            .or_else(|| BigDecimal::from_f64(*f))
            .map(Value::Number),
        Mp::F32(f) => BigDecimal::from_str(&f.to_string()).ok().map(Value::Number),
        Mp::String(s) => s.as_str().and_then(|s| Value::parse_number(s).ok()),
        _ => None,
    }
}

fn kind(mp: &Mp) -> &'static str {
    match mp {
        Mp::Nil => "nil",
        Mp::Boolean(_) => "bool",
        Mp::Integer(_) | Mp::F32(_) | Mp::F64(_) => "number",
        Mp::String(_) => "string",
        Mp::Binary(_) => "binary",
        Mp::Array(_) => "array",
        Mp::Map(_) => "map",
        Mp::Ext(..) => "extension",
    }
}
