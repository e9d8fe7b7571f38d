//! Conversion between the [`cty`] and [`tftypes`] families.
//!
//! Values are copied by direct structural recursion guided by the converted
//! type tree. Both directions go through the same code paths for null and
//! unknown, so neither collapses into a zero value.

use std::collections::{BTreeMap, BTreeSet};

use crate::cty;
use crate::error::{Error, Result};
use crate::tftypes;

pub fn to_tftype(t: &cty::Type) -> tftypes::Type {
    match t {
        cty::Type::Bool => tftypes::Type::Bool,
        cty::Type::Number => tftypes::Type::Number,
        cty::Type::String => tftypes::Type::String,
        cty::Type::Dynamic => tftypes::Type::DynamicPseudoType,
        cty::Type::List(e) => tftypes::Type::List {
            element_type: Box::new(to_tftype(e)),
        },
        cty::Type::Set(e) => tftypes::Type::Set {
            element_type: Box::new(to_tftype(e)),
        },
        cty::Type::Map(e) => tftypes::Type::Map {
            element_type: Box::new(to_tftype(e)),
        },
        cty::Type::Object(attrs) if attrs.is_empty() => tftypes::Type::empty_object(),
        cty::Type::Object(attrs) => tftypes::Type::Object {
            attribute_types: attrs.iter().map(|(k, t)| (k.clone(), to_tftype(t))).collect(),
            optional_attributes: BTreeSet::new(),
        },
        cty::Type::Tuple(elems) => tftypes::Type::Tuple {
            element_types: elems.iter().map(to_tftype).collect(),
        },
        cty::Type::Capsule(name) => panic!("capsule type {} is not supported", name),
    }
}

pub fn from_tftype(t: &tftypes::Type) -> cty::Type {
    match t {
        tftypes::Type::Bool => cty::Type::Bool,
        tftypes::Type::Number => cty::Type::Number,
        tftypes::Type::String => cty::Type::String,
        tftypes::Type::DynamicPseudoType => cty::Type::Dynamic,
        tftypes::Type::List { element_type } => cty::Type::list(from_tftype(element_type)),
        tftypes::Type::Set { element_type } => cty::Type::set(from_tftype(element_type)),
        tftypes::Type::Map { element_type } => cty::Type::map(from_tftype(element_type)),
        tftypes::Type::Object {
            attribute_types, ..
        } => cty::Type::Object(
            attribute_types
                .iter()
                .map(|(k, t)| (k.clone(), from_tftype(t)))
                .collect(),
        ),
        tftypes::Type::Tuple { element_types } => {
            cty::Type::Tuple(element_types.iter().map(from_tftype).collect())
        }
    }
}

/// Converts a structural value. Marks have no counterpart and are dropped.
pub fn to_tfvalue(v: &cty::Value) -> tftypes::Value {
    value_to(v, to_tftype(&v.ty()))
}

fn value_to(v: &cty::Value, t: tftypes::Type) -> tftypes::Value {
    use cty::Value as V;
    // A dynamic slot carries the value's own type.
    let t = match t {
        tftypes::Type::DynamicPseudoType => to_tftype(&v.ty()),
        t => t,
    };
    match (v.unmarked_ref(), &t) {
        (V::Null(_), _) => tftypes::Value::null(t),
        (V::Unknown(_), _) => tftypes::Value::unknown(t),
        (V::Bool(b), _) => tftypes::Value::bool(*b),
        (V::Number(n), _) => tftypes::Value::number(n.clone()),
        (V::String(s), _) => tftypes::Value::string(s.clone()),
        (
            V::List(_, elems) | V::Set(_, elems),
            tftypes::Type::List { element_type } | tftypes::Type::Set { element_type },
        ) => {
            let elems = elems
                .iter()
                .map(|e| value_to(e, (**element_type).clone()))
                .collect();
            tftypes::Value::sequence(t, elems)
        }
        (V::Tuple(elems), tftypes::Type::Tuple { element_types }) => {
            let elems = elems
                .iter()
                .zip(element_types)
                .map(|(e, et)| value_to(e, et.clone()))
                .collect();
            tftypes::Value::sequence(t, elems)
        }
        (V::Map(_, entries), tftypes::Type::Map { element_type }) => {
            let entries = entries
                .iter()
                .map(|(k, e)| (k.clone(), value_to(e, (**element_type).clone())))
                .collect();
            tftypes::Value::entries(t, entries)
        }
        (V::Object(attrs), tftypes::Type::Object {
            attribute_types, ..
        }) => {
            let entries = attrs
                .iter()
                .filter_map(|(k, e)| {
                    let at = attribute_types.get(k)?;
                    Some((k.clone(), value_to(e, at.clone())))
                })
                .collect();
            tftypes::Value::entries(t, entries)
        }
        (v, t) => unreachable!("type {:?} was derived from value {:?}", t, v),
    }
}

pub fn from_tfvalue(v: &tftypes::Value) -> Result<cty::Value> {
    let ty = from_tftype(v.typ());
    if v.is_null() {
        return Ok(cty::Value::Null(ty));
    }
    if !v.is_known() {
        return Ok(cty::Value::Unknown(ty));
    }
    let malformed = || Error::Decode(format!("malformed {:?} value", v.typ()));

    match v.typ() {
        tftypes::Type::Bool => v.as_bool().map(cty::Value::Bool).ok_or_else(malformed),
        tftypes::Type::Number => v
            .as_number()
            .map(|n| cty::Value::Number(n.clone()))
            .ok_or_else(malformed),
        tftypes::Type::String => v.as_str().map(cty::Value::string).ok_or_else(malformed),
        tftypes::Type::DynamicPseudoType => Err(Error::Decode(
            "a known value cannot have the dynamic pseudo-type".into(),
        )),
        tftypes::Type::List { element_type } | tftypes::Type::Set { element_type } => {
            let elems = v
                .as_elements()
                .ok_or_else(malformed)?
                .iter()
                .map(from_tfvalue)
                .collect::<Result<Vec<_>>>()?;
            let elem_ty = from_tftype(element_type);
            Ok(match v.typ() {
                tftypes::Type::Set { .. } => cty::Value::set(elem_ty, elems),
                _ => cty::Value::List(elem_ty, elems),
            })
        }
        tftypes::Type::Tuple { .. } => {
            let elems = v
                .as_elements()
                .ok_or_else(malformed)?
                .iter()
                .map(from_tfvalue)
                .collect::<Result<Vec<_>>>()?;
            Ok(cty::Value::Tuple(elems))
        }
        tftypes::Type::Map { element_type } => {
            let entries = v
                .as_entries()
                .ok_or_else(malformed)?
                .iter()
                .map(|(k, e)| Ok((k.clone(), from_tfvalue(e)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(cty::Value::Map(from_tftype(element_type), entries))
        }
        tftypes::Type::Object {
            attribute_types, ..
        } => {
            let entries = v.as_entries().ok_or_else(malformed)?;
            let attrs = attribute_types
                .iter()
                .map(|(k, t)| {
                    let value = match entries.get(k) {
                        Some(e) => from_tfvalue(e)?,
                        None => cty::Value::Null(from_tftype(t)),
                    };
                    Ok((k.clone(), value))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(cty::Value::Object(attrs))
        }
    }
}
