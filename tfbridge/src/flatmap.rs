//! The legacy flat attribute encoding: every leaf of a resource object is a
//! string addressed by a dotted key.
//!
//! Lists and sets record their length under `<key>.#`, maps under `<key>.%`.
//! Set elements are addressed by a content hash instead of a position.
//! Unknown values are written as [`UNKNOWN_VARIABLE_VALUE`]; nulls are
//! omitted.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as Json};

use crate::cty::{Type, Value};
use crate::error::{Error, Result};
use crate::path::AttributePath;
use crate::projection::object_from_value;
use crate::UNKNOWN_VARIABLE_VALUE;

/// Key of a set element: its content hash, prefixed with `~` when the
/// element is not wholly known.
pub fn set_index(element: &Value) -> String {
    let index = element.hash32().to_string();
    if element.is_wholly_known() {
        index
    } else {
        format!("~{}", index)
    }
}

pub fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Value::Object(attrs) = value.unmarked_ref() {
        for (name, v) in attrs {
            flatten_into(&mut out, name, v);
        }
    }
    out
}

fn join(prefix: &str, segment: &str) -> String {
    format!("{}.{}", prefix, segment)
}

fn flatten_into(out: &mut BTreeMap<String, String>, key: &str, value: &Value) {
    match value.unmarked_ref() {
        Value::Null(_) => {}
        Value::Unknown(ty) => match ty {
            Type::List(_) | Type::Set(_) | Type::Tuple(_) => {
                out.insert(join(key, "#"), UNKNOWN_VARIABLE_VALUE.to_string());
            }
            Type::Map(_) => {
                out.insert(join(key, "%"), UNKNOWN_VARIABLE_VALUE.to_string());
            }
            Type::Object(attrs) => {
                for (name, t) in attrs {
                    flatten_into(out, &join(key, name), &Value::Unknown(t.clone()));
                }
            }
            _ => {
                out.insert(key.to_string(), UNKNOWN_VARIABLE_VALUE.to_string());
            }
        },
        Value::Bool(b) => {
            out.insert(key.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(key.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(key.to_string(), s.clone());
        }
        Value::List(_, elems) | Value::Tuple(elems) => {
            out.insert(join(key, "#"), elems.len().to_string());
            for (i, e) in elems.iter().enumerate() {
                flatten_into(out, &join(key, &i.to_string()), e);
            }
        }
        Value::Set(_, elems) => {
            out.insert(join(key, "#"), elems.len().to_string());
            for e in elems {
                flatten_into(out, &join(key, &set_index(e)), e);
            }
        }
        Value::Map(_, entries) => {
            out.insert(join(key, "%"), entries.len().to_string());
            for (k, e) in entries {
                flatten_into(out, &join(key, k), e);
            }
        }
        Value::Object(attrs) => {
            for (name, e) in attrs {
                flatten_into(out, &join(key, name), e);
            }
        }
        Value::Marked(..) => unreachable!("unmarked above"),
    }
}

/// Rebuilds a structural value of type `ty` from flat attributes.
pub fn expand(attrs: &BTreeMap<String, String>, ty: &Type) -> Result<Value> {
    let Type::Object(attr_types) = ty else {
        return Err(Error::Decode(format!(
            "flat attributes can only describe objects, not {}",
            ty
        )));
    };
    let fields = attr_types
        .iter()
        .map(|(name, t)| Ok((name.clone(), expand_at(attrs, name, t, false)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    Ok(Value::Object(fields))
}

/// `element` is set for list, set and tuple elements, which are never null
/// in this encoding: an object element without keys is an empty object.
fn expand_at(
    attrs: &BTreeMap<String, String>,
    key: &str,
    ty: &Type,
    element: bool,
) -> Result<Value> {
    let path = || AttributePath::new().attribute(key);
    match ty {
        Type::Bool | Type::Number | Type::String | Type::Dynamic => match attrs.get(key) {
            None => Ok(Value::Null(ty.clone())),
            Some(s) if s == UNKNOWN_VARIABLE_VALUE => Ok(Value::Unknown(ty.clone())),
            Some(s) => match ty {
                Type::Bool => match s.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(Error::convert(&path(), format!("invalid bool {:?}", s))),
                },
                Type::Number => Value::parse_number(s),
                _ => Ok(Value::string(s.clone())),
            },
        },
        Type::List(e) | Type::Set(e) => {
            let count = match read_count(attrs, key, "#", ty)? {
                Count::Absent => return Ok(Value::Null(ty.clone())),
                Count::Unknown => return Ok(Value::Unknown(ty.clone())),
                Count::Known(n) => n,
            };
            if let Type::Set(_) = ty {
                let segments = child_segments(attrs, key, "#", false);
                let mut elems = segments
                    .iter()
                    .map(|segment| expand_at(attrs, &join(key, segment), e, true))
                    .collect::<Result<Vec<_>>>()?;
                // Empty object elements leave no keys behind, only the count.
                if segments.len() < count {
                    if let Type::Object(attr_types) = &**e {
                        elems.push(Value::Object(
                            attr_types
                                .iter()
                                .map(|(name, t)| (name.clone(), Value::Null(t.clone())))
                                .collect(),
                        ));
                    }
                }
                return Ok(Value::set((**e).clone(), elems));
            }
            let elems = (0..count)
                .map(|i| expand_at(attrs, &join(key, &i.to_string()), e, true))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List((**e).clone(), elems))
        }
        Type::Tuple(types) => match read_count(attrs, key, "#", ty)? {
            Count::Absent => Ok(Value::Null(ty.clone())),
            Count::Unknown => Ok(Value::Unknown(ty.clone())),
            Count::Known(_) => types
                .iter()
                .enumerate()
                .map(|(i, t)| expand_at(attrs, &join(key, &i.to_string()), t, true))
                .collect::<Result<Vec<_>>>()
                .map(Value::Tuple),
        },
        Type::Map(e) => {
            match read_count(attrs, key, "%", ty)? {
                Count::Absent => return Ok(Value::Null(ty.clone())),
                Count::Unknown => return Ok(Value::Unknown(ty.clone())),
                Count::Known(_) => {}
            }
            // Primitive map keys may themselves contain dots.
            let whole_key = e.is_primitive() || matches!(**e, Type::Dynamic);
            let entries = child_segments(attrs, key, "%", whole_key)
                .into_iter()
                .map(|k| {
                    let v = expand_at(attrs, &join(key, &k), e, false)?;
                    Ok((k, v))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Value::Map((**e).clone(), entries))
        }
        Type::Object(attr_types) => {
            let prefix = join(key, "");
            if !element && !attrs.keys().any(|k| k.starts_with(&prefix)) {
                return Ok(Value::Null(ty.clone()));
            }
            attr_types
                .iter()
                .map(|(name, t)| {
                    Ok((name.clone(), expand_at(attrs, &join(key, name), t, false)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Object)
        }
        Type::Capsule(name) => panic!("capsule type {} is not supported", name),
    }
}

enum Count {
    Absent,
    Unknown,
    Known(usize),
}

fn read_count(
    attrs: &BTreeMap<String, String>,
    key: &str,
    marker: &str,
    ty: &Type,
) -> Result<Count> {
    match attrs.get(&join(key, marker)) {
        None => Ok(Count::Absent),
        Some(s) if s == UNKNOWN_VARIABLE_VALUE => Ok(Count::Unknown),
        Some(s) => s.parse().map(Count::Known).map_err(|_| {
            Error::convert(
                &AttributePath::new().attribute(key),
                format!("invalid {} count {:?}", ty, s),
            )
        }),
    }
}

/// Distinct next segments below `key`, skipping the count marker.
fn child_segments(
    attrs: &BTreeMap<String, String>,
    key: &str,
    marker: &str,
    whole_key: bool,
) -> BTreeSet<String> {
    let prefix = join(key, "");
    attrs
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, _)| {
            let rest = &k[prefix.len()..];
            if whole_key {
                rest.to_string()
            } else {
                rest.split('.').next().unwrap_or(rest).to_string()
            }
        })
        .filter(|segment| segment != marker)
        .collect()
}

/// Untyped view of flat attributes, as handed to state upgraders.
///
/// Attributes that `ty` still declares with a matching shape are expanded
/// against it. Everything else was written by an older schema and is nested
/// on `.` without a type: a `#` count makes an array and a `%` count a map.
/// Leaves stay strings. A map with exactly as many leaves as its count keeps
/// dotted keys whole.
pub fn lift(attrs: &BTreeMap<String, String>, ty: &Type) -> Map<String, Json> {
    let mut root = Node::default();
    for (key, value) in attrs {
        root.insert(key.split('.'), value);
    }
    let declared = ty.attribute_types();
    root.children
        .iter()
        .map(|(name, node)| {
            let typed = declared
                .and_then(|types| types.get(*name))
                .and_then(|t| expand_at(attrs, name, t, false).ok())
                .filter(|v| !v.is_null());
            let json = match typed {
                Some(v) => object_from_value(&v),
                None => node.to_json(),
            };
            (name.to_string(), json)
        })
        .collect()
}

#[derive(Default)]
struct Node<'a> {
    leaf: Option<&'a str>,
    children: BTreeMap<&'a str, Node<'a>>,
}

impl<'a> Node<'a> {
    fn insert(&mut self, mut segments: std::str::Split<'a, char>, value: &'a str) {
        match segments.next() {
            None => self.leaf = Some(value),
            Some(segment) => self
                .children
                .entry(segment)
                .or_default()
                .insert(segments, value),
        }
    }

    fn count(&self, marker: &str) -> Option<&'a str> {
        self.children.get(marker).and_then(|n| n.leaf)
    }

    fn entries(&self) -> impl Iterator<Item = (&&'a str, &Node<'a>)> + '_ {
        self.children
            .iter()
            .filter(|(segment, _)| **segment != "#" && **segment != "%")
    }

    fn leaves(&self, prefix: &str, out: &mut Vec<(String, &'a str)>) {
        if let Some(leaf) = self.leaf {
            out.push((prefix.to_string(), leaf));
        }
        for (segment, child) in &self.children {
            let key = if prefix.is_empty() {
                segment.to_string()
            } else {
                join(prefix, segment)
            };
            child.leaves(&key, out);
        }
    }

    fn to_json(&self) -> Json {
        if let Some(count) = self.count("#") {
            if count == UNKNOWN_VARIABLE_VALUE {
                return Json::String(count.to_string());
            }
            let n: usize = count.parse().unwrap_or(0);
            let positional = self
                .entries()
                .all(|(segment, _)| segment.parse::<usize>().is_ok_and(|i| i < n));
            let items = if positional {
                (0..n)
                    .map(|i| {
                        self.children
                            .get(i.to_string().as_str())
                            .map_or(Json::Null, Node::to_json)
                    })
                    .collect()
            } else {
                self.entries().map(|(_, child)| child.to_json()).collect()
            };
            return Json::Array(items);
        }
        if let Some(count) = self.count("%") {
            if count == UNKNOWN_VARIABLE_VALUE {
                return Json::String(count.to_string());
            }
            let mut leaves = Vec::new();
            for (segment, child) in self.entries() {
                child.leaves(segment, &mut leaves);
            }
            let whole_keys = count.parse::<usize>().is_ok_and(|n| n == leaves.len())
                && !leaves
                    .iter()
                    .any(|(k, _)| k.split('.').any(|s| s == "#" || s == "%"));
            if whole_keys {
                return Json::Object(
                    leaves
                        .into_iter()
                        .map(|(k, v)| (k, Json::String(v.to_string())))
                        .collect(),
                );
            }
        }
        match self.leaf {
            Some(leaf) if self.children.is_empty() => Json::String(leaf.to_string()),
            _ => Json::Object(
                self.entries()
                    .map(|(segment, child)| (segment.to_string(), child.to_json()))
                    .collect(),
            ),
        }
    }
}
