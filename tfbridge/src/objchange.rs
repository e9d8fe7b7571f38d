//! Proposed new state: prior state merged with configuration.
//!
//! Precedence per attribute:
//! - configured (non-null, known or unknown) values win outright;
//! - computed attributes left null in config keep their prior value;
//! - everything else takes the configured null.
//!
//! Nested blocks are merged element by element. A prior of null (a new
//! resource or a new nested element) is replaced by an object whose computed
//! attributes are unknown and whose other attributes are null, so anything the
//! provider has yet to compute shows up as unknown. Inputs are never
//! modified.

use std::collections::{BTreeMap, HashSet};

use crate::cty::Value;
use crate::schema::{Block, NestedBlock, NestingMode};

pub fn proposed_new(block: &Block, prior: &Value, config: &Value) -> Value {
    if config.is_null() || !config.is_known() {
        return config.clone();
    }
    let prior = if prior.is_null() || !prior.is_known() {
        placeholder_object(block)
    } else {
        prior.clone()
    };
    propose_object(block, &prior, config)
}

/// The stand-in prior for an object that does not exist yet.
fn placeholder_object(block: &Block) -> Value {
    let mut attrs = BTreeMap::new();
    for (name, attribute) in &block.attributes {
        let ty = attribute.r#type.clone();
        let v = if attribute.computed {
            Value::Unknown(ty)
        } else {
            Value::Null(ty)
        };
        attrs.insert(name.clone(), v);
    }
    for (name, nested) in &block.block_types {
        attrs.insert(name.clone(), Value::Null(nested.implied_type()));
    }
    Value::Object(attrs)
}

fn propose_object(block: &Block, prior: &Value, config: &Value) -> Value {
    let (config, marks) = config.clone().unmark();
    let mut out = BTreeMap::new();
    for (name, attribute) in &block.attributes {
        let configured = config
            .attr(name)
            .cloned()
            .unwrap_or_else(|| Value::Null(attribute.r#type.clone()));
        let v = if attribute.computed && configured.is_null() {
            prior
                .attr(name)
                .cloned()
                .unwrap_or_else(|| Value::Null(attribute.r#type.clone()))
        } else {
            configured
        };
        out.insert(name.clone(), v);
    }
    for (name, nested) in &block.block_types {
        let configured = config
            .attr(name)
            .cloned()
            .unwrap_or_else(|| Value::Null(nested.implied_type()));
        let prior_v = prior
            .attr(name)
            .cloned()
            .unwrap_or_else(|| Value::Null(nested.implied_type()));
        out.insert(name.clone(), propose_nested(nested, &prior_v, &configured));
    }
    marks
        .into_iter()
        .fold(Value::Object(out), |v, mark| v.mark(mark))
}

fn propose_nested(nested: &NestedBlock, prior: &Value, config: &Value) -> Value {
    if !config.is_known() {
        return config.clone();
    }
    let block = &nested.block;
    let (config, marks) = config.clone().unmark();
    let prior = prior.unmarked_ref();
    let proposed = match (nested.nesting, &config) {
        (NestingMode::Single | NestingMode::Group, _) => {
            if config.is_null() && nested.nesting == NestingMode::Single {
                config.clone()
            } else if config.is_null() {
                proposed_new(block, prior, &placeholder_object(block))
            } else {
                proposed_new(block, prior, &config)
            }
        }
        (NestingMode::List | NestingMode::Set, Value::Null(_)) => empty_collection(nested),
        (NestingMode::List, Value::List(elem_ty, elems)) => {
            let prior_elems = known_elements(prior);
            let proposed = elems
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let p = prior_elems
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| Value::Null(elem_ty.clone()));
                    proposed_new(block, &p, c)
                })
                .collect();
            Value::List(elem_ty.clone(), proposed)
        }
        (NestingMode::Set, Value::Set(elem_ty, elems)) => {
            let prior_elems = known_elements(prior);
            let mut used = HashSet::new();
            let proposed = elems
                .iter()
                .map(|c| {
                    let matched = prior_elems
                        .iter()
                        .enumerate()
                        .find(|(i, p)| !used.contains(i) && same_configured_element(block, p, c));
                    let p = match matched {
                        Some((i, p)) => {
                            used.insert(i);
                            p.clone()
                        }
                        None => Value::Null(elem_ty.clone()),
                    };
                    proposed_new(block, &p, c)
                })
                .collect();
            Value::set(elem_ty.clone(), proposed)
        }
        (NestingMode::Map, Value::Map(elem_ty, entries)) => {
            let proposed = entries
                .iter()
                .map(|(k, c)| {
                    let p = match prior {
                        Value::Map(_, prior_entries) => prior_entries.get(k).cloned(),
                        _ => None,
                    }
                    .unwrap_or_else(|| Value::Null(elem_ty.clone()));
                    (k.clone(), proposed_new(block, &p, c))
                })
                .collect();
            Value::Map(elem_ty.clone(), proposed)
        }
        (NestingMode::Map, _) => config.clone(),
        (mode, v) => panic!("{:?} nested block holds a value of type {}", mode, v.ty()),
    };
    marks.into_iter().fold(proposed, |v, mark| v.mark(mark))
}

fn known_elements(v: &Value) -> Vec<Value> {
    v.elements().map(<[Value]>::to_vec).unwrap_or_default()
}

/// Whether prior set element `p` is the one configured as `c`: every
/// attribute the configuration decides must be equal.
fn same_configured_element(block: &Block, p: &Value, c: &Value) -> bool {
    let attributes_match = block.attributes.iter().all(|(name, attribute)| {
        let cv = c.attr(name);
        if attribute.computed && cv.map_or(true, Value::is_null) {
            return true;
        }
        match (p.attr(name), cv) {
            (Some(pv), Some(cv)) => pv.unmark_deep().equals(&cv.unmark_deep()) == Some(true),
            (None, None) => true,
            _ => false,
        }
    });
    attributes_match
        && block.block_types.keys().all(|name| {
            match (p.attr(name), c.attr(name)) {
                (Some(pv), Some(cv)) => pv.unmark_deep().equals(&cv.unmark_deep()) == Some(true),
                (None, None) => true,
                _ => false,
            }
        })
}

fn empty_collection(nested: &NestedBlock) -> Value {
    let elem = nested.block.implied_type();
    match nested.nesting {
        NestingMode::Set => Value::Set(elem, Vec::new()),
        _ => Value::List(elem, Vec::new()),
    }
}

/// Replaces null list- and set-nested blocks by empty collections, at any
/// depth. Unknown blocks are left alone.
pub fn normalize_block_collections(block: &Block, value: &Value) -> Value {
    let (inner, marks) = value.clone().unmark();
    let Value::Object(mut attrs) = inner else {
        return value.clone();
    };
    for (name, nested) in &block.block_types {
        let Some(current) = attrs.get(name) else {
            continue;
        };
        let normalized = match (nested.nesting, current.unmarked_ref()) {
            (NestingMode::List | NestingMode::Set, Value::Null(_)) => empty_collection(nested),
            (NestingMode::List, Value::List(e, elems)) => Value::List(
                e.clone(),
                elems
                    .iter()
                    .map(|v| normalize_block_collections(&nested.block, v))
                    .collect(),
            ),
            (NestingMode::Set, Value::Set(e, elems)) => Value::set(
                e.clone(),
                elems
                    .iter()
                    .map(|v| normalize_block_collections(&nested.block, v))
                    .collect(),
            ),
            (NestingMode::Single | NestingMode::Group, Value::Object(_)) => {
                normalize_block_collections(&nested.block, current)
            }
            _ => continue,
        };
        attrs.insert(name.clone(), normalized);
    }
    marks
        .into_iter()
        .fold(Value::Object(attrs), |v, mark| v.mark(mark))
}
