//! Change computation between prior and planned state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::cty::{Type, Value};
use crate::flatmap::set_index;
use crate::instance::ResourceAttrDiff;
use crate::path::{AttributePath, PathStep};
use crate::schema::Block;
use crate::walk;
use crate::UNKNOWN_VARIABLE_VALUE;

/// One changed value found by [`value_diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub path: AttributePath,
    pub before: Value,
    pub after: Value,
}

/// Structural diff of two values of the same type, as leaf-most changes.
pub fn value_diff(before: &Value, after: &Value) -> Vec<ValueChange> {
    let mut out = Vec::new();
    diff_at(&AttributePath::new(), before, after, &mut out);
    out
}

fn diff_at(path: &AttributePath, before: &Value, after: &Value, out: &mut Vec<ValueChange>) {
    let (b, a) = (before.unmarked_ref(), after.unmarked_ref());
    match (b, a) {
        (Value::Object(bs), Value::Object(as_)) => {
            let keys: BTreeSet<&String> = bs.keys().chain(as_.keys()).collect();
            for k in keys {
                let child = path.child(PathStep::Attribute(k.clone()));
                match (bs.get(k), as_.get(k)) {
                    (Some(x), Some(y)) => diff_at(&child, x, y, out),
                    (Some(x), None) => diff_at(&child, x, &Value::Null(x.ty()), out),
                    (None, Some(y)) => diff_at(&child, &Value::Null(y.ty()), y, out),
                    (None, None) => {}
                }
            }
        }
        // A whole object appearing or disappearing is reported per attribute.
        (Value::Null(_), Value::Object(as_)) => {
            for (k, y) in as_ {
                diff_at(
                    &path.child(PathStep::Attribute(k.clone())),
                    &Value::Null(y.ty()),
                    y,
                    out,
                );
            }
        }
        (Value::Object(bs), Value::Null(_)) => {
            for (k, x) in bs {
                diff_at(
                    &path.child(PathStep::Attribute(k.clone())),
                    x,
                    &Value::Null(x.ty()),
                    out,
                );
            }
        }
        (Value::List(_, xs), Value::List(_, ys)) | (Value::Tuple(xs), Value::Tuple(ys))
            if xs.len() == ys.len() =>
        {
            for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
                diff_at(&path.child(PathStep::ElementIndex(i as i64)), x, y, out);
            }
        }
        (Value::Map(_, xs), Value::Map(_, ys)) => {
            let keys: BTreeSet<&String> = xs.keys().chain(ys.keys()).collect();
            for k in keys {
                let child = path.child(PathStep::ElementKey(k.clone()));
                match (xs.get(k), ys.get(k)) {
                    (Some(x), Some(y)) => diff_at(&child, x, y, out),
                    (x, y) => {
                        let before = x.cloned().unwrap_or_else(|| Value::Null(Type::Dynamic));
                        let after = y.cloned().unwrap_or_else(|| Value::Null(Type::Dynamic));
                        out.push(ValueChange {
                            path: child,
                            before,
                            after,
                        });
                    }
                }
            }
        }
        _ => {
            if b.unmark_deep() == a.unmark_deep() || b.equals(a) == Some(true) {
                return;
            }
            out.push(ValueChange {
                path: path.clone(),
                before: before.clone(),
                after: after.clone(),
            });
        }
    }
}

/// Drops changes that are only an unknown resolving to a known value.
pub fn without_unknown_resolution(changes: Vec<ValueChange>) -> Vec<ValueChange> {
    changes
        .into_iter()
        .filter(|c| c.before.is_known() || !c.after.is_wholly_known())
        .collect()
}

/// Top-level attribute names of the changes, sorted and deduplicated.
pub fn changed_keys(changes: &[ValueChange]) -> BTreeSet<String> {
    changes
        .iter()
        .filter_map(|c| c.path.top_level_attribute().map(str::to_string))
        .collect()
}

/// Requires-replace paths that actually change between prior and planned.
///
/// Paths are cut at their first set-element step. Nothing requires
/// replacement when there is no prior state.
pub fn check_requires_replace(
    requires_replace: &[AttributePath],
    prior: &Value,
    planned: &Value,
) -> Vec<AttributePath> {
    if prior.is_null() {
        return Vec::new();
    }
    let mut out: Vec<AttributePath> = Vec::new();
    for path in requires_replace {
        let path = path.trim_at_set_element();
        if out.contains(&path) {
            continue;
        }
        let before = prior.walk_path(&path);
        let after = planned.walk_path(&path);
        let changed = match (before, after) {
            (_, Some(a)) if !a.is_known() => true,
            (Some(b), Some(a)) => b.unmark_deep().equals(&a.unmark_deep()) != Some(true),
            (None, None) => false,
            _ => true,
        };
        if changed {
            out.push(path);
        }
    }
    out
}

/// Replacement keys: top-level names of requires-replace paths that are also
/// changed keys.
pub fn replace_keys(
    requires_replace: &[AttributePath],
    changed: &BTreeSet<String>,
) -> BTreeSet<String> {
    requires_replace
        .iter()
        .filter_map(AttributePath::top_level_attribute)
        .filter(|k| changed.contains(*k))
        .map(str::to_string)
        .collect()
}

/// Copies the prior value into config at each ignored dotted path, so the
/// planned state keeps it. Paths the schema does not know are skipped with a
/// warning.
pub fn apply_ignore_changes(
    block: &Block,
    prior: &Value,
    config: &Value,
    ignore_changes: &[String],
) -> Value {
    let mut config = config.clone();
    for key in ignore_changes {
        if let Err(err) = walk::resolve_flat_key(block, key) {
            warn!(ignore_changes = %key, "{}", err);
            continue;
        }
        let steps = flat_key_steps(prior, key);
        let Some(prior_v) = prior.walk_path(&AttributePath::from_steps(steps.clone())) else {
            continue;
        };
        if let Some(updated) = config.replace_at(&steps, prior_v.clone()) {
            config = updated;
        }
    }
    config
}

/// Parses a dotted key into steps, guided by the shape of `value`.
fn flat_key_steps(value: &Value, key: &str) -> Vec<PathStep> {
    let mut steps = Vec::new();
    let mut current = Some(value);
    for segment in key.split('.') {
        let step = match current.map(Value::unmarked_ref) {
            Some(Value::List(..) | Value::Tuple(_)) => match segment.parse() {
                Ok(i) => PathStep::ElementIndex(i),
                Err(_) => break,
            },
            Some(Value::Map(..)) => PathStep::ElementKey(segment.to_string()),
            Some(Value::Set(_, elems)) => match elems.iter().find(|e| set_index(e) == segment) {
                Some(e) => PathStep::ElementValue(e.unmark_deep()),
                None => break,
            },
            _ => PathStep::Attribute(segment.to_string()),
        };
        current = current.and_then(|v| v.walk_path(&AttributePath::from_steps(vec![step.clone()])));
        steps.push(step);
    }
    steps
}

/// Per-attribute diff in the flattened encoding.
///
/// Returns the attribute diffs and whether any of them requires a new
/// resource.
pub fn attribute_diffs(
    prior: &Value,
    planned: &Value,
    requires_replace: &[AttributePath],
) -> (BTreeMap<String, ResourceAttrDiff>, bool) {
    let mut d = Differ {
        result: BTreeMap::new(),
        requires_new: requires_replace.iter().map(AttributePath::flat_key).collect(),
        is_requires_new: false,
    };
    d.update_value("", prior, planned, false);
    (d.result, d.is_requires_new)
}

struct Differ {
    result: BTreeMap<String, ResourceAttrDiff>,
    requires_new: BTreeSet<String>,
    is_requires_new: bool,
}

fn extend(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

fn primitive_string(v: &Value) -> String {
    match v.unmarked_ref() {
        Value::Null(_) => String::new(),
        Value::Unknown(_) => UNKNOWN_VARIABLE_VALUE.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => panic!("{} is not a primitive value", other.ty()),
    }
}

fn count(n: usize) -> Value {
    Value::number(n as u64)
}

impl Differ {
    fn set_diff(&mut self, path: String, diff: ResourceAttrDiff) {
        if diff.requires_new {
            self.is_requires_new = true;
        }
        match self.result.get_mut(&path) {
            Some(existing) => {
                if existing.old.is_empty() {
                    existing.old = diff.old;
                }
                if existing.new.is_empty() {
                    existing.new = diff.new;
                    existing.new_computed = diff.new_computed;
                }
                if !existing.new.is_empty() && existing.new_removed {
                    existing.new_removed = false;
                }
            }
            None => {
                self.result.insert(path, diff);
            }
        }
    }

    fn add_value(&mut self, path: &str, value: &Value, requires_new: bool) {
        let value = value.unmarked_ref();
        if value.is_null() {
            return;
        }
        let requires_new = requires_new || self.requires_new.contains(path);
        let ty = value.ty();
        if ty.is_primitive() || matches!(ty, Type::Dynamic) {
            let new = primitive_string(value);
            self.set_diff(
                path.to_string(),
                ResourceAttrDiff {
                    new_computed: new == UNKNOWN_VARIABLE_VALUE,
                    new,
                    requires_new,
                    ..Default::default()
                },
            );
            return;
        }
        match (value, &ty) {
            (Value::Unknown(_), Type::List(_) | Type::Set(_) | Type::Tuple(_)) => {
                self.add_value(&extend(path, "#"), &Value::Unknown(Type::Number), requires_new)
            }
            (Value::Unknown(_), Type::Map(_)) => {
                self.add_value(&extend(path, "%"), &Value::Unknown(Type::Number), requires_new)
            }
            (Value::Unknown(_), Type::Object(attrs)) => {
                for (k, t) in attrs {
                    self.add_value(&extend(path, k), &Value::Unknown(t.clone()), requires_new);
                }
            }
            (Value::List(_, elems) | Value::Tuple(elems), _) => {
                self.add_value(&extend(path, "#"), &count(elems.len()), requires_new);
                for (i, e) in elems.iter().enumerate() {
                    self.add_value(&extend(path, &i.to_string()), e, requires_new);
                }
            }
            (Value::Set(_, elems), _) => {
                self.add_value(&extend(path, "#"), &count(elems.len()), requires_new);
                for e in elems {
                    self.add_value(&extend(path, &set_index(e)), e, requires_new);
                }
            }
            (Value::Map(_, entries), _) => {
                self.add_value(&extend(path, "%"), &count(entries.len()), requires_new);
                for (k, e) in entries {
                    self.add_value(&extend(path, k), e, requires_new);
                }
            }
            (Value::Object(attrs), _) => {
                for (k, e) in attrs {
                    self.add_value(&extend(path, k), e, requires_new);
                }
            }
            (other, _) => panic!("unexpected value of type {}", other.ty()),
        }
    }

    fn remove_value(&mut self, path: &str, value: &Value, requires_new: bool) {
        let value = value.unmarked_ref();
        let requires_new = requires_new || self.requires_new.contains(path);
        if value.is_null() || !value.is_known() {
            self.set_diff(
                path.to_string(),
                ResourceAttrDiff {
                    new_removed: true,
                    requires_new,
                    ..Default::default()
                },
            );
            return;
        }
        match value {
            Value::List(_, elems) | Value::Tuple(elems) => {
                self.remove_value(&extend(path, "#"), &count(elems.len()), requires_new);
                for (i, e) in elems.iter().enumerate() {
                    self.remove_value(&extend(path, &i.to_string()), e, requires_new);
                }
            }
            Value::Set(_, elems) => {
                self.remove_value(&extend(path, "#"), &count(elems.len()), requires_new);
                for e in elems {
                    self.remove_value(&extend(path, &set_index(e)), e, requires_new);
                }
            }
            Value::Map(_, entries) => {
                self.remove_value(&extend(path, "%"), &count(entries.len()), requires_new);
                for (k, e) in entries {
                    self.remove_value(&extend(path, k), e, requires_new);
                }
            }
            Value::Object(attrs) => {
                for (k, e) in attrs {
                    self.remove_value(&extend(path, k), e, requires_new);
                }
            }
            primitive => self.set_diff(
                path.to_string(),
                ResourceAttrDiff {
                    old: primitive_string(primitive),
                    new_removed: true,
                    requires_new,
                    ..Default::default()
                },
            ),
        }
    }

    fn replace(&mut self, path: &str, prior: &Value, planned: &Value, requires_new: bool) {
        self.add_value(path, planned, requires_new);
        self.remove_value(path, prior, requires_new);
    }

    fn update_value(&mut self, path: &str, prior: &Value, planned: &Value, requires_new: bool) {
        let (prior, planned) = (prior.unmarked_ref(), planned.unmarked_ref());
        if planned.is_null() {
            if !prior.is_null() {
                self.remove_value(path, prior, requires_new);
            }
            return;
        }
        if prior.is_null() {
            self.add_value(path, planned, requires_new);
            return;
        }
        let requires_new = requires_new || self.requires_new.contains(path);
        let planned_ty = planned.ty();

        if planned_ty.is_primitive() || matches!(planned_ty, Type::Dynamic) {
            if !(prior.ty().is_primitive() || matches!(prior.ty(), Type::Dynamic)) {
                return self.replace(path, prior, planned, requires_new);
            }
            let (old, new) = (primitive_string(prior), primitive_string(planned));
            if old != new {
                self.set_diff(
                    path.to_string(),
                    ResourceAttrDiff {
                        new_computed: new == UNKNOWN_VARIABLE_VALUE,
                        old,
                        new,
                        requires_new,
                        ..Default::default()
                    },
                );
            }
            return;
        }

        if !planned.is_known() {
            let marker = match planned_ty {
                Type::Map(_) => "%",
                Type::Object(_) => "",
                _ => "#",
            };
            match (prior, &planned_ty) {
                (Value::Object(attrs), Type::Object(_)) => {
                    for (k, p) in attrs {
                        self.update_value(&extend(path, k), p, &Value::Unknown(p.ty()), requires_new);
                    }
                }
                _ if !marker.is_empty() => match prior.length() {
                    Some(n) => self.update_value(
                        &extend(path, marker),
                        &count(n),
                        &Value::Unknown(Type::Number),
                        requires_new,
                    ),
                    None => self.replace(path, prior, planned, requires_new),
                },
                _ => self.replace(path, prior, planned, requires_new),
            }
            return;
        }

        match (prior, planned) {
            (
                Value::List(_, ps) | Value::Tuple(ps),
                Value::List(_, ns) | Value::Tuple(ns),
            ) => {
                self.update_value(&extend(path, "#"), &count(ps.len()), &count(ns.len()), requires_new);
                for (i, (p, n)) in ps.iter().zip(ns).enumerate() {
                    self.update_value(&extend(path, &i.to_string()), p, n, requires_new);
                }
                for (i, n) in ns.iter().enumerate().skip(ps.len()) {
                    self.add_value(&extend(path, &i.to_string()), n, requires_new);
                }
                for (i, p) in ps.iter().enumerate().skip(ns.len()) {
                    self.remove_value(&extend(path, &i.to_string()), p, requires_new);
                }
            }
            (Value::Set(_, ps), Value::Set(_, ns)) => {
                self.update_value(&extend(path, "#"), &count(ps.len()), &count(ns.len()), requires_new);
                for n in ns.iter().filter(|n| !ps.contains(n)) {
                    self.add_value(&extend(path, &set_index(n)), n, requires_new);
                }
                for p in ps.iter().filter(|p| !ns.contains(p)) {
                    self.remove_value(&extend(path, &set_index(p)), p, requires_new);
                }
            }
            (Value::Map(_, ps), Value::Map(_, ns)) => {
                self.update_value(&extend(path, "%"), &count(ps.len()), &count(ns.len()), requires_new);
                self.update_entries(path, ps, ns, requires_new);
            }
            (Value::Object(ps), Value::Object(ns)) => {
                self.update_entries(path, ps, ns, requires_new);
            }
            _ => self.replace(path, prior, planned, requires_new),
        }
    }

    fn update_entries(
        &mut self,
        path: &str,
        prior: &BTreeMap<String, Value>,
        planned: &BTreeMap<String, Value>,
        requires_new: bool,
    ) {
        for (k, n) in planned {
            match prior.get(k) {
                Some(p) => self.update_value(&extend(path, k), p, n, requires_new),
                None => self.add_value(&extend(path, k), n, requires_new),
            }
        }
        for (k, p) in prior {
            if !planned.contains_key(k) {
                self.remove_value(&extend(path, k), p, requires_new);
            }
        }
    }
}
