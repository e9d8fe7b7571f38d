use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use bigdecimal::BigDecimal;

use super::Type;
use crate::error::{Error, Result};
use crate::path::{AttributePath, PathStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mark {
    Sensitive,
}

pub type Marks = BTreeSet<Mark>;

/// A structural value.
///
/// Non-null, known values agree with their type exactly; widening only
/// happens in [`super::convert`]. The derived `PartialEq` is raw structural
/// equality: two unknowns of the same type compare equal. Use
/// [`Value::equals`] for the semantic comparison that refuses to decide in
/// the presence of unknowns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null(Type),
    Unknown(Type),
    Bool(bool),
    Number(BigDecimal),
    String(String),
    /// Element type and elements.
    List(Type, Vec<Value>),
    /// Element type and elements, kept sorted and free of known duplicates.
    Set(Type, Vec<Value>),
    Map(Type, BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
    Marked(Box<Value>, Marks),
}

impl Value {
    pub fn null(ty: Type) -> Value {
        Value::Null(ty)
    }

    pub fn unknown(ty: Type) -> Value {
        Value::Unknown(ty)
    }

    pub fn bool(b: bool) -> Value {
        Value::Bool(b)
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn number(n: impl Into<BigDecimal>) -> Value {
        Value::Number(n.into())
    }

    /// Parses decimal text without going through a float.
    pub fn parse_number(text: &str) -> Result<Value> {
        BigDecimal::from_str(text.trim())
            .map(Value::Number)
            .map_err(|e| Error::Decode(format!("invalid number {:?}: {}", text, e)))
    }

    pub fn list(element: Type, elements: Vec<Value>) -> Value {
        Value::List(element, elements)
    }

    /// Builds a set in canonical order. Wholly known duplicates collapse;
    /// elements containing unknowns are kept apart since they may yet differ.
    pub fn set(element: Type, mut elements: Vec<Value>) -> Value {
        elements.sort();
        elements.dedup_by(|a, b| a == b && a.is_wholly_known());
        Value::Set(element, elements)
    }

    pub fn map<I, K>(element: Type, entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Map(
            element,
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )
    }

    pub fn object<I, K>(attributes: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(
            attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }

    pub fn tuple(elements: Vec<Value>) -> Value {
        Value::Tuple(elements)
    }

    pub fn ty(&self) -> Type {
        match self {
            Value::Null(t) | Value::Unknown(t) => t.clone(),
            Value::Bool(_) => Type::Bool,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::List(e, _) => Type::list(e.clone()),
            Value::Set(e, _) => Type::set(e.clone()),
            Value::Map(e, _) => Type::map(e.clone()),
            Value::Object(attrs) => {
                Type::Object(attrs.iter().map(|(k, v)| (k.clone(), v.ty())).collect())
            }
            Value::Tuple(elems) => Type::Tuple(elems.iter().map(Value::ty).collect()),
            Value::Marked(v, _) => v.ty(),
        }
    }

    /// The value with any mark wrappers at this level skipped.
    pub fn unmarked_ref(&self) -> &Value {
        match self {
            Value::Marked(v, _) => v.unmarked_ref(),
            v => v,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.unmarked_ref(), Value::Null(_))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self.unmarked_ref(), Value::Unknown(_))
    }

    pub fn is_wholly_known(&self) -> bool {
        self.is_known() && self.children().iter().all(|(_, v)| v.is_wholly_known())
    }

    /// Direct children together with the path step leading to each.
    pub fn children(&self) -> Vec<(PathStep, &Value)> {
        match self.unmarked_ref() {
            Value::List(_, elems) | Value::Tuple(elems) => elems
                .iter()
                .enumerate()
                .map(|(i, v)| (PathStep::ElementIndex(i as i64), v))
                .collect(),
            Value::Set(_, elems) => elems
                .iter()
                .map(|v| (PathStep::ElementValue(v.unmark_deep()), v))
                .collect(),
            Value::Map(_, entries) => entries
                .iter()
                .map(|(k, v)| (PathStep::ElementKey(k.clone()), v))
                .collect(),
            Value::Object(attrs) => attrs
                .iter()
                .map(|(k, v)| (PathStep::Attribute(k.clone()), v))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Looks up an object attribute.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        match self.unmarked_ref() {
            Value::Object(attrs) => attrs.get(name),
            _ => None,
        }
    }

    /// Looks up an object attribute that the schema guarantees to exist.
    ///
    /// Panics when the attribute is absent: asking for it means the caller
    /// has left the declared schema surface.
    pub fn get_attr(&self, name: &str) -> &Value {
        match self.attr(name) {
            Some(v) => v,
            None => panic!("value of type {} has no attribute {:?}", self.ty(), name),
        }
    }

    pub fn length(&self) -> Option<usize> {
        match self.unmarked_ref() {
            Value::List(_, elems) | Value::Set(_, elems) | Value::Tuple(elems) => Some(elems.len()),
            Value::Map(_, entries) => Some(entries.len()),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Value]> {
        match self.unmarked_ref() {
            Value::List(_, elems) | Value::Set(_, elems) | Value::Tuple(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unmarked_ref() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unmarked_ref() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match self.unmarked_ref() {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Semantic equality. `None` when an unknown prevents a decision.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        let (a, b) = (self.unmarked_ref(), other.unmarked_ref());
        match (a, b) {
            (Value::Unknown(_), _) | (_, Value::Unknown(_)) => None,
            (Value::Null(_), Value::Null(_)) => Some(true),
            (Value::Null(_), _) | (_, Value::Null(_)) => Some(false),
            (Value::List(_, x), Value::List(_, y)) | (Value::Tuple(x), Value::Tuple(y)) => {
                if x.len() != y.len() {
                    return Some(false);
                }
                all_equal(x.iter().zip(y).map(|(p, q)| p.equals(q)))
            }
            (Value::Set(_, x), Value::Set(_, y)) => {
                if a.is_wholly_known() && b.is_wholly_known() {
                    Some(a.unmark_deep() == b.unmark_deep())
                } else if x.len() != y.len() && x.iter().chain(y).all(Value::is_known) {
                    Some(false)
                } else {
                    None
                }
            }
            (Value::Map(_, x), Value::Map(_, y)) | (Value::Object(x), Value::Object(y)) => {
                if x.len() != y.len() || x.keys().ne(y.keys()) {
                    return Some(false);
                }
                all_equal(x.values().zip(y.values()).map(|(p, q)| p.equals(q)))
            }
            (x, y) => Some(x == y),
        }
    }

    /// Whether the value has exactly the given type, recursively.
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self.unmarked_ref(), ty) {
            (_, Type::Dynamic) => true,
            (Value::Null(t) | Value::Unknown(t), ty) => t == ty,
            (Value::Bool(_), Type::Bool)
            | (Value::Number(_), Type::Number)
            | (Value::String(_), Type::String) => true,
            (Value::List(e, xs), Type::List(te)) | (Value::Set(e, xs), Type::Set(te)) => {
                e == te.as_ref() && xs.iter().all(|x| x.conforms_to(te))
            }
            (Value::Map(e, xs), Type::Map(te)) => {
                e == te.as_ref() && xs.values().all(|x| x.conforms_to(te))
            }
            (Value::Object(attrs), Type::Object(tys)) => {
                attrs.len() == tys.len()
                    && tys
                        .iter()
                        .all(|(k, t)| attrs.get(k).is_some_and(|v| v.conforms_to(t)))
            }
            (Value::Tuple(xs), Type::Tuple(ts)) => {
                xs.len() == ts.len() && xs.iter().zip(ts).all(|(x, t)| x.conforms_to(t))
            }
            _ => false,
        }
    }

    pub fn mark(self, mark: Mark) -> Value {
        match self {
            Value::Marked(v, mut marks) => {
                marks.insert(mark);
                Value::Marked(v, marks)
            }
            v => Value::Marked(Box::new(v), Marks::from([mark])),
        }
    }

    pub fn is_marked(&self) -> bool {
        matches!(self, Value::Marked(..))
    }

    /// Removes the marks at this level only.
    pub fn unmark(self) -> (Value, Marks) {
        match self {
            Value::Marked(v, marks) => {
                let (inner, mut inner_marks) = v.unmark();
                inner_marks.extend(marks);
                (inner, inner_marks)
            }
            v => (v, Marks::new()),
        }
    }

    /// A copy with every mark at every depth removed.
    pub fn unmark_deep(&self) -> Value {
        match self {
            Value::Marked(v, _) => v.unmark_deep(),
            Value::List(e, elems) => {
                Value::List(e.clone(), elems.iter().map(Value::unmark_deep).collect())
            }
            Value::Tuple(elems) => Value::Tuple(elems.iter().map(Value::unmark_deep).collect()),
            Value::Set(e, elems) => {
                Value::set(e.clone(), elems.iter().map(Value::unmark_deep).collect())
            }
            Value::Map(e, entries) => Value::Map(
                e.clone(),
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.unmark_deep()))
                    .collect(),
            ),
            Value::Object(attrs) => Value::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.unmark_deep()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Removes all marks, returning where each set of marks was found so they
    /// can be restored with [`Value::mark_with_paths`].
    pub fn unmark_deep_with_paths(&self) -> (Value, Vec<(AttributePath, Marks)>) {
        let mut found = Vec::new();
        let value = self.clone().transform(&mut |path, v| {
            if v.is_marked() {
                let (inner, marks) = v.unmark();
                found.push((path.clone(), marks));
                inner
            } else {
                v
            }
        });
        (value, found)
    }

    pub fn mark_with_paths(self, marks: &[(AttributePath, Marks)]) -> Value {
        if marks.is_empty() {
            return self;
        }
        self.transform(&mut |path, v| {
            marks
                .iter()
                .filter(|(p, _)| p == path)
                .flat_map(|(_, m)| m.iter().copied())
                .fold(v, Value::mark)
        })
    }

    /// Rebuilds the value bottom-up, passing every node and its path to `f`.
    pub fn transform<F>(self, f: &mut F) -> Value
    where
        F: FnMut(&AttributePath, Value) -> Value,
    {
        self.transform_at(&AttributePath::new(), f)
    }

    fn transform_at<F>(self, path: &AttributePath, f: &mut F) -> Value
    where
        F: FnMut(&AttributePath, Value) -> Value,
    {
        let rebuilt = match self {
            Value::List(e, elems) => Value::List(
                e,
                elems
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| v.transform_at(&path.child(PathStep::ElementIndex(i as i64)), f))
                    .collect(),
            ),
            Value::Tuple(elems) => Value::Tuple(
                elems
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| v.transform_at(&path.child(PathStep::ElementIndex(i as i64)), f))
                    .collect(),
            ),
            Value::Set(e, elems) => {
                let elems = elems
                    .into_iter()
                    .map(|v| {
                        let step = PathStep::ElementValue(v.unmark_deep());
                        v.transform_at(&path.child(step), f)
                    })
                    .collect();
                Value::set(e, elems)
            }
            Value::Map(e, entries) => Value::Map(
                e,
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        let v = v.transform_at(&path.child(PathStep::ElementKey(k.clone())), f);
                        (k, v)
                    })
                    .collect(),
            ),
            Value::Object(attrs) => Value::Object(
                attrs
                    .into_iter()
                    .map(|(k, v)| {
                        let v = v.transform_at(&path.child(PathStep::Attribute(k.clone())), f);
                        (k, v)
                    })
                    .collect(),
            ),
            Value::Marked(v, marks) => Value::Marked(Box::new(v.transform_at(path, f)), marks),
            other => other,
        };
        f(path, rebuilt)
    }

    /// Follows `path` into the value.
    pub fn walk_path(&self, path: &AttributePath) -> Option<&Value> {
        path.steps()
            .iter()
            .try_fold(self, |current, step| match (current.unmarked_ref(), step) {
                (Value::Object(attrs), PathStep::Attribute(name)) => attrs.get(name),
                (Value::Map(_, entries), PathStep::ElementKey(key)) => entries.get(key),
                (Value::List(_, elems) | Value::Tuple(elems), PathStep::ElementIndex(i)) => {
                    usize::try_from(*i).ok().and_then(|i| elems.get(i))
                }
                (Value::Set(_, elems), PathStep::ElementValue(wanted)) => {
                    elems.iter().find(|e| &e.unmark_deep() == wanted)
                }
                _ => None,
            })
    }

    /// A copy with the value at `steps` replaced by `new`. `None` when the
    /// path does not address an existing value.
    pub fn replace_at(&self, steps: &[PathStep], new: Value) -> Option<Value> {
        let Some((step, rest)) = steps.split_first() else {
            return Some(new);
        };
        match (self, step) {
            (Value::Marked(v, marks), _) => Some(Value::Marked(
                Box::new(v.replace_at(steps, new)?),
                marks.clone(),
            )),
            (Value::Object(attrs), PathStep::Attribute(name)) => {
                let child = attrs.get(name)?.replace_at(rest, new)?;
                let mut attrs = attrs.clone();
                attrs.insert(name.clone(), child);
                Some(Value::Object(attrs))
            }
            (Value::Map(e, entries), PathStep::ElementKey(key)) => {
                let mut entries = entries.clone();
                match entries.get(key) {
                    Some(existing) => {
                        let child = existing.replace_at(rest, new)?;
                        entries.insert(key.clone(), child);
                    }
                    None if rest.is_empty() => {
                        entries.insert(key.clone(), new);
                    }
                    None => return None,
                }
                Some(Value::Map(e.clone(), entries))
            }
            (Value::List(_, elems) | Value::Tuple(elems), PathStep::ElementIndex(i)) => {
                let i = usize::try_from(*i).ok()?;
                let child = elems.get(i)?.replace_at(rest, new)?;
                let mut elems = elems.clone();
                elems[i] = child;
                Some(match self {
                    Value::List(e, _) => Value::List(e.clone(), elems),
                    _ => Value::Tuple(elems),
                })
            }
            _ => None,
        }
    }

    /// Content hash used to key set elements in the legacy flat encoding.
    pub fn hash32(&self) -> u32 {
        let mut hasher = blake3::Hasher::new();
        self.write_canonical(&mut hasher);
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_canonical(&self, h: &mut blake3::Hasher) {
        fn write_len(h: &mut blake3::Hasher, tag: &[u8], len: usize) {
            h.update(tag);
            h.update(len.to_string().as_bytes());
            h.update(b":");
        }
        match self {
            Value::Null(t) => {
                h.update(b"N");
                h.update(t.to_string().as_bytes());
            }
            Value::Unknown(t) => {
                h.update(b"U");
                h.update(t.to_string().as_bytes());
            }
            Value::Bool(b) => {
                h.update(if *b { b"B1" } else { b"B0" });
            }
            Value::Number(n) => {
                let text = n.normalized().to_string();
                write_len(h, b"#", text.len());
                h.update(text.as_bytes());
            }
            Value::String(s) => {
                write_len(h, b"S", s.len());
                h.update(s.as_bytes());
            }
            Value::List(_, elems) | Value::Set(_, elems) | Value::Tuple(elems) => {
                let tag: &[u8] = match self {
                    Value::List(..) => b"L",
                    Value::Set(..) => b"T",
                    _ => b"P",
                };
                write_len(h, tag, elems.len());
                for e in elems {
                    e.write_canonical(h);
                }
            }
            Value::Map(_, entries) | Value::Object(entries) => {
                let tag: &[u8] = if matches!(self, Value::Map(..)) {
                    b"M"
                } else {
                    b"O"
                };
                write_len(h, tag, entries.len());
                for (k, v) in entries {
                    write_len(h, b"K", k.len());
                    h.update(k.as_bytes());
                    v.write_canonical(h);
                }
            }
            Value::Marked(v, _) => v.write_canonical(h),
        }
    }
}

fn all_equal(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut undecided = false;
    for r in results {
        match r {
            Some(false) => return Some(false),
            None => undecided = true,
            Some(true) => {}
        }
    }
    if undecided {
        None
    } else {
        Some(true)
    }
}
