//! Type and value family of the protocol-v6 generation.
//!
//! These mirror the structural model in [`crate::cty`] but are owned by the
//! other protocol generation and evolve on their own. [`crate::bridge`] is
//! the only place that maps between the two.

use std::collections::{BTreeMap, BTreeSet};

use bigdecimal::BigDecimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    DynamicPseudoType,
    List {
        element_type: Box<Type>,
    },
    Set {
        element_type: Box<Type>,
    },
    Map {
        element_type: Box<Type>,
    },
    Object {
        attribute_types: BTreeMap<String, Type>,
        optional_attributes: BTreeSet<String>,
    },
    Tuple {
        element_types: Vec<Type>,
    },
}

impl Type {
    /// The object type with no attributes. Distinct from a null object.
    pub fn empty_object() -> Type {
        Type::Object {
            attribute_types: BTreeMap::new(),
            optional_attributes: BTreeSet::new(),
        }
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, Type::Object { attribute_types, .. } if attribute_types.is_empty())
    }

    pub fn object(attribute_types: BTreeMap<String, Type>) -> Type {
        Type::Object {
            attribute_types,
            optional_attributes: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Inner {
    Null,
    Unknown,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    /// Elements of a list, set or tuple.
    Elements(Vec<Value>),
    /// Entries of a map or object.
    Entries(BTreeMap<String, Value>),
}

/// A value of the protocol-v6 family: a type plus a payload that may be null
/// or unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    typ: Type,
    inner: Inner,
}

impl Value {
    pub fn null(typ: Type) -> Value {
        Value {
            typ,
            inner: Inner::Null,
        }
    }

    pub fn unknown(typ: Type) -> Value {
        Value {
            typ,
            inner: Inner::Unknown,
        }
    }

    pub fn bool(b: bool) -> Value {
        Value {
            typ: Type::Bool,
            inner: Inner::Bool(b),
        }
    }

    pub fn number(n: BigDecimal) -> Value {
        Value {
            typ: Type::Number,
            inner: Inner::Number(n),
        }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value {
            typ: Type::String,
            inner: Inner::String(s.into()),
        }
    }

    /// Builds a list, set or tuple value. `typ` must be one of those types.
    pub fn sequence(typ: Type, elements: Vec<Value>) -> Value {
        debug_assert!(matches!(
            typ,
            Type::List { .. } | Type::Set { .. } | Type::Tuple { .. }
        ));
        Value {
            typ,
            inner: Inner::Elements(elements),
        }
    }

    /// Builds a map or object value. `typ` must be one of those types.
    pub fn entries(typ: Type, entries: BTreeMap<String, Value>) -> Value {
        debug_assert!(matches!(typ, Type::Map { .. } | Type::Object { .. }));
        Value {
            typ,
            inner: Inner::Entries(entries),
        }
    }

    pub fn empty_object() -> Value {
        Value::entries(Type::empty_object(), BTreeMap::new())
    }

    pub fn typ(&self) -> &Type {
        &self.typ
    }

    pub fn is_null(&self) -> bool {
        matches!(self.inner, Inner::Null)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self.inner, Inner::Unknown)
    }

    pub fn is_fully_known(&self) -> bool {
        match &self.inner {
            Inner::Unknown => false,
            Inner::Elements(elems) => elems.iter().all(Value::is_fully_known),
            Inner::Entries(entries) => entries.values().all(Value::is_fully_known),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.inner {
            Inner::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match &self.inner {
            Inner::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.inner {
            Inner::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&[Value]> {
        match &self.inner {
            Inner::Elements(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn as_entries(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.inner {
            Inner::Entries(entries) => Some(entries),
            _ => None,
        }
    }
}
