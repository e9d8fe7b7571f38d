use std::collections::BTreeMap;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::error::{Error, Result};

/// Type of a structural value.
///
/// `Capsule` exists only so that schemas carrying opaque host types can be
/// represented long enough to reject them: every conversion of a capsule type
/// panics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Bool,
    Number,
    String,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Object(BTreeMap<String, Type>),
    Tuple(Vec<Type>),
    /// Placeholder for "any type", resolved per value.
    Dynamic,
    Capsule(String),
}

impl Type {
    pub fn list(element: Type) -> Type {
        Type::List(Box::new(element))
    }

    pub fn set(element: Type) -> Type {
        Type::Set(Box::new(element))
    }

    pub fn map(element: Type) -> Type {
        Type::Map(Box::new(element))
    }

    pub fn object<I, K>(attributes: I) -> Type
    where
        I: IntoIterator<Item = (K, Type)>,
        K: Into<String>,
    {
        Type::Object(
            attributes
                .into_iter()
                .map(|(k, t)| (k.into(), t))
                .collect(),
        )
    }

    pub fn empty_object() -> Type {
        Type::Object(BTreeMap::new())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Bool | Type::Number | Type::String)
    }

    /// Element type of a list, set or map.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::List(e) | Type::Set(e) | Type::Map(e) => Some(e),
            _ => None,
        }
    }

    pub fn attribute_types(&self) -> Option<&BTreeMap<String, Type>> {
        match self {
            Type::Object(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Encodes the type in the provider protocol's JSON type notation.
    ///
    /// Panics on capsule types, which have no encoding.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Type::Bool => json!("bool"),
            Type::Number => json!("number"),
            Type::String => json!("string"),
            Type::Dynamic => json!("dynamic"),
            Type::List(e) => json!(["list", e.to_json()]),
            Type::Set(e) => json!(["set", e.to_json()]),
            Type::Map(e) => json!(["map", e.to_json()]),
            Type::Object(attrs) => {
                let attrs: serde_json::Map<String, serde_json::Value> = attrs
                    .iter()
                    .map(|(k, t)| (k.clone(), t.to_json()))
                    .collect();
                json!(["object", attrs])
            }
            Type::Tuple(elems) => {
                let elems: Vec<serde_json::Value> = elems.iter().map(Type::to_json).collect();
                json!(["tuple", elems])
            }
            Type::Capsule(name) => panic!("capsule type {} cannot be encoded", name),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Type> {
        use serde_json::Value as J;
        match value {
            J::String(name) => match name.as_str() {
                "bool" => Ok(Type::Bool),
                "number" => Ok(Type::Number),
                "string" => Ok(Type::String),
                "dynamic" => Ok(Type::Dynamic),
                other => Err(Error::Decode(format!("unsupported primitive type {:?}", other))),
            },
            J::Array(parts) => {
                let kind = parts.first().and_then(J::as_str).ok_or_else(|| {
                    Error::Decode(format!("type must start with a kind name: {}", value))
                })?;
                let arg = parts.get(1).ok_or_else(|| {
                    Error::Decode(format!("{} type is missing its argument", kind))
                })?;
                match kind {
                    "list" => Ok(Type::list(Type::from_json(arg)?)),
                    "set" => Ok(Type::set(Type::from_json(arg)?)),
                    "map" => Ok(Type::map(Type::from_json(arg)?)),
                    "object" => {
                        let attrs = arg.as_object().ok_or_else(|| {
                            Error::Decode("object attribute types must be a JSON object".into())
                        })?;
                        // A third element lists optional attributes; it does not
                        // affect the value shape.
                        let attrs = attrs
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), Type::from_json(v)?)))
                            .collect::<Result<BTreeMap<_, _>>>()?;
                        Ok(Type::Object(attrs))
                    }
                    "tuple" => {
                        let elems = arg.as_array().ok_or_else(|| {
                            Error::Decode("tuple element types must be a JSON array".into())
                        })?;
                        Ok(Type::Tuple(
                            elems.iter().map(Type::from_json).collect::<Result<_>>()?,
                        ))
                    }
                    other => Err(Error::Decode(format!("unsupported type kind {:?}", other))),
                }
            }
            other => Err(Error::Decode(format!("invalid type notation {}", other))),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Capsule(name) => write!(f, "capsule({})", name),
            _ => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Type::from_json(&value).map_err(de::Error::custom)
    }
}
