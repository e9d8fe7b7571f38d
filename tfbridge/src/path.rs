use std::fmt;

use crate::cty::Value;

/// One step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathStep {
    /// Descend into a named object attribute or nested block.
    Attribute(String),
    /// Descend into a map element.
    ElementKey(String),
    /// Descend into a list or tuple element.
    ElementIndex(i64),
    /// Descend into a set element, identified by its value.
    ElementValue(Value),
}

/// Address of a value inside a resource object.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttributePath {
    steps: Vec<PathStep>,
}

impl AttributePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.steps.push(PathStep::Attribute(name.into()));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.steps.push(PathStep::ElementKey(key.into()));
        self
    }

    pub fn index(mut self, index: i64) -> Self {
        self.steps.push(PathStep::ElementIndex(index));
        self
    }

    pub fn element(mut self, value: Value) -> Self {
        self.steps.push(PathStep::ElementValue(value));
        self
    }

    /// A copy of this path extended by one step.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// The name of the top-level attribute this path starts with, if any.
    pub fn top_level_attribute(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Attribute(name)) => Some(name),
            _ => None,
        }
    }

    /// Drops every step from the first set-element step onwards.
    pub fn trim_at_set_element(&self) -> Self {
        let end = self
            .steps
            .iter()
            .position(|s| matches!(s, PathStep::ElementValue(_)))
            .unwrap_or(self.steps.len());
        Self {
            steps: self.steps[..end].to_vec(),
        }
    }

    /// Dotted key in the legacy flat attribute encoding, e.g. `rule.0.port`.
    pub fn flat_key(&self) -> String {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|step| match step {
                PathStep::Attribute(name) | PathStep::ElementKey(name) => name.clone(),
                PathStep::ElementIndex(i) => i.to_string(),
                PathStep::ElementValue(v) => crate::flatmap::set_index(v),
            })
            .collect();
        parts.join(".")
    }

    pub fn to_schema_path(&self) -> SchemaPath {
        SchemaPath {
            steps: self
                .steps
                .iter()
                .map(|step| match step {
                    PathStep::Attribute(name) => SchemaStep::Attribute(name.clone()),
                    _ => SchemaStep::Element,
                })
                .collect(),
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "<root>");
        }
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::Attribute(name) if i == 0 => write!(f, "{}", name)?,
                PathStep::Attribute(name) => write!(f, ".{}", name)?,
                PathStep::ElementKey(key) => write!(f, "[{:?}]", key)?,
                PathStep::ElementIndex(index) => write!(f, "[{}]", index)?,
                PathStep::ElementValue(_) => write!(f, "[<set element>]")?,
            }
        }
        Ok(())
    }
}

/// One step of a [`SchemaPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaStep {
    Attribute(String),
    /// Collection element. Schemas are shape-only, so no index is recorded.
    Element,
}

/// Index-agnostic path through a schema tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SchemaPath {
    steps: Vec<SchemaStep>,
}

impl SchemaPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[SchemaStep] {
        &self.steps
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.steps.push(SchemaStep::Attribute(name.into()));
        self
    }

    pub fn element(mut self) -> Self {
        self.steps.push(SchemaStep::Element);
        self
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .steps
            .iter()
            .map(|step| match step {
                SchemaStep::Attribute(name) => name.as_str(),
                SchemaStep::Element => "$",
            })
            .collect();
        write!(f, "{}", parts.join("."))
    }
}
