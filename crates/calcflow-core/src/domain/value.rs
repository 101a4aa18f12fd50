//! Targets, value requirements and value specifications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a computation is performed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Primitive,
    Security,
    Position,
    Portfolio,
}

/// The entity a value is computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTarget {
    pub kind: TargetKind,
    pub id: String,
}

impl ComputationTarget {
    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn primitive(id: impl Into<String>) -> Self {
        Self::new(TargetKind::Primitive, id)
    }
}

impl fmt::Display for ComputationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.id)
    }
}

/// A request for a named value on a target, before a function is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    pub value_name: String,
    pub target: ComputationTarget,
}

impl ValueRequirement {
    pub fn new(value_name: impl Into<String>, target: ComputationTarget) -> Self {
        Self {
            value_name: value_name.into(),
            target,
        }
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value_name, self.target)
    }
}

/// A resolved value: a named value on a target as produced by one function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub value_name: String,
    pub target: ComputationTarget,
    pub function_id: String,
}

impl ValueSpecification {
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTarget,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            function_id: function_id.into(),
        }
    }

    /// The requirement this specification satisfies.
    pub fn requirement(&self) -> ValueRequirement {
        ValueRequirement::new(self.value_name.clone(), self.target.clone())
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[{}]", self.value_name, self.target, self.function_id)
    }
}

/// A value produced for a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    pub specification: ValueSpecification,
    pub value: serde_json::Value,
}

impl ComputedValue {
    pub fn new(specification: ValueSpecification, value: serde_json::Value) -> Self {
        Self {
            specification,
            value,
        }
    }
}
