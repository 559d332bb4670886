//! Compiled policies
//!
//! A [`CompiledPolicy`] is the compiler's output unit: scope constraints, one
//! condition and a set of annotations. It renders to Cedar text and converts
//! into a `cedar_policy::Policy` carrying its deterministic id.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use cedar_policy::{Policy, PolicyId};

use crate::condition::{and, write_string, Condition, EntityRef};
use crate::error::{Error, Result};
use crate::schema::EntityType;

/// Annotation holding the policy id in Cedar text
pub const ID_ANNOTATION: &str = "id";

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `permit`
    Permit,
    /// `forbid`
    Forbid,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => f.write_str("permit"),
            Effect::Forbid => f.write_str("forbid"),
        }
    }
}

/// Principal or resource scope constraint
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeConstraint {
    /// Unconstrained
    Any,
    /// `== Type::"id"`
    Eq(EntityRef),
    /// `in Type::"id"`
    In(EntityRef),
    /// `is Type`
    Is(EntityType),
}

/// Action scope constraint
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConstraint {
    /// Unconstrained
    Any,
    /// `== Action::"id"`
    Eq(EntityRef),
    /// `in [Action::"a", Action::"b"]`
    In(Vec<EntityRef>),
}

/// A single compiled Cedar policy
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPolicy {
    /// Deterministic policy id
    pub id: String,
    /// Permit or forbid
    pub effect: Effect,
    /// Principal scope
    pub principal: ScopeConstraint,
    /// Action scope
    pub action: ActionConstraint,
    /// Resource scope
    pub resource: ScopeConstraint,
    /// `when` condition; `Empty` renders no clause
    pub condition: Condition,
    /// Annotations, rendered in key order
    pub annotations: BTreeMap<String, String>,
}

impl CompiledPolicy {
    /// Create an unconstrained policy with the given effect
    pub fn new(id: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            effect,
            principal: ScopeConstraint::Any,
            action: ActionConstraint::Any,
            resource: ScopeConstraint::Any,
            condition: Condition::Empty,
            annotations: BTreeMap::new(),
        }
    }

    /// Create an unconstrained `permit`
    pub fn permit(id: impl Into<String>) -> Self {
        Self::new(id, Effect::Permit)
    }

    /// Create an unconstrained `forbid`
    pub fn forbid(id: impl Into<String>) -> Self {
        Self::new(id, Effect::Forbid)
    }

    /// Replace the principal scope
    pub fn with_principal(mut self, scope: ScopeConstraint) -> Self {
        self.principal = scope;
        self
    }

    /// Replace the action scope
    pub fn with_action(mut self, scope: ActionConstraint) -> Self {
        self.action = scope;
        self
    }

    /// Replace the resource scope
    pub fn with_resource(mut self, scope: ScopeConstraint) -> Self {
        self.resource = scope;
        self
    }

    /// Replace the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// AND a condition onto the existing `when` clause
    pub fn when(mut self, condition: Condition) -> Self {
        let existing = std::mem::replace(&mut self.condition, Condition::Empty);
        self.condition = and(existing, condition);
        self
    }

    /// Add an annotation
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Convert into a Cedar policy carrying this policy's id
    pub fn to_cedar(&self) -> Result<Policy> {
        Policy::parse(Some(PolicyId::new(&self.id)), self.to_string())
            .map_err(|e| Error::conversion(&self.id, e.to_string()))
    }

    /// Cedar JSON (EST) form of this policy
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_cedar()?
            .to_json()
            .map_err(|e| Error::conversion(&self.id, e.to_string()))
    }
}

fn write_scope(f: &mut fmt::Formatter<'_>, var: &str, scope: &ScopeConstraint) -> fmt::Result {
    match scope {
        ScopeConstraint::Any => f.write_str(var),
        ScopeConstraint::Eq(e) => write!(f, "{var} == {e}"),
        ScopeConstraint::In(e) => write!(f, "{var} in {e}"),
        ScopeConstraint::Is(ty) => write!(f, "{var} is {ty}"),
    }
}

impl fmt::Display for CompiledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `@id` carries the policy id through the text form
        let id = std::iter::once((ID_ANNOTATION, self.id.as_str()));
        let annotations = self
            .annotations
            .iter()
            .filter(|(key, _)| key.as_str() != ID_ANNOTATION)
            .map(|(key, value)| (key.as_str(), value.as_str()));
        for (key, value) in id.chain(annotations) {
            write!(f, "@{key}(")?;
            write_string(f, value)?;
            f.write_str(")\n")?;
        }
        writeln!(f, "{} (", self.effect)?;
        f.write_str("  ")?;
        write_scope(f, "principal", &self.principal)?;
        f.write_str(",\n  ")?;
        match &self.action {
            ActionConstraint::Any => f.write_str("action")?,
            ActionConstraint::Eq(e) => write!(f, "action == {e}")?,
            ActionConstraint::In(actions) => {
                f.write_str("action in [")?;
                for (i, a) in actions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_char(']')?;
            }
        }
        f.write_str(",\n  ")?;
        write_scope(f, "resource", &self.resource)?;
        f.write_str("\n)")?;
        if !self.condition.is_empty() {
            write!(f, "\nwhen {{ {} }}", self.condition)?;
        }
        f.write_char(';')
    }
}
