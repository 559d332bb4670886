//! Policy collections
//!
//! A collection is a named, id-keyed set of compiled policies. Ordering is by
//! id so rendered output is stable across runs.

use std::collections::BTreeMap;

use cedar_policy::{ParseErrors, PolicyId, PolicySet};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::policy::{CompiledPolicy, ID_ANNOTATION};

/// Deterministic policy id
///
/// `<binding>:<kind>:<principal index>.<rule index>`. Kinds carry their own
/// suffix for specialized policies (`ClusterRoleBinding/impersonate`).
pub fn policy_id(binding: &str, kind: &str, principal_index: usize, rule_index: usize) -> String {
    format!("{binding}:{kind}:{principal_index}.{rule_index}")
}

/// Parse Cedar policy text, using each `@id` annotation as the policy id
///
/// Policies without `@id` keep the ids Cedar assigns (`policy0`, ...).
/// Templates are rejected.
pub fn parse_policy_set(source_name: &str, text: &str) -> Result<PolicySet> {
    let parsed: PolicySet = text
        .parse()
        .map_err(|e: ParseErrors| Error::parse(source_name, e.to_string()))?;
    if parsed.templates().next().is_some() {
        return Err(Error::parse(source_name, "policy templates are not supported"));
    }

    let mut set = PolicySet::new();
    for policy in parsed.policies() {
        let policy = match policy.annotation(ID_ANNOTATION) {
            Some(id) => policy.new_id(PolicyId::new(id)),
            None => policy.clone(),
        };
        set.add(policy)
            .map_err(|e| Error::parse(source_name, e.to_string()))?;
    }
    Ok(set)
}

/// Named set of compiled policies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyCollection {
    name: String,
    policies: BTreeMap<String, CompiledPolicy>,
}

impl PolicyCollection {
    /// Create an empty collection
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policies: BTreeMap::new(),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a policy
    ///
    /// Fails if a policy with the same id is already present.
    pub fn insert(&mut self, policy: CompiledPolicy) -> Result<()> {
        if self.policies.contains_key(&policy.id) {
            return Err(Error::duplicate_policy_id(&self.name, &policy.id));
        }
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Move every policy from `other` into this collection
    ///
    /// The merge is all or nothing: on a duplicate id this collection is left
    /// unchanged.
    pub fn merge(&mut self, other: PolicyCollection) -> Result<()> {
        if let Some(id) = other.policies.keys().find(|id| self.policies.contains_key(*id)) {
            return Err(Error::duplicate_policy_id(&self.name, id));
        }
        debug!(
            collection = %self.name,
            from = %other.name,
            count = other.policies.len(),
            "Merging policies"
        );
        self.policies.extend(other.policies);
        Ok(())
    }

    /// Look up a policy by id
    pub fn get(&self, id: &str) -> Option<&CompiledPolicy> {
        self.policies.get(id)
    }

    /// Iterate policies in id order
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPolicy> {
        self.policies.values()
    }

    /// Number of policies
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Convert into a Cedar policy set
    pub fn to_policy_set(&self) -> Result<PolicySet> {
        let mut set = PolicySet::new();
        for policy in self.policies.values() {
            set.add(policy.to_cedar()?)
                .map_err(|e| Error::conversion(&policy.id, e.to_string()))?;
        }
        Ok(set)
    }

    /// Render every policy as Cedar text, separated by blank lines
    pub fn to_cedar(&self) -> String {
        self.policies
            .values()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Cedar JSON policy set form
    pub fn to_json(&self) -> Result<Value> {
        let mut statics = Map::new();
        for policy in self.policies.values() {
            statics.insert(policy.id.clone(), policy.to_json()?);
        }
        Ok(json!({
            "staticPolicies": statics,
            "templates": {},
            "templateLinks": [],
        }))
    }
}

impl<'a> IntoIterator for &'a PolicyCollection {
    type Item = &'a CompiledPolicy;
    type IntoIter = std::collections::btree_map::Values<'a, String, CompiledPolicy>;

    fn into_iter(self) -> Self::IntoIter {
        self.policies.values()
    }
}
