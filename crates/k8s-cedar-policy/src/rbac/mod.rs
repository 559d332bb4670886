//! Kubernetes RBAC to Cedar
//!
//! Each (subject, rule) pair of a binding compiles into one or more `permit`
//! policies. Rules that cannot be expressed safely are skipped and reported
//! as [`RuleDiagnostic`]s instead of failing the whole binding.

mod compiler;
mod impersonate;
mod resources;

use std::fmt;

use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, Subject as K8sSubject,
};
use tracing::warn;

use crate::collection::PolicyCollection;

pub use compiler::RuleCompiler;
pub use resources::{dedup, reduce_wildcard};

// =============================================================================
// Rules
// =============================================================================

/// One RBAC permission rule with absent lists normalized to empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRule {
    /// Verbs, `*` for any
    pub verbs: Vec<String>,
    /// API groups, `""` is the core group
    pub api_groups: Vec<String>,
    /// Resources, optionally `parent/subresource`
    pub resources: Vec<String>,
    /// Object names; empty means any name
    pub resource_names: Vec<String>,
    /// Non-resource URL paths, optionally ending in `*`
    pub non_resource_urls: Vec<String>,
}

impl From<&PolicyRule> for PermissionRule {
    fn from(rule: &PolicyRule) -> Self {
        Self {
            verbs: rule.verbs.clone(),
            api_groups: rule.api_groups.clone().unwrap_or_default(),
            resources: rule.resources.clone().unwrap_or_default(),
            resource_names: rule.resource_names.clone().unwrap_or_default(),
            non_resource_urls: rule.non_resource_urls.clone().unwrap_or_default(),
        }
    }
}

/// A named list of rules: a ClusterRole or a Role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    /// `ClusterRole` or `Role`
    pub kind: String,
    /// Role name
    pub name: String,
    /// Namespace for a Role, `None` for a ClusterRole
    pub namespace: Option<String>,
    /// Rules in declaration order
    pub rules: Vec<PermissionRule>,
}

impl RuleSource {
    /// Build an in-memory ClusterRole
    pub fn cluster_role(name: impl Into<String>, rules: Vec<PermissionRule>) -> Self {
        Self {
            kind: "ClusterRole".to_string(),
            name: name.into(),
            namespace: None,
            rules,
        }
    }

    /// Build an in-memory namespaced Role
    pub fn role(
        namespace: impl Into<String>,
        name: impl Into<String>,
        rules: Vec<PermissionRule>,
    ) -> Self {
        Self {
            kind: "Role".to_string(),
            name: name.into(),
            namespace: Some(namespace.into()),
            rules,
        }
    }
}

fn convert_rules(rules: &Option<Vec<PolicyRule>>) -> Vec<PermissionRule> {
    rules
        .iter()
        .flatten()
        .map(PermissionRule::from)
        .collect()
}

impl From<&ClusterRole> for RuleSource {
    fn from(role: &ClusterRole) -> Self {
        Self::cluster_role(
            role.metadata.name.clone().unwrap_or_default(),
            convert_rules(&role.rules),
        )
    }
}

impl From<&Role> for RuleSource {
    fn from(role: &Role) -> Self {
        Self::role(
            role.metadata.namespace.clone().unwrap_or_default(),
            role.metadata.name.clone().unwrap_or_default(),
            convert_rules(&role.rules),
        )
    }
}

// =============================================================================
// Bindings
// =============================================================================

/// Subject kinds that compile to principals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// `Group`
    Group,
    /// `User`
    User,
    /// `ServiceAccount`
    ServiceAccount,
}

impl SubjectKind {
    /// Parse a Kubernetes subject kind
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Group" => Some(Self::Group),
            "User" => Some(Self::User),
            "ServiceAccount" => Some(Self::ServiceAccount),
            _ => None,
        }
    }
}

/// A binding subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Subject kind
    pub kind: SubjectKind,
    /// User, group or service account name
    pub name: String,
    /// Service account namespace
    pub namespace: Option<String>,
}

impl Subject {
    /// A group subject
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Group,
            name: name.into(),
            namespace: None,
        }
    }

    /// A user subject
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
            namespace: None,
        }
    }

    /// A service account subject
    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

/// Binding kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Cluster scoped binding
    ClusterRoleBinding,
    /// Namespaced binding
    RoleBinding,
}

impl BindingKind {
    /// Kubernetes kind name
    pub fn as_str(self) -> &'static str {
        match self {
            BindingKind::ClusterRoleBinding => "ClusterRoleBinding",
            BindingKind::RoleBinding => "RoleBinding",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a binding to the role it grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRef {
    /// `ClusterRole` or `Role`
    pub kind: String,
    /// Role name
    pub name: String,
}

/// A ClusterRoleBinding or RoleBinding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Binding name
    pub name: String,
    /// Binding kind
    pub kind: BindingKind,
    /// Granted role
    pub role: RoleRef,
    /// Subjects, in declaration order
    pub subjects: Vec<Subject>,
    /// Namespace for a RoleBinding; `None` is cluster scope
    pub namespace: Option<String>,
}

impl Binding {
    /// Name used in policy ids; namespaced bindings are qualified so equal
    /// names in different namespaces do not collide
    pub fn id_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

fn convert_subjects(binding: &str, subjects: &Option<Vec<K8sSubject>>) -> Vec<Subject> {
    subjects
        .iter()
        .flatten()
        .filter_map(|s| match SubjectKind::parse(&s.kind) {
            Some(kind) => Some(Subject {
                kind,
                name: s.name.clone(),
                namespace: s.namespace.clone(),
            }),
            None => {
                warn!(binding = %binding, kind = %s.kind, "Ignoring subject of unknown kind");
                None
            }
        })
        .collect()
}

impl From<&ClusterRoleBinding> for Binding {
    fn from(crb: &ClusterRoleBinding) -> Self {
        let name = crb.metadata.name.clone().unwrap_or_default();
        Self {
            subjects: convert_subjects(&name, &crb.subjects),
            role: RoleRef {
                kind: crb.role_ref.kind.clone(),
                name: crb.role_ref.name.clone(),
            },
            kind: BindingKind::ClusterRoleBinding,
            namespace: None,
            name,
        }
    }
}

impl From<&RoleBinding> for Binding {
    fn from(rb: &RoleBinding) -> Self {
        let name = rb.metadata.name.clone().unwrap_or_default();
        Self {
            subjects: convert_subjects(&name, &rb.subjects),
            role: RoleRef {
                kind: rb.role_ref.kind.clone(),
                name: rb.role_ref.name.clone(),
            },
            kind: BindingKind::RoleBinding,
            namespace: Some(rb.metadata.namespace.clone().unwrap_or_default()),
            name,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Why a rule produced no policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    /// Rule has no verbs
    #[error("rule has no verbs")]
    NoVerbs,
    /// Resource rule without resources
    #[error("rule has no resources")]
    NoResources,
    /// Resource rule without API groups
    #[error("rule has no apiGroups")]
    NoApiGroups,
    /// Service account identity does not have the four-part form
    #[error("invalid service account identity {0}")]
    InvalidServiceAccount(String),
    /// Impersonation resource that has no Cedar entity type
    #[error("unsupported impersonation resource {0}")]
    UnsupportedImpersonation(String),
    /// Binding refers to a role that was not provided
    #[error("role {kind} {name} not found")]
    MissingRole {
        /// Referenced role kind
        kind: String,
        /// Referenced role name
        name: String,
    },
    /// Two policies compiled to the same id
    #[error("duplicate policy id {0}")]
    DuplicatePolicy(String),
}

/// A rule that was skipped during compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDiagnostic {
    /// Binding name
    pub binding: String,
    /// Subject index within the binding
    pub subject_index: usize,
    /// Rule index within the role
    pub rule_index: usize,
    /// Why the rule was skipped
    pub reason: SkipReason,
}

impl fmt::Display for RuleDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subject {} rule {}: {}",
            self.binding, self.subject_index, self.rule_index, self.reason
        )
    }
}

/// Output of compiling one or more bindings
#[derive(Debug, Clone, Default)]
pub struct RbacCompilation {
    /// Compiled policies
    pub collection: PolicyCollection,
    /// Skipped rules
    pub diagnostics: Vec<RuleDiagnostic>,
}

impl RbacCompilation {
    /// Create an empty result with a named collection
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            collection: PolicyCollection::new(name),
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn skip(&mut self, diagnostic: RuleDiagnostic) {
        warn!(
            binding = %diagnostic.binding,
            subject = diagnostic.subject_index,
            rule = diagnostic.rule_index,
            reason = %diagnostic.reason,
            "Skipping RBAC rule"
        );
        self.diagnostics.push(diagnostic);
    }

    /// Fold another result into this one
    ///
    /// Policies whose id already exists are reported as diagnostics.
    pub fn absorb(&mut self, other: RbacCompilation) {
        for policy in other.collection.iter() {
            if let Err(e) = self.collection.insert(policy.clone()) {
                warn!(error = %e, "Dropping duplicate policy");
                self.diagnostics.push(RuleDiagnostic {
                    binding: other.collection.name().to_string(),
                    subject_index: 0,
                    rule_index: 0,
                    reason: SkipReason::DuplicatePolicy(policy.id.clone()),
                });
            }
        }
        self.diagnostics.extend(other.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::RoleRef as K8sRoleRef;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_policy_rule_conversion_normalizes_absent_lists() {
        let rule = PolicyRule {
            verbs: vec!["get".to_string()],
            resources: Some(vec!["pods".to_string()]),
            ..Default::default()
        };
        let converted = PermissionRule::from(&rule);
        assert_eq!(converted.verbs, ["get"]);
        assert_eq!(converted.resources, ["pods"]);
        assert!(converted.api_groups.is_empty());
        assert!(converted.non_resource_urls.is_empty());
    }

    #[test]
    fn test_role_binding_conversion() {
        let rb = RoleBinding {
            metadata: ObjectMeta {
                name: Some("reader".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            role_ref: K8sRoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "view".to_string(),
            },
            subjects: Some(vec![
                K8sSubject {
                    kind: "Group".to_string(),
                    name: "devs".to_string(),
                    ..Default::default()
                },
                K8sSubject {
                    kind: "Robot".to_string(),
                    name: "r2".to_string(),
                    ..Default::default()
                },
            ]),
        };
        let binding = Binding::from(&rb);
        assert_eq!(binding.kind, BindingKind::RoleBinding);
        assert_eq!(binding.namespace.as_deref(), Some("team-a"));
        assert_eq!(binding.subjects, vec![Subject::group("devs")]);
        assert_eq!(binding.role.name, "view");
        assert_eq!(binding.id_name(), "team-a/reader");
    }

    #[test]
    fn test_cluster_role_conversion() {
        let role = ClusterRole {
            metadata: ObjectMeta {
                name: Some("view".to_string()),
                ..Default::default()
            },
            rules: Some(vec![PolicyRule {
                verbs: vec!["get".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        };
        let source = RuleSource::from(&role);
        assert_eq!(source.kind, "ClusterRole");
        assert_eq!(source.namespace, None);
        assert_eq!(source.rules.len(), 1);
    }

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = RuleDiagnostic {
            binding: "b".to_string(),
            subject_index: 1,
            rule_index: 2,
            reason: SkipReason::NoVerbs,
        };
        assert_eq!(diagnostic.to_string(), "b subject 1 rule 2: rule has no verbs");
    }
}
