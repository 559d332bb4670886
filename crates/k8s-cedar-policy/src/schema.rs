//! Cedar entity types and action identifiers for the `k8s` schema namespace
//!
//! ```text
//! k8s::User::"<uid>"                 (principal, attrs: name, extra)
//! k8s::Group::"<name>"               (principal, attrs: name)
//! k8s::ServiceAccount::"<uid>"       (principal, attrs: name, namespace)
//! k8s::Action::"get"                 (authorization action)
//! k8s::admission::Action::"create"   (admission action)
//! k8s::Resource::"<path>"            (resource, attrs: apiGroup, resource, namespace, name, subresource)
//! k8s::NonResourceURL::"<path>"      (resource, attrs: path)
//! k8s::PrincipalUID::"<uid>"         (impersonation target)
//! k8s::Extra::"<key>"                (impersonation target, attrs: key, value)
//! ```

use std::borrow::Cow;
use std::fmt;

/// Schema namespace that every authorization entity type lives under
pub const NAMESPACE: &str = "k8s";

/// A fully qualified Cedar entity type name such as `k8s::User`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(Cow<'static, str>);

impl EntityType {
    /// Build a type from a static, already qualified name
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Build a type from an owned qualified name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The qualified name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `k8s::User`
pub const USER: EntityType = EntityType::from_static("k8s::User");
/// `k8s::Group`
pub const GROUP: EntityType = EntityType::from_static("k8s::Group");
/// `k8s::ServiceAccount`
pub const SERVICE_ACCOUNT: EntityType = EntityType::from_static("k8s::ServiceAccount");
/// `k8s::Node`
pub const NODE: EntityType = EntityType::from_static("k8s::Node");
/// `k8s::PrincipalUID`
pub const PRINCIPAL_UID: EntityType = EntityType::from_static("k8s::PrincipalUID");
/// `k8s::Extra`
pub const EXTRA: EntityType = EntityType::from_static("k8s::Extra");
/// `k8s::Resource`
pub const RESOURCE: EntityType = EntityType::from_static("k8s::Resource");
/// `k8s::NonResourceURL`
pub const NON_RESOURCE_URL: EntityType = EntityType::from_static("k8s::NonResourceURL");
/// `k8s::Action`
pub const AUTHORIZATION_ACTION: EntityType = EntityType::from_static("k8s::Action");
/// `k8s::admission::Action`
pub const ADMISSION_ACTION: EntityType = EntityType::from_static("k8s::admission::Action");

/// Verb that grants acting as another identity
pub const IMPERSONATE_VERB: &str = "impersonate";

/// API group that owns the impersonation resources
pub const AUTHENTICATION_API_GROUP: &str = "authentication.k8s.io";

/// Prefix used by RBAC for service account user names
pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Admission operations that together are equivalent to `*`
pub const ADMISSION_OPERATIONS: [&str; 4] = ["connect", "create", "delete", "update"];
