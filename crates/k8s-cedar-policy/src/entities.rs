//! Cedar entity builders
//!
//! One function per `k8s` entity type. Request graphs for evaluation are
//! assembled from these so the attribute names line up with what the
//! compilers emit.

use std::collections::{HashMap, HashSet};

use cedar_policy::{Entity, EntityId, EntityTypeName, EntityUid, RestrictedExpression};

use crate::error::{Error, Result};
use crate::schema::{self, EntityType};

// =============================================================================
// Low-Level Helpers
// =============================================================================

/// Build an entity UID for a given type and ID
pub fn entity_uid(entity_type: &EntityType, id: &str) -> Result<EntityUid> {
    let type_name: EntityTypeName =
        entity_type
            .as_str()
            .parse()
            .map_err(|e: cedar_policy::ParseErrors| {
                Error::request(format!(
                    "invalid Cedar entity type name '{}': {}",
                    entity_type, e
                ))
            })?;
    Ok(EntityUid::from_type_name_and_id(type_name, EntityId::new(id)))
}

/// `k8s::Action::"<verb>"`
pub fn action_uid(verb: &str) -> Result<EntityUid> {
    entity_uid(&schema::AUTHORIZATION_ACTION, verb)
}

/// `k8s::admission::Action::"<operation>"`
pub fn admission_action_uid(operation: &str) -> Result<EntityUid> {
    entity_uid(&schema::ADMISSION_ACTION, &operation.to_lowercase())
}

fn string_attrs<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> HashMap<String, RestrictedExpression> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), RestrictedExpression::new_string(v.to_string())))
        .collect()
}

fn entity(
    uid: EntityUid,
    attrs: HashMap<String, RestrictedExpression>,
    parents: HashSet<EntityUid>,
) -> Result<Entity> {
    Entity::new(uid.clone(), attrs, parents)
        .map_err(|e| Error::request(format!("failed to create entity {}: {}", uid, e)))
}

// =============================================================================
// Principals
// =============================================================================

fn group_entities(groups: &[String]) -> Result<(Vec<Entity>, HashSet<EntityUid>)> {
    let mut entities = Vec::with_capacity(groups.len());
    let mut uids = HashSet::new();
    for group in groups {
        let uid = entity_uid(&schema::GROUP, group)?;
        entities.push(entity(
            uid.clone(),
            string_attrs([("name", group.as_str())]),
            HashSet::new(),
        )?);
        uids.insert(uid);
    }
    Ok((entities, uids))
}

/// Build a user entity with group membership
///
/// Returns `k8s::Group::"<group>"` for each group followed by
/// `k8s::User::"<name>"` with the groups as parents.
pub fn user_entities(name: &str, groups: &[String]) -> Result<Vec<Entity>> {
    let (mut entities, parents) = group_entities(groups)?;
    let uid = entity_uid(&schema::USER, name)?;
    entities.push(entity(uid, string_attrs([("name", name)]), parents)?);
    Ok(entities)
}

/// Build a service account entity with group membership
///
/// UID: `k8s::ServiceAccount::"system:serviceaccount:<namespace>:<name>"`
pub fn service_account_entities(
    namespace: &str,
    name: &str,
    groups: &[String],
) -> Result<Vec<Entity>> {
    let (mut entities, parents) = group_entities(groups)?;
    let id = format!("{}{}:{}", schema::SERVICE_ACCOUNT_PREFIX, namespace, name);
    let uid = entity_uid(&schema::SERVICE_ACCOUNT, &id)?;
    entities.push(entity(
        uid,
        string_attrs([("name", name), ("namespace", namespace)]),
        parents,
    )?);
    Ok(entities)
}

// =============================================================================
// Resources
// =============================================================================

/// Attributes of a `k8s::Resource`
///
/// Optional attributes are left off the entity when absent, which is what
/// the `resource has ...` guards in compiled policies test for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceAttributes {
    /// API group, `""` for the core group
    pub api_group: String,
    /// Plural resource name
    pub resource: String,
    /// Subresource such as `log` or `status`
    pub subresource: Option<String>,
    /// Namespace for namespaced objects
    pub namespace: Option<String>,
    /// Object name
    pub name: Option<String>,
}

impl ResourceAttributes {
    /// Resource in an API group
    pub fn new(api_group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            api_group: api_group.into(),
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Set the namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the object name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the subresource
    pub fn subresource(mut self, subresource: impl Into<String>) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    /// Request-path style identifier, e.g. `/apps/namespaces/prod/deployments/web`
    pub fn path(&self) -> String {
        let group = if self.api_group.is_empty() {
            "core"
        } else {
            &self.api_group
        };
        let mut path = format!("/{group}");
        if let Some(ns) = &self.namespace {
            path.push_str("/namespaces/");
            path.push_str(ns);
        }
        path.push('/');
        path.push_str(&self.resource);
        for segment in [&self.name, &self.subresource].into_iter().flatten() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

/// Build a `k8s::Resource` entity
pub fn resource_entity(attrs: &ResourceAttributes) -> Result<Entity> {
    let uid = entity_uid(&schema::RESOURCE, &attrs.path())?;
    let mut map = string_attrs([
        ("apiGroup", attrs.api_group.as_str()),
        ("resource", attrs.resource.as_str()),
    ]);
    let optional = [
        ("subresource", &attrs.subresource),
        ("namespace", &attrs.namespace),
        ("name", &attrs.name),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            map.insert(
                key.to_string(),
                RestrictedExpression::new_string(value.clone()),
            );
        }
    }
    entity(uid, map, HashSet::new())
}

/// Build a `k8s::NonResourceURL` entity
pub fn non_resource_url_entity(path: &str) -> Result<Entity> {
    let uid = entity_uid(&schema::NON_RESOURCE_URL, path)?;
    entity(uid, string_attrs([("path", path)]), HashSet::new())
}

// =============================================================================
// Impersonation targets
// =============================================================================

/// Build a `k8s::PrincipalUID` entity
pub fn principal_uid_entity(uid: &str) -> Result<Entity> {
    entity(
        entity_uid(&schema::PRINCIPAL_UID, uid)?,
        HashMap::new(),
        HashSet::new(),
    )
}

/// Build a `k8s::Extra` entity for one user-extra key, optionally with a value
pub fn extra_entity(key: &str, value: Option<&str>) -> Result<Entity> {
    let id = match value {
        Some(v) => format!("{key}={v}"),
        None => key.to_string(),
    };
    let mut attrs = string_attrs([("key", key)]);
    if let Some(v) = value {
        attrs.insert(
            "value".to_string(),
            RestrictedExpression::new_string(v.to_string()),
        );
    }
    entity(entity_uid(&schema::EXTRA, &id)?, attrs, HashSet::new())
}
