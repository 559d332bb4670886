//! Impersonation policies
//!
//! RBAC grants impersonation through the `impersonate` verb on the
//! `users`, `groups`, `uids` and `userextras/<key>` resources of the
//! authentication API group. Each resource maps onto its own Cedar entity
//! type, so the target is expressed as a resource scope plus a condition.
//! `serviceaccounts` has no entity type here and fails closed like any
//! other unsupported resource.

use tracing::warn;

use super::resources::{equals_any, is_wildcard};
use super::SkipReason;
use crate::condition::{all, and, any, Condition, EntityRef};
use crate::policy::ScopeConstraint;
use crate::schema::{self, EntityType};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Users,
    Groups,
    Uids,
    Extras,
}

impl Target {
    fn classify(resource: &str) -> Option<Self> {
        match resource {
            "users" => Some(Self::Users),
            "groups" => Some(Self::Groups),
            "uids" => Some(Self::Uids),
            r if r.starts_with("userextras") => Some(Self::Extras),
            _ => None,
        }
    }

    fn entity_type(&self) -> EntityType {
        match self {
            Target::Users => schema::USER,
            Target::Groups => schema::GROUP,
            Target::Uids => schema::PRINCIPAL_UID,
            Target::Extras => schema::EXTRA,
        }
    }
}

/// Resource scope and condition selecting the identities that may be
/// impersonated
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Impersonation {
    pub resource: ScopeConstraint,
    pub condition: Condition,
}

fn names_condition(names: &[String]) -> Condition {
    equals_any(Condition::resource().access("name"), names)
}

fn uids_condition(names: &[String]) -> Condition {
    if names.is_empty() {
        return Condition::Empty;
    }
    Condition::resource().is_in(Condition::set(
        names
            .iter()
            .map(|n| Condition::entity(schema::PRINCIPAL_UID, n)),
    ))
}

fn extras_condition(resources: &[String], names: &[String]) -> Condition {
    let keys: Vec<String> = resources
        .iter()
        .filter_map(|r| r.split_once('/').map(|(_, key)| key.to_string()))
        .collect();
    let values = if names.is_empty() {
        Condition::Empty
    } else {
        Condition::resource()
            .has("value")
            .and(equals_any(Condition::resource().access("value"), names))
    };
    and(equals_any(Condition::resource().access("key"), &keys), values)
}

fn target_condition(target: &Target, resources: &[String], names: &[String]) -> Condition {
    match target {
        Target::Users | Target::Groups => names_condition(names),
        Target::Uids => uids_condition(names),
        Target::Extras => extras_condition(resources, names),
    }
}

/// Build the impersonation target for a rule's reduced resources and names
pub(crate) fn impersonation(
    resources: &[String],
    names: &[String],
) -> Result<Impersonation, SkipReason> {
    if is_wildcard(resources) {
        // Any identity kind; names only make sense for kinds that have one.
        let condition = if names.is_empty() {
            Condition::Empty
        } else {
            any([Target::Users, Target::Groups, Target::Uids].iter().map(|t| {
                Condition::resource()
                    .is_type(t.entity_type())
                    .and(target_condition(t, resources, names))
            }))
        };
        return Ok(Impersonation {
            resource: ScopeConstraint::Any,
            condition,
        });
    }

    let mut targets: Vec<Target> = Vec::new();
    for resource in resources {
        match Target::classify(resource) {
            Some(target) => {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            None if resources.len() == 1 => {
                return Err(SkipReason::UnsupportedImpersonation(resource.clone()));
            }
            None => warn!(resource = %resource, "Ignoring unsupported impersonation resource"),
        }
    }

    match targets.as_slice() {
        [] => Err(SkipReason::UnsupportedImpersonation(resources.join(","))),
        [Target::Uids] if names.len() == 1 => Ok(Impersonation {
            resource: ScopeConstraint::Eq(EntityRef::new(schema::PRINCIPAL_UID, &names[0])),
            condition: Condition::Empty,
        }),
        [single] if targets.len() == resources.len() || *single == Target::Extras => {
            Ok(Impersonation {
                resource: ScopeConstraint::Is(single.entity_type()),
                condition: target_condition(single, resources, names),
            })
        }
        mixed => Ok(Impersonation {
            resource: ScopeConstraint::Any,
            condition: any(mixed.iter().map(|target| match target {
                Target::Uids if names.len() == 1 => Condition::resource()
                    .equal(Condition::entity(schema::PRINCIPAL_UID, &names[0])),
                target => all([
                    Condition::resource().is_type(target.entity_type()),
                    target_condition(target, resources, names),
                ]),
            })),
        }),
    }
}
