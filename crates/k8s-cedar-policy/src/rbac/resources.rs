//! Conditions over `k8s::Resource` and `k8s::NonResourceURL` attributes

use crate::condition::{all, and, any, or, Condition, Pattern};

/// Remove duplicates, keeping the first occurrence of each entry
pub fn dedup(items: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    unique
}

/// Deduplicate, collapsing to `["*"]` when a wildcard is present
pub fn reduce_wildcard(items: &[String]) -> Vec<String> {
    if items.iter().any(|i| i == "*") {
        return vec!["*".to_string()];
    }
    dedup(items)
}

pub(crate) fn is_wildcard(items: &[String]) -> bool {
    matches!(items, [only] if only == "*")
}

/// `attr == "v"` for one value, `["a", "b"].contains(attr)` for several
pub(crate) fn equals_any(attr: Condition, values: &[String]) -> Condition {
    match values {
        [] => Condition::Empty,
        [one] => attr.equal(Condition::string(one)),
        many => Condition::string_set(many.iter().cloned()).contains(attr),
    }
}

fn resource_attr(name: &str) -> Condition {
    Condition::resource().access(name)
}

fn has_attr_equal(name: &str, values: &[String]) -> Condition {
    if values.is_empty() {
        return Condition::Empty;
    }
    Condition::resource()
        .has(name)
        .and(equals_any(resource_attr(name), values))
}

pub(crate) fn api_groups_condition(api_groups: &[String]) -> Condition {
    if is_wildcard(api_groups) {
        return Condition::Empty;
    }
    equals_any(resource_attr("apiGroup"), api_groups)
}

fn single_resource_condition(resource: &str) -> Condition {
    if resource == "*" {
        return Condition::Empty;
    }
    let Some((parent, child)) = resource.split_once('/') else {
        return resource_attr("resource").equal(Condition::string(resource));
    };
    let parent = if parent == "*" {
        Condition::Empty
    } else {
        resource_attr("resource").equal(Condition::string(parent))
    };
    let child = if child == "*" {
        resource_attr("subresource").not_equal(Condition::string(""))
    } else {
        resource_attr("subresource").equal(Condition::string(child))
    };
    all([parent, Condition::resource().has("subresource"), child])
}

pub(crate) fn resources_condition(resources: &[String]) -> Condition {
    if let [one] = resources {
        return single_resource_condition(one);
    }
    let (with_child, plain): (Vec<String>, Vec<String>) =
        resources.iter().cloned().partition(|r| r.contains('/'));
    let plain = if plain.is_empty() || with_child.is_empty() {
        equals_any(resource_attr("resource"), &plain)
    } else {
        // Plain entries must not admit the subresources listed beside them.
        and(
            equals_any(resource_attr("resource"), &plain),
            !Condition::resource().has("subresource"),
        )
    };
    let subresources = any(with_child.iter().map(|r| single_resource_condition(r)));
    or(plain, subresources)
}

pub(crate) fn has_subresources(resources: &[String]) -> bool {
    resources.iter().any(|r| r.contains('/'))
}

pub(crate) fn resource_names_condition(names: &[String]) -> Condition {
    has_attr_equal("name", names)
}

pub(crate) fn namespace_condition(namespace: Option<&str>) -> Condition {
    match namespace {
        Some(ns) => has_attr_equal("namespace", &[ns.to_string()]),
        None => Condition::Empty,
    }
}

pub(crate) fn non_resource_urls_condition(urls: &[String]) -> Condition {
    let urls = reduce_wildcard(urls);
    if is_wildcard(&urls) {
        return Condition::Empty;
    }
    let path = || resource_attr("path");
    let (globs, literals): (Vec<String>, Vec<String>) =
        urls.into_iter().partition(|u| u.ends_with('*'));
    let globs = any(globs.iter().map(|glob| {
        let prefix = &glob[..glob.len() - 1];
        path().like(Pattern::prefix(prefix))
    }));
    or(globs, equals_any(path(), &literals))
}
