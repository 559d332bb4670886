//! Named policy stores
//!
//! A store holds one compiled policy set behind an [`ArcSwap`]; readers load
//! a snapshot per request without locking and a reload swaps the whole set
//! in one step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use cedar_policy::PolicySet;
use tracing::{debug, info};

use crate::collection::{parse_policy_set, PolicyCollection};
use crate::error::Result;

/// One published policy set
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Cedar policies
    pub policy_set: PolicySet,
    /// Version of the source the set was built from
    pub version: String,
    /// Number of policies in the set
    pub policy_count: usize,
}

impl StoreSnapshot {
    fn new(policy_set: PolicySet, version: impl Into<String>) -> Self {
        let policy_count = policy_set.policies().count();
        Self {
            policy_set,
            version: version.into(),
            policy_count,
        }
    }
}

/// Named, atomically swappable policy set
///
/// A store that has never been published to is empty and reports
/// [`initial_load_complete`](Self::initial_load_complete) as false.
#[derive(Debug)]
pub struct PolicyStore {
    name: String,
    current: ArcSwap<StoreSnapshot>,
    loaded: AtomicBool,
}

impl PolicyStore {
    /// Create an empty store that has not been loaded yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: ArcSwap::from_pointee(StoreSnapshot::new(PolicySet::new(), "")),
            loaded: AtomicBool::new(false),
        }
    }

    /// Create a loaded store from a policy set
    pub fn from_policy_set(name: impl Into<String>, policy_set: PolicySet) -> Self {
        let store = Self::new(name);
        store.publish(policy_set, "initial");
        store
    }

    /// Create a loaded store from a compiled collection, named after it
    pub fn from_collection(collection: &PolicyCollection) -> Result<Self> {
        Ok(Self::from_policy_set(
            collection.name(),
            collection.to_policy_set()?,
        ))
    }

    /// Create a loaded store from Cedar policy text
    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self> {
        let store = Self::new(name);
        store.publish_text(text, "initial")?;
        Ok(store)
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.current.load_full()
    }

    /// Whether any policy set has been published
    pub fn initial_load_complete(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Number of policies in the current snapshot
    pub fn len(&self) -> usize {
        self.current.load().policy_count
    }

    /// Check if the current snapshot has no policies
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a policy set
    ///
    /// Returns false, leaving the store untouched, when `version` matches the
    /// loaded snapshot.
    pub fn publish(&self, policy_set: PolicySet, version: &str) -> bool {
        if self.initial_load_complete() && self.current.load().version == version {
            debug!(
                store = %self.name,
                version = %version,
                "Policy unchanged, skipping update"
            );
            return false;
        }

        let snapshot = StoreSnapshot::new(policy_set, version);
        let count = snapshot.policy_count;
        self.current.store(Arc::new(snapshot));
        self.loaded.store(true, Ordering::Release);

        info!(
            store = %self.name,
            version = %version,
            policies = count,
            "Policy updated"
        );
        true
    }

    /// Publish a compiled collection
    pub fn publish_collection(&self, collection: &PolicyCollection, version: &str) -> Result<bool> {
        Ok(self.publish(collection.to_policy_set()?, version))
    }

    /// Parse and publish Cedar policy text
    ///
    /// `@id` annotations become policy ids. A parse failure leaves the
    /// current snapshot in place.
    pub fn publish_text(&self, text: &str, version: &str) -> Result<bool> {
        let policy_set = parse_policy_set(&self.name, text)?;
        Ok(self.publish(policy_set, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::error::Error;
    use crate::policy::CompiledPolicy;

    const PERMIT_ALL: &str = r#"permit(principal, action, resource);"#;

    #[test]
    fn test_new_store_is_not_loaded() {
        let store = PolicyStore::new("rbac");
        assert_eq!(store.name(), "rbac");
        assert!(store.is_empty());
        assert!(!store.initial_load_complete());
    }

    #[test]
    fn test_publish_marks_loaded() {
        let store = PolicyStore::new("rbac");
        assert!(store.publish_text(PERMIT_ALL, "v1").unwrap());
        assert!(store.initial_load_complete());
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().version, "v1");
    }

    #[test]
    fn test_empty_publish_still_completes_load() {
        let store = PolicyStore::new("rbac");
        store.publish(PolicySet::new(), "v1");
        assert!(store.initial_load_complete());
        assert!(store.is_empty());
    }

    #[test]
    fn test_same_version_is_skipped() {
        let store = PolicyStore::new("rbac");
        store.publish_text(PERMIT_ALL, "v1").unwrap();
        assert!(!store.publish(PolicySet::new(), "v1"));
        assert_eq!(store.len(), 1);

        assert!(store.publish(PolicySet::new(), "v2"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_text_keeps_snapshot() {
        let store = PolicyStore::from_text("rbac", PERMIT_ALL).unwrap();
        let err = store.publish_text("invalid cedar", "v2").unwrap_err();
        assert!(matches!(err, Error::PolicyParse { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().version, "initial");
    }

    #[test]
    fn test_readers_keep_old_snapshot_across_swap() {
        let store = PolicyStore::from_text("rbac", PERMIT_ALL).unwrap();
        let before = store.snapshot();
        store.publish(PolicySet::new(), "v2");
        assert_eq!(before.policy_count, 1);
        assert_eq!(store.snapshot().policy_count, 0);
    }

    #[test]
    fn test_text_keeps_compiled_policy_ids() {
        let mut collection = PolicyCollection::new("rbac");
        collection
            .insert(CompiledPolicy::permit("viewers:ClusterRoleBinding:0.0"))
            .unwrap();
        collection
            .insert(CompiledPolicy::forbid("guard.0.0").when(Condition::resource().has("name")))
            .unwrap();

        let store = PolicyStore::from_text("rbac", &collection.to_cedar()).unwrap();
        let snapshot = store.snapshot();
        let mut ids: Vec<String> = snapshot
            .policy_set
            .policies()
            .map(|p| p.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["guard.0.0", "viewers:ClusterRoleBinding:0.0"]);
    }

    #[test]
    fn test_from_collection_uses_collection_name() {
        let collection = PolicyCollection::new("admission");
        let store = PolicyStore::from_collection(&collection).unwrap();
        assert_eq!(store.name(), "admission");
        assert!(store.initial_load_complete());
    }
}
