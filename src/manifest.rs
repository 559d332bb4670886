//! Multi-document Kubernetes manifest loading
//!
//! Documents are dispatched on `kind`. RBAC objects become rule sources and
//! bindings, ValidatingAdmissionPolicies become admission policies, and
//! `List` documents are flattened. Other kinds are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use k8s_cedar_policy::{AdmissionPolicy, Binding, RuleSource};
use k8s_openapi::api::admissionregistration::v1::ValidatingAdmissionPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::{Error, Result};

/// Objects collected from one or more manifest files
#[derive(Debug, Default)]
pub struct Manifests {
    pub roles: Vec<RuleSource>,
    pub bindings: Vec<Binding>,
    pub admission_policies: Vec<AdmissionPolicy>,
}

impl Manifests {
    /// Load every file in order
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut manifests = Self::default();
        for path in paths {
            manifests.load_file(path)?;
        }
        Ok(manifests)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        self.add_documents(&text)
            .map_err(|message| Error::invalid_manifest(path, message))
    }

    /// Add every document of a multi-document YAML stream
    pub fn add_documents(&mut self, text: &str) -> std::result::Result<(), String> {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document).map_err(|e| e.to_string())?;
            self.add_value(value)?;
        }
        Ok(())
    }

    fn add_value(&mut self, value: Value) -> std::result::Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or("document has no kind")?
            .to_string();

        match kind.as_str() {
            "ClusterRole" => {
                let role: ClusterRole = typed(&kind, value)?;
                self.roles.push(RuleSource::from(&role));
            }
            "Role" => {
                let role: Role = typed(&kind, value)?;
                self.roles.push(RuleSource::from(&role));
            }
            "ClusterRoleBinding" => {
                let binding: ClusterRoleBinding = typed(&kind, value)?;
                self.bindings.push(Binding::from(&binding));
            }
            "RoleBinding" => {
                let binding: RoleBinding = typed(&kind, value)?;
                self.bindings.push(Binding::from(&binding));
            }
            "ValidatingAdmissionPolicy" => {
                let policy: ValidatingAdmissionPolicy = typed(&kind, value)?;
                self.admission_policies.push(AdmissionPolicy::from(&policy));
            }
            "List" => {
                let items = value
                    .get("items")
                    .and_then(Value::as_sequence)
                    .cloned()
                    .unwrap_or_default();
                for item in items {
                    self.add_value(item)?;
                }
            }
            other => debug!(kind = other, "Ignoring unsupported manifest kind"),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.bindings.is_empty() && self.admission_policies.is_empty()
    }
}

fn typed<T: DeserializeOwned>(kind: &str, value: Value) -> std::result::Result<T, String> {
    serde_yaml::from_value(value).map_err(|e| format!("{kind}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RBAC: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: pod-reader
  namespace: team-a
rules:
  - apiGroups: [""]
    resources: ["pods"]
    verbs: ["get"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: bob-reads-pods
  namespace: team-a
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: pod-reader
subjects:
  - kind: User
    name: bob
---
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: unrelated
"#;

    #[test]
    fn test_multi_document_stream() {
        let mut manifests = Manifests::default();
        manifests.add_documents(RBAC).unwrap();
        assert_eq!(manifests.roles.len(), 1);
        assert_eq!(manifests.roles[0].name, "pod-reader");
        assert_eq!(manifests.bindings.len(), 1);
        assert_eq!(manifests.bindings[0].namespace.as_deref(), Some("team-a"));
        assert!(manifests.admission_policies.is_empty());
    }

    #[test]
    fn test_list_items_are_flattened() {
        let list = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: rbac.authorization.k8s.io/v1
    kind: ClusterRole
    metadata:
      name: view
    rules: []
  - apiVersion: admissionregistration.k8s.io/v1
    kind: ValidatingAdmissionPolicy
    metadata:
      name: replica-limit
    spec:
      validations:
        - expression: "object.spec.replicas <= 5"
"#;
        let mut manifests = Manifests::default();
        manifests.add_documents(list).unwrap();
        assert_eq!(manifests.roles.len(), 1);
        assert_eq!(manifests.admission_policies.len(), 1);
        assert_eq!(manifests.admission_policies[0].name, "replica-limit");
    }

    #[test]
    fn test_document_without_kind_is_rejected() {
        let mut manifests = Manifests::default();
        let err = manifests.add_documents("metadata:\n  name: x\n").unwrap_err();
        assert!(err.contains("no kind"));
    }

    #[test]
    fn test_empty_stream() {
        let mut manifests = Manifests::default();
        manifests.add_documents("").unwrap();
        assert!(manifests.is_empty());
    }
}
