//! Compiler configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::AUTHENTICATION_API_GROUP;

/// Configuration shared by the RBAC and admission compilers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Plural resource name to Kind, e.g. `deployments` -> `Deployment`
    pub resource_kinds: BTreeMap<String, String>,
    /// API group whose `impersonate` rules get impersonation policies
    pub authentication_group: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        let kinds = [
            ("configmaps", "ConfigMap"),
            ("cronjobs", "CronJob"),
            ("daemonsets", "DaemonSet"),
            ("deployments", "Deployment"),
            ("endpoints", "Endpoints"),
            ("ingresses", "Ingress"),
            ("jobs", "Job"),
            ("namespaces", "Namespace"),
            ("networkpolicies", "NetworkPolicy"),
            ("nodes", "Node"),
            ("persistentvolumeclaims", "PersistentVolumeClaim"),
            ("persistentvolumes", "PersistentVolume"),
            ("pods", "Pod"),
            ("replicasets", "ReplicaSet"),
            ("secrets", "Secret"),
            ("serviceaccounts", "ServiceAccount"),
            ("services", "Service"),
            ("statefulsets", "StatefulSet"),
        ];
        Self {
            resource_kinds: kinds
                .into_iter()
                .map(|(plural, kind)| (plural.to_string(), kind.to_string()))
                .collect(),
            authentication_group: AUTHENTICATION_API_GROUP.to_string(),
        }
    }
}

impl CompilerConfig {
    /// Parse a YAML configuration document
    ///
    /// Keys that are absent keep their defaults. `resourceKinds` entries are
    /// merged over the built-in table.
    pub fn from_yaml(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Overrides {
            #[serde(default)]
            resource_kinds: BTreeMap<String, String>,
            authentication_group: Option<String>,
        }

        let overrides: Overrides = serde_yaml::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid compiler config: {e}")))?;

        let mut config = Self::default();
        config.resource_kinds.extend(overrides.resource_kinds);
        if let Some(group) = overrides.authentication_group {
            if group.is_empty() {
                return Err(Error::configuration("authenticationGroup must not be empty"));
            }
            config.authentication_group = group;
        }
        Ok(config)
    }

    /// Kind for a plural resource name, if configured
    pub fn kind_for(&self, plural: &str) -> Option<&str> {
        self.resource_kinds.get(plural).map(String::as_str)
    }
}
