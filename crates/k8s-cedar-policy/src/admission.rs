//! ValidatingAdmissionPolicy to Cedar
//!
//! Every (validation, resource rule) pair becomes a `forbid` policy that
//! fires when the object matches the rule and the validation expression is
//! false. Expressions without a Cedar equivalent are reported and their
//! validation is dropped; no weaker policy is emitted in its place.

use std::fmt;

use k8s_openapi::api::admissionregistration::v1::{
    NamedRuleWithOperations, ValidatingAdmissionPolicy,
};
use thiserror::Error;
use tracing::warn;

use crate::cel::{compile_expression, CelError, Warning};
use crate::collection::PolicyCollection;
use crate::condition::{all, any, Condition, EntityRef};
use crate::config::CompilerConfig;
use crate::policy::{ActionConstraint, CompiledPolicy, ScopeConstraint};
use crate::rbac::reduce_wildcard;
use crate::schema::{self, EntityType, ADMISSION_OPERATIONS};

// =============================================================================
// Input model
// =============================================================================

/// One `matchConstraints.resourceRules` entry with absent lists normalized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionRule {
    /// `CREATE`, `UPDATE`, `DELETE`, `CONNECT` or `*`
    pub operations: Vec<String>,
    /// API groups, `""` is the core group
    pub api_groups: Vec<String>,
    /// API versions
    pub api_versions: Vec<String>,
    /// Plural resource names
    pub resources: Vec<String>,
    /// Object names; empty means any name
    pub resource_names: Vec<String>,
}

impl From<&NamedRuleWithOperations> for AdmissionRule {
    fn from(rule: &NamedRuleWithOperations) -> Self {
        Self {
            operations: rule.operations.clone().unwrap_or_default(),
            api_groups: rule.api_groups.clone().unwrap_or_default(),
            api_versions: rule.api_versions.clone().unwrap_or_default(),
            resources: rule.resources.clone().unwrap_or_default(),
            resource_names: rule.resource_names.clone().unwrap_or_default(),
        }
    }
}

/// A ValidatingAdmissionPolicy reduced to what the compiler reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Policy name
    pub name: String,
    /// Resource rules, `None` when the policy has no match constraints
    pub match_rules: Option<Vec<AdmissionRule>>,
    /// CEL validation expressions in order
    pub validations: Vec<String>,
}

impl From<&ValidatingAdmissionPolicy> for AdmissionPolicy {
    fn from(vap: &ValidatingAdmissionPolicy) -> Self {
        let spec = vap.spec.as_ref();
        Self {
            name: vap.metadata.name.clone().unwrap_or_default(),
            match_rules: spec.and_then(|s| s.match_constraints.as_ref()).map(|m| {
                m.resource_rules
                    .iter()
                    .flatten()
                    .map(AdmissionRule::from)
                    .collect()
            }),
            validations: spec
                .and_then(|s| s.validations.as_ref())
                .map(|v| v.iter().map(|v| v.expression.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Why a validation or one of its rules produced no policy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionSkip {
    /// Expression failed to parse or transpile
    #[error(transparent)]
    Expression(#[from] CelError),
    /// Some but not all of groups, versions and resources are `*`
    #[error(
        "cannot match a wildcard over only some of apiGroups {api_groups:?}, \
         apiVersions {api_versions:?}, resources {resources:?}"
    )]
    PartialWildcard {
        /// Reduced API groups
        api_groups: Vec<String>,
        /// Reduced API versions
        api_versions: Vec<String>,
        /// Reduced resources
        resources: Vec<String>,
    },
    /// Subresources have no entity type of their own
    #[error("subresource {0} cannot be matched by entity type")]
    Subresource(String),
    /// Rule lists no operations
    #[error("resource rule has no operations")]
    NoOperations,
    /// Id already present in the collection
    #[error("duplicate policy id {0}")]
    DuplicatePolicy(String),
}

/// A skipped validation or resource rule
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionError {
    /// Policy name
    pub policy: String,
    /// Validation index
    pub validation: usize,
    /// Resource rule index, `None` when the whole validation was skipped
    pub rule: Option<usize>,
    /// What went wrong
    pub error: AdmissionSkip,
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation {}", self.policy, self.validation)?;
        if let Some(rule) = self.rule {
            write!(f, " resource rule {rule}")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Something compiled, but may not mean what the author expected
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionWarning {
    /// Lossy expression translation
    Expression {
        /// Validation index
        validation: usize,
        /// Transpiler warning
        warning: Warning,
    },
    /// Kind guessed from the plural resource name
    InferredKind {
        /// Plural resource name
        resource: String,
        /// Kind used
        kind: String,
    },
}

impl fmt::Display for AdmissionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionWarning::Expression {
                validation,
                warning,
            } => write!(f, "validation {validation}: {warning}"),
            AdmissionWarning::InferredKind { resource, kind } => write!(
                f,
                "no Kind configured for {resource}, assuming {kind}; add it to resourceKinds"
            ),
        }
    }
}

/// Policies compiled from one admission policy, with what was skipped
#[derive(Debug, Clone)]
pub struct AdmissionCompilation {
    /// Compiled `forbid` policies
    pub collection: PolicyCollection,
    /// Skipped validations and rules
    pub errors: Vec<AdmissionError>,
    /// Lossy translations
    pub warnings: Vec<AdmissionWarning>,
}

impl AdmissionCompilation {
    fn new(name: &str) -> Self {
        Self {
            collection: PolicyCollection::new(name),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn skip(&mut self, error: AdmissionError) {
        warn!(
            policy = %error.policy,
            validation = error.validation,
            rule = ?error.rule,
            reason = %error.error,
            "Skipping admission validation"
        );
        self.errors.push(error);
    }

    fn warn(&mut self, warning: AdmissionWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

// =============================================================================
// Match translation
// =============================================================================

fn sorted(items: &[String]) -> Vec<String> {
    let mut items = reduce_wildcard(items);
    items.sort();
    if items.is_empty() {
        items.push("*".to_string());
    }
    items
}

/// Reduced, lowercased, sorted operations; the full set collapses to `*`
fn operations(raw: &[String]) -> Vec<String> {
    let lowered: Vec<String> = raw.iter().map(|op| op.to_lowercase()).collect();
    let mut ops = reduce_wildcard(&lowered);
    ops.sort();
    if ops == ADMISSION_OPERATIONS {
        return vec!["*".to_string()];
    }
    ops
}

fn action_constraint(ops: &[String]) -> Option<ActionConstraint> {
    match ops {
        [] => None,
        [only] if only == "*" => Some(ActionConstraint::Any),
        [only] => Some(ActionConstraint::Eq(EntityRef::new(
            schema::ADMISSION_ACTION,
            only,
        ))),
        many => Some(ActionConstraint::In(
            many.iter()
                .map(|op| EntityRef::new(schema::ADMISSION_ACTION, op))
                .collect(),
        )),
    }
}

/// `networking.k8s.io` -> `io::k8s::networking`
fn group_path(group: &str) -> String {
    if group.is_empty() {
        return "core".to_string();
    }
    group.rsplit('.').collect::<Vec<_>>().join("::")
}

fn inferred_kind(resource: &str) -> String {
    let mut chars = resource.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Match on the object name under `metadata`
fn names_condition(names: &[String]) -> Condition {
    if names.is_empty() {
        return Condition::Empty;
    }
    let metadata = || Condition::resource().access("metadata");
    let name = metadata().access("name");
    let matches = match names {
        [one] => name.equal(Condition::string(one)),
        many => Condition::string_set(many.iter().cloned()).contains(name),
    };
    all([
        Condition::resource().has("metadata"),
        metadata().has("name"),
        matches,
    ])
}

// =============================================================================
// AdmissionCompiler
// =============================================================================

/// Compiles admission policies into `forbid` policies
#[derive(Debug, Clone, Default)]
pub struct AdmissionCompiler {
    config: CompilerConfig,
}

impl AdmissionCompiler {
    /// Create a compiler with the given configuration
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    fn entity_type(
        &self,
        group: &str,
        version: &str,
        resource: &str,
        out: &mut AdmissionCompilation,
    ) -> EntityType {
        let kind = match self.config.kind_for(resource) {
            Some(kind) => kind.to_string(),
            None => {
                let kind = inferred_kind(resource);
                out.warn(AdmissionWarning::InferredKind {
                    resource: resource.to_string(),
                    kind: kind.clone(),
                });
                kind
            }
        };
        EntityType::new(format!("{}::{version}::{kind}", group_path(group)))
    }

    /// Resource scope and extra condition selecting the rule's entity types
    fn type_match(
        &self,
        rule: &AdmissionRule,
        out: &mut AdmissionCompilation,
    ) -> Result<(ScopeConstraint, Condition), AdmissionSkip> {
        let groups = sorted(&rule.api_groups);
        let versions = sorted(&rule.api_versions);
        let resources = sorted(&rule.resources);

        let wildcards = [&groups, &versions, &resources]
            .iter()
            .filter(|items| items[0] == "*")
            .count();
        match wildcards {
            3 => return Ok((ScopeConstraint::Any, Condition::Empty)),
            0 => {}
            _ => {
                return Err(AdmissionSkip::PartialWildcard {
                    api_groups: groups,
                    api_versions: versions,
                    resources,
                })
            }
        }
        if let Some(sub) = resources.iter().find(|r| r.contains('/')) {
            return Err(AdmissionSkip::Subresource(sub.clone()));
        }

        let mut types = Vec::new();
        for group in &groups {
            for version in &versions {
                for resource in &resources {
                    types.push(self.entity_type(group, version, resource, out));
                }
            }
        }
        Ok(match types.as_slice() {
            [single] => (ScopeConstraint::Is(single.clone()), Condition::Empty),
            _ => (
                ScopeConstraint::Any,
                any(types.into_iter().map(|t| Condition::resource().is_type(t))),
            ),
        })
    }

    /// Compile one admission policy
    pub fn compile(&self, policy: &AdmissionPolicy) -> AdmissionCompilation {
        let mut out = AdmissionCompilation::new(&policy.name);
        let Some(rules) = &policy.match_rules else {
            return out;
        };

        for (vi, expression) in policy.validations.iter().enumerate() {
            let error = |rule, error| AdmissionError {
                policy: policy.name.clone(),
                validation: vi,
                rule,
                error,
            };
            let validation = match compile_expression(expression) {
                Ok(validation) => validation,
                Err(e) => {
                    out.skip(error(None, e.into()));
                    continue;
                }
            };
            for warning in validation.warnings {
                out.warn(AdmissionWarning::Expression {
                    validation: vi,
                    warning,
                });
            }

            for (ri, rule) in rules.iter().enumerate() {
                let Some(action) = action_constraint(&operations(&rule.operations)) else {
                    out.skip(error(Some(ri), AdmissionSkip::NoOperations));
                    continue;
                };
                let (resource, type_condition) = match self.type_match(rule, &mut out) {
                    Ok(matched) => matched,
                    Err(skip @ AdmissionSkip::PartialWildcard { .. }) => {
                        // Cedar cannot wildcard over namespaces.
                        out.skip(error(Some(ri), skip));
                        break;
                    }
                    Err(skip) => {
                        out.skip(error(Some(ri), skip));
                        continue;
                    }
                };

                let id = format!("{}.{vi}.{ri}", policy.name);
                let compiled = CompiledPolicy::forbid(&id)
                    .annotate("ValidatingAdmissionPolicy", &policy.name)
                    .annotate("ResourceRule", ri.to_string())
                    .annotate("Validation", vi.to_string())
                    .with_action(action)
                    .with_resource(resource)
                    .when(all([
                        type_condition,
                        names_condition(&rule.resource_names),
                        !validation.condition.clone(),
                    ]));
                if out.collection.insert(compiled).is_err() {
                    out.skip(error(Some(ri), AdmissionSkip::DuplicatePolicy(id)));
                }
            }
        }
        out
    }
}

/// Compile an admission policy with the default configuration
pub fn compile_admission(policy: &AdmissionPolicy) -> AdmissionCompilation {
    AdmissionCompiler::default().compile(policy)
}
