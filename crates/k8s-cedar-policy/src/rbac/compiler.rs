//! Rule compiler

use tracing::debug;

use super::impersonate::impersonation;
use super::resources::{
    api_groups_condition, dedup, has_subresources, is_wildcard, namespace_condition,
    non_resource_urls_condition, reduce_wildcard, resource_names_condition, resources_condition,
};
use super::{
    Binding, PermissionRule, RbacCompilation, RuleDiagnostic, RuleSource, SkipReason, Subject,
    SubjectKind,
};
use crate::collection::policy_id;
use crate::condition::{and, Condition, EntityRef};
use crate::config::CompilerConfig;
use crate::policy::{ActionConstraint, CompiledPolicy, ScopeConstraint};
use crate::schema::{self, IMPERSONATE_VERB, SERVICE_ACCOUNT_PREFIX};

/// Principal scope plus attribute condition for one subject
#[derive(Debug, Clone)]
struct PrincipalMatch {
    scope: ScopeConstraint,
    condition: Condition,
}

impl PrincipalMatch {
    fn for_subject(subject: &Subject) -> Result<Self, SkipReason> {
        match subject.kind {
            SubjectKind::Group => Ok(Self {
                scope: ScopeConstraint::In(EntityRef::new(schema::GROUP, &subject.name)),
                condition: Condition::Empty,
            }),
            SubjectKind::User => Ok(Self {
                scope: ScopeConstraint::Is(schema::USER),
                condition: Condition::principal()
                    .access("name")
                    .equal(Condition::string(&subject.name)),
            }),
            SubjectKind::ServiceAccount => {
                let identity = format!(
                    "{SERVICE_ACCOUNT_PREFIX}{}:{}",
                    subject.namespace.as_deref().unwrap_or_default(),
                    subject.name
                );
                let parts: Vec<&str> = identity.split(':').collect();
                let [_, _, namespace, name] = parts.as_slice() else {
                    return Err(SkipReason::InvalidServiceAccount(identity));
                };
                Ok(Self {
                    scope: ScopeConstraint::Is(schema::SERVICE_ACCOUNT),
                    condition: Condition::principal()
                        .access("namespace")
                        .equal(Condition::string(*namespace))
                        .and(
                            Condition::principal()
                                .access("name")
                                .equal(Condition::string(*name)),
                        ),
                })
            }
        }
    }
}

fn action_constraint(verbs: &[String]) -> ActionConstraint {
    let action = |verb: &String| EntityRef::new(schema::AUTHORIZATION_ACTION, verb);
    match verbs {
        [only] if only == "*" => ActionConstraint::Any,
        [only] => ActionConstraint::Eq(action(only)),
        many => ActionConstraint::In(many.iter().map(action).collect()),
    }
}

/// Compiles RBAC bindings into Cedar `permit` policies
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    config: CompilerConfig,
}

struct RuleContext<'a> {
    binding: &'a Binding,
    source: &'a RuleSource,
    namespace: Option<&'a str>,
    subject_index: usize,
    rule_index: usize,
}

impl RuleContext<'_> {
    fn diagnostic(&self, reason: SkipReason) -> RuleDiagnostic {
        RuleDiagnostic {
            binding: self.binding.name.clone(),
            subject_index: self.subject_index,
            rule_index: self.rule_index,
            reason,
        }
    }

    fn id(&self, suffix: &str) -> String {
        let kind = format!("{}{suffix}", self.binding.kind);
        policy_id(
            &self.binding.id_name(),
            &kind,
            self.subject_index,
            self.rule_index,
        )
    }

    fn base_policy(&self, principal: &PrincipalMatch) -> CompiledPolicy {
        let mut policy = CompiledPolicy::permit(String::new())
            .annotate(self.binding.kind.as_str(), &self.binding.name)
            .annotate(&self.source.kind, &self.source.name)
            .annotate("policyRule", format!("{:02}", self.rule_index))
            .with_principal(principal.scope.clone())
            .when(principal.condition.clone());
        if let Some(ns) = self.namespace {
            policy = policy.annotate("namespace", ns);
        }
        policy
    }
}

impl RuleCompiler {
    /// Create a compiler with the given configuration
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compiler configuration
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile one binding against the rules of the role it references
    ///
    /// `namespace` scopes every resource policy to that namespace; pass the
    /// binding namespace for a RoleBinding and `None` for a
    /// ClusterRoleBinding.
    pub fn compile(
        &self,
        binding: &Binding,
        source: &RuleSource,
        namespace: Option<&str>,
    ) -> RbacCompilation {
        let mut out = RbacCompilation::new(binding.id_name());

        for (subject_index, subject) in binding.subjects.iter().enumerate() {
            let principal = PrincipalMatch::for_subject(subject);
            for (rule_index, rule) in source.rules.iter().enumerate() {
                let ctx = RuleContext {
                    binding,
                    source,
                    namespace,
                    subject_index,
                    rule_index,
                };
                match &principal {
                    Ok(principal) => self.compile_rule(&ctx, principal, rule, &mut out),
                    Err(reason) => out.skip(ctx.diagnostic(reason.clone())),
                }
            }
        }

        debug!(
            binding = %binding.name,
            kind = %binding.kind,
            policies = out.collection.len(),
            skipped = out.diagnostics.len(),
            "Compiled binding"
        );
        out
    }

    /// Compile a binding using its own namespace for scoping
    pub fn compile_binding(&self, binding: &Binding, source: &RuleSource) -> RbacCompilation {
        self.compile(binding, source, binding.namespace.as_deref())
    }

    /// Compile every binding, resolving role references against `roles`
    ///
    /// A RoleBinding may reference a Role in its own namespace or any
    /// ClusterRole. Bindings whose role is missing are reported once per
    /// subject.
    pub fn compile_all(
        &self,
        name: &str,
        bindings: &[Binding],
        roles: &[RuleSource],
    ) -> RbacCompilation {
        let mut out = RbacCompilation::new(name);
        for binding in bindings {
            let role = roles.iter().find(|role| {
                role.kind == binding.role.kind
                    && role.name == binding.role.name
                    && (role.namespace.is_none() || role.namespace == binding.namespace)
            });
            match role {
                Some(role) => out.absorb(self.compile_binding(binding, role)),
                None => {
                    for subject_index in 0..binding.subjects.len() {
                        out.skip(RuleDiagnostic {
                            binding: binding.name.clone(),
                            subject_index,
                            rule_index: 0,
                            reason: SkipReason::MissingRole {
                                kind: binding.role.kind.clone(),
                                name: binding.role.name.clone(),
                            },
                        });
                    }
                }
            }
        }
        out
    }

    fn emit(&self, ctx: &RuleContext<'_>, policy: CompiledPolicy, out: &mut RbacCompilation) {
        let id = policy.id.clone();
        if out.collection.insert(policy).is_err() {
            out.skip(ctx.diagnostic(SkipReason::DuplicatePolicy(id)));
        }
    }

    fn is_impersonation(&self, verbs: &[String], resources: &[String], groups: &[String]) -> bool {
        (is_wildcard(verbs) && is_wildcard(resources) && is_wildcard(groups))
            || (verbs.iter().any(|v| v == IMPERSONATE_VERB)
                && groups.iter().any(|g| *g == self.config.authentication_group))
    }

    fn compile_rule(
        &self,
        ctx: &RuleContext<'_>,
        principal: &PrincipalMatch,
        rule: &PermissionRule,
        out: &mut RbacCompilation,
    ) {
        let verbs = reduce_wildcard(&rule.verbs);
        if verbs.is_empty() {
            out.skip(ctx.diagnostic(SkipReason::NoVerbs));
            return;
        }
        let base = ctx.base_policy(principal);

        if !rule.non_resource_urls.is_empty() {
            let policy = base
                .with_id(ctx.id("/nonresource"))
                .with_action(action_constraint(&verbs))
                .with_resource(ScopeConstraint::Is(schema::NON_RESOURCE_URL))
                .when(non_resource_urls_condition(&rule.non_resource_urls));
            self.emit(ctx, policy, out);
            return;
        }

        let api_groups = reduce_wildcard(&rule.api_groups);
        let resources = reduce_wildcard(&rule.resources);
        let names = dedup(&rule.resource_names);
        if resources.is_empty() {
            out.skip(ctx.diagnostic(SkipReason::NoResources));
            return;
        }
        if api_groups.is_empty() {
            out.skip(ctx.diagnostic(SkipReason::NoApiGroups));
            return;
        }

        if self.is_impersonation(&verbs, &resources, &api_groups) {
            match impersonation(&resources, &names) {
                Ok(target) => {
                    let policy = base
                        .clone()
                        .with_id(ctx.id("/impersonate"))
                        .with_action(ActionConstraint::Eq(EntityRef::new(
                            schema::AUTHORIZATION_ACTION,
                            IMPERSONATE_VERB,
                        )))
                        .with_resource(target.resource)
                        .when(target.condition);
                    self.emit(ctx, policy, out);
                }
                Err(reason) => out.skip(ctx.diagnostic(reason)),
            }
            if matches!(verbs.as_slice(), [only] if only == IMPERSONATE_VERB) {
                return;
            }
        }

        let mut condition = and(
            api_groups_condition(&api_groups),
            resources_condition(&resources),
        );
        condition = and(condition, resource_names_condition(&names));
        condition = and(condition, namespace_condition(ctx.namespace));
        if !has_subresources(&resources) {
            condition = and(condition, !Condition::resource().has("subresource"));
        }

        let policy = base
            .with_id(ctx.id(""))
            .with_action(action_constraint(&verbs))
            .with_resource(ScopeConstraint::Is(schema::RESOURCE))
            .when(condition);
        self.emit(ctx, policy, out);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BindingKind, RoleRef};
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rule(verbs: &[&str], groups: &[&str], resources: &[&str]) -> PermissionRule {
        PermissionRule {
            verbs: strings(verbs),
            api_groups: strings(groups),
            resources: strings(resources),
            ..Default::default()
        }
    }

    fn cluster_binding(subjects: Vec<Subject>) -> Binding {
        Binding {
            name: "viewers".to_string(),
            kind: BindingKind::ClusterRoleBinding,
            role: RoleRef {
                kind: "ClusterRole".to_string(),
                name: "view".to_string(),
            },
            subjects,
            namespace: None,
        }
    }

    fn compile_one(subject: Subject, rule: PermissionRule) -> RbacCompilation {
        let binding = cluster_binding(vec![subject]);
        let source = RuleSource::cluster_role("view", vec![rule]);
        RuleCompiler::default().compile(&binding, &source, None)
    }

    #[test]
    fn test_group_get_pods() {
        let out = compile_one(Subject::group("viewers"), rule(&["get"], &[""], &["pods"]));
        assert!(out.diagnostics.is_empty());
        let policy = out.collection.get("viewers:ClusterRoleBinding:0.0").unwrap();
        assert_eq!(
            policy.to_string(),
            r#"@id("viewers:ClusterRoleBinding:0.0")
@ClusterRole("view")
@ClusterRoleBinding("viewers")
@policyRule("00")
permit (
  principal in k8s::Group::"viewers",
  action == k8s::Action::"get",
  resource is k8s::Resource
)
when { resource.apiGroup == "" && resource.resource == "pods" && !(resource has subresource) };"#
        );
    }

    #[test]
    fn test_user_subject_matches_name() {
        let out = compile_one(Subject::user("alice"), rule(&["*"], &["*"], &["pods"]));
        let policy = out.collection.iter().next().unwrap();
        assert_eq!(policy.principal, ScopeConstraint::Is(schema::USER));
        assert_eq!(policy.action, ActionConstraint::Any);
        assert!(policy
            .condition
            .to_string()
            .starts_with(r#"principal.name == "alice""#));
    }

    #[test]
    fn test_service_account_subject() {
        let out = compile_one(
            Subject::service_account("kube-system", "builder"),
            rule(&["list", "watch"], &["apps"], &["deployments"]),
        );
        let policy = out.collection.iter().next().unwrap();
        assert_eq!(policy.principal, ScopeConstraint::Is(schema::SERVICE_ACCOUNT));
        assert!(matches!(&policy.action, ActionConstraint::In(a) if a.len() == 2));
        assert!(policy.condition.to_string().starts_with(
            r#"principal.namespace == "kube-system" && principal.name == "builder""#
        ));
    }

    #[test]
    fn test_malformed_service_account_skipped() {
        let out = compile_one(
            Subject::service_account("a:b", "builder"),
            rule(&["get"], &[""], &["pods"]),
        );
        assert!(out.collection.is_empty());
        assert!(matches!(
            out.diagnostics[0].reason,
            SkipReason::InvalidServiceAccount(_)
        ));
    }

    #[test]
    fn test_skips_rules_without_verbs_or_resources() {
        let out = compile_one(Subject::group("g"), rule(&[], &[""], &["pods"]));
        assert_eq!(out.diagnostics[0].reason, SkipReason::NoVerbs);
        let out = compile_one(Subject::group("g"), rule(&["get"], &[""], &[]));
        assert_eq!(out.diagnostics[0].reason, SkipReason::NoResources);
        let out = compile_one(Subject::group("g"), rule(&["get"], &[], &["pods"]));
        assert_eq!(out.diagnostics[0].reason, SkipReason::NoApiGroups);
    }

    #[test]
    fn test_non_resource_urls() {
        let rule = PermissionRule {
            verbs: strings(&["get"]),
            non_resource_urls: strings(&["/healthz", "/api/*"]),
            ..Default::default()
        };
        let out = compile_one(Subject::group("g"), rule);
        let policy = out
            .collection
            .get("viewers:ClusterRoleBinding/nonresource:0.0")
            .unwrap();
        assert_eq!(policy.resource, ScopeConstraint::Is(schema::NON_RESOURCE_URL));
        assert_eq!(
            policy.condition.to_string(),
            r#"resource.path like "/api/*" || resource.path == "/healthz""#
        );
    }

    #[test]
    fn test_wildcard_rule_adds_impersonation() {
        let out = compile_one(Subject::group("admins"), rule(&["*"], &["*"], &["*"]));
        assert_eq!(out.collection.len(), 2);
        let imp = out
            .collection
            .get("viewers:ClusterRoleBinding/impersonate:0.0")
            .unwrap();
        assert_eq!(
            imp.action,
            ActionConstraint::Eq(EntityRef::new(schema::AUTHORIZATION_ACTION, "impersonate"))
        );
        assert_eq!(imp.resource, ScopeConstraint::Any);
        assert!(imp.condition.is_empty());
        let general = out.collection.get("viewers:ClusterRoleBinding:0.0").unwrap();
        assert_eq!(
            general.condition.to_string(),
            "!(resource has subresource)"
        );
    }

    #[test]
    fn test_impersonate_only_rule_skips_resource_policy() {
        let rule = PermissionRule {
            verbs: strings(&["impersonate"]),
            api_groups: strings(&[""]),
            resources: strings(&["users"]),
            resource_names: strings(&["jane"]),
            ..Default::default()
        };
        // Core group impersonation is not in the authentication group.
        let out = compile_one(Subject::group("g"), rule.clone());
        assert_eq!(out.collection.len(), 1);
        assert!(out.collection.get("viewers:ClusterRoleBinding:0.0").is_some());

        let rule = PermissionRule {
            api_groups: strings(&["authentication.k8s.io"]),
            ..rule
        };
        let out = compile_one(Subject::group("g"), rule);
        assert_eq!(out.collection.len(), 1);
        let imp = out
            .collection
            .get("viewers:ClusterRoleBinding/impersonate:0.0")
            .unwrap();
        assert_eq!(imp.resource, ScopeConstraint::Is(schema::USER));
        assert_eq!(imp.condition.to_string(), r#"resource.name == "jane""#);
    }

    #[test]
    fn test_role_binding_scopes_namespace() {
        let binding = Binding {
            name: "reader".to_string(),
            kind: BindingKind::RoleBinding,
            role: RoleRef {
                kind: "Role".to_string(),
                name: "pod-reader".to_string(),
            },
            subjects: vec![Subject::user("bob")],
            namespace: Some("team-a".to_string()),
        };
        let source = RuleSource::role("team-a", "pod-reader", vec![rule(&["get"], &[""], &["pods"])]);
        let out = RuleCompiler::default().compile_binding(&binding, &source);
        let policy = out.collection.get("team-a/reader:RoleBinding:0.0").unwrap();
        assert_eq!(policy.annotations.get("namespace").map(String::as_str), Some("team-a"));
        assert_eq!(policy.annotations.get("Role").map(String::as_str), Some("pod-reader"));
        assert!(policy
            .condition
            .to_string()
            .contains(r#"resource has namespace && resource.namespace == "team-a""#));
    }

    #[test]
    fn test_subresource_rules_guard_plain_entries() {
        let out = compile_one(Subject::group("g"), rule(&["get"], &[""], &["pods", "pods/log"]));
        let policy = out.collection.iter().next().unwrap();
        let text = policy.condition.to_string();
        assert!(text.contains(
            r#"resource.resource == "pods" && !(resource has subresource) || resource.resource == "pods" && resource has subresource"#
        ));
        assert!(text.ends_with(r#"resource.subresource == "log")"#));
    }

    #[test]
    fn test_indices_in_ids() {
        let binding = cluster_binding(vec![Subject::group("a"), Subject::group("b")]);
        let source = RuleSource::cluster_role(
            "view",
            vec![rule(&["get"], &[""], &["pods"]), rule(&["list"], &[""], &["pods"])],
        );
        let out = RuleCompiler::default().compile(&binding, &source, None);
        let ids: Vec<&str> = out.collection.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "viewers:ClusterRoleBinding:0.0",
                "viewers:ClusterRoleBinding:0.1",
                "viewers:ClusterRoleBinding:1.0",
                "viewers:ClusterRoleBinding:1.1",
            ]
        );
        let rule_index = out.collection.get("viewers:ClusterRoleBinding:1.1").unwrap();
        assert_eq!(rule_index.annotations["policyRule"], "01");
    }

    #[test]
    fn test_compile_all_resolves_roles() {
        let bindings = vec![
            cluster_binding(vec![Subject::group("g")]),
            Binding {
                name: "dangling".to_string(),
                kind: BindingKind::ClusterRoleBinding,
                role: RoleRef {
                    kind: "ClusterRole".to_string(),
                    name: "missing".to_string(),
                },
                subjects: vec![Subject::group("g")],
                namespace: None,
            },
        ];
        let roles = vec![RuleSource::cluster_role("view", vec![rule(&["get"], &[""], &["pods"])])];
        let out = RuleCompiler::default().compile_all("rbac", &bindings, &roles);
        assert_eq!(out.collection.name(), "rbac");
        assert_eq!(out.collection.len(), 1);
        assert!(matches!(
            out.diagnostics[0].reason,
            SkipReason::MissingRole { .. }
        ));
    }

    #[test]
    fn test_compiled_policies_parse_as_cedar() {
        let rules = vec![
            rule(&["get", "list"], &["", "apps"], &["pods", "deployments/scale", "*/status"]),
            rule(&["*"], &["*"], &["*"]),
            PermissionRule {
                verbs: strings(&["impersonate"]),
                api_groups: strings(&["authentication.k8s.io"]),
                resources: strings(&["users", "groups", "uids", "userextras/scopes"]),
                resource_names: strings(&["x", "y"]),
                ..Default::default()
            },
            PermissionRule {
                verbs: strings(&["get"]),
                api_groups: strings(&[""]),
                resources: strings(&["secrets"]),
                resource_names: strings(&["token"]),
                ..Default::default()
            },
        ];
        let binding = cluster_binding(vec![
            Subject::group("g"),
            Subject::user("u"),
            Subject::service_account("ns", "sa"),
        ]);
        let source = RuleSource::cluster_role("view", rules);
        let out = RuleCompiler::default().compile(&binding, &source, None);
        assert!(out.diagnostics.is_empty());
        let set = out.collection.to_policy_set().unwrap();
        assert_eq!(set.policies().count(), out.collection.len());
    }
}
