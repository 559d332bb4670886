//! Compiled admission policies evaluated against admission requests

use std::collections::{HashMap, HashSet};

use cedar_policy::{
    Authorizer, Context, Decision, Entities, Entity, EntityUid, PolicySet, Request, Response,
    RestrictedExpression,
};
use k8s_cedar_policy::admission::AdmissionSkip;
use k8s_cedar_policy::entities::{admission_action_uid, entity_uid};
use k8s_cedar_policy::schema::{self, EntityType};
use k8s_cedar_policy::{compile_admission, AdmissionPolicy, CelError};
use k8s_openapi::api::admissionregistration::v1::ValidatingAdmissionPolicy;

const REPLICA_LIMIT: &str = r#"
apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingAdmissionPolicy
metadata:
  name: replica-limit
spec:
  matchConstraints:
    resourceRules:
      - apiGroups: ["apps"]
        apiVersions: ["v1"]
        operations: ["CREATE", "UPDATE"]
        resources: ["deployments"]
  validations:
    - expression: "object.spec.replicas <= 5"
    - expression: "object.spec.template.spec.containers.all(c, c.image != '')"
    - expression: "!has(object.spec.paused) || object.spec.paused == false"
"#;

fn policy_set() -> (PolicySet, Vec<String>) {
    let vap: ValidatingAdmissionPolicy = serde_yaml::from_str(REPLICA_LIMIT).unwrap();
    let out = compile_admission(&AdmissionPolicy::from(&vap));
    let errors = out.errors.iter().map(|e| e.to_string()).collect();
    (out.collection.to_policy_set().unwrap(), errors)
}

fn deployment(replicas: i64, paused: Option<bool>) -> Entity {
    let mut spec = vec![(
        "replicas".to_string(),
        RestrictedExpression::new_long(replicas),
    )];
    if let Some(paused) = paused {
        spec.push(("paused".to_string(), RestrictedExpression::new_bool(paused)));
    }
    let attrs = HashMap::from([(
        "spec".to_string(),
        RestrictedExpression::new_record(spec).unwrap(),
    )]);
    Entity::new(deployment_uid(), attrs, HashSet::new()).unwrap()
}

fn deployment_uid() -> EntityUid {
    entity_uid(&EntityType::new("apps::v1::Deployment"), "prod/web").unwrap()
}

fn respond(operation: &str, object: Entity) -> Response {
    let (policies, _) = policy_set();
    let request = Request::new(
        entity_uid(&schema::USER, "alice").unwrap(),
        admission_action_uid(operation).unwrap(),
        deployment_uid(),
        Context::empty(),
        None,
    )
    .unwrap();
    let entities = Entities::from_entities([object], None).unwrap();
    let response = Authorizer::new().is_authorized(&request, &policies, &entities);
    assert_eq!(response.diagnostics().errors().count(), 0);
    response
}

/// Forbid-only sets never allow; a request is admitted when nothing fires
fn forbidden(operation: &str, object: Entity) -> bool {
    respond(operation, object).diagnostics().reason().next().is_some()
}

#[test]
fn test_unsupported_validation_is_reported() {
    let (policies, errors) = policy_set();
    assert_eq!(policies.policies().count(), 2);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("validation 1"));
    assert!(errors[0].contains("comprehensions"));
}

#[test]
fn test_valid_object_is_not_forbidden() {
    assert!(!forbidden("create", deployment(3, None)));
    assert!(!forbidden("update", deployment(5, Some(false))));
}

#[test]
fn test_invalid_object_is_forbidden() {
    assert!(forbidden("create", deployment(6, None)));
    assert!(forbidden("update", deployment(1, Some(true))));
    let response = respond("create", deployment(6, None));
    assert_eq!(response.decision(), Decision::Deny);
    let fired: Vec<String> = response.diagnostics().reason().map(|id| id.to_string()).collect();
    assert_eq!(fired, ["replica-limit.0.0"]);
}

#[test]
fn test_unmatched_operation_is_ignored() {
    assert!(!forbidden("delete", deployment(10, None)));
}

#[test]
fn test_parse_error_is_collected() {
    let out = compile_admission(&AdmissionPolicy {
        name: "broken".to_string(),
        match_rules: Some(Vec::new()),
        validations: vec!["object.spec.replicas <".to_string()],
    });
    assert!(matches!(
        out.errors[0].error,
        AdmissionSkip::Expression(CelError::Parse(_))
    ));
}
