//! End-to-end runs of the convert and authorize commands over files on disk

use std::fs;
use std::path::{Path, PathBuf};

use cedar_policy::PolicySet;
use k8s_cedar::commands::authorize::{authorize, render_json, render_text, AuthorizeArgs};
use k8s_cedar::commands::convert::{convert_admission, convert_rbac, ConvertOptions, OutputFormat};
use k8s_cedar::Error;
use tempfile::TempDir;

const VIEW: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: view
rules:
  - apiGroups: [""]
    resources: ["pods"]
    verbs: ["get", "list"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: viewers
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: view
subjects:
  - kind: Group
    name: viewers
"#;

const DANGLING: &str = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: orphan
  namespace: team-a
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: missing
subjects:
  - kind: User
    name: bob
"#;

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
        operations: ["CREATE"]
        resources: ["deployments"]
  validations:
    - expression: "object.spec.replicas <= 5"
    - expression: "object.spec.template.spec.containers.all(c, c.image != '')"
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn options(files: Vec<PathBuf>, output: OutputFormat) -> ConvertOptions {
    ConvertOptions {
        files,
        output,
        config: None,
        name: None,
        strict: false,
    }
}

fn request(dir: &TempDir, user: &str, groups: &[&str], verb: &str) -> PathBuf {
    let parents: Vec<_> = groups
        .iter()
        .map(|g| serde_json::json!({ "type": "k8s::Group", "id": g }))
        .collect();
    let mut entities = vec![
        serde_json::json!({
            "uid": { "type": "k8s::User", "id": user },
            "attrs": { "name": user },
            "parents": parents,
        }),
        serde_json::json!({
            "uid": { "type": "k8s::Resource", "id": "/core/namespaces/default/pods" },
            "attrs": { "apiGroup": "", "resource": "pods", "namespace": "default" },
            "parents": [],
        }),
    ];
    for group in groups {
        entities.push(serde_json::json!({
            "uid": { "type": "k8s::Group", "id": group },
            "attrs": { "name": group },
            "parents": [],
        }));
    }
    let body = serde_json::json!({
        "principal": format!(r#"k8s::User::"{user}""#),
        "action": format!(r#"k8s::Action::"{verb}""#),
        "resource": r#"k8s::Resource::"/core/namespaces/default/pods""#,
        "entities": entities,
    });
    write(dir, "request.json", &body.to_string())
}

fn authorize_args(stores: Vec<PathBuf>, request: PathBuf) -> AuthorizeArgs {
    AuthorizeArgs {
        stores,
        request,
        json: false,
    }
}

fn file_name(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn convert_rbac_prints_parseable_cedar() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "view.yaml", VIEW);

    let text = convert_rbac(&options(vec![manifest], OutputFormat::Cedar)).unwrap();
    let set: PolicySet = text.parse().unwrap();
    assert_eq!(set.policies().count(), 1);
    assert!(text.contains(r#"principal in k8s::Group::"viewers""#));
}

#[test]
fn convert_rbac_json_output_is_a_policy_set() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "view.yaml", VIEW);

    let json = convert_rbac(&options(vec![manifest], OutputFormat::Json)).unwrap();
    let set = PolicySet::from_json_str(&json).unwrap();
    assert_eq!(set.policies().count(), 1);
}

#[test]
fn convert_rbac_strict_rejects_skipped_rules() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(&dir, "view.yaml", VIEW),
        write(&dir, "orphan.yaml", DANGLING),
    ];

    let lenient = convert_rbac(&options(files.clone(), OutputFormat::Cedar)).unwrap();
    assert!(lenient.parse::<PolicySet>().is_ok());

    let mut strict = options(files, OutputFormat::Cedar);
    strict.strict = true;
    let err = convert_rbac(&strict).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert!(err.to_string().contains("role Role missing not found"));
}

#[test]
fn convert_reports_missing_file() {
    let err = convert_rbac(&options(
        vec![PathBuf::from("/nonexistent/rbac.yaml")],
        OutputFormat::Cedar,
    ))
    .unwrap_err();
    assert!(matches!(err, Error::ReadFile { .. }));
}

#[test]
fn convert_admission_skips_unsupported_validations() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "vap.yaml", REPLICA_LIMIT);

    let text = convert_admission(&options(vec![manifest.clone()], OutputFormat::Cedar)).unwrap();
    let set: PolicySet = text.parse().unwrap();
    assert_eq!(set.policies().count(), 1);
    assert!(text.contains("resource is apps::v1::Deployment"));

    let mut strict = options(vec![manifest], OutputFormat::Cedar);
    strict.strict = true;
    assert!(convert_admission(&strict).is_err());
}

#[test]
fn convert_admission_rejects_duplicate_policies_across_files() {
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(&dir, "a.yaml", REPLICA_LIMIT),
        write(&dir, "b.yaml", REPLICA_LIMIT),
    ];
    let err = convert_admission(&options(files, OutputFormat::Cedar)).unwrap_err();
    assert!(err.to_string().contains("duplicate policy id"));
}

#[test]
fn authorize_walks_stores_in_order() {
    let dir = TempDir::new().unwrap();
    let rbac = convert_rbac(&options(
        vec![write(&dir, "view.yaml", VIEW)],
        OutputFormat::Cedar,
    ))
    .unwrap();
    let guard = write(
        &dir,
        "guard.cedar",
        r#"forbid(principal == k8s::User::"mallory", action, resource);"#,
    );
    let store = write(&dir, "rbac.cedar", &rbac);
    let stores = vec![guard, store];

    let allowed = authorize(&authorize_args(
        stores.clone(),
        request(&dir, "alice", &["viewers"], "get"),
    ))
    .unwrap();
    let text = render_text(&allowed, &stores);
    assert!(text.starts_with("decision: allow"));
    assert!(text.contains(&format!("tier: 1 ({})", file_name(&stores[1]))));
    assert!(text.contains("reason: viewers:ClusterRoleBinding:0.0 (rbac)"));

    let denied = authorize(&authorize_args(
        stores.clone(),
        request(&dir, "mallory", &["viewers"], "get"),
    ))
    .unwrap();
    let json = render_json(&denied);
    assert_eq!(json["decision"], "deny");
    assert_eq!(json["tier"], 0);
    assert_eq!(json["reasons"][0]["store"], "guard");

    let silent = authorize(&authorize_args(
        stores,
        request(&dir, "alice", &["viewers"], "delete"),
    ))
    .unwrap();
    assert_eq!(render_json(&silent)["decision"], "no-opinion");
}

#[test]
fn authorize_accepts_json_policy_sets() {
    let dir = TempDir::new().unwrap();
    let json = convert_rbac(&options(
        vec![write(&dir, "view.yaml", VIEW)],
        OutputFormat::Json,
    ))
    .unwrap();
    let store = write(&dir, "rbac.json", &json);

    let response = authorize(&authorize_args(
        vec![store],
        request(&dir, "alice", &["viewers"], "list"),
    ))
    .unwrap();
    assert_eq!(render_json(&response)["decision"], "allow");
}

#[test]
fn authorize_rejects_bad_store_and_request() {
    let dir = TempDir::new().unwrap();
    let broken = write(&dir, "broken.cedar", "permit(principal, action");
    let req = request(&dir, "alice", &[], "get");
    let err = authorize(&authorize_args(vec![broken], req.clone())).unwrap_err();
    assert!(err.to_string().contains("broken"));

    let store = write(&dir, "ok.cedar", "permit(principal, action, resource);");
    let bad = write(&dir, "bad.json", r#"{"principal": "not a uid", "action": "", "resource": ""}"#);
    let err = authorize(&authorize_args(vec![store], bad)).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
}
