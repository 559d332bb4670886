//! Kubernetes access control compiled to Cedar
//!
//! Compiles RBAC role rules and ValidatingAdmissionPolicy CEL validations
//! into Cedar policies, and evaluates requests against an ordered list of
//! policy stores.
//!
//! # Entity Model
//!
//! ```text
//! k8s::User::"alice"                                   (principal)
//! k8s::Group::"viewers"                                (principal)
//! k8s::ServiceAccount::"system:serviceaccount:ns:sa"   (principal)
//! k8s::Action::"get"                                   (action, authorization)
//! k8s::admission::Action::"create"                     (action, admission)
//! k8s::Resource::"/core/namespaces/default/pods/web"   (resource)
//! k8s::NonResourceURL::"/healthz"                      (resource)
//! k8s::User | k8s::Group | k8s::PrincipalUID | k8s::Extra  (impersonation targets)
//! apps::v1::Deployment                                 (admission object types)
//! ```

#![deny(missing_docs)]

pub mod admission;
pub mod cel;
pub mod collection;
pub mod condition;
pub mod config;
pub mod entities;
mod error;
pub mod metrics;
pub mod policy;
pub mod rbac;
pub mod schema;
pub mod store;
pub mod tiered;

pub use admission::{compile_admission, AdmissionCompilation, AdmissionCompiler, AdmissionPolicy};
pub use cel::{compile_expression, CelError};
pub use collection::PolicyCollection;
pub use condition::Condition;
pub use config::CompilerConfig;
pub use error::{Error, Result};
pub use policy::CompiledPolicy;
pub use rbac::{Binding, RbacCompilation, RuleCompiler, RuleSource};
pub use store::PolicyStore;
pub use tiered::{evaluate, TieredEvaluator, TieredResponse, Verdict};
