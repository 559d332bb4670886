//! Tiered policy evaluation
//!
//! Stores are consulted in order. The first store whose response carries a
//! reason (some policy fired) or an error decides; a store where nothing
//! fired falls through to the next. The last store's response is returned
//! whatever it contains, so Cedar's default deny applies there.
//!
//! ```text
//! tier 0: nothing fired ──► tier 1: forbid fired ──► Deny   (tier 2 never runs)
//! ```

use std::fmt;
use std::sync::Arc;

use cedar_policy::{Authorizer, Decision, Entities, Request, Response};
use tracing::{debug, instrument};

use crate::metrics::{EvaluationMetrics, Timer};
use crate::store::PolicyStore;

// ============================================================================
// Response types
// ============================================================================

/// Outcome as seen by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A permit fired and no forbid did
    Allow,
    /// A forbid fired
    Deny,
    /// No policy fired in any consulted tier
    NoOpinion,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
            Verdict::NoOpinion => "no-opinion",
        })
    }
}

/// A policy that contributed to the decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reason {
    /// Policy id
    pub policy_id: String,
    /// Store the policy came from
    pub store: String,
}

/// Decision plus the diagnostics of the tier that made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredResponse {
    /// Cedar decision
    pub decision: Decision,
    /// Policies that determined the decision
    pub reasons: Vec<Reason>,
    /// Evaluation errors reported by the deciding tier
    pub errors: Vec<String>,
    /// Index of the deciding store, `None` when there were no stores
    pub tier: Option<usize>,
}

impl TieredResponse {
    fn empty() -> Self {
        Self {
            decision: Decision::Deny,
            reasons: Vec::new(),
            errors: Vec::new(),
            tier: None,
        }
    }

    fn from_cedar(response: &Response, store: &str, tier: usize) -> Self {
        let diagnostics = response.diagnostics();
        Self {
            decision: response.decision(),
            reasons: diagnostics
                .reason()
                .map(|id| Reason {
                    policy_id: id.to_string(),
                    store: store.to_string(),
                })
                .collect(),
            errors: diagnostics.errors().map(|e| e.to_string()).collect(),
            tier: Some(tier),
        }
    }

    /// Whether this response ends the walk over the stores
    fn is_terminal(&self) -> bool {
        !self.reasons.is_empty() || !self.errors.is_empty()
    }

    /// Caller-facing verdict; errors alone never produce Allow or Deny
    pub fn verdict(&self) -> Verdict {
        if self.reasons.is_empty() {
            return Verdict::NoOpinion;
        }
        match self.decision {
            Decision::Allow => Verdict::Allow,
            Decision::Deny => Verdict::Deny,
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn evaluate_with(
    authorizer: &Authorizer,
    stores: &[Arc<PolicyStore>],
    entities: &Entities,
    request: &Request,
) -> TieredResponse {
    let mut result = TieredResponse::empty();
    for (tier, store) in stores.iter().enumerate() {
        let snapshot = store.snapshot();
        let response = authorizer.is_authorized(request, &snapshot.policy_set, entities);
        result = TieredResponse::from_cedar(&response, store.name(), tier);
        if result.is_terminal() {
            break;
        }
        debug!(store = %store.name(), tier, "No policy fired, falling through");
    }
    result
}

/// Evaluate a request against ordered stores
pub fn evaluate(
    stores: &[Arc<PolicyStore>],
    entities: &Entities,
    request: &Request,
) -> TieredResponse {
    evaluate_with(&Authorizer::new(), stores, entities, request)
}

// ============================================================================
// TieredEvaluator
// ============================================================================

/// Ordered stores with metrics
pub struct TieredEvaluator {
    stores: Vec<Arc<PolicyStore>>,
    authorizer: Authorizer,
    metrics: EvaluationMetrics,
}

impl TieredEvaluator {
    /// Create an evaluator over stores in precedence order
    pub fn new(stores: Vec<Arc<PolicyStore>>) -> Self {
        let metrics = EvaluationMetrics::new(stores.len());
        Self {
            stores,
            authorizer: Authorizer::new(),
            metrics,
        }
    }

    /// Stores in precedence order
    pub fn stores(&self) -> &[Arc<PolicyStore>] {
        &self.stores
    }

    /// Evaluation metrics
    pub fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    /// True once every store has completed its initial load
    pub fn ready(&self) -> bool {
        self.stores.iter().all(|s| s.initial_load_complete())
    }

    /// Evaluate a request through the tiers
    #[instrument(skip_all, fields(stores = self.stores.len()))]
    pub fn evaluate(&self, entities: &Entities, request: &Request) -> TieredResponse {
        let timer = Timer::start();
        let response = evaluate_with(&self.authorizer, &self.stores, entities, request);
        self.metrics.record(&response, timer.elapsed());
        debug!(
            decision = ?response.decision,
            tier = ?response.tier,
            reasons = response.reasons.len(),
            errors = response.errors.len(),
            "Tiered authorization result"
        );
        response
    }

    /// Verdict for a request, `NoOpinion` until every store has loaded
    pub fn authorize(&self, entities: &Entities, request: &Request) -> Verdict {
        if !self.ready() {
            debug!("Policy stores not loaded, returning no opinion");
            self.metrics.record_not_ready();
            return Verdict::NoOpinion;
        }
        self.evaluate(entities, request).verdict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cedar_policy::{Context, EntityUid};

    fn uid(s: &str) -> EntityUid {
        s.parse().unwrap()
    }

    fn request() -> Request {
        Request::new(
            uid(r#"k8s::User::"alice""#),
            uid(r#"k8s::Action::"get""#),
            uid(r#"k8s::Resource::"/core/pods""#),
            Context::empty(),
            None,
        )
        .unwrap()
    }

    fn store(name: &str, text: &str) -> Arc<PolicyStore> {
        Arc::new(PolicyStore::from_text(name, text).unwrap())
    }

    fn allow(name: &str) -> Arc<PolicyStore> {
        store(name, &format!(r#"@id("{name}-allow") permit(principal, action, resource);"#))
    }

    fn deny(name: &str) -> Arc<PolicyStore> {
        store(name, &format!(r#"@id("{name}-deny") forbid(principal, action, resource);"#))
    }

    fn silent(name: &str) -> Arc<PolicyStore> {
        store(
            name,
            r#"permit(principal == k8s::User::"nobody", action, resource);"#,
        )
    }

    fn run(stores: Vec<Arc<PolicyStore>>) -> TieredResponse {
        evaluate(&stores, &Entities::empty(), &request())
    }

    #[test]
    fn test_empty_store_list_denies() {
        let response = run(Vec::new());
        assert_eq!(response.decision, Decision::Deny);
        assert!(response.reasons.is_empty());
        assert_eq!(response.tier, None);
        assert_eq!(response.verdict(), Verdict::NoOpinion);
    }

    #[test]
    fn test_first_explicit_decision_wins() {
        let response = run(vec![silent("a"), deny("b"), allow("c")]);
        assert_eq!(response.decision, Decision::Deny);
        assert_eq!(response.tier, Some(1));
        assert_eq!(response.reasons[0].store, "b");
        assert_eq!(response.verdict(), Verdict::Deny);
    }

    #[test]
    fn test_last_store_default_is_returned() {
        let response = run(vec![silent("a"), silent("b")]);
        assert_eq!(response.decision, Decision::Deny);
        assert_eq!(response.tier, Some(1));
        assert_eq!(response.verdict(), Verdict::NoOpinion);
    }

    #[test]
    fn test_error_is_terminal_but_not_affirmative() {
        let broken = store(
            "broken",
            r#"permit(principal, action, resource) when { resource.missing == 1 };"#,
        );
        let response = run(vec![broken, allow("b")]);
        assert_eq!(response.tier, Some(0));
        assert!(!response.errors.is_empty());
        assert_eq!(response.verdict(), Verdict::NoOpinion);
    }

    #[test]
    fn test_evaluator_waits_for_initial_load() {
        let pending = Arc::new(PolicyStore::new("pending"));
        let evaluator = TieredEvaluator::new(vec![allow("a"), pending.clone()]);
        assert!(!evaluator.ready());
        assert_eq!(
            evaluator.authorize(&Entities::empty(), &request()),
            Verdict::NoOpinion
        );
        assert_eq!(evaluator.metrics().not_ready(), 1);

        pending.publish_text("", "v1").unwrap();
        assert!(evaluator.ready());
        assert_eq!(
            evaluator.authorize(&Entities::empty(), &request()),
            Verdict::Allow
        );
        assert_eq!(evaluator.metrics().tier_decisions(0), 1);
    }

    #[test]
    fn test_fallthrough_counted() {
        let evaluator = TieredEvaluator::new(vec![silent("a"), silent("b"), allow("c")]);
        let response = evaluator.evaluate(&Entities::empty(), &request());
        assert_eq!(response.tier, Some(2));
        assert_eq!(evaluator.metrics().fallthroughs(), 2);
        assert_eq!(evaluator.metrics().allowed(), 1);
    }
}
