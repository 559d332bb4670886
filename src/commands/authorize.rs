//! Authorize command - evaluate one request against tiered policy stores

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cedar_policy::{Context, Entities, EntityUid, PolicySet, Request};
use clap::Args;
use k8s_cedar_policy::{PolicyStore, TieredEvaluator, TieredResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{read_file, CommandErrorExt};
use crate::{Error, Result};

/// Authorize arguments
#[derive(Args, Debug)]
pub struct AuthorizeArgs {
    /// Policy store files in tier order (Cedar text, or a Cedar JSON policy set with a .json extension)
    #[arg(long = "store", required = true, num_args = 1..)]
    pub stores: Vec<PathBuf>,

    /// Request file (JSON)
    #[arg(long)]
    pub request: PathBuf,

    /// Print the response as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,
}

/// A request as read from disk
///
/// ```json
/// {
///   "principal": "k8s::User::\"alice\"",
///   "action": "k8s::Action::\"get\"",
///   "resource": "k8s::Resource::\"/core/namespaces/default/pods\"",
///   "context": {},
///   "entities": []
/// }
/// ```
///
/// `entities` uses the Cedar JSON entity format.
#[derive(Debug, Deserialize)]
pub struct RequestFile {
    pub principal: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub entities: Option<serde_json::Value>,
}

impl RequestFile {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_request(&self) -> Result<Request> {
        let context = match &self.context {
            Some(value) => Context::from_json_value(value.clone(), None)
                .map_err(|e| Error::invalid_request(format!("context: {e}")))?,
            None => Context::empty(),
        };
        Request::new(
            parse_uid("principal", &self.principal)?,
            parse_uid("action", &self.action)?,
            parse_uid("resource", &self.resource)?,
            context,
            None,
        )
        .map_err(|e| Error::invalid_request(e.to_string()))
    }

    pub fn to_entities(&self) -> Result<Entities> {
        match &self.entities {
            Some(value) => Entities::from_json_value(value.clone(), None)
                .map_err(|e| Error::invalid_request(format!("entities: {e}"))),
            None => Ok(Entities::empty()),
        }
    }
}

fn parse_uid(field: &str, text: &str) -> Result<EntityUid> {
    text.parse()
        .map_err(|e| Error::invalid_request(format!("{field} {text}: {e}")))
}

/// Load a store named after the file stem
pub fn load_store(path: &Path) -> Result<PolicyStore> {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let text = read_file(path)?;

    if path.extension().is_some_and(|ext| ext == "json") {
        let set = PolicySet::from_json_str(&text)
            .map_err(|e| k8s_cedar_policy::Error::parse(&name, e.to_string()))?;
        Ok(PolicyStore::from_policy_set(name, set))
    } else {
        Ok(PolicyStore::from_text(name, &text)?)
    }
}

/// Load the stores and the request, then evaluate
pub fn authorize(args: &AuthorizeArgs) -> Result<TieredResponse> {
    let stores = args
        .stores
        .iter()
        .map(|path| load_store(path).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    let evaluator = TieredEvaluator::new(stores);
    if !evaluator.ready() {
        return Err(Error::command_failed("policy stores are not loaded"));
    }

    let request = RequestFile::from_json(&read_file(&args.request)?)?;
    let response = evaluator.evaluate(&request.to_entities()?, &request.to_request()?);
    info!(
        decision = %response.verdict(),
        tier = ?response.tier,
        "Evaluated request"
    );
    Ok(response)
}

/// Human-readable summary, one fact per line
pub fn render_text(response: &TieredResponse, stores: &[PathBuf]) -> String {
    let mut lines = vec![format!("decision: {}", response.verdict())];
    if let Some(tier) = response.tier {
        let store = stores
            .get(tier)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        lines.push(format!("tier: {tier} ({store})"));
    }
    for reason in &response.reasons {
        lines.push(format!("reason: {} ({})", reason.policy_id, reason.store));
    }
    for error in &response.errors {
        lines.push(format!("error: {error}"));
    }
    lines.join("\n")
}

pub fn render_json(response: &TieredResponse) -> serde_json::Value {
    json!({
        "decision": response.verdict().to_string(),
        "tier": response.tier,
        "reasons": response
            .reasons
            .iter()
            .map(|r| json!({ "policyId": r.policy_id, "store": r.store }))
            .collect::<Vec<_>>(),
        "errors": response.errors,
    })
}

/// Run the authorize command
pub fn run(args: AuthorizeArgs) -> Result<()> {
    let response = authorize(&args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&render_json(&response)).cmd_err()?);
    } else {
        println!("{}", render_text(&response, &args.stores));
    }
    Ok(())
}
