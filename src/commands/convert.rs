//! Convert command - compile Kubernetes manifests to Cedar policies

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use k8s_cedar_policy::{AdmissionCompiler, PolicyCollection, RuleCompiler};
use tracing::info;

use super::load_config;
use crate::manifest::Manifests;
use crate::{Error, Result};

/// Convert arguments
#[derive(Args, Debug)]
pub struct ConvertArgs {
    #[command(subcommand)]
    pub target: ConvertTarget,
}

/// What to convert
#[derive(Subcommand, Debug)]
pub enum ConvertTarget {
    /// Convert ClusterRoles, Roles and their bindings
    Rbac(ConvertOptions),
    /// Convert ValidatingAdmissionPolicies
    Admission(ConvertOptions),
}

/// Options shared by both conversions
#[derive(Args, Debug, Clone)]
pub struct ConvertOptions {
    /// Manifest files (multi-document YAML)
    #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "cedar")]
    pub output: OutputFormat,

    /// Compiler configuration file
    #[arg(long, env = "K8S_CEDAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of the compiled policy collection
    #[arg(long)]
    pub name: Option<String>,

    /// Fail if any rule or validation had to be skipped
    #[arg(long, default_value = "false")]
    pub strict: bool,
}

/// Rendering of the compiled collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Cedar policy text
    #[default]
    Cedar,
    /// Cedar JSON policy set
    Json,
}

/// Compile RBAC manifests and render the policies
pub fn convert_rbac(options: &ConvertOptions) -> Result<String> {
    let compiler = RuleCompiler::new(load_config(options.config.as_deref())?);
    let manifests = Manifests::load(&options.files)?;
    let name = options.name.as_deref().unwrap_or("rbac");

    let out = compiler.compile_all(name, &manifests.bindings, &manifests.roles);
    info!(
        roles = manifests.roles.len(),
        bindings = manifests.bindings.len(),
        policies = out.collection.len(),
        skipped = out.diagnostics.len(),
        "Converted RBAC"
    );

    let skipped: Vec<String> = out.diagnostics.iter().map(ToString::to_string).collect();
    check_strict(options, "rules", &skipped)?;
    render(&out.collection, options.output)
}

/// Compile ValidatingAdmissionPolicies and render the policies
pub fn convert_admission(options: &ConvertOptions) -> Result<String> {
    let compiler = AdmissionCompiler::new(load_config(options.config.as_deref())?);
    let manifests = Manifests::load(&options.files)?;
    let mut collection = PolicyCollection::new(options.name.as_deref().unwrap_or("admission"));

    let mut skipped = Vec::new();
    for policy in &manifests.admission_policies {
        let out = compiler.compile(policy);
        skipped.extend(out.errors.iter().map(ToString::to_string));
        collection.merge(out.collection)?;
    }
    info!(
        admission_policies = manifests.admission_policies.len(),
        policies = collection.len(),
        skipped = skipped.len(),
        "Converted admission policies"
    );

    check_strict(options, "validations", &skipped)?;
    render(&collection, options.output)
}

fn check_strict(options: &ConvertOptions, what: &str, skipped: &[String]) -> Result<()> {
    if options.strict && !skipped.is_empty() {
        return Err(Error::validation(format!(
            "{} {what} skipped: {}",
            skipped.len(),
            skipped.join("; ")
        )));
    }
    Ok(())
}

fn render(collection: &PolicyCollection, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Cedar => Ok(collection.to_cedar()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&collection.to_json()?)?),
    }
}

/// Run the convert command
pub fn run(args: ConvertArgs) -> Result<()> {
    let output = match &args.target {
        ConvertTarget::Rbac(options) => convert_rbac(options)?,
        ConvertTarget::Admission(options) => convert_admission(options)?,
    };
    println!("{output}");
    Ok(())
}
