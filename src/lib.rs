//! k8s-cedar CLI library
//!
//! Exposes the command implementations so they can be driven from tests.

pub mod commands;
pub mod error;
pub mod manifest;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Kubernetes to Cedar policy converter
#[derive(Parser, Debug)]
#[command(name = "k8s-cedar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert Kubernetes manifests to Cedar policies
    Convert(commands::convert::ConvertArgs),
    /// Evaluate a request against tiered Cedar policy stores
    Authorize(commands::authorize::AuthorizeArgs),
}

impl Cli {
    /// Run the selected command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Convert(args) => commands::convert::run(args),
            Commands::Authorize(args) => commands::authorize::run(args),
        }
    }
}
