//! CLI commands

use std::fmt::Display;
use std::fs;
use std::path::Path;

use k8s_cedar_policy::CompilerConfig;
use tracing::debug;

use crate::{Error, Result};

pub mod authorize;
pub mod convert;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Read a file, naming it in the error
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::read_file(path, e))
}

/// Load the compiler configuration, falling back to defaults
pub fn load_config(path: Option<&Path>) -> Result<CompilerConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading compiler config");
            Ok(CompilerConfig::from_yaml(&read_file(path)?)?)
        }
        None => Ok(CompilerConfig::default()),
    }
}
