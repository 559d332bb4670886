//! CEL expressions
//!
//! [`parser`] turns CEL source into an [`ast::Expr`]; [`transpile`] turns
//! that into an equivalent Cedar [`Condition`](crate::condition::Condition)
//! or fails with the construct it could not express.

pub mod ast;
pub mod parser;
pub mod transpile;

use thiserror::Error;

pub use parser::{parse, ParseError};
pub use transpile::{transpile, TranspileError, Transpiled, Warning};

/// Failure to compile a CEL expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CelError {
    /// Source did not parse
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Parsed but has no Cedar equivalent
    #[error(transparent)]
    Transpile(#[from] TranspileError),
}

/// Parse and transpile a CEL expression
pub fn compile_expression(source: &str) -> Result<Transpiled, CelError> {
    let expr = parse(source)?;
    Ok(transpile(&expr)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_expression() {
        let out = compile_expression("object.spec.replicas <= params.max").unwrap();
        assert_eq!(
            out.condition.to_string(),
            "resource.spec.replicas <= context.params.max"
        );
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_errors_are_distinguished() {
        assert!(matches!(
            compile_expression("object.spec &&"),
            Err(CelError::Parse(_))
        ));
        assert_eq!(
            compile_expression("object.a / 2").unwrap_err(),
            CelError::Transpile(TranspileError::Division)
        );
    }
}
