//! CEL to Cedar condition transpiler
//!
//! The walk is fail-closed: any construct without an equivalent Cedar
//! expression aborts the whole expression with a [`TranspileError`]. Lossy
//! but accepted translations are reported as [`Warning`]s.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use super::ast::{Expr, Literal, MapEntry};
use crate::condition::{and, Condition, Pattern};

/// Expressions that cannot be translated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranspileError {
    /// `all`, `exists`, `exists_one`, `map`, `filter`
    #[error("cedar doesn't support comprehensions")]
    Comprehension,
    /// `Type{...}`
    #[error("cedar doesn't support struct construction ({0})")]
    Struct(String),
    /// `_/_`
    #[error("cedar doesn't support division")]
    Division,
    /// `_%_`
    #[error("cedar doesn't support modulo")]
    Modulo,
    /// `size()`
    #[error("cedar doesn't support a len/size function")]
    Size,
    /// `_[_]`
    #[error("cedar doesn't support array indexing")]
    Index,
    /// `matches()`
    #[error("cedar doesn't support RE2 matching")]
    Matches,
    /// `double()`
    #[error("double() conversion requires manual translation to decimal()")]
    DoubleConversion,
    /// Function with no mapping
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    /// Wrong number of arguments
    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        /// Function name
        function: String,
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },
    /// Method called without a receiver
    #[error("{0}() must be called as a method")]
    MissingReceiver(String),
    /// Pattern function with a non-literal argument
    #[error("can only translate {0}() using a string literal")]
    NonLiteralPattern(String),
    /// `null`
    #[error("null has no Cedar equivalent")]
    NullLiteral,
    /// Unsigned literal above the Cedar long range
    #[error("integer literal {0} exceeds the Cedar long range")]
    IntegerOverflow(u64),
    /// Double literal outside the Cedar decimal range
    #[error("double literal {0} cannot be represented as a Cedar decimal")]
    UnrepresentableDouble(String),
    /// Map literal with more than one entry
    #[error("map literals with more than one entry cannot be expressed")]
    MultiEntryMap,
}

/// Accepted translations that may not mean exactly the same thing
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// Ordering comparison whose operand types are unknown; decimals need
    /// the Cedar comparison methods instead
    AmbiguousNumericComparison {
        /// CEL operator
        operator: &'static str,
        /// Cedar method to use for decimals
        decimal_method: &'static str,
    },
    /// Double literal rendered as a decimal
    DecimalLiteral {
        /// Source value
        value: f64,
        /// Rendered decimal text
        decimal: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::AmbiguousNumericComparison {
                operator,
                decimal_method,
            } => write!(
                f,
                "validate use of {operator} operator, should use .{decimal_method}() for decimals"
            ),
            Warning::DecimalLiteral { value, decimal } => {
                write!(f, "possibly truncating double {value} to decimal {decimal}")
            }
        }
    }
}

/// A translated condition and the warnings produced along the way
#[derive(Debug, Clone, PartialEq)]
pub struct Transpiled {
    /// Equivalent Cedar condition
    pub condition: Condition,
    /// Lossy translations
    pub warnings: Vec<Warning>,
}

/// CEL functions and operators, by their AST function name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    In,
    Conditional,
    Index,
    StartsWith,
    EndsWith,
    Contains,
    Size,
    Matches,
    Double,
}

impl Operator {
    fn from_function_name(name: &str) -> Option<Self> {
        Some(match name {
            "_&&_" => Self::LogicalAnd,
            "_||_" => Self::LogicalOr,
            "!_" => Self::LogicalNot,
            "_==_" => Self::Equals,
            "_!=_" => Self::NotEquals,
            "_<_" => Self::Less,
            "_<=_" => Self::LessEquals,
            "_>_" => Self::Greater,
            "_>=_" => Self::GreaterEquals,
            "_+_" => Self::Add,
            "_-_" => Self::Subtract,
            "_*_" => Self::Multiply,
            "_/_" => Self::Divide,
            "_%_" => Self::Modulo,
            "-_" => Self::Negate,
            "@in" => Self::In,
            "_?_:_" => Self::Conditional,
            "_[_]" => Self::Index,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "contains" => Self::Contains,
            "size" => Self::Size,
            "matches" => Self::Matches,
            "double" => Self::Double,
            _ => return None,
        })
    }
}

/// Render a double as Cedar decimal text (at most four fraction digits)
fn decimal_text(value: f64) -> Result<String, TranspileError> {
    const DECIMAL_MAX: f64 = 922_337_203_685_477.0;
    if !value.is_finite() || value.abs() > DECIMAL_MAX {
        return Err(TranspileError::UnrepresentableDouble(value.to_string()));
    }
    let fixed = format!("{value:.4}");
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        return Ok(format!("{trimmed}0"));
    }
    Ok(trimmed.to_string())
}

#[derive(Default)]
struct Transpiler {
    warnings: Vec<Warning>,
}

impl Transpiler {
    fn expr(&mut self, expr: &Expr) -> Result<Condition, TranspileError> {
        match expr {
            Expr::Literal(lit) => self.literal(lit),
            Expr::Ident(name) => Ok(ident(name)),
            Expr::Select {
                operand,
                field,
                test_only: false,
            } => Ok(self.expr(operand)?.access(field)),
            Expr::Select {
                operand,
                field,
                test_only: true,
            } => {
                let guards = self.presence_guards(operand)?;
                Ok(and(guards, self.expr(operand)?.has(field)))
            }
            Expr::Call {
                function,
                target,
                args,
            } => self.call(function, target.as_deref(), args),
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Condition::set(items))
            }
            Expr::Map(entries) => self.map(entries),
            Expr::Struct { type_name, .. } => Err(TranspileError::Struct(type_name.clone())),
            Expr::Comprehension(_) => Err(TranspileError::Comprehension),
        }
    }

    fn literal(&mut self, lit: &Literal) -> Result<Condition, TranspileError> {
        match lit {
            Literal::Bool(b) => Ok(Condition::boolean(*b)),
            Literal::Int(n) => Ok(Condition::long(*n)),
            Literal::Uint(n) => i64::try_from(*n)
                .map(Condition::long)
                .map_err(|_| TranspileError::IntegerOverflow(*n)),
            Literal::Double(value) => {
                let decimal = decimal_text(*value)?;
                self.warnings.push(Warning::DecimalLiteral {
                    value: *value,
                    decimal: decimal.clone(),
                });
                Ok(Condition::decimal(decimal))
            }
            Literal::String(s) => Ok(Condition::string(s)),
            Literal::Bytes(bytes) => Ok(Condition::string(String::from_utf8_lossy(bytes))),
            Literal::Null => Err(TranspileError::NullLiteral),
        }
    }

    /// `has` checks for every selection leading up to `operand`
    fn presence_guards(&mut self, operand: &Expr) -> Result<Condition, TranspileError> {
        match operand {
            Expr::Ident(name) if name == "object" => Ok(Condition::Empty),
            Expr::Ident(name) => Ok(Condition::context().has(name)),
            Expr::Select {
                operand: inner,
                field,
                test_only: false,
            } => {
                let guards = self.presence_guards(inner)?;
                Ok(and(guards, self.expr(inner)?.has(field)))
            }
            _ => Ok(Condition::Empty),
        }
    }

    fn map(&mut self, entries: &[MapEntry]) -> Result<Condition, TranspileError> {
        match entries {
            [] => Ok(Condition::record([])),
            [entry] => Ok(Condition::record([
                ("key".to_string(), self.expr(&entry.key)?),
                ("value".to_string(), self.expr(&entry.value)?),
            ])),
            _ => Err(TranspileError::MultiEntryMap),
        }
    }

    fn args<const N: usize>(
        &mut self,
        function: &str,
        args: &[Expr],
    ) -> Result<[Condition; N], TranspileError> {
        if args.len() != N {
            return Err(TranspileError::Arity {
                function: function.to_string(),
                expected: N,
                actual: args.len(),
            });
        }
        let converted = args
            .iter()
            .map(|arg| self.expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        converted.try_into().map_err(|_| TranspileError::Arity {
            function: function.to_string(),
            expected: N,
            actual: args.len(),
        })
    }

    fn pattern_call(
        &mut self,
        function: &str,
        target: Option<&Expr>,
        args: &[Expr],
        pattern: fn(String) -> Pattern,
    ) -> Result<Condition, TranspileError> {
        let target = target.ok_or_else(|| TranspileError::MissingReceiver(function.to_string()))?;
        let [arg] = args else {
            return Err(TranspileError::Arity {
                function: function.to_string(),
                expected: 1,
                actual: args.len(),
            });
        };
        let Expr::Literal(Literal::String(text)) = arg else {
            return Err(TranspileError::NonLiteralPattern(function.to_string()));
        };
        Ok(self.expr(target)?.like(pattern(text.clone())))
    }

    fn comparison(
        &mut self,
        function: &str,
        args: &[Expr],
        operator: &'static str,
        decimal_method: &'static str,
    ) -> Result<[Condition; 2], TranspileError> {
        let operands = self.args::<2>(function, args)?;
        self.warnings.push(Warning::AmbiguousNumericComparison {
            operator,
            decimal_method,
        });
        Ok(operands)
    }

    fn call(
        &mut self,
        function: &str,
        target: Option<&Expr>,
        args: &[Expr],
    ) -> Result<Condition, TranspileError> {
        let Some(op) = Operator::from_function_name(function) else {
            return Err(TranspileError::UnknownFunction(function.to_string()));
        };
        match op {
            Operator::LogicalAnd => {
                let [a, b] = self.args(function, args)?;
                Ok(Condition::And(a.into(), b.into()))
            }
            Operator::LogicalOr => {
                let [a, b] = self.args(function, args)?;
                Ok(Condition::Or(a.into(), b.into()))
            }
            Operator::LogicalNot => {
                let [a] = self.args(function, args)?;
                Ok(!a)
            }
            Operator::Negate => {
                let [a] = self.args(function, args)?;
                Ok(-a)
            }
            Operator::Equals => {
                let [a, b] = self.args(function, args)?;
                Ok(a.equal(b))
            }
            Operator::NotEquals => {
                let [a, b] = self.args(function, args)?;
                Ok(a.not_equal(b))
            }
            Operator::Less => {
                let [a, b] = self.comparison(function, args, "<", "lessThan")?;
                Ok(a.less(b))
            }
            Operator::LessEquals => {
                let [a, b] = self.comparison(function, args, "<=", "lessThanOrEqual")?;
                Ok(a.less_or_equal(b))
            }
            Operator::Greater => {
                let [a, b] = self.comparison(function, args, ">", "greaterThan")?;
                Ok(a.greater(b))
            }
            Operator::GreaterEquals => {
                let [a, b] = self.comparison(function, args, ">=", "greaterThanOrEqual")?;
                Ok(a.greater_or_equal(b))
            }
            Operator::Add => {
                let [a, b] = self.args(function, args)?;
                Ok(a + b)
            }
            Operator::Subtract => {
                let [a, b] = self.args(function, args)?;
                Ok(a - b)
            }
            Operator::Multiply => {
                let [a, b] = self.args(function, args)?;
                Ok(a * b)
            }
            Operator::In => {
                let [element, collection] = self.args(function, args)?;
                Ok(collection.contains(element))
            }
            Operator::Conditional => {
                let [cond, then, otherwise] = self.args(function, args)?;
                Ok(Condition::if_then_else(cond, then, otherwise))
            }
            Operator::StartsWith => self.pattern_call(function, target, args, Pattern::prefix),
            Operator::EndsWith => self.pattern_call(function, target, args, Pattern::suffix),
            Operator::Contains => self.pattern_call(function, target, args, Pattern::infix),
            Operator::Divide => Err(TranspileError::Division),
            Operator::Modulo => Err(TranspileError::Modulo),
            Operator::Index => Err(TranspileError::Index),
            Operator::Size => Err(TranspileError::Size),
            Operator::Matches => Err(TranspileError::Matches),
            Operator::Double => Err(TranspileError::DoubleConversion),
        }
    }
}

fn ident(name: &str) -> Condition {
    match name {
        "object" => Condition::resource(),
        other => Condition::context().access(other),
    }
}

/// Translate a CEL expression into a Cedar condition
pub fn transpile(expr: &Expr) -> Result<Transpiled, TranspileError> {
    let mut transpiler = Transpiler::default();
    let condition = transpiler.expr(expr)?;
    for warning in &transpiler.warnings {
        warn!(warning = %warning, "Lossy CEL translation");
    }
    Ok(Transpiled {
        condition,
        warnings: transpiler.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::parser::parse;

    fn cedar(source: &str) -> String {
        transpile(&parse(source).unwrap()).unwrap().condition.to_string()
    }

    fn error(source: &str) -> TranspileError {
        transpile(&parse(source).unwrap()).unwrap_err()
    }

    #[test]
    fn test_object_maps_to_resource() {
        assert_eq!(
            cedar("object.spec.replicas == 3"),
            "resource.spec.replicas == 3"
        );
        assert_eq!(cedar("params.maxReplicas"), "context.params.maxReplicas");
    }

    #[test]
    fn test_has_guards_the_path() {
        assert_eq!(
            cedar("has(object.spec.replicas)"),
            "resource has spec && resource.spec has replicas"
        );
        assert_eq!(cedar("has(object.spec)"), "resource has spec");
    }

    #[test]
    fn test_logic_and_precedence() {
        assert_eq!(
            cedar("!(a || b) && c"),
            "!(context.a || context.b) && context.c"
        );
    }

    #[test]
    fn test_string_functions_become_like() {
        assert_eq!(
            cedar("object.metadata.name.startsWith('kube-')"),
            r#"resource.metadata.name like "kube-*""#
        );
        assert_eq!(
            cedar("object.metadata.name.endsWith('-system')"),
            r#"resource.metadata.name like "*-system""#
        );
        assert_eq!(
            cedar("object.metadata.name.contains('a*b')"),
            r#"resource.metadata.name like "*a\*b*""#
        );
        assert_eq!(
            error("object.metadata.name.startsWith(params.prefix)"),
            TranspileError::NonLiteralPattern("startsWith".to_string())
        );
    }

    #[test]
    fn test_membership_and_ternary() {
        assert_eq!(
            cedar("object.kind in ['Pod', 'Deployment']"),
            r#"["Pod", "Deployment"].contains(resource.kind)"#
        );
        assert_eq!(cedar("a ? 1 : 2"), "if context.a then 1 else 2");
    }

    #[test]
    fn test_arithmetic_keeps_operand_order() {
        assert_eq!(cedar("object.a - object.b > 0"), "resource.a - resource.b > 0");
        assert_eq!(cedar("10 - 3"), "10 - 3");
    }

    #[test]
    fn test_comparisons_warn() {
        let out = transpile(&parse("object.spec.replicas <= 5").unwrap()).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].to_string().contains("lessThanOrEqual"));
        let out = transpile(&parse("object.spec.replicas == 5").unwrap()).unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_guarded_replica_check() {
        let source = "has(object.spec.replicas) && object.spec.replicas > 5";
        let out = transpile(&parse(source).unwrap()).unwrap();
        assert_eq!(
            out.condition.to_string(),
            "resource has spec && resource.spec has replicas && resource.spec.replicas > 5"
        );
        assert_eq!(
            out.warnings,
            vec![Warning::AmbiguousNumericComparison {
                operator: ">",
                decimal_method: "greaterThan",
            }]
        );
    }

    #[test]
    fn test_double_becomes_decimal() {
        let out = transpile(&parse("object.ratio == 0.25").unwrap()).unwrap();
        assert_eq!(out.condition.to_string(), r#"resource.ratio == decimal("0.25")"#);
        assert!(matches!(out.warnings[0], Warning::DecimalLiteral { .. }));
        assert_eq!(decimal_text(2.0).unwrap(), "2.0");
        assert_eq!(decimal_text(1.123456).unwrap(), "1.1235");
        assert!(decimal_text(f64::NAN).is_err());
    }

    #[test]
    fn test_maps_and_lists() {
        assert_eq!(
            cedar("{'env': 'prod'}"),
            r#"{"key": "env", "value": "prod"}"#
        );
        assert_eq!(error("{'a': 1, 'b': 2}"), TranspileError::MultiEntryMap);
        assert_eq!(cedar("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_unsupported_constructs_fail_closed() {
        assert_eq!(
            error("object.spec.containers.all(c, c.image != '')"),
            TranspileError::Comprehension
        );
        assert_eq!(error("object.a / 2"), TranspileError::Division);
        assert_eq!(error("object.a % 2"), TranspileError::Modulo);
        assert_eq!(error("size(object.items) > 1"), TranspileError::Size);
        assert_eq!(error("object.items[0]"), TranspileError::Index);
        assert_eq!(error("object.name.matches('^a')"), TranspileError::Matches);
        assert_eq!(error("double(object.a)"), TranspileError::DoubleConversion);
        assert_eq!(error("object.a == null"), TranspileError::NullLiteral);
        assert_eq!(
            error("quantity(object.a)"),
            TranspileError::UnknownFunction("quantity".to_string())
        );
        assert!(matches!(error("Foo{a: 1}"), TranspileError::Struct(_)));
        assert_eq!(
            error("18446744073709551615u == 1"),
            TranspileError::IntegerOverflow(u64::MAX)
        );
    }

    #[test]
    fn test_operand_failure_propagates() {
        assert_eq!(
            error("object.a == 1 && object.b / 2 == 1"),
            TranspileError::Division
        );
    }
}
