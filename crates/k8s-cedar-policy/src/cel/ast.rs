//! CEL expression AST
//!
//! Operators are calls to their CEL function names (`_&&_`, `_==_`, `!_`,
//! `_[_]`, `@in`, `_?_:_`), matching the shape of the CEL checked AST so the
//! transpiler dispatches on a single name.

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `true` / `false`
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// Unsigned integer, `1u`
    Uint(u64),
    /// Floating point
    Double(f64),
    /// String
    String(String),
    /// Bytes, `b"..."`
    Bytes(Vec<u8>),
    /// `null`
    Null,
}

/// Comprehension macros
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    /// `range.all(x, p)`
    All,
    /// `range.exists(x, p)`
    Exists,
    /// `range.exists_one(x, p)`
    ExistsOne,
    /// `range.map(x, f)` or `range.map(x, p, f)`
    Map,
    /// `range.filter(x, p)`
    Filter,
}

impl MacroKind {
    /// Macro for a method name, if it is one
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(Self::All),
            "exists" => Some(Self::Exists),
            "exists_one" => Some(Self::ExistsOne),
            "map" => Some(Self::Map),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }
}

/// A comprehension produced by macro expansion
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// Which macro produced it
    pub kind: MacroKind,
    /// Loop variable
    pub iter_var: String,
    /// Collection iterated over
    pub iter_range: Expr,
    /// Predicate and/or transform, in source order
    pub body: Vec<Expr>,
}

/// `key: value` in a map literal
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    /// Key expression
    pub key: Expr,
    /// Value expression
    pub value: Expr,
}

/// `name: value` in a struct literal
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    /// Field name
    pub name: String,
    /// Field value
    pub value: Expr,
}

/// A CEL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal
    Literal(Literal),
    /// Identifier
    Ident(String),
    /// `operand.field`, or `has(operand.field)` when `test_only`
    Select {
        /// Selected-from expression
        operand: Box<Expr>,
        /// Field name
        field: String,
        /// Presence test
        test_only: bool,
    },
    /// Function, method or operator call
    Call {
        /// Function name
        function: String,
        /// Receiver for method calls
        target: Option<Box<Expr>>,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `[a, b]`
    List(Vec<Expr>),
    /// `{k: v}`
    Map(Vec<MapEntry>),
    /// `Type{field: v}`
    Struct {
        /// Message type name
        type_name: String,
        /// Field initializers
        fields: Vec<StructField>,
    },
    /// Expanded macro
    Comprehension(Box<Comprehension>),
}

impl Expr {
    /// Identifier expression
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    /// Global function or operator call
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.into(),
            target: None,
            args,
        }
    }

    /// Method call on `target`
    pub fn method(target: Expr, function: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.into(),
            target: Some(Box::new(target)),
            args,
        }
    }

    /// Field selection
    pub fn select(operand: Expr, field: impl Into<String>) -> Self {
        Expr::Select {
            operand: Box::new(operand),
            field: field.into(),
            test_only: false,
        }
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    /// Int literal
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }
}
