//! Cedar condition trees
//!
//! A [`Condition`] is an immutable expression tree that renders to Cedar
//! source text. Children are held behind `Arc`, so cloning a condition (for
//! example when specializing a policy for impersonation) only bumps reference
//! counts.
//!
//! [`Condition::Empty`] is the identity element for [`and`] and [`or`]: the
//! combinators drop it instead of nesting it, so an empty tree never reaches a
//! rendered policy.

use std::fmt::{self, Write};
use std::sync::Arc;

use crate::schema::EntityType;

/// Cedar scope variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    /// `principal`
    Principal,
    /// `action`
    Action,
    /// `resource`
    Resource,
    /// `context`
    Context,
}

impl Var {
    fn as_str(self) -> &'static str {
        match self {
            Var::Principal => "principal",
            Var::Action => "action",
            Var::Resource => "resource",
            Var::Context => "context",
        }
    }
}

/// Cedar literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `true` / `false`
    Bool(bool),
    /// 64-bit signed integer
    Long(i64),
    /// String literal
    String(String),
    /// Decimal extension value, stored as its canonical text (`"1.5"`)
    Decimal(String),
}

/// Reference to a single entity, `Type::"id"`
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRef {
    /// Entity type
    pub entity_type: EntityType,
    /// Entity id
    pub id: String,
}

impl EntityRef {
    /// Create an entity reference
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::", self.entity_type)?;
        write_string(f, &self.id)
    }
}

/// One element of a `like` pattern
#[derive(Debug, Clone, PartialEq)]
pub enum PatternElem {
    /// Literal text, matched exactly (a `*` here is a literal star)
    Literal(String),
    /// `*`, matches any sequence of characters
    Wildcard,
}

/// A Cedar `like` pattern
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern(Vec<PatternElem>);

impl Pattern {
    /// Build a pattern from raw elements
    pub fn new(elems: impl IntoIterator<Item = PatternElem>) -> Self {
        Self(elems.into_iter().collect())
    }

    /// `"<prefix>*"`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self(vec![PatternElem::Literal(prefix.into()), PatternElem::Wildcard])
    }

    /// `"*<suffix>"`
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self(vec![PatternElem::Wildcard, PatternElem::Literal(suffix.into())])
    }

    /// `"*<infix>*"`
    pub fn infix(infix: impl Into<String>) -> Self {
        Self(vec![
            PatternElem::Wildcard,
            PatternElem::Literal(infix.into()),
            PatternElem::Wildcard,
        ])
    }

    /// Pattern elements in order
    pub fn elems(&self) -> &[PatternElem] {
        &self.0
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for elem in &self.0 {
            match elem {
                PatternElem::Wildcard => f.write_char('*')?,
                PatternElem::Literal(text) => {
                    for c in text.chars() {
                        if c == '*' {
                            f.write_str("\\*")?;
                        } else {
                            write_escaped_char(f, c)?;
                        }
                    }
                }
            }
        }
        f.write_char('"')
    }
}

/// A Cedar condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// No condition; the identity for [`and`] and [`or`]
    Empty,
    /// Scope variable
    Var(Var),
    /// Literal value
    Literal(Literal),
    /// Entity reference
    Entity(EntityRef),
    /// `a && b`
    And(Arc<Condition>, Arc<Condition>),
    /// `a || b`
    Or(Arc<Condition>, Arc<Condition>),
    /// `!a`
    Not(Arc<Condition>),
    /// `-a`
    Neg(Arc<Condition>),
    /// `a == b`
    Equal(Arc<Condition>, Arc<Condition>),
    /// `a != b`
    NotEqual(Arc<Condition>, Arc<Condition>),
    /// `a < b`
    Less(Arc<Condition>, Arc<Condition>),
    /// `a <= b`
    LessOrEqual(Arc<Condition>, Arc<Condition>),
    /// `a > b`
    Greater(Arc<Condition>, Arc<Condition>),
    /// `a >= b`
    GreaterOrEqual(Arc<Condition>, Arc<Condition>),
    /// `a + b`
    Add(Arc<Condition>, Arc<Condition>),
    /// `a - b`
    Subtract(Arc<Condition>, Arc<Condition>),
    /// `a * b`
    Multiply(Arc<Condition>, Arc<Condition>),
    /// `a in b` (entity hierarchy membership)
    In(Arc<Condition>, Arc<Condition>),
    /// `receiver.contains(element)`
    Contains(Arc<Condition>, Arc<Condition>),
    /// `a like "pattern"`
    Like(Arc<Condition>, Pattern),
    /// `a has attr`
    Has(Arc<Condition>, String),
    /// `a.attr`
    Access(Arc<Condition>, String),
    /// `a is Type`
    Is(Arc<Condition>, EntityType),
    /// `if a then b else c`
    IfThenElse(Arc<Condition>, Arc<Condition>, Arc<Condition>),
    /// `[a, b, ...]`
    Set(Arc<[Condition]>),
    /// `{"k": v, ...}`
    Record(Arc<[(String, Condition)]>),
}

/// Conjunction that treats [`Condition::Empty`] as the identity
///
/// A conjunction on the right is re-associated to the left so chains render
/// without parentheses.
pub fn and(lhs: Condition, rhs: Condition) -> Condition {
    match (lhs, rhs) {
        (Condition::Empty, rhs) => rhs,
        (lhs, Condition::Empty) => lhs,
        (lhs, Condition::And(b, c)) => and(
            and(lhs, Arc::unwrap_or_clone(b)),
            Arc::unwrap_or_clone(c),
        ),
        (lhs, rhs) => Condition::And(Arc::new(lhs), Arc::new(rhs)),
    }
}

/// Disjunction that treats [`Condition::Empty`] as the identity
///
/// Re-associates to the left like [`and`].
pub fn or(lhs: Condition, rhs: Condition) -> Condition {
    match (lhs, rhs) {
        (Condition::Empty, rhs) => rhs,
        (lhs, Condition::Empty) => lhs,
        (lhs, Condition::Or(b, c)) => or(or(lhs, Arc::unwrap_or_clone(b)), Arc::unwrap_or_clone(c)),
        (lhs, rhs) => Condition::Or(Arc::new(lhs), Arc::new(rhs)),
    }
}

/// Left-fold a sequence with [`and`]; an empty sequence yields `Empty`
pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    conditions.into_iter().fold(Condition::Empty, and)
}

/// Left-fold a sequence with [`or`]; an empty sequence yields `Empty`
pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Condition {
    conditions.into_iter().fold(Condition::Empty, or)
}

impl Condition {
    // =========================================================================
    // Leaves
    // =========================================================================

    /// `principal`
    pub fn principal() -> Self {
        Self::Var(Var::Principal)
    }

    /// `action`
    pub fn action() -> Self {
        Self::Var(Var::Action)
    }

    /// `resource`
    pub fn resource() -> Self {
        Self::Var(Var::Resource)
    }

    /// `context`
    pub fn context() -> Self {
        Self::Var(Var::Context)
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Literal::String(value.into()))
    }

    /// Long literal
    pub fn long(value: i64) -> Self {
        Self::Literal(Literal::Long(value))
    }

    /// Boolean literal
    pub fn boolean(value: bool) -> Self {
        Self::Literal(Literal::Bool(value))
    }

    /// Decimal literal from canonical decimal text
    pub fn decimal(value: impl Into<String>) -> Self {
        Self::Literal(Literal::Decimal(value.into()))
    }

    /// Entity reference
    pub fn entity(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::Entity(EntityRef::new(entity_type, id))
    }

    /// Set literal
    pub fn set(items: impl IntoIterator<Item = Condition>) -> Self {
        Self::Set(items.into_iter().collect())
    }

    /// Set of string literals
    pub fn string_set<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Self::set(items.into_iter().map(Self::string))
    }

    /// Record literal
    pub fn record(fields: impl IntoIterator<Item = (String, Condition)>) -> Self {
        Self::Record(fields.into_iter().collect())
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// `self.attr`
    pub fn access(self, attr: impl Into<String>) -> Self {
        Self::Access(Arc::new(self), attr.into())
    }

    /// `self has attr`
    pub fn has(self, attr: impl Into<String>) -> Self {
        Self::Has(Arc::new(self), attr.into())
    }

    /// `self == other`
    pub fn equal(self, other: Condition) -> Self {
        Self::Equal(Arc::new(self), Arc::new(other))
    }

    /// `self != other`
    pub fn not_equal(self, other: Condition) -> Self {
        Self::NotEqual(Arc::new(self), Arc::new(other))
    }

    /// `self < other`
    pub fn less(self, other: Condition) -> Self {
        Self::Less(Arc::new(self), Arc::new(other))
    }

    /// `self <= other`
    pub fn less_or_equal(self, other: Condition) -> Self {
        Self::LessOrEqual(Arc::new(self), Arc::new(other))
    }

    /// `self > other`
    pub fn greater(self, other: Condition) -> Self {
        Self::Greater(Arc::new(self), Arc::new(other))
    }

    /// `self >= other`
    pub fn greater_or_equal(self, other: Condition) -> Self {
        Self::GreaterOrEqual(Arc::new(self), Arc::new(other))
    }

    /// `self in other`
    pub fn is_in(self, other: Condition) -> Self {
        Self::In(Arc::new(self), Arc::new(other))
    }

    /// `self.contains(element)`
    pub fn contains(self, element: Condition) -> Self {
        Self::Contains(Arc::new(self), Arc::new(element))
    }

    /// `self like pattern`
    pub fn like(self, pattern: Pattern) -> Self {
        Self::Like(Arc::new(self), pattern)
    }

    /// `self is entity_type`
    pub fn is_type(self, entity_type: EntityType) -> Self {
        Self::Is(Arc::new(self), entity_type)
    }

    /// `if cond then then_branch else else_branch`
    pub fn if_then_else(cond: Condition, then_branch: Condition, else_branch: Condition) -> Self {
        Self::IfThenElse(Arc::new(cond), Arc::new(then_branch), Arc::new(else_branch))
    }

    /// [`and`] as a method
    pub fn and(self, other: Condition) -> Self {
        and(self, other)
    }

    /// [`or`] as a method
    pub fn or(self, other: Condition) -> Self {
        or(self, other)
    }

    /// True for [`Condition::Empty`]
    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::Empty)
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Binding strength in the Cedar grammar; higher binds tighter
    fn precedence(&self) -> u8 {
        match self {
            Condition::IfThenElse(..) => 0,
            Condition::Or(..) => 1,
            Condition::And(..) => 2,
            Condition::Equal(..)
            | Condition::NotEqual(..)
            | Condition::Less(..)
            | Condition::LessOrEqual(..)
            | Condition::Greater(..)
            | Condition::GreaterOrEqual(..)
            | Condition::In(..)
            | Condition::Like(..)
            | Condition::Has(..)
            | Condition::Is(..) => 3,
            Condition::Add(..) | Condition::Subtract(..) => 4,
            Condition::Multiply(..) => 5,
            Condition::Not(..) | Condition::Neg(..) => 6,
            Condition::Literal(Literal::Long(n)) if *n < 0 => 6,
            Condition::Empty
            | Condition::Var(_)
            | Condition::Literal(_)
            | Condition::Entity(_)
            | Condition::Contains(..)
            | Condition::Access(..)
            | Condition::Set(_)
            | Condition::Record(_) => 7,
        }
    }

    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            f.write_char('(')?;
            self.fmt_inner(f)?;
            return f.write_char(')');
        }
        self.fmt_inner(f)
    }

    fn fmt_binary(
        f: &mut fmt::Formatter<'_>,
        lhs: &Condition,
        op: &str,
        rhs: &Condition,
        lhs_min: u8,
        rhs_min: u8,
    ) -> fmt::Result {
        lhs.fmt_at(f, lhs_min)?;
        write!(f, " {op} ")?;
        rhs.fmt_at(f, rhs_min)
    }

    fn fmt_inner(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Empty => f.write_str("true"),
            Condition::Var(v) => f.write_str(v.as_str()),
            Condition::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Condition::Literal(Literal::Long(n)) => write!(f, "{n}"),
            Condition::Literal(Literal::String(s)) => write_string(f, s),
            Condition::Literal(Literal::Decimal(d)) => {
                f.write_str("decimal(")?;
                write_string(f, d)?;
                f.write_char(')')
            }
            Condition::Entity(e) => write!(f, "{e}"),
            Condition::IfThenElse(c, t, e) => {
                f.write_str("if ")?;
                c.fmt_at(f, 0)?;
                f.write_str(" then ")?;
                t.fmt_at(f, 0)?;
                f.write_str(" else ")?;
                e.fmt_at(f, 0)
            }
            Condition::Or(a, b) => Self::fmt_binary(f, a, "||", b, 1, 2),
            Condition::And(a, b) => Self::fmt_binary(f, a, "&&", b, 2, 3),
            Condition::Equal(a, b) => Self::fmt_binary(f, a, "==", b, 4, 4),
            Condition::NotEqual(a, b) => Self::fmt_binary(f, a, "!=", b, 4, 4),
            Condition::Less(a, b) => Self::fmt_binary(f, a, "<", b, 4, 4),
            Condition::LessOrEqual(a, b) => Self::fmt_binary(f, a, "<=", b, 4, 4),
            Condition::Greater(a, b) => Self::fmt_binary(f, a, ">", b, 4, 4),
            Condition::GreaterOrEqual(a, b) => Self::fmt_binary(f, a, ">=", b, 4, 4),
            Condition::In(a, b) => Self::fmt_binary(f, a, "in", b, 4, 4),
            Condition::Add(a, b) => Self::fmt_binary(f, a, "+", b, 4, 5),
            Condition::Subtract(a, b) => Self::fmt_binary(f, a, "-", b, 4, 5),
            Condition::Multiply(a, b) => Self::fmt_binary(f, a, "*", b, 5, 6),
            Condition::Like(a, pattern) => {
                a.fmt_at(f, 4)?;
                write!(f, " like {pattern}")
            }
            Condition::Has(a, attr) => {
                a.fmt_at(f, 4)?;
                f.write_str(" has ")?;
                if is_identifier(attr) {
                    f.write_str(attr)
                } else {
                    write_string(f, attr)
                }
            }
            Condition::Is(a, ty) => {
                a.fmt_at(f, 4)?;
                write!(f, " is {ty}")
            }
            Condition::Not(a) => {
                f.write_char('!')?;
                a.fmt_at(f, 7)
            }
            Condition::Neg(a) => {
                f.write_char('-')?;
                a.fmt_at(f, 7)
            }
            Condition::Access(a, attr) => {
                a.fmt_at(f, 7)?;
                if is_identifier(attr) {
                    write!(f, ".{attr}")
                } else {
                    f.write_char('[')?;
                    write_string(f, attr)?;
                    f.write_char(']')
                }
            }
            Condition::Contains(receiver, element) => {
                receiver.fmt_at(f, 7)?;
                f.write_str(".contains(")?;
                element.fmt_at(f, 0)?;
                f.write_char(')')
            }
            Condition::Set(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_at(f, 0)?;
                }
                f.write_char(']')
            }
            Condition::Record(fields) => {
                f.write_char('{')?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_string(f, key)?;
                    f.write_str(": ")?;
                    value.fmt_at(f, 0)?;
                }
                f.write_char('}')
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at(f, 0)
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        Condition::Not(Arc::new(self))
    }
}

impl std::ops::Neg for Condition {
    type Output = Condition;

    fn neg(self) -> Self::Output {
        Condition::Neg(Arc::new(self))
    }
}

impl std::ops::Add for Condition {
    type Output = Condition;

    fn add(self, rhs: Condition) -> Self::Output {
        Condition::Add(Arc::new(self), Arc::new(rhs))
    }
}

impl std::ops::Sub for Condition {
    type Output = Condition;

    fn sub(self, rhs: Condition) -> Self::Output {
        Condition::Subtract(Arc::new(self), Arc::new(rhs))
    }
}

impl std::ops::Mul for Condition {
    type Output = Condition;

    fn mul(self, rhs: Condition) -> Self::Output {
        Condition::Multiply(Arc::new(self), Arc::new(rhs))
    }
}

// Variables such as `resource` are valid attribute names
const RESERVED: &[&str] = &[
    "true", "false", "if", "then", "else", "in", "is", "like", "has",
];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !RESERVED.contains(&s)
        && !s.starts_with("__cedar")
}

fn write_escaped_char(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    match c {
        '\\' => f.write_str("\\\\"),
        '"' => f.write_str("\\\""),
        '\n' => f.write_str("\\n"),
        '\r' => f.write_str("\\r"),
        '\t' => f.write_str("\\t"),
        '\0' => f.write_str("\\0"),
        c if c.is_control() => write!(f, "\\u{{{:x}}}", c as u32),
        c => f.write_char(c),
    }
}

pub(crate) fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        write_escaped_char(f, c)?;
    }
    f.write_char('"')
}
