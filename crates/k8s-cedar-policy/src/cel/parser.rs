//! CEL expression parser
//!
//! Precedence, lowest first:
//!
//! ```text
//! expr      = or ["?" or ":" expr]
//! or        = and {"||" and}
//! and       = relation {"&&" relation}
//! relation  = addition {("<=" | "<" | ">=" | ">" | "==" | "!=" | "in") addition}
//! addition  = product {("+" | "-") product}
//! product   = unary {("*" | "/" | "%") unary}
//! unary     = "!"+ member | "-"+ member | member
//! member    = primary {"." IDENT ["(" args ")"] | "[" expr "]" | "{" fields "}"}
//! primary   = "(" expr ")" | "[" list "]" | "{" map "}" | literal | IDENT ["(" args ")"]
//! ```
//!
//! `has(a.b)` becomes a test-only select and the `all`, `exists`,
//! `exists_one`, `map` and `filter` methods become comprehensions.
//! Nesting deeper than [`MAX_DEPTH`] is a parse error.

use std::cell::Cell;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while_m_n},
    character::complete::{char, digit1, hex_digit1, multispace1, one_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{VerboseError, VerboseErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use thiserror::Error;

use super::ast::{Comprehension, Expr, Literal, MacroKind, MapEntry, StructField};

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Syntax error in a CEL expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    /// Byte offset into the source
    pub offset: usize,
    /// What went wrong
    pub message: String,
}

impl ParseError {
    fn from_verbose(source: &str, error: &VerboseError<&str>) -> Self {
        let offset = error
            .errors
            .first()
            .map(|(rest, _)| source.len() - rest.len())
            .unwrap_or(0);
        let message = error
            .errors
            .iter()
            .find_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(ctx) => Some(ctx.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unexpected input".to_string());
        Self { offset, message }
    }
}

/// Parse a complete CEL expression
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    match all_consuming(terminated(expression, ws))(source) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(ParseError::from_verbose(source, &e))
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            offset: source.len(),
            message: "incomplete expression".to_string(),
        }),
    }
}

/// Deepest nesting of sub-expressions accepted by [`parse`]
pub const MAX_DEPTH: usize = 64;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of expression nesting, released on drop
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Option<Self> {
        DEPTH.with(|depth| {
            if depth.get() >= MAX_DEPTH {
                return None;
            }
            depth.set(depth.get() + 1);
            Some(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "else", "false", "for", "function", "if", "import", "in",
    "let", "loop", "package", "namespace", "null", "return", "true", "var", "void", "while",
];

fn fail<'a, T>(input: &'a str, message: &'static str) -> Res<'a, T> {
    Err(nom::Err::Failure(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context(message))],
    }))
}

// ============================================================================
// Lexical
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn ws(input: &str) -> Res<'_, ()> {
    value(
        (),
        many0(alt((
            multispace1,
            preceded(tag("//"), take_while(|c: char| c != '\n')),
        ))),
    )(input)
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(ws, tag(s))
}

fn word<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(ws, word(kw))
}

fn raw_ident(input: &str) -> Res<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c == '_' || c.is_ascii_alphabetic()),
        take_while(is_ident_char),
    ))(input)
}

fn ident(input: &str) -> Res<'_, String> {
    map(
        preceded(ws, verify(raw_ident, |s: &str| !RESERVED.contains(&s))),
        String::from,
    )(input)
}

// ============================================================================
// Literals
// ============================================================================

fn integer(digits: &str, radix: u32, unsigned: bool) -> Option<Literal> {
    if unsigned {
        u64::from_str_radix(digits, radix).ok().map(Literal::Uint)
    } else {
        i64::from_str_radix(digits, radix).ok().map(Literal::Int)
    }
}

fn number(input: &str) -> Res<'_, Literal> {
    let hex = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X"));
    if let Some(hex) = hex {
        let (rest, digits) = cut(hex_digit1)(hex)?;
        let (rest, unsigned) = opt(one_of("uU"))(rest)?;
        return match integer(digits, 16, unsigned.is_some()) {
            Some(lit) => Ok((rest, lit)),
            None => fail(input, "integer literal out of range"),
        };
    }

    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        return match text.parse::<f64>() {
            Ok(d) => Ok((rest, Literal::Double(d))),
            Err(_) => fail(input, "invalid double literal"),
        };
    }

    let (rest, unsigned) = opt(one_of("uU"))(rest)?;
    match integer(text, 10, unsigned.is_some()) {
        Some(lit) => Ok((rest, lit)),
        None => fail(input, "integer literal out of range"),
    }
}

fn take_chars(chars: &mut std::str::CharIndices<'_>, n: usize) -> String {
    (0..n).filter_map(|_| chars.next().map(|(_, c)| c)).collect()
}

fn hex_value(chars: &mut std::str::CharIndices<'_>, n: usize) -> Option<u32> {
    let digits = take_chars(chars, n);
    if digits.len() != n {
        return None;
    }
    u32::from_str_radix(&digits, 16).ok()
}

fn push_char(buf: &mut Vec<u8>, c: char) {
    let mut utf8 = [0u8; 4];
    buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
}

fn string_literal(input: &str) -> Res<'_, Literal> {
    let (rest, prefix) = take_while_m_n(0, 2, |c: char| matches!(c, 'r' | 'R' | 'b' | 'B'))(input)?;
    let raw = prefix.chars().any(|c| c == 'r' || c == 'R');
    let bytes = prefix.chars().any(|c| c == 'b' || c == 'B');

    let quote = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|q| rest.starts_with(q));
    let Some(quote) = quote else {
        return Err(nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("string literal"))],
        }));
    };

    let body = &rest[quote.len()..];
    let mut buf: Vec<u8> = Vec::new();
    let mut chars = body.char_indices();
    loop {
        let Some((i, c)) = chars.next() else {
            return fail(input, "unterminated string literal");
        };
        if body[i..].starts_with(quote) {
            let rest = &body[i + quote.len()..];
            if bytes {
                return Ok((rest, Literal::Bytes(buf)));
            }
            return match String::from_utf8(buf) {
                Ok(s) => Ok((rest, Literal::String(s))),
                Err(_) => fail(input, "invalid UTF-8 in string literal"),
            };
        }
        if quote.len() == 1 && (c == '\n' || c == '\r') {
            return fail(input, "newline in string literal");
        }
        if c != '\\' || raw {
            push_char(&mut buf, c);
            continue;
        }

        let Some((_, escape)) = chars.next() else {
            return fail(input, "unterminated string literal");
        };
        match escape {
            '\\' | '"' | '\'' | '`' | '?' => push_char(&mut buf, escape),
            'a' => buf.push(0x07),
            'b' => buf.push(0x08),
            'f' => buf.push(0x0c),
            'n' => buf.push(b'\n'),
            'r' => buf.push(b'\r'),
            't' => buf.push(b'\t'),
            'v' => buf.push(0x0b),
            'x' | 'X' => match hex_value(&mut chars, 2) {
                Some(v) if bytes => buf.push(v as u8),
                Some(v) => match char::from_u32(v) {
                    Some(c) => push_char(&mut buf, c),
                    None => return fail(input, "invalid escape sequence"),
                },
                None => return fail(input, "invalid escape sequence"),
            },
            'u' | 'U' if !bytes => {
                let width = if escape == 'u' { 4 } else { 8 };
                match hex_value(&mut chars, width).and_then(char::from_u32) {
                    Some(c) => push_char(&mut buf, c),
                    None => return fail(input, "invalid unicode escape"),
                }
            }
            '0'..='3' => {
                let digits = format!("{escape}{}", take_chars(&mut chars, 2));
                match u32::from_str_radix(&digits, 8) {
                    Ok(v) if digits.len() == 3 && bytes => buf.push(v as u8),
                    Ok(v) if digits.len() == 3 => match char::from_u32(v) {
                        Some(c) => push_char(&mut buf, c),
                        None => return fail(input, "invalid escape sequence"),
                    },
                    _ => return fail(input, "invalid escape sequence"),
                }
            }
            _ => return fail(input, "invalid escape sequence"),
        }
    }
}

/// Integer literal under an odd number of minus signs
///
/// The magnitude is read unsigned so `-9223372036854775808` is in range.
/// Doubles, unsigned literals and out of range values are left to [`number`].
fn negated_integer(input: &str) -> Res<'_, Literal> {
    let (rest, (radix, digits)) = preceded(
        ws,
        alt((
            map(preceded(alt((tag("0x"), tag("0X"))), hex_digit1), |d| (16, d)),
            map(digit1, |d| (10, d)),
        )),
    )(input)?;
    let not_integer = rest.starts_with(|c: char| matches!(c, '.' | 'e' | 'E' | 'u' | 'U'));
    let value = u64::from_str_radix(digits, radix)
        .ok()
        .and_then(|magnitude| i64::try_from(-i128::from(magnitude)).ok());
    match value {
        Some(n) if !not_integer => Ok((rest, Literal::Int(n))),
        _ => Err(nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("integer literal"))],
        })),
    }
}

fn literal(input: &str) -> Res<'_, Literal> {
    alt((
        value(Literal::Bool(true), word("true")),
        value(Literal::Bool(false), word("false")),
        value(Literal::Null, word("null")),
        number,
        string_literal,
    ))(input)
}

// ============================================================================
// Expressions
// ============================================================================

fn expression(input: &str) -> Res<'_, Expr> {
    let Some(_depth) = DepthGuard::enter() else {
        return fail(input, "expression nested too deeply");
    };
    let (input, condition) = or_expr(input)?;
    let (input, branches) = opt(preceded(
        sym("?"),
        cut(pair(or_expr, preceded(sym(":"), expression))),
    ))(input)?;
    let expr = match branches {
        Some((then, otherwise)) => Expr::call("_?_:_", vec![condition, then, otherwise]),
        None => condition,
    };
    Ok((input, expr))
}

/// Left-associative chain of `operand (operator operand)*`
fn binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> Res<'a, Expr>,
    mut operator: impl FnMut(&'a str) -> Res<'a, &'static str>,
) -> Res<'a, Expr> {
    let (mut input, mut lhs) = operand(input)?;
    loop {
        match operator(input) {
            Ok((rest, function)) => {
                let (rest, rhs) = cut(operand)(rest)?;
                lhs = Expr::call(function, vec![lhs, rhs]);
                input = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((input, lhs)),
            Err(e) => return Err(e),
        }
    }
}

fn or_expr(input: &str) -> Res<'_, Expr> {
    binary(input, and_expr, value("_||_", sym("||")))
}

fn and_expr(input: &str) -> Res<'_, Expr> {
    binary(input, relation, value("_&&_", sym("&&")))
}

fn relation(input: &str) -> Res<'_, Expr> {
    binary(
        input,
        addition,
        alt((
            value("_<=_", sym("<=")),
            value("_<_", sym("<")),
            value("_>=_", sym(">=")),
            value("_>_", sym(">")),
            value("_==_", sym("==")),
            value("_!=_", sym("!=")),
            value("@in", keyword("in")),
        )),
    )
}

fn addition(input: &str) -> Res<'_, Expr> {
    binary(
        input,
        product,
        alt((value("_+_", sym("+")), value("_-_", sym("-")))),
    )
}

fn product(input: &str) -> Res<'_, Expr> {
    binary(
        input,
        unary,
        alt((
            value("_*_", sym("*")),
            value("_/_", sym("/")),
            value("_%_", sym("%")),
        )),
    )
}

fn unary(input: &str) -> Res<'_, Expr> {
    let (input, nots) = many0(sym("!"))(input)?;
    if !nots.is_empty() {
        let (input, operand) = cut(member)(input)?;
        let expr = if nots.len() % 2 == 1 {
            Expr::call("!_", vec![operand])
        } else {
            operand
        };
        return Ok((input, expr));
    }

    let (input, negs) = many0(sym("-"))(input)?;
    if negs.is_empty() {
        return member(input);
    }
    if negs.len() % 2 == 1 {
        if let Ok((rest, lit)) = negated_integer(input) {
            return Ok((rest, Expr::Literal(lit)));
        }
    }
    let (input, operand) = cut(member)(input)?;
    if negs.len() % 2 == 0 {
        return Ok((input, operand));
    }
    let expr = match operand {
        Expr::Literal(Literal::Int(n)) => Expr::Literal(Literal::Int(-n)),
        Expr::Literal(Literal::Double(d)) => Expr::Literal(Literal::Double(-d)),
        other => Expr::call("-_", vec![other]),
    };
    Ok((input, expr))
}

/// Dotted name if `expr` can name a message type
fn type_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::Select {
            operand,
            field,
            test_only: false,
        } => type_path(operand).map(|prefix| format!("{prefix}.{field}")),
        _ => None,
    }
}

fn method_call(target: Expr, function: String, args: Vec<Expr>) -> Expr {
    if let Some(kind) = MacroKind::from_name(&function) {
        let arity = match kind {
            MacroKind::Map => matches!(args.len(), 2 | 3),
            _ => args.len() == 2,
        };
        let iter_var = match args.first() {
            Some(Expr::Ident(var)) if arity => Some(var.clone()),
            _ => None,
        };
        if let Some(iter_var) = iter_var {
            return Expr::Comprehension(Box::new(Comprehension {
                kind,
                iter_var,
                iter_range: target,
                body: args.into_iter().skip(1).collect(),
            }));
        }
    }
    Expr::method(target, function, args)
}

fn call_args(input: &str) -> Res<'_, Vec<Expr>> {
    delimited(
        sym("("),
        separated_list0(sym(","), expression),
        cut(sym(")")),
    )(input)
}

fn struct_fields(input: &str) -> Res<'_, Vec<StructField>> {
    let field = map(
        separated_pair(ident, cut(sym(":")), cut(expression)),
        |(name, value)| StructField { name, value },
    );
    delimited(
        sym("{"),
        separated_list0(sym(","), field),
        preceded(opt(sym(",")), cut(sym("}"))),
    )(input)
}

fn member(input: &str) -> Res<'_, Expr> {
    let (mut input, mut expr) = primary(input)?;
    loop {
        let (rest, dot) = opt(sym("."))(input)?;
        if dot.is_some() {
            let (rest, field) = cut(ident)(rest)?;
            let (rest, args) = opt(call_args)(rest)?;
            expr = match args {
                Some(args) => method_call(expr, field, args),
                None => Expr::select(expr, field),
            };
            input = rest;
            continue;
        }

        let (rest, index) = opt(delimited(sym("["), cut(expression), cut(sym("]"))))(input)?;
        if let Some(index) = index {
            expr = Expr::call("_[_]", vec![expr, index]);
            input = rest;
            continue;
        }

        if let Some(type_name) = type_path(&expr) {
            let (rest, fields) = opt(struct_fields)(input)?;
            if let Some(fields) = fields {
                expr = Expr::Struct { type_name, fields };
                input = rest;
                continue;
            }
        }

        return Ok((input, expr));
    }
}

fn has_macro(input: &str, args: Vec<Expr>) -> Res<'_, Expr> {
    match <[Expr; 1]>::try_from(args) {
        Ok([Expr::Select {
            operand,
            field,
            test_only: false,
        }]) => Ok((
            input,
            Expr::Select {
                operand,
                field,
                test_only: true,
            },
        )),
        _ => fail(input, "has() requires a single field selection"),
    }
}

fn ident_or_call(input: &str) -> Res<'_, Expr> {
    let (input, name) = ident(input)?;
    let (input, args) = opt(call_args)(input)?;
    match args {
        None => Ok((input, Expr::Ident(name))),
        Some(args) if name == "has" => has_macro(input, args),
        Some(args) => Ok((input, Expr::call(name, args))),
    }
}

fn list_literal(input: &str) -> Res<'_, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(sym(","), expression),
            preceded(opt(sym(",")), cut(sym("]"))),
        ),
        Expr::List,
    )(input)
}

fn map_literal(input: &str) -> Res<'_, Expr> {
    let entry = map(
        separated_pair(expression, cut(sym(":")), cut(expression)),
        |(key, value)| MapEntry { key, value },
    );
    map(
        delimited(
            char('{'),
            separated_list0(sym(","), entry),
            preceded(opt(sym(",")), cut(sym("}"))),
        ),
        Expr::Map,
    )(input)
}

fn primary(input: &str) -> Res<'_, Expr> {
    preceded(
        ws,
        alt((
            delimited(char('('), cut(expression), cut(sym(")"))),
            list_literal,
            map_literal,
            map(literal, Expr::Literal),
            ident_or_call,
        )),
    )(input)
}
