// src/placement/skip_if.rs

//! `skipIf` expressions
//!
//! A deliberately small language over the caller's variable bindings:
//!
//! | Form            | Skips when                                   |
//! |-----------------|----------------------------------------------|
//! | `name`          | `name` is bound to a truthy value            |
//! | `!name`         | `name` is unbound or falsy                   |
//! | `name == lit`   | `name` is bound and renders as `lit`         |
//! | `name != lit`   | `name` is unbound or does not render as `lit`|
//! | `true`, `false` | always / never                               |
//!
//! Names may be dotted (`build.release`) to reach into nested objects.
//! Literals may be quoted with `'` or `"`.
//!
//! An expression that does not parse never skips. Evaluating it logs a
//! warning so the fallback is visible.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Variable bindings supplied with a generation unit
pub type Bindings = serde_json::Map<String, Value>;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*(\.[A-Za-z_][A-Za-z0-9_\-]*)*$").expect("static regex"));
static COMPARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+?)\s*(==|!=)\s*(.+)$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipExpr {
    Constant(bool),
    Truthy(String),
    Not(String),
    Eq(String, String),
    Ne(String, String),
    /// Unparseable source text
    Invalid(String),
}

impl SkipExpr {
    /// Parse an expression; failures become [`SkipExpr::Invalid`]
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        match source {
            "true" => return Self::Constant(true),
            "false" => return Self::Constant(false),
            _ => {}
        }

        if let Some(caps) = COMPARE_RE.captures(source) {
            let name = &caps[1];
            let literal = unquote(caps[3].trim());
            if !NAME_RE.is_match(name) {
                return Self::Invalid(source.to_string());
            }
            return match &caps[2] {
                "==" => Self::Eq(name.to_string(), literal),
                _ => Self::Ne(name.to_string(), literal),
            };
        }

        if let Some(name) = source.strip_prefix('!') {
            let name = name.trim();
            if NAME_RE.is_match(name) {
                return Self::Not(name.to_string());
            }
            return Self::Invalid(source.to_string());
        }

        if NAME_RE.is_match(source) {
            return Self::Truthy(source.to_string());
        }
        Self::Invalid(source.to_string())
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }

    /// Whether the unit should be skipped under `bindings`
    pub fn evaluate(&self, bindings: &Bindings) -> bool {
        match self {
            Self::Constant(value) => *value,
            Self::Truthy(name) => lookup(bindings, name).is_some_and(truthy),
            Self::Not(name) => !lookup(bindings, name).is_some_and(truthy),
            Self::Eq(name, literal) => lookup(bindings, name).is_some_and(|v| render(v) == *literal),
            Self::Ne(name, literal) => !lookup(bindings, name).is_some_and(|v| render(v) == *literal),
            Self::Invalid(source) => {
                warn!(expression = %source, "unparseable skipIf expression, not skipping");
                false
            }
        }
    }
}

impl fmt::Display for SkipExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::Truthy(name) => write!(f, "{name}"),
            Self::Not(name) => write!(f, "!{name}"),
            Self::Eq(name, literal) => write!(f, "{name} == {literal:?}"),
            Self::Ne(name, literal) => write!(f, "{name} != {literal:?}"),
            Self::Invalid(source) => write!(f, "{source}"),
        }
    }
}

fn unquote(literal: &str) -> String {
    for quote in ['"', '\''] {
        if literal.len() >= 2 && literal.starts_with(quote) && literal.ends_with(quote) {
            return literal[1..literal.len() - 1].to_string();
        }
    }
    literal.to_string()
}

fn lookup<'a>(bindings: &'a Bindings, name: &str) -> Option<&'a Value> {
    let mut segments = name.split('.');
    let mut current = bindings.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are falsy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
