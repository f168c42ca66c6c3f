// src/placement/directive.rs

//! Placement directives
//!
//! A directive is a YAML front block at the top of a generation unit:
//!
//! ```text
//! ---
//! to: src/routes.rs
//! inject: true
//! after: "// routes"
//! skipIf: "!with_routes"
//! ---
//! <body>
//! ```
//!
//! Parsing is strict. Conflicting modes, anchors without `inject` and
//! out-of-range line numbers are rejected here, before anything is
//! written.

use super::skip_if::SkipExpr;
use crate::error::DirectiveError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Where an injection goes relative to its anchor line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Before(String),
    After(String),
    /// No anchor given: end of the target
    Unspecified,
}

/// How an artifact is applied to its target
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationMode {
    /// Create or truncate the target
    #[default]
    Write,
    Append,
    Prepend,
    InjectAt { anchor: Anchor },
    /// Insert as a new line at this 1-based position
    InjectAtLine(usize),
    Skip,
}

impl OperationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::InjectAt { .. } => "inject",
            Self::InjectAtLine(_) => "inject-at-line",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InjectAt {
                anchor: Anchor::Before(a),
            } => write!(f, "inject before {a:?}"),
            Self::InjectAt {
                anchor: Anchor::After(a),
            } => write!(f, "inject after {a:?}"),
            Self::InjectAtLine(n) => write!(f, "inject at line {n}"),
            other => f.write_str(other.name()),
        }
    }
}

/// A validated directive
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Directive {
    to: Option<String>,
    mode: OperationMode,
    skip_if: Option<SkipExpr>,
    chmod: Option<u32>,
    unless_exists: bool,
    force: bool,
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Front block as written; every key optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDirective {
    to: Option<String>,
    #[serde(default)]
    inject: bool,
    before: Option<String>,
    after: Option<String>,
    #[serde(default)]
    append: bool,
    #[serde(default)]
    prepend: bool,
    #[serde(alias = "line_at")]
    line_at: Option<i64>,
    #[serde(default)]
    skip: bool,
    #[serde(alias = "skip_if")]
    skip_if: Option<serde_yaml::Value>,
    chmod: Option<serde_yaml::Value>,
    #[serde(default, alias = "unless_exists")]
    unless_exists: bool,
    #[serde(default)]
    force: bool,
    /// Keys the engine does not interpret, kept for callers
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

fn invalid(message: impl Into<String>) -> DirectiveError {
    DirectiveError::InvalidDirective(message.into())
}

impl Directive {
    /// Parse a front block, fenced with `---` lines or bare
    ///
    /// An empty block yields the default directive: write mode, no target.
    pub fn parse(block: &str) -> Result<Self, DirectiveError> {
        let inner = match split_front_block(block) {
            (Some(inner), _) => inner,
            (None, _) => block,
        };
        if inner.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: RawDirective =
            serde_yaml::from_str(inner).map_err(|e| invalid(format!("malformed front block: {e}")))?;
        Self::from_raw(raw)
    }

    /// Split a generation unit and parse its front block
    ///
    /// Returns the directive and the unit body. A unit without a front
    /// block gets the default directive.
    pub fn from_unit(unit: &str) -> Result<(Self, &str), DirectiveError> {
        match split_front_block(unit) {
            (Some(block), body) => Ok((Self::parse(block)?, body)),
            (None, body) => Ok((Self::default(), body)),
        }
    }

    fn from_raw(raw: RawDirective) -> Result<Self, DirectiveError> {
        let selected: Vec<&str> = [
            ("inject", raw.inject),
            ("append", raw.append),
            ("prepend", raw.prepend),
            ("lineAt", raw.line_at.is_some()),
            ("skip", raw.skip),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();
        if selected.len() > 1 {
            return Err(invalid(format!(
                "mutually exclusive modes set: {}",
                selected.join(", ")
            )));
        }

        if !raw.inject && (raw.before.is_some() || raw.after.is_some()) {
            return Err(invalid("`before`/`after` require `inject: true`"));
        }

        let anchor = match (raw.before, raw.after) {
            (Some(_), Some(_)) => return Err(invalid("`before` and `after` are mutually exclusive")),
            (Some(a), None) => Anchor::Before(non_empty_anchor(a)?),
            (None, Some(a)) => Anchor::After(non_empty_anchor(a)?),
            (None, None) => Anchor::Unspecified,
        };

        let mode = if let Some(line) = raw.line_at {
            if line < 1 {
                return Err(invalid(format!("lineAt must be >= 1, got {line}")));
            }
            let line = usize::try_from(line).map_err(|_| invalid(format!("lineAt out of range: {line}")))?;
            OperationMode::InjectAtLine(line)
        } else if raw.append {
            OperationMode::Append
        } else if raw.prepend {
            OperationMode::Prepend
        } else if raw.inject {
            OperationMode::InjectAt { anchor }
        } else if raw.skip {
            OperationMode::Skip
        } else {
            OperationMode::Write
        };

        if raw.unless_exists && mode != OperationMode::Write {
            return Err(invalid(format!(
                "`unlessExists` only applies to write mode, not {}",
                mode.name()
            )));
        }

        if let Some(to) = &raw.to
            && to.trim().is_empty()
        {
            return Err(invalid("`to` is empty"));
        }

        let skip_if = raw.skip_if.map(skip_expr).transpose()?;
        let chmod = raw.chmod.map(parse_chmod).transpose()?;

        Ok(Self {
            to: raw.to,
            mode,
            skip_if,
            chmod,
            unless_exists: raw.unless_exists,
            force: raw.force,
            extra: raw.extra,
        })
    }

    /// Target path relative to the placement root
    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn mode(&self) -> &OperationMode {
        &self.mode
    }

    pub fn skip_if(&self) -> Option<&SkipExpr> {
        self.skip_if.as_ref()
    }

    /// Requested permission bits
    pub fn chmod(&self) -> Option<u32> {
        self.chmod
    }

    pub fn unless_exists(&self) -> bool {
        self.unless_exists
    }

    /// Bypass the already-applied checks
    pub fn force(&self) -> bool {
        self.force
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_yaml::Value> {
        &self.extra
    }
}

fn non_empty_anchor(anchor: String) -> Result<String, DirectiveError> {
    if anchor.is_empty() {
        return Err(invalid("anchor text is empty"));
    }
    Ok(anchor)
}

fn skip_expr(value: serde_yaml::Value) -> Result<SkipExpr, DirectiveError> {
    match value {
        serde_yaml::Value::String(s) => Ok(SkipExpr::parse(&s)),
        serde_yaml::Value::Bool(b) => Ok(SkipExpr::Constant(b)),
        other => Err(invalid(format!("`skipIf` must be a string or boolean, got {other:?}"))),
    }
}

/// Permission bits from `755`, `"0755"`, `"0o755"` or `"755"`
///
/// An integer is read digit by digit as octal, so `chmod: 755` means
/// `rwxr-xr-x`.
fn parse_chmod(value: serde_yaml::Value) -> Result<u32, DirectiveError> {
    let digits = match &value {
        serde_yaml::Value::Number(n) => n
            .as_u64()
            .map(|n| n.to_string())
            .ok_or_else(|| invalid(format!("invalid chmod value: {n}")))?,
        serde_yaml::Value::String(s) => {
            let s = s.trim();
            let s = s.strip_prefix("0o").unwrap_or(s);
            let trimmed = s.trim_start_matches('0');
            if trimmed.is_empty() && !s.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        other => return Err(invalid(format!("invalid chmod value: {other:?}"))),
    };

    let mode = u32::from_str_radix(&digits, 8).map_err(|_| invalid(format!("invalid chmod value: {digits}")))?;
    if mode > 0o7777 {
        return Err(invalid(format!("chmod out of range: {digits}")));
    }
    Ok(mode)
}

/// Separate a `---` fenced front block from the body that follows it
///
/// Returns `(None, unit)` when the unit does not open with a fence or the
/// fence is never closed.
pub fn split_front_block(unit: &str) -> (Option<&str>, &str) {
    let Some(rest) = unit
        .strip_prefix("---\n")
        .or_else(|| unit.strip_prefix("---\r\n"))
    else {
        return (None, unit);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, unit)
}
