//! Tag expressions: `[+-]KEY[OP NUMBER]` filters attached to manifest entries.
//!
//! A bare key tests membership in the [`TagSet`]. With a numeric comparison
//! the tag must exist *and* its value must parse as a number satisfying the
//! comparison; a non-numeric value quietly fails the filter. `==` also takes a
//! bare word (`arch==x64`), compared verbatim against the tag value. A leading
//! `-` inverts the final decision.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};
use crate::tags::TagSet;

fn expr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<sign>[+-])?(?P<key>[^<>=\s+\-][^<>=\s]*)(?:(?P<op>[<>=]+)(?P<num>\S*))?$")
            .expect("tag expression regex is valid")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+(?:\.[0-9]+)?$").expect("number regex is valid"))
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("word regex is valid"))
}

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
        }
    }

    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "<" => Ok(CompareOp::Lt),
            ">" => Ok(CompareOp::Gt),
            "<=" => Ok(CompareOp::Le),
            ">=" => Ok(CompareOp::Ge),
            "==" => Ok(CompareOp::Eq),
            other => Err(format!("unknown comparison operator {other:?}")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison clause of a tag expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Comparison {
    Numeric { op: CompareOp, threshold: f64 },
    /// `KEY==WORD`: exact match against the tag value.
    Equals(String),
}

/// A parsed tag expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagExpr {
    pub negated: bool,
    pub key: String,
    pub comparison: Option<Comparison>,
}

impl TagExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let malformed = |reason: &str| RunnerError::MalformedTagExpr {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let Some(caps) = expr_regex().captures(expr) else {
            let body = expr.trim_start_matches(['+', '-']);
            if body.is_empty() || body.starts_with(['<', '>', '=']) {
                return Err(malformed("empty tag key"));
            }
            return Err(malformed("expected [+-]KEY[OP NUMBER]"));
        };

        let negated = caps.name("sign").is_some_and(|m| m.as_str() == "-");
        let key = caps["key"].to_string();

        let comparison = match caps.name("op") {
            None => None,
            Some(op) => {
                let op: CompareOp = op.as_str().parse().map_err(|e: String| malformed(&e))?;
                let operand = caps.name("num").map_or("", |m| m.as_str());
                if number_regex().is_match(operand) {
                    let threshold: f64 = operand
                        .parse()
                        .map_err(|_| malformed(&format!("invalid threshold {operand:?}")))?;
                    Some(Comparison::Numeric { op, threshold })
                } else if op == CompareOp::Eq && word_regex().is_match(operand) {
                    Some(Comparison::Equals(operand.to_string()))
                } else {
                    return Err(malformed(&format!("invalid threshold {operand:?}")));
                }
            }
        };

        Ok(Self {
            negated,
            key,
            comparison,
        })
    }

    /// Whether the tag condition holds, ignoring negation.
    pub fn is_present(&self, tags: &TagSet) -> bool {
        match &self.comparison {
            None => tags.contains(&self.key),
            Some(Comparison::Numeric { op, threshold }) => tags
                .get(&self.key)
                .and_then(|value| value.trim().parse::<f64>().ok())
                .is_some_and(|value| op.apply(value, *threshold)),
            Some(Comparison::Equals(word)) => tags.get(&self.key) == Some(word.as_str()),
        }
    }

    /// Inclusion decision: `present XOR negated`.
    pub fn evaluate(&self, tags: &TagSet) -> bool {
        self.is_present(tags) != self.negated
    }
}

impl FromStr for TagExpr {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TagExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("-")?;
        }
        f.write_str(&self.key)?;
        match &self.comparison {
            None => {}
            Some(Comparison::Numeric { op, threshold }) => write!(f, "{op}{threshold}")?,
            Some(Comparison::Equals(word)) => write!(f, "=={word}")?,
        }
        Ok(())
    }
}

/// Parse and evaluate `expr` against `tags` in one step.
pub fn evaluate(expr: &str, tags: &TagSet) -> Result<bool> {
    Ok(TagExpr::parse(expr)?.evaluate(tags))
}
