//! Label and field selectors used to filter list results.
//!
//! Label selectors follow the familiar textual grammar:
//!
//! ```text
//! app=web, tier!=db, env in (prod,staging), track notin (canary), gpu, !legacy
//! ```
//!
//! Field selectors match dotted JSON paths with `=`, `==` or `!=`:
//!
//! ```text
//! metadata.name=a, spec.phase!=Done
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::TypeError;

/// Comparison applied by a single label [`Requirement`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One clause of a [`LabelSelector`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals => value.is_some_and(|v| self.values.first() == Some(v)),
            Operator::NotEquals => value.map_or(true, |v| self.values.first() != Some(v)),
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.values.first().map(String::as_str).unwrap_or("");
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, first),
            Operator::NotEquals => write!(f, "{}!={}", self.key, first),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A conjunction of label requirements. The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let mut requirements = Vec::new();
        for term in split_terms(input) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(input, term)?);
        }
        Ok(Self { requirements })
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::Equals,
            values: vec![value.into()],
        });
        self
    }

    pub fn not_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::NotEquals,
            values: vec![value.into()],
        });
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::Exists,
            values: Vec::new(),
        });
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

/// Split on commas that are not inside a parenthesised value set.
fn split_terms(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

fn label_err(selector: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidLabelSelector {
        selector: selector.to_string(),
        reason: reason.into(),
    }
}

fn parse_requirement(selector: &str, term: &str) -> Result<Requirement, TypeError> {
    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(selector, key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    if let Some(open) = term.find('(') {
        let close = term
            .rfind(')')
            .filter(|c| *c > open && term[c + 1..].trim().is_empty())
            .ok_or_else(|| label_err(selector, format!("unbalanced parentheses in {term:?}")))?;
        let head: Vec<&str> = term[..open].split_whitespace().collect();
        let (key, operator) = match head.as_slice() {
            [key, "in"] => (*key, Operator::In),
            [key, "notin"] => (*key, Operator::NotIn),
            _ => return Err(label_err(selector, format!("expected `key in (...)` or `key notin (...)`, got {term:?}"))),
        };
        validate_key(selector, key)?;
        let mut values = Vec::new();
        for v in term[open + 1..close].split(',') {
            let v = v.trim();
            validate_value(selector, v)?;
            values.push(v.to_string());
        }
        return Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        });
    }

    let (key, operator, value) = if let Some((k, v)) = term.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Operator::Equals, v)
    } else {
        let key = term.trim();
        validate_key(selector, key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::Exists,
            values: Vec::new(),
        });
    };

    let key = key.trim();
    let value = value.trim();
    validate_key(selector, key)?;
    validate_value(selector, value)?;
    Ok(Requirement {
        key: key.to_string(),
        operator,
        values: vec![value.to_string()],
    })
}

fn validate_key(selector: &str, key: &str) -> Result<(), TypeError> {
    if key.is_empty() {
        return Err(label_err(selector, "empty label key"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(label_err(selector, format!("invalid label key {key:?}")));
    }
    Ok(())
}

fn validate_value(selector: &str, value: &str) -> Result<(), TypeError> {
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(label_err(selector, format!("invalid label value {value:?}")));
    }
    Ok(())
}

/// One `path op value` clause of a [`FieldSelector`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRequirement {
    pub path: String,
    pub negated: bool,
    pub value: String,
}

/// A conjunction of field equality tests against an object's JSON form.
///
/// Missing fields compare as the empty string, so `spec.x=` matches objects
/// without `spec.x`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let mut requirements = Vec::new();
        for term in input.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let (path, negated, value) = if let Some((p, v)) = term.split_once("!=") {
                (p, true, v)
            } else if let Some((p, v)) = term.split_once("==") {
                (p, false, v)
            } else if let Some((p, v)) = term.split_once('=') {
                (p, false, v)
            } else {
                return Err(TypeError::InvalidFieldSelector {
                    selector: input.to_string(),
                    reason: format!("{term:?} has no operator"),
                });
            };
            let path = path.trim();
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(TypeError::InvalidFieldSelector {
                    selector: input.to_string(),
                    reason: format!("invalid field path {path:?}"),
                });
            }
            requirements.push(FieldRequirement {
                path: path.to_string(),
                negated,
                value: value.trim().to_string(),
            });
        }
        Ok(Self { requirements })
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(FieldRequirement {
            path: path.into(),
            negated: false,
            value: value.into(),
        });
        self
    }

    pub fn not_eq(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(FieldRequirement {
            path: path.into(),
            negated: true,
            value: value.into(),
        });
        self
    }

    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Exact-match value required at `path`, if the selector pins one.
    pub fn required_value(&self, path: &str) -> Option<&str> {
        self.requirements
            .iter()
            .find(|r| !r.negated && r.path == path)
            .map(|r| r.value.as_str())
    }

    pub fn matches(&self, object: &Value) -> bool {
        self.requirements.iter().all(|r| {
            let actual = field_string(object, &r.path);
            (actual == r.value) != r.negated
        })
    }
}

impl FromStr for FieldSelector {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            let op = if r.negated { "!=" } else { "=" };
            write!(f, "{}{}{}", r.path, op, r.value)?;
        }
        Ok(())
    }
}

fn field_string(object: &Value, path: &str) -> String {
    let mut current = object;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return String::new(),
        }
    }
    match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
