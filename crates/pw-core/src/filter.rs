//! Row filters in the backend's `column=op.value` form.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(eq|neq|gt|gte|lt|lte|is)\.(.*)$").unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid filter `{0}`, expected column=op.value")]
    Syntax(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `is.null`, `is.true`, `is.false`
    Is,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Is => "is",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "is" => FilterOp::Is,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl fmt::Display) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    /// Query-string value, e.g. `eq.42` for `?id=eq.42`.
    pub fn query_value(&self) -> String {
        format!("{}.{}", self.op.as_str(), self.value)
    }

    /// Test a JSON row. A missing column only matches `is.null`.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(&self.column).unwrap_or(&Value::Null);

        if self.op == FilterOp::Is {
            return match self.value.as_str() {
                "null" => cell.is_null(),
                "true" => cell == &Value::Bool(true),
                "false" => cell == &Value::Bool(false),
                _ => false,
            };
        }
        if cell.is_null() {
            return false;
        }

        let ordering = match (cell, self.value.parse::<f64>()) {
            (Value::Number(n), Ok(want)) => n.as_f64().and_then(|have| have.partial_cmp(&want)),
            (Value::String(s), _) => Some(s.as_str().cmp(self.value.as_str())),
            (Value::Bool(b), _) => Some(b.to_string().as_str().cmp(self.value.as_str())),
            _ => None,
        };
        let Some(ordering) = ordering else {
            return false;
        };

        use std::cmp::Ordering::*;
        match self.op {
            FilterOp::Eq => ordering == Equal,
            FilterOp::Neq => ordering != Equal,
            FilterOp::Gt => ordering == Greater,
            FilterOp::Gte => ordering != Less,
            FilterOp::Lt => ordering == Less,
            FilterOp::Lte => ordering != Greater,
            FilterOp::Is => unreachable!(),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = FILTER_RE
            .captures(s.trim())
            .ok_or_else(|| FilterError::Syntax(s.to_string()))?;
        let op = FilterOp::parse(&caps[2]).ok_or_else(|| FilterError::Syntax(s.to_string()))?;
        Ok(Self {
            column: caps[1].to_string(),
            op,
            value: caps[3].to_string(),
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}
