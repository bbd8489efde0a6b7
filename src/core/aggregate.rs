//! Built-in labeling functions used by the command line.
//!
//! An aggregation is written as `count` or `<kind>:<field>`, e.g.
//! `sum:amount` or `nunique:product`.

use crate::core::search::{DataSlice, LabelFn};
use crate::data::types::{Value, ValueKey};
use crate::error::{LabelError, Result};
use statrs::statistics::Statistics;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Aggregation over the records of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Number of records in the window
    Count,
    Sum(String),
    /// Mean of numeric values, null for an empty window
    Mean(String),
    Min(String),
    Max(String),
    /// First non-missing value in time order
    First(String),
    Last(String),
    /// Number of distinct non-null values
    NUnique(String),
}

impl Aggregation {
    /// Field the aggregation reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Aggregation::Count => None,
            Aggregation::Sum(f)
            | Aggregation::Mean(f)
            | Aggregation::Min(f)
            | Aggregation::Max(f)
            | Aggregation::First(f)
            | Aggregation::Last(f)
            | Aggregation::NUnique(f) => Some(f),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum(_) => "sum",
            Aggregation::Mean(_) => "mean",
            Aggregation::Min(_) => "min",
            Aggregation::Max(_) => "max",
            Aggregation::First(_) => "first",
            Aggregation::Last(_) => "last",
            Aggregation::NUnique(_) => "nunique",
        }
    }

    /// Label column name: `count` or `<kind>_<field>`.
    pub fn column_name(&self) -> String {
        match self.field() {
            None => self.kind().to_string(),
            Some(field) => format!("{}_{field}", self.kind()),
        }
    }

    /// Evaluate on one window.
    pub fn apply(&self, slice: &DataSlice<'_>) -> Value {
        match self {
            Aggregation::Count => Value::from(slice.len()),
            Aggregation::Sum(field) => Value::Float(slice.sum(field)),
            Aggregation::Mean(field) => numeric(slice, field, |xs| xs.mean()),
            Aggregation::Min(field) => numeric(slice, field, |xs| Statistics::min(xs)),
            Aggregation::Max(field) => numeric(slice, field, |xs| Statistics::max(xs)),
            Aggregation::First(field) => first_present(slice.values(field)),
            Aggregation::Last(field) => {
                let values: Vec<&Value> = slice.values(field).collect();
                first_present(values.into_iter().rev())
            }
            Aggregation::NUnique(field) => {
                let distinct: BTreeSet<ValueKey> = slice
                    .values(field)
                    .filter(|v| !v.is_null())
                    .map(|v| ValueKey(v.clone()))
                    .collect();
                Value::from(distinct.len())
            }
        }
    }

    /// Wrap as a named labeling function.
    pub fn into_label_fn(self) -> LabelFn {
        LabelFn::new(self.column_name(), move |slice: &DataSlice<'_>| {
            Ok(self.apply(slice))
        })
    }
}

fn numeric(slice: &DataSlice<'_>, field: &str, f: impl Fn(&[f64]) -> f64) -> Value {
    let numbers = slice.numbers(field);
    if numbers.is_empty() {
        Value::Null
    } else {
        Value::Float(f(&numbers))
    }
}

fn first_present<'a>(mut values: impl Iterator<Item = &'a Value>) -> Value {
    values
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

impl FromStr for Aggregation {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("count") {
            return Ok(Aggregation::Count);
        }

        let (kind, field) = s.split_once(':').ok_or_else(|| {
            LabelError::Parse(format!(
                "invalid aggregation '{s}': expected 'count' or '<kind>:<field>'"
            ))
        })?;
        let field = field.trim();
        if field.is_empty() {
            return Err(LabelError::Parse(format!(
                "aggregation '{s}' is missing a field name"
            )));
        }
        let field = field.to_string();

        match kind.trim().to_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum(field)),
            "mean" | "avg" => Ok(Aggregation::Mean(field)),
            "min" => Ok(Aggregation::Min(field)),
            "max" => Ok(Aggregation::Max(field)),
            "first" => Ok(Aggregation::First(field)),
            "last" => Ok(Aggregation::Last(field)),
            "nunique" => Ok(Aggregation::NUnique(field)),
            other => Err(LabelError::Parse(format!(
                "unknown aggregation '{other}' (expected count, sum, mean, min, max, first, last or nunique)"
            ))),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field() {
            None => write!(f, "{}", self.kind()),
            Some(field) => write!(f, "{}:{field}", self.kind()),
        }
    }
}
