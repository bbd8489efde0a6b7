//! Transforms over label tables.
//!
//! Every transform leaves the source table untouched and returns a new one that
//! shares the source's search settings and records itself in the transform
//! history.

use crate::core::labels::{LabelRow, LabelTimes, LabelType, TransformRecord};
use crate::core::windowing::format_duration;
use crate::data::types::Value;
use crate::error::{LabelError, Result};
use chrono::Duration;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Comparison used by [`LabelTimes::threshold_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
}

impl Comparison {
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::GreaterEqual => value >= threshold,
            Comparison::Less => value < threshold,
            Comparison::LessEqual => value <= threshold,
            Comparison::Equal => value == threshold,
        }
    }
}

impl FromStr for Comparison {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "gt" => Ok(Comparison::Greater),
            ">=" | "ge" => Ok(Comparison::GreaterEqual),
            "<" | "lt" => Ok(Comparison::Less),
            "<=" | "le" => Ok(Comparison::LessEqual),
            "==" | "eq" => Ok(Comparison::Equal),
            other => Err(LabelError::Parse(format!("unknown comparison '{other}'"))),
        }
    }
}

/// How to cut a numeric label column into bins.
#[derive(Debug, Clone, PartialEq)]
pub enum Bins {
    /// Number of bins (equal width, or equal count with quantiles)
    Count(usize),
    /// Explicit edges, or quantile boundaries in `[0, 1]` with quantiles
    Edges(Vec<f64>),
}

impl fmt::Display for Bins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bins::Count(n) => write!(f, "{n}"),
            Bins::Edges(edges) => {
                let edges: Vec<String> = edges.iter().map(f64::to_string).collect();
                write!(f, "[{}]", edges.join(", "))
            }
        }
    }
}

/// Options for [`LabelTimes::bin`].
#[derive(Debug, Clone, PartialEq)]
pub struct BinOptions {
    /// Use quantile-based bins
    pub quantiles: bool,
    /// Names replacing the interval labels, one per bin
    pub labels: Option<Vec<String>>,
    /// Intervals closed on the right (`(a, b]`), else on the left (`[a, b)`)
    pub right: bool,
    /// Decimal places in interval labels
    pub precision: usize,
}

impl Default for BinOptions {
    fn default() -> Self {
        Self {
            quantiles: false,
            labels: None,
            right: true,
            precision: 3,
        }
    }
}

impl BinOptions {
    pub fn quantiles() -> Self {
        Self {
            quantiles: true,
            ..Self::default()
        }
    }

    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }
}

/// How many rows to draw in [`LabelTimes::sample`].
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSize {
    N(usize),
    Frac(f64),
    /// Rows per label value (discrete labels only)
    PerLabelN(BTreeMap<String, usize>),
    /// Fraction per label value (discrete labels only)
    PerLabelFrac(BTreeMap<String, f64>),
}

impl fmt::Display for SampleSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn pairs<T: fmt::Display>(map: &BTreeMap<String, T>) -> String {
            map.iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            SampleSize::N(n) => write!(f, "n={n}"),
            SampleSize::Frac(x) => write!(f, "frac={x}"),
            SampleSize::PerLabelN(map) => write!(f, "n={{{}}}", pairs(map)),
            SampleSize::PerLabelFrac(map) => write!(f, "frac={{{}}}", pairs(map)),
        }
    }
}

/// Options for [`LabelTimes::sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOptions {
    pub size: SampleSize,
    /// Seed for reproducible draws; `None` draws from entropy
    pub random_state: Option<u64>,
    /// Draw with replacement
    pub replace: bool,
}

impl SampleOptions {
    pub fn n(n: usize) -> Self {
        Self::new(SampleSize::N(n))
    }

    pub fn frac(frac: f64) -> Self {
        Self::new(SampleSize::Frac(frac))
    }

    pub fn new(size: SampleSize) -> Self {
        Self {
            size,
            random_state: None,
            replace: false,
        }
    }

    pub fn random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

/// Linear-interpolated quantile of sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn linspace(start: f64, stop: f64, intervals: usize) -> Vec<f64> {
    let step = (stop - start) / intervals as f64;
    (0..=intervals)
        .map(|i| {
            if i == intervals {
                stop
            } else {
                start + step * i as f64
            }
        })
        .collect()
}

fn check_increasing(edges: &[f64], what: &str) -> Result<()> {
    if edges.len() < 2 {
        return Err(LabelError::config(format!("{what} need at least two values")));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(LabelError::config(format!("{what} must be finite")));
    }
    if edges.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(LabelError::config(format!(
            "{what} must be unique and increasing, got {edges:?}"
        )));
    }
    Ok(())
}

/// Compute bin edges for `values` (nulls already removed).
pub fn bin_edges(values: &[f64], bins: &Bins, quantiles: bool, right: bool) -> Result<Vec<f64>> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);

    if let Bins::Count(0) = bins {
        return Err(LabelError::config("number of bins must be at least 1"));
    }

    if quantiles {
        let qs = match bins {
            Bins::Count(n) => linspace(0.0, 1.0, *n),
            Bins::Edges(qs) => {
                check_increasing(qs, "quantiles")?;
                if qs.iter().any(|q| !(0.0..=1.0).contains(q)) {
                    return Err(LabelError::config("quantiles must lie within [0, 1]"));
                }
                qs.clone()
            }
        };
        if sorted.is_empty() {
            return Err(LabelError::config("cannot compute quantile bins of an empty column"));
        }
        let edges: Vec<f64> = qs.iter().filter_map(|q| quantile(&sorted, *q)).collect();
        check_increasing(&edges, "quantile bin edges")?;
        return Ok(edges);
    }

    match bins {
        Bins::Edges(edges) => {
            check_increasing(edges, "bin edges")?;
            Ok(edges.clone())
        }
        Bins::Count(n) => {
            let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
                return Err(LabelError::config("cannot compute bins of an empty column"));
            };
            if min == max {
                let pad = |x: f64| if x == 0.0 { 0.001 } else { 0.001 * x.abs() };
                return Ok(linspace(min - pad(min), max + pad(max), *n));
            }

            let mut edges = linspace(min, max, *n);
            let adjust = (max - min) * 0.001;
            if right {
                edges[0] -= adjust;
            } else {
                edges[*n] += adjust;
            }
            Ok(edges)
        }
    }
}

fn format_edge(x: f64, precision: usize) -> String {
    let s = format!("{x:.precision$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Index of the bin holding `x`, if any.
fn find_bin(edges: &[f64], x: f64, right: bool, include_outer: bool) -> Option<usize> {
    let last = edges.len() - 1;
    if right {
        let idx = edges.partition_point(|e| *e < x);
        match idx {
            0 if include_outer && x == edges[0] => Some(0),
            0 => None,
            i if i <= last => Some(i - 1),
            _ => None,
        }
    } else {
        let idx = edges.partition_point(|e| *e <= x);
        match idx {
            0 => None,
            i if i <= last => Some(i - 1),
            _ if include_outer && x == edges[last] => Some(last - 1),
            _ => None,
        }
    }
}

impl LabelTimes {
    fn numeric_label(&self, row: &LabelRow) -> Result<Option<f64>> {
        match row.values.get(self.label_name()) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| LabelError::LabelType {
                column: self.label_name().to_string(),
                expected: "numeric",
                found: v.kind().to_string(),
            }),
        }
    }

    fn with_label(&self, row: &LabelRow, value: Value) -> LabelRow {
        let mut row = row.clone();
        row.values.insert(self.label_name().to_string(), value);
        row
    }

    /// Turn numeric labels into booleans with `label > value`.
    pub fn threshold(&self, value: f64) -> Result<LabelTimes> {
        self.threshold_with(value, Comparison::Greater)
    }

    /// Turn numeric labels into booleans with a chosen comparison.
    ///
    /// Labels that are already boolean are left as they are, so applying the
    /// same threshold twice yields the table of the first application.
    pub fn threshold_with(&self, value: f64, comparison: Comparison) -> Result<LabelTimes> {
        let already_boolean = self
            .label_values()
            .all(|v| matches!(v, Value::Bool(_) | Value::Null));
        if already_boolean && self.label_type() == LabelType::Discrete {
            return Ok(self.clone());
        }

        let rows = self
            .rows()
            .iter()
            .map(|row| -> Result<LabelRow> {
                let label = match row.values.get(self.label_name()) {
                    Some(Value::Bool(b)) => Value::Bool(*b),
                    _ => match self.numeric_label(row)? {
                        Some(x) => Value::Bool(comparison.apply(x, value)),
                        None => Value::Null,
                    },
                };
                Ok(self.with_label(row, label))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.derive(
            rows,
            LabelType::Discrete,
            TransformRecord::Threshold { value, comparison },
        ))
    }

    /// Shift every cutoff time earlier by `lead`.
    pub fn apply_lead(&self, lead: Duration) -> Result<LabelTimes> {
        let rows = self
            .rows()
            .iter()
            .map(|row| -> Result<LabelRow> {
                let cutoff_time = row.cutoff_time.checked_sub_signed(lead).ok_or_else(|| {
                    LabelError::config(format!(
                        "lead of {} moves cutoff {} out of range",
                        format_duration(lead),
                        row.cutoff_time
                    ))
                })?;
                Ok(LabelRow {
                    cutoff_time,
                    ..row.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.derive(
            rows,
            self.label_type(),
            TransformRecord::ApplyLead {
                value: format_duration(lead),
            },
        ))
    }

    /// Discretize numeric labels into bins.
    pub fn bin(&self, bins: Bins, options: BinOptions) -> Result<LabelTimes> {
        let numbers: Vec<Option<f64>> = self
            .rows()
            .iter()
            .map(|row| self.numeric_label(row))
            .collect::<Result<_>>()?;
        let present: Vec<f64> = numbers.iter().flatten().copied().collect();

        let edges = bin_edges(&present, &bins, options.quantiles, options.right)?;
        let bin_count = edges.len() - 1;
        if let Some(labels) = &options.labels {
            if labels.len() != bin_count {
                return Err(LabelError::config(format!(
                    "got {} bin labels for {bin_count} bins",
                    labels.len()
                )));
            }
        }

        let names: Vec<String> = match &options.labels {
            Some(labels) => labels.clone(),
            None => (0..bin_count)
                .map(|i| {
                    let lo = format_edge(edges[i], options.precision);
                    let hi = format_edge(edges[i + 1], options.precision);
                    let outer = options.quantiles
                        && ((options.right && i == 0) || (!options.right && i == bin_count - 1));
                    match (options.right, outer) {
                        (true, false) => format!("({lo}, {hi}]"),
                        (false, false) => format!("[{lo}, {hi})"),
                        (_, true) => format!("[{lo}, {hi}]"),
                    }
                })
                .collect(),
        };

        let rows = self
            .rows()
            .iter()
            .zip(&numbers)
            .map(|(row, x)| {
                let label = x
                    .and_then(|x| find_bin(&edges, x, options.right, options.quantiles))
                    .map_or(Value::Null, |i| Value::Text(names[i].clone()));
                self.with_label(row, label)
            })
            .collect();

        Ok(self.derive(
            rows,
            LabelType::Discrete,
            TransformRecord::Bin {
                bins: bins.to_string(),
                quantiles: options.quantiles,
                labels: options.labels,
                right: options.right,
            },
        ))
    }

    /// Draw a random subset of rows; rows keep their original order.
    pub fn sample(&self, options: SampleOptions) -> Result<LabelTimes> {
        let mut rng = match options.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let all: Vec<usize> = (0..self.len()).collect();

        let mut picked = match &options.size {
            SampleSize::N(n) => draw(&mut rng, &all, *n, options.replace)?,
            SampleSize::Frac(frac) => {
                let n = frac_to_count(*frac, all.len(), options.replace)?;
                draw(&mut rng, &all, n, options.replace)?
            }
            SampleSize::PerLabelN(per_label) => {
                let groups = self.groups_by_label()?;
                let mut picked = Vec::new();
                for (label, n) in per_label {
                    let population = group(&groups, label)?;
                    picked.extend(draw(&mut rng, population, *n, options.replace)?);
                }
                picked
            }
            SampleSize::PerLabelFrac(per_label) => {
                let groups = self.groups_by_label()?;
                let mut picked = Vec::new();
                for (label, frac) in per_label {
                    let population = group(&groups, label)?;
                    let n = frac_to_count(*frac, population.len(), options.replace)?;
                    picked.extend(draw(&mut rng, population, n, options.replace)?);
                }
                picked
            }
        };
        picked.sort_unstable();

        let rows = picked.into_iter().map(|i| self.rows()[i].clone()).collect();
        Ok(self.derive(
            rows,
            self.label_type(),
            TransformRecord::Sample {
                size: options.size.to_string(),
                random_state: options.random_state,
                replace: options.replace,
            },
        ))
    }

    /// Row positions grouped by the text of their label value.
    fn groups_by_label(&self) -> Result<BTreeMap<String, Vec<usize>>> {
        if self.label_type() != LabelType::Discrete {
            return Err(LabelError::LabelType {
                column: self.label_name().to_string(),
                expected: "discrete for per-label sampling",
                found: self.label_type().to_string(),
            });
        }

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, value) in self.label_values().enumerate() {
            groups.entry(value.to_string()).or_default().push(i);
        }
        Ok(groups)
    }
}

fn group<'a>(groups: &'a BTreeMap<String, Vec<usize>>, label: &str) -> Result<&'a [usize]> {
    groups
        .get(label)
        .map(Vec::as_slice)
        .ok_or_else(|| LabelError::config(format!("label value '{label}' not found")))
}

/// Largest sample with replacement, as a multiple of the population.
const MAX_REPLACEMENT_FACTOR: usize = 1000;

fn frac_to_count(frac: f64, len: usize, replace: bool) -> Result<usize> {
    if !frac.is_finite() || frac < 0.0 {
        return Err(LabelError::config(format!(
            "sample fraction {frac} must be a finite non-negative number"
        )));
    }
    if !replace && frac > 1.0 {
        return Err(LabelError::config(format!(
            "sample fraction {frac} must be within [0, 1] without replacement"
        )));
    }
    if frac > MAX_REPLACEMENT_FACTOR as f64 {
        return Err(LabelError::config(format!(
            "sample fraction {frac} exceeds {MAX_REPLACEMENT_FACTOR}"
        )));
    }
    Ok((frac * len as f64).round() as usize)
}

fn draw(rng: &mut StdRng, population: &[usize], n: usize, replace: bool) -> Result<Vec<usize>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if population.is_empty() || (!replace && n > population.len()) {
        return Err(LabelError::config(format!(
            "cannot take a sample of {n} from {} rows without replacement",
            population.len()
        )));
    }
    let limit = population.len().saturating_mul(MAX_REPLACEMENT_FACTOR);
    if n > limit {
        return Err(LabelError::config(format!(
            "sample of {n} exceeds {limit} draws from {} rows",
            population.len()
        )));
    }

    if replace {
        Ok((0..n)
            .map(|_| population[rng.gen_range(0..population.len())])
            .collect())
    } else {
        Ok(rand::seq::index::sample(rng, population.len(), n)
            .into_iter()
            .map(|i| population[i])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::labels::tests::sample_labels;

    #[test]
    fn test_threshold() {
        let labels = sample_labels();
        let thresholded = labels.threshold(200.0).unwrap();

        let values: Vec<_> = thresholded.label_values().cloned().collect();
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true),
                Value::Bool(false)
            ]
        );
        assert_eq!(thresholded.label_type(), LabelType::Discrete);
        assert_eq!(thresholded.transforms()[0].name(), "threshold");
        // source table untouched
        assert_eq!(labels.label_type(), LabelType::Continuous);
    }

    #[test]
    fn test_threshold_twice_is_noop() {
        let once = sample_labels().threshold(200.0).unwrap();
        let twice = once.threshold(200.0).unwrap();
        assert!(twice.equals(&once));
    }

    #[test]
    fn test_threshold_with_comparison() {
        let labels = sample_labels()
            .threshold_with(47.95, Comparison::LessEqual)
            .unwrap();
        let trues = labels.label_values().filter(|v| **v == Value::Bool(true)).count();
        assert_eq!(trues, 2);
        assert_eq!("<=".parse::<Comparison>().unwrap(), Comparison::LessEqual);
    }

    #[test]
    fn test_apply_lead() {
        let labels = sample_labels();
        let led = labels.apply_lead(Duration::minutes(10)).unwrap();
        for (before, after) in labels.rows().iter().zip(led.rows()) {
            assert_eq!(before.cutoff_time - Duration::minutes(10), after.cutoff_time);
            assert_eq!(before.values, after.values);
        }
        assert_eq!(
            led.transforms()[0],
            TransformRecord::ApplyLead {
                value: "10min".to_string()
            }
        );
    }

    #[test]
    fn test_quartile_bins() {
        let edges = bin_edges(&[10.0, 20.0, 30.0, 40.0], &Bins::Count(4), true, true).unwrap();
        assert_eq!(edges, vec![10.0, 17.5, 25.0, 32.5, 40.0]);
    }

    #[test]
    fn test_equal_width_bins() {
        let edges = bin_edges(&[0.0, 10.0], &Bins::Count(2), false, true).unwrap();
        assert!((edges[0] - -0.01).abs() < 1e-9);
        assert_eq!(&edges[1..], &[5.0, 10.0]);

        let same = bin_edges(&[5.0, 5.0], &Bins::Count(1), false, true).unwrap();
        assert!(same[0] < 5.0 && same[1] > 5.0);
    }

    #[test]
    fn test_bin_with_names() {
        let labels = sample_labels();
        let binned = labels
            .bin(
                Bins::Count(2),
                BinOptions::quantiles().with_labels(["low", "high"]),
            )
            .unwrap();
        let values: Vec<String> = binned.label_values().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["high", "low", "high", "low"]);
    }

    #[test]
    fn test_bin_label_count_mismatch() {
        let err = sample_labels()
            .bin(Bins::Count(3), BinOptions::default().with_labels(["a", "b"]))
            .unwrap_err();
        assert!(matches!(err, LabelError::Configuration(_)));
    }

    #[test]
    fn test_custom_edges_and_outside_values() {
        let binned = sample_labels()
            .bin(Bins::Edges(vec![0.0, 100.0, 250.0]), BinOptions::default())
            .unwrap();
        let values: Vec<Value> = binned.label_values().cloned().collect();
        assert_eq!(values[0], Value::Text("(100, 250]".to_string()));
        assert_eq!(values[1], Value::Text("(0, 100]".to_string()));
        // 283.46 lies above the last edge
        assert_eq!(values[2], Value::Null);
    }

    #[test]
    fn test_bin_rejects_text_labels() {
        let binned = sample_labels()
            .bin(Bins::Count(2), BinOptions::default())
            .unwrap();
        let err = binned.bin(Bins::Count(2), BinOptions::default()).unwrap_err();
        assert!(matches!(err, LabelError::LabelType { .. }));
    }

    #[test]
    fn test_sample_reproducible() {
        let labels = sample_labels();
        let a = labels.sample(SampleOptions::n(2).random_state(0)).unwrap();
        let b = labels.sample(SampleOptions::n(2).random_state(0)).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn test_sample_fraction_and_bounds() {
        let labels = sample_labels();
        let half = labels.sample(SampleOptions::frac(0.5).random_state(1)).unwrap();
        assert_eq!(half.len(), 2);

        assert!(labels.sample(SampleOptions::n(5)).is_err());
        let with_replacement = labels
            .sample(SampleOptions::n(8).random_state(3).replace(true))
            .unwrap();
        assert_eq!(with_replacement.len(), 8);
    }

    #[test]
    fn test_sample_rejects_unbounded_sizes() {
        let labels = sample_labels();
        for options in [
            SampleOptions::frac(1e30).replace(true),
            SampleOptions::frac(f64::INFINITY).replace(true),
            SampleOptions::frac(f64::NAN),
            SampleOptions::n(usize::MAX).replace(true),
        ] {
            assert!(matches!(labels.sample(options), Err(LabelError::Configuration(_))));
        }

        let tripled = labels
            .sample(SampleOptions::frac(3.0).random_state(2).replace(true))
            .unwrap();
        assert_eq!(tripled.len(), 12);
    }

    #[test]
    fn test_sample_per_label() {
        let labels = sample_labels().threshold(200.0).unwrap();
        let per_label = BTreeMap::from([("true".to_string(), 1), ("false".to_string(), 2)]);
        let sampled = labels
            .sample(SampleOptions::new(SampleSize::PerLabelN(per_label)).random_state(0))
            .unwrap();

        let trues = sampled.label_values().filter(|v| **v == Value::Bool(true)).count();
        assert_eq!(sampled.len(), 3);
        assert_eq!(trues, 1);

        let continuous = sample_labels();
        let per_label = BTreeMap::from([("1".to_string(), 1)]);
        assert!(continuous
            .sample(SampleOptions::new(SampleSize::PerLabelN(per_label)))
            .is_err());
    }
}
