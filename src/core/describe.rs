//! Summaries of label tables: distribution, cumulative counts and the
//! human-readable description.

use crate::core::labels::{LabelTimes, LabelType};
use crate::core::transforms::quantile;
use crate::data::types::{Value, ValueKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Summary statistics of a continuous label column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuousSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

/// Distribution of the primary label column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Row count per label value, in value order
    Discrete(Vec<(Value, usize)>),
    /// Statistics over non-null numeric labels; `None` when there are none
    Continuous(Option<ContinuousSummary>),
}

/// Cumulative label counts up to and including one cutoff time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountAtTime {
    pub cutoff_time: DateTime<Utc>,
    pub counts: BTreeMap<String, usize>,
}

fn summarize(values: &[f64]) -> Option<ContinuousSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(ContinuousSummary {
        count: values.len(),
        mean: values.mean(),
        std: values.std_dev(),
        min: Statistics::min(values),
        q25: quantile(&sorted, 0.25)?,
        q50: quantile(&sorted, 0.5)?,
        q75: quantile(&sorted, 0.75)?,
        max: Statistics::max(values),
    })
}

fn format_number(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    let s = format!("{x:.6}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn render_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl LabelTimes {
    /// Distribution of the primary label column.
    pub fn distribution(&self) -> Distribution {
        match self.label_type() {
            LabelType::Discrete => {
                let mut counts: BTreeMap<ValueKey, usize> = BTreeMap::new();
                for value in self.label_values() {
                    *counts.entry(ValueKey(value.clone())).or_default() += 1;
                }
                Distribution::Discrete(counts.into_iter().map(|(k, n)| (k.0, n)).collect())
            }
            LabelType::Continuous => {
                let values: Vec<f64> = self.label_values().filter_map(Value::as_f64).collect();
                Distribution::Continuous(summarize(&values))
            }
        }
    }

    /// Cumulative counts by cutoff time.
    ///
    /// Discrete labels are counted per label value; continuous labels give a
    /// single running count keyed by the label column name.
    pub fn count_by_time(&self) -> Vec<CountAtTime> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.rows()[i].cutoff_time);

        let mut running: BTreeMap<String, usize> = BTreeMap::new();
        let mut out: Vec<CountAtTime> = Vec::new();
        for i in order {
            let row = &self.rows()[i];
            let key = match self.label_type() {
                LabelType::Discrete => row
                    .values
                    .get(self.label_name())
                    .map_or_else(|| "null".to_string(), ToString::to_string),
                LabelType::Continuous => self.label_name().to_string(),
            };
            *running.entry(key).or_default() += 1;

            match out.last_mut() {
                Some(last) if last.cutoff_time == row.cutoff_time => last.counts = running.clone(),
                _ => out.push(CountAtTime {
                    cutoff_time: row.cutoff_time,
                    counts: running.clone(),
                }),
            }
        }
        out
    }

    /// Render the label distribution, search settings and transform history.
    pub fn describe(&self) -> String {
        let mut lines = vec!["Label Distribution".to_string(), "-".repeat(18)];
        match self.distribution() {
            Distribution::Discrete(counts) => {
                let total: usize = counts.iter().map(|(_, n)| n).sum();
                for (value, n) in &counts {
                    lines.push(format!("{:<12}{n:>8}", value.to_string()));
                }
                lines.push(format!("{:<12}{total:>8}", "Total:"));
            }
            Distribution::Continuous(Some(summary)) => {
                lines.push(format!("{:<12}{:>12}", "count", summary.count));
                for (name, value) in [
                    ("mean", summary.mean),
                    ("std", summary.std),
                    ("min", summary.min),
                    ("25%", summary.q25),
                    ("50%", summary.q50),
                    ("75%", summary.q75),
                    ("max", summary.max),
                ] {
                    lines.push(format!("{name:<12}{:>12}", format_number(value)));
                }
            }
            Distribution::Continuous(None) => lines.push(format!("{:<12}{:>12}", "count", 0)),
        }

        lines.extend(["".to_string(), "".to_string(), "Settings".to_string(), "-".repeat(8)]);
        let mut settings: BTreeMap<String, String> = BTreeMap::new();
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self.settings()) {
            settings.extend(map.iter().map(|(k, v)| (k.clone(), render_json(v))));
        }
        settings.insert("label_name".to_string(), self.label_name().to_string());
        settings.insert("label_type".to_string(), self.label_type().to_string());
        let width = settings.keys().map(String::len).max().unwrap_or(0) + 4;
        lines.extend(settings.iter().map(|(key, value)| format!("{key:<width$}{value}")));

        lines.extend(["".to_string(), "".to_string(), "Transforms".to_string(), "-".repeat(10)]);
        if self.transforms().is_empty() {
            lines.push("No transforms applied".to_string());
        }
        for (i, transform) in self.transforms().iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, transform.name()));
            if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(transform) {
                lines.extend(
                    map.iter()
                        .filter(|(k, _)| k.as_str() != "transform")
                        .map(|(key, value)| format!("  - {key}: {}", render_json(value))),
                );
            }
        }

        lines.join("\n")
    }
}
