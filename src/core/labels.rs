//! The label table produced by a search.
//!
//! A [`LabelTimes`] holds one [`LabelRow`] per generated label together with the
//! settings of the search that produced it. Tables are never mutated in place:
//! transforms return new tables that share the same settings and extend the
//! transform history.

use crate::core::transforms::Comparison;
use crate::data::types::{EntityId, Value};
use crate::error::{LabelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// File holding the label rows of a saved table.
pub const LABELS_FILE: &str = "label_times.json";

/// File holding the table metadata of a saved table.
pub const SETTINGS_FILE: &str = "settings.json";

static NULL: Value = Value::Null;

/// One generated label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    /// Row index at search time, kept by every transform
    pub id: usize,
    /// Entity the label belongs to
    pub entity: EntityId,
    /// Start of the label window
    pub cutoff_time: DateTime<Utc>,
    /// Label columns
    pub values: BTreeMap<String, Value>,
}

/// Parameters of the search that generated a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub target_dataframe_name: String,
    pub time_index: String,
    pub labeling_functions: Vec<String>,
    pub window_size: String,
    pub gap: String,
    pub minimum_data: Option<String>,
    pub maximum_data: Option<String>,
    /// `-1` when unbounded
    pub num_examples_per_instance: i64,
    pub drop_empty: bool,
}

/// Whether labels are categories or quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    Discrete,
    Continuous,
}

impl LabelType {
    /// Numeric columns are continuous; anything holding bools or text is discrete.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let discrete = values
            .into_iter()
            .any(|v| !(v.is_null() || v.is_numeric()));
        if discrete {
            LabelType::Discrete
        } else {
            LabelType::Continuous
        }
    }
}

impl std::fmt::Display for LabelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelType::Discrete => write!(f, "discrete"),
            LabelType::Continuous => write!(f, "continuous"),
        }
    }
}

/// A transform applied to a table, kept for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum TransformRecord {
    Threshold {
        value: f64,
        comparison: Comparison,
    },
    ApplyLead {
        value: String,
    },
    Bin {
        bins: String,
        quantiles: bool,
        labels: Option<Vec<String>>,
        right: bool,
    },
    Sample {
        size: String,
        random_state: Option<u64>,
        replace: bool,
    },
    Select {
        column: String,
    },
}

impl TransformRecord {
    pub fn name(&self) -> &'static str {
        match self {
            TransformRecord::Threshold { .. } => "threshold",
            TransformRecord::ApplyLead { .. } => "apply_lead",
            TransformRecord::Bin { .. } => "bin",
            TransformRecord::Sample { .. } => "sample",
            TransformRecord::Select { .. } => "select",
        }
    }
}

/// Label table with attached search settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTimes {
    target_dataframe_name: String,
    label_name: String,
    columns: Vec<String>,
    label_type: LabelType,
    rows: Vec<LabelRow>,
    settings: Arc<SearchSettings>,
    transforms: Vec<TransformRecord>,
}

/// On-disk metadata of a saved table.
#[derive(Debug, Serialize, Deserialize)]
struct TableMetadata {
    target_dataframe_name: String,
    label_name: String,
    columns: Vec<String>,
    label_type: LabelType,
    search: SearchSettings,
    transforms: Vec<TransformRecord>,
}

/// Whole-table JSON document.
#[derive(Debug, Serialize, Deserialize)]
struct TableDocument {
    #[serde(flatten)]
    metadata: TableMetadata,
    rows: Vec<LabelRow>,
}

impl LabelTimes {
    /// Build a table from search output.
    ///
    /// `declared` holds the columns named by the labeling functions; columns
    /// produced only by structured outputs are appended in name order. Rows
    /// missing a column get a null.
    pub(crate) fn from_search(
        mut rows: Vec<LabelRow>,
        declared: Vec<String>,
        settings: SearchSettings,
    ) -> Self {
        let mut columns: Vec<String> = declared
            .iter()
            .filter(|c| rows.is_empty() || rows.iter().any(|r| r.values.contains_key(*c)))
            .cloned()
            .collect();
        let mut extra: Vec<String> = rows
            .iter()
            .flat_map(|r| r.values.keys())
            .filter(|k| !columns.contains(*k))
            .cloned()
            .collect();
        extra.sort();
        extra.dedup();
        columns.extend(extra);

        for row in &mut rows {
            for column in &columns {
                row.values.entry(column.clone()).or_insert(Value::Null);
            }
        }

        let label_name = columns
            .first()
            .or_else(|| declared.first())
            .cloned()
            .unwrap_or_else(|| "label".to_string());
        let label_type = LabelType::infer(rows.iter().filter_map(|r| r.values.get(&label_name)));

        Self {
            target_dataframe_name: settings.target_dataframe_name.clone(),
            label_name,
            columns,
            label_type,
            rows,
            settings: Arc::new(settings),
            transforms: Vec::new(),
        }
    }

    /// Derived table sharing this table's settings.
    pub(crate) fn derive(
        &self,
        rows: Vec<LabelRow>,
        label_type: LabelType,
        transform: TransformRecord,
    ) -> Self {
        let mut transforms = self.transforms.clone();
        transforms.push(transform);

        Self {
            target_dataframe_name: self.target_dataframe_name.clone(),
            label_name: self.label_name.clone(),
            columns: self.columns.clone(),
            label_type,
            rows,
            settings: Arc::clone(&self.settings),
            transforms,
        }
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Name of the entity key column.
    pub fn target_dataframe_name(&self) -> &str {
        &self.target_dataframe_name
    }

    /// Primary label column, the one transforms act on.
    pub fn label_name(&self) -> &str {
        &self.label_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn label_type(&self) -> LabelType {
        self.label_type
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn transforms(&self) -> &[TransformRecord] {
        &self.transforms
    }

    /// Value of the primary label column for each row.
    pub fn label_values(&self) -> impl Iterator<Item = &Value> {
        self.rows
            .iter()
            .map(|r| r.values.get(&self.label_name).unwrap_or(&NULL))
    }

    /// Value equality, including settings and transform history.
    pub fn equals(&self, other: &LabelTimes) -> bool {
        self == other
    }

    /// Keep only `column` and make it the primary label column.
    pub fn select(&self, column: &str) -> Result<LabelTimes> {
        if !self.columns.iter().any(|c| c == column) {
            return Err(LabelError::config(format!(
                "unknown label column '{column}' (columns: {})",
                self.columns.join(", ")
            )));
        }

        let rows: Vec<LabelRow> = self
            .rows
            .iter()
            .map(|row| LabelRow {
                values: row
                    .values
                    .iter()
                    .filter(|(k, _)| k.as_str() == column)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ..row.clone()
            })
            .collect();
        let label_type = LabelType::infer(rows.iter().filter_map(|r| r.values.get(column)));

        let mut table = self.derive(
            rows,
            label_type,
            TransformRecord::Select {
                column: column.to_string(),
            },
        );
        table.label_name = column.to_string();
        table.columns = vec![column.to_string()];
        Ok(table)
    }

    fn metadata(&self) -> TableMetadata {
        TableMetadata {
            target_dataframe_name: self.target_dataframe_name.clone(),
            label_name: self.label_name.clone(),
            columns: self.columns.clone(),
            label_type: self.label_type,
            search: (*self.settings).clone(),
            transforms: self.transforms.clone(),
        }
    }

    fn from_parts(metadata: TableMetadata, rows: Vec<LabelRow>) -> Self {
        Self {
            target_dataframe_name: metadata.target_dataframe_name,
            label_name: metadata.label_name,
            columns: metadata.columns,
            label_type: metadata.label_type,
            rows,
            settings: Arc::new(metadata.search),
            transforms: metadata.transforms,
        }
    }

    /// Serialize the whole table, settings included, as one JSON document.
    pub fn to_json(&self) -> Result<String> {
        let document = TableDocument {
            metadata: self.metadata(),
            rows: self.rows.clone(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: TableDocument = serde_json::from_str(content)?;
        Ok(Self::from_parts(document.metadata, document.rows))
    }

    /// Save rows and settings as two JSON files in `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(LABELS_FILE), serde_json::to_string_pretty(&self.rows)?)?;
        std::fs::write(
            dir.join(SETTINGS_FILE),
            serde_json::to_string_pretty(&self.metadata())?,
        )?;
        tracing::debug!(dir = %dir.display(), rows = self.rows.len(), "saved label times");
        Ok(())
    }

    /// Load a table written by [`LabelTimes::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let rows: Vec<LabelRow> =
            serde_json::from_str(&std::fs::read_to_string(dir.join(LABELS_FILE))?)?;
        let metadata: TableMetadata =
            serde_json::from_str(&std::fs::read_to_string(dir.join(SETTINGS_FILE))?)?;
        Ok(Self::from_parts(metadata, rows))
    }
}
