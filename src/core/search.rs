//! Window label search.
//!
//! [`LabelMaker`] partitions records by entity, walks each partition with the
//! windows described by [`SearchOptions`], and evaluates its labeling functions
//! on every window to build a [`LabelTimes`] table.

use crate::core::labels::{LabelRow, LabelTimes, SearchSettings};
use crate::core::windowing::{MaximumData, MinimumData, Window, WindowPlan, WindowSize};
use crate::data::types::{EntityId, Record, Value};
use crate::error::{LabelError, LabelFnError, Result};
use crate::progress::SearchProgress;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a labeling function produces for one window.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOutput {
    /// A single label value, stored under the function's name
    Scalar(Value),
    /// Several named fields, each stored as its own column
    Fields(BTreeMap<String, Value>),
}

macro_rules! scalar_output {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for LabelOutput {
                fn from(value: $ty) -> Self {
                    LabelOutput::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_output!(Value, bool, i64, usize, f64, String, &str, DateTime<Utc>, Option<f64>);

impl From<BTreeMap<String, Value>> for LabelOutput {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        LabelOutput::Fields(fields)
    }
}

type LabelClosure = dyn Fn(&DataSlice<'_>) -> std::result::Result<LabelOutput, LabelFnError>
    + Send
    + Sync;

/// A named labeling function.
#[derive(Clone)]
pub struct LabelFn {
    name: String,
    func: Arc<LabelClosure>,
}

impl LabelFn {
    /// Wrap a closure as a labeling function.
    ///
    /// ```
    /// use label_maker::{DataSlice, LabelFn};
    ///
    /// let total = LabelFn::new("total_spent", |slice: &DataSlice<'_>| Ok(slice.sum("amount")));
    /// assert_eq!(total.name(), "total_spent");
    /// ```
    pub fn new<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&DataSlice<'_>) -> std::result::Result<T, LabelFnError> + Send + Sync + 'static,
        T: Into<LabelOutput>,
    {
        Self {
            name: name.into(),
            func: Arc::new(
                move |slice: &DataSlice<'_>| -> std::result::Result<LabelOutput, LabelFnError> {
                    f(slice).map(Into::into)
                },
            ),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, slice: &DataSlice<'_>) -> std::result::Result<LabelOutput, LabelFnError> {
        (self.func)(slice)
    }
}

impl fmt::Debug for LabelFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelFn").field("name", &self.name).finish()
    }
}

/// Extra arguments forwarded to every labeling function call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelArgs {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
}

impl LabelArgs {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// The records of one window, handed to labeling functions.
#[derive(Debug, Clone)]
pub struct DataSlice<'a> {
    entity: &'a EntityId,
    window: Window,
    records: &'a [&'a Record],
    args: &'a LabelArgs,
}

impl<'a> DataSlice<'a> {
    pub fn entity(&self) -> &EntityId {
        self.entity
    }

    /// Window context: slice number, cutoff, stop and next start.
    pub fn context(&self) -> &Window {
        &self.window
    }

    pub fn cutoff_time(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn records(&self) -> &[&'a Record] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of `field` across the window, skipping records without it.
    pub fn values<'s>(&'s self, field: &'s str) -> impl Iterator<Item = &'a Value> + 's {
        self.records.iter().filter_map(move |r| r.get(field))
    }

    /// Numeric values of `field`, skipping nulls and non-numeric values.
    pub fn numbers(&self, field: &str) -> Vec<f64> {
        self.values(field).filter_map(Value::as_f64).collect()
    }

    /// Sum of the numeric values of `field` (0 for an empty window).
    pub fn sum(&self, field: &str) -> f64 {
        self.numbers(field).iter().sum()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.positional.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.args.keyword.get(name)
    }

    pub fn args(&self) -> &LabelArgs {
        self.args
    }
}

/// Per-invocation search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum labels per entity; `None` is unbounded
    pub num_examples_per_instance: Option<usize>,
    pub minimum_data: Option<MinimumData>,
    pub maximum_data: Option<MaximumData>,
    /// Step between cutoffs; defaults to the window size
    pub gap: Option<WindowSize>,
    pub drop_empty: bool,
    /// Log progress at info level
    pub verbose: bool,
    pub args: LabelArgs,
    /// Counters updated while the search runs
    pub progress: Option<Arc<SearchProgress>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            num_examples_per_instance: None,
            minimum_data: None,
            maximum_data: None,
            gap: None,
            drop_empty: true,
            verbose: false,
            args: LabelArgs::default(),
            progress: None,
        }
    }
}

impl SearchOptions {
    /// Interpret the conventional `-1` (or any negative number) as unbounded.
    pub fn examples_from_i64(n: i64) -> Option<usize> {
        usize::try_from(n).ok()
    }
}

/// Searches event data for label windows.
#[derive(Debug, Clone)]
pub struct LabelMaker {
    target_dataframe_name: String,
    time_index: String,
    functions: Vec<LabelFn>,
    window_size: WindowSize,
    label_name: Option<String>,
}

/// One entity's partition of the input, sorted by time.
struct Partition<'a> {
    entity: EntityId,
    records: Vec<&'a Record>,
    times: Vec<DateTime<Utc>>,
}

impl LabelMaker {
    /// Create a label maker with a single labeling function.
    pub fn new(
        target_dataframe_name: impl Into<String>,
        time_index: impl Into<String>,
        labeling_function: LabelFn,
        window_size: WindowSize,
    ) -> Self {
        Self {
            target_dataframe_name: target_dataframe_name.into(),
            time_index: time_index.into(),
            functions: vec![labeling_function],
            window_size,
            label_name: None,
        }
    }

    /// Add another labeling function; its output becomes additional columns.
    pub fn with_function(mut self, labeling_function: LabelFn) -> Self {
        self.functions.push(labeling_function);
        self
    }

    /// Rename the label column of a single scalar labeling function.
    pub fn with_label_name(mut self, label_name: impl Into<String>) -> Self {
        self.label_name = Some(label_name.into());
        self
    }

    pub fn target_dataframe_name(&self) -> &str {
        &self.target_dataframe_name
    }

    pub fn time_index(&self) -> &str {
        &self.time_index
    }

    pub fn window_size(&self) -> WindowSize {
        self.window_size
    }

    /// Run the search and build the label table.
    pub fn search(&self, records: &[Record], options: &SearchOptions) -> Result<LabelTimes> {
        let plan = self.validate(options)?;
        let partitions = self.partition(records)?;
        let progress = options.progress.clone().unwrap_or_default();
        progress.set_entities_total(partitions.len() as u64);

        let mut rows: Vec<LabelRow> = Vec::new();
        for (position, partition) in partitions.iter().enumerate() {
            let before = rows.len();
            for slice in self.entity_slices(partition, &plan, options) {
                progress.record_window(slice.is_empty());
                let values = self.evaluate(&slice)?;
                rows.push(LabelRow {
                    id: rows.len(),
                    entity: partition.entity.clone(),
                    cutoff_time: slice.cutoff_time(),
                    values,
                });
            }

            let emitted = (rows.len() - before) as u64;
            progress.record_entity(emitted);
            if options.verbose {
                tracing::info!(
                    entity = %partition.entity,
                    labels = emitted,
                    "searched entity {}/{}",
                    position + 1,
                    partitions.len()
                );
            }
        }

        let settings = SearchSettings {
            target_dataframe_name: self.target_dataframe_name.clone(),
            time_index: self.time_index.clone(),
            labeling_functions: self.functions.iter().map(|f| f.name.clone()).collect(),
            window_size: plan.window.to_string(),
            gap: plan.gap.to_string(),
            minimum_data: options.minimum_data.as_ref().map(ToString::to_string),
            maximum_data: options.maximum_data.as_ref().map(ToString::to_string),
            num_examples_per_instance: plan.limit.map_or(-1, |n| n as i64),
            drop_empty: plan.drop_empty,
        };

        let table = LabelTimes::from_search(rows, self.label_columns(), settings);
        if options.verbose {
            tracing::info!("{}", progress.summary());
        }
        Ok(table)
    }

    /// Windows the search would evaluate, without calling labeling functions.
    ///
    /// Slices borrow the input records; each inner vector is one entity in
    /// search order.
    pub fn slice<'a>(
        &self,
        records: &'a [Record],
        options: &'a SearchOptions,
    ) -> Result<Vec<SlicedEntity<'a>>> {
        let plan = self.validate(options)?;
        let partitions = self.partition(records)?;

        Ok(partitions
            .into_iter()
            .map(|p| {
                let windows = self.entity_windows(&p, &plan, options);
                SlicedEntity {
                    entity: p.entity,
                    records: p.records,
                    windows,
                    args: &options.args,
                }
            })
            .collect())
    }

    fn validate(&self, options: &SearchOptions) -> Result<WindowPlan> {
        if self.target_dataframe_name.is_empty() {
            return Err(LabelError::config("target_dataframe_name must not be empty"));
        }
        if self.time_index.is_empty() {
            return Err(LabelError::config("time_index must not be empty"));
        }

        let mut names: Vec<&str> = self.functions.iter().map(LabelFn::name).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(LabelError::config(format!(
                "duplicate labeling function name '{}'",
                pair[0]
            )));
        }
        if self.label_name.is_some() && self.functions.len() > 1 {
            return Err(LabelError::config(
                "label_name can only be used with a single labeling function",
            ));
        }

        WindowPlan::new(
            self.window_size,
            options.gap,
            options.num_examples_per_instance,
            options.drop_empty,
        )
    }

    /// Group records by entity and check each group is sorted by time.
    fn partition<'a>(&self, records: &'a [Record]) -> Result<Vec<Partition<'a>>> {
        let mut groups: BTreeMap<EntityId, Partition<'a>> = BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            let key = record.get(&self.target_dataframe_name).ok_or_else(|| {
                LabelError::InvalidRecord {
                    index,
                    reason: format!("missing entity field '{}'", self.target_dataframe_name),
                }
            })?;
            let entity = EntityId::from_value(key).ok_or_else(|| LabelError::InvalidRecord {
                index,
                reason: format!(
                    "entity field '{}' has unusable {} value",
                    self.target_dataframe_name,
                    key.kind()
                ),
            })?;
            let time = match record.get(&self.time_index) {
                Some(Value::Timestamp(t)) => *t,
                Some(other) => {
                    return Err(LabelError::InvalidRecord {
                        index,
                        reason: format!(
                            "time index '{}' must be a timestamp, found {}",
                            self.time_index,
                            other.kind()
                        ),
                    })
                }
                None => {
                    return Err(LabelError::InvalidRecord {
                        index,
                        reason: format!("missing time index '{}'", self.time_index),
                    })
                }
            };

            let partition = groups.entry(entity.clone()).or_insert_with(|| Partition {
                entity,
                records: Vec::new(),
                times: Vec::new(),
            });
            partition.records.push(record);
            partition.times.push(time);
        }

        for partition in groups.values() {
            if let Some(position) = partition.times.windows(2).position(|w| w[1] < w[0]) {
                return Err(LabelError::UnsortedInput {
                    entity: partition.entity.to_string(),
                    position: position + 1,
                    previous: partition.times[position],
                    current: partition.times[position + 1],
                });
            }
        }

        Ok(groups.into_values().collect())
    }

    fn entity_windows(
        &self,
        partition: &Partition<'_>,
        plan: &WindowPlan,
        options: &SearchOptions,
    ) -> Vec<Window> {
        let Some(&first) = partition.times.first() else {
            return Vec::new();
        };
        let first_cutoff = match &options.minimum_data {
            None => Some(first),
            Some(minimum) => minimum.resolve(&partition.entity, first),
        };
        let Some(first_cutoff) = first_cutoff else {
            tracing::debug!(entity = %partition.entity, "no minimum_data for entity, skipping");
            return Vec::new();
        };
        let max_cutoff = options
            .maximum_data
            .as_ref()
            .and_then(|max| max.resolve(first_cutoff));

        plan.windows(&partition.times, first_cutoff, max_cutoff)
            .collect()
    }

    fn entity_slices<'a>(
        &self,
        partition: &'a Partition<'a>,
        plan: &WindowPlan,
        options: &'a SearchOptions,
    ) -> Vec<DataSlice<'a>> {
        self.entity_windows(partition, plan, options)
            .into_iter()
            .map(|window| DataSlice {
                entity: &partition.entity,
                records: &partition.records[window.rows.clone()],
                window,
                args: &options.args,
            })
            .collect()
    }

    fn evaluate(&self, slice: &DataSlice<'_>) -> Result<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();

        for function in &self.functions {
            let output = function
                .call(slice)
                .map_err(|source| LabelError::LabelingFunction {
                    function: function.name.clone(),
                    entity: slice.entity().to_string(),
                    cutoff_time: slice.cutoff_time(),
                    source,
                })?;

            match output {
                LabelOutput::Scalar(value) => {
                    let column = match &self.label_name {
                        Some(name) => name.clone(),
                        None => function.name.clone(),
                    };
                    values.insert(column, value);
                }
                LabelOutput::Fields(_) if self.label_name.is_some() => {
                    return Err(LabelError::config(format!(
                        "label_name needs '{}' to return a single value",
                        function.name
                    )));
                }
                LabelOutput::Fields(fields) => values.extend(fields),
            }
        }

        Ok(values)
    }

    /// Column names known before the search; structured outputs add theirs later.
    fn label_columns(&self) -> Vec<String> {
        match &self.label_name {
            Some(name) => vec![name.clone()],
            None => self.functions.iter().map(|f| f.name.clone()).collect(),
        }
    }
}

/// One entity's windows, as returned by [`LabelMaker::slice`].
#[derive(Debug)]
pub struct SlicedEntity<'a> {
    pub entity: EntityId,
    records: Vec<&'a Record>,
    windows: Vec<Window>,
    args: &'a LabelArgs,
}

impl<'a> SlicedEntity<'a> {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Data slices for this entity, in cutoff order.
    pub fn slices(&self) -> impl Iterator<Item = DataSlice<'_>> {
        self.windows.iter().map(move |window| DataSlice {
            entity: &self.entity,
            records: &self.records[window.rows.clone()],
            window: window.clone(),
            args: self.args,
        })
    }
}
