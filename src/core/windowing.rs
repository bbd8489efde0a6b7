//! Window management for slicing entity records into label windows.
//!
//! Each entity's records are walked with a sequence of cutoff times. A window
//! either spans a fixed duration (`[cutoff, cutoff + size)`) or a fixed number
//! of rows starting at the cutoff row. Consecutive cutoffs are `gap` apart.

use crate::data::types::EntityId;
use crate::error::{LabelError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Size of a window, or of the gap between cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WindowSize {
    /// Fixed span of time
    Duration(Duration),
    /// Fixed number of records
    Rows(usize),
}

impl WindowSize {
    pub fn is_rows(&self) -> bool {
        matches!(self, WindowSize::Rows(_))
    }

    fn is_positive(&self) -> bool {
        match self {
            WindowSize::Duration(d) => *d > Duration::zero(),
            WindowSize::Rows(n) => *n > 0,
        }
    }
}

impl FromStr for WindowSize {
    type Err = LabelError;

    /// A bare integer is a row count; anything else must be a duration.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(rows) = s.parse::<usize>() {
            return Ok(WindowSize::Rows(rows));
        }
        parse_duration(s).map(WindowSize::Duration)
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSize::Duration(d) => f.write_str(&format_duration(*d)),
            WindowSize::Rows(n) => write!(f, "{n}"),
        }
    }
}

impl From<WindowSize> for String {
    fn from(size: WindowSize) -> Self {
        size.to_string()
    }
}

impl TryFrom<String> for WindowSize {
    type Error = LabelError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Duration> for WindowSize {
    fn from(d: Duration) -> Self {
        WindowSize::Duration(d)
    }
}

/// Parse a duration such as `"10min"`, `"1h"`, `"2d"`, `"1w"`, `"30s"` or `"500ms"`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .ok_or_else(|| LabelError::Parse(format!("duration '{s}' is missing a unit")))?;
    let (amount, unit) = s.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| LabelError::Parse(format!("invalid duration amount in '{s}'")))?;

    let duration = match unit.trim() {
        "ms" | "millisecond" | "milliseconds" => Duration::try_milliseconds(amount),
        "s" | "sec" | "second" | "seconds" => Duration::try_seconds(amount),
        "m" | "min" | "T" | "minute" | "minutes" => Duration::try_minutes(amount),
        "h" | "H" | "hour" | "hours" => Duration::try_hours(amount),
        "d" | "D" | "day" | "days" => Duration::try_days(amount),
        "w" | "W" | "week" | "weeks" => Duration::try_weeks(amount),
        other => {
            return Err(LabelError::Parse(format!(
                "unknown duration unit '{other}' in '{s}'"
            )))
        }
    };
    duration.ok_or_else(|| LabelError::Parse(format!("duration '{s}' is out of range")))
}

/// Render a duration with the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.num_milliseconds();
    const UNITS: &[(i64, &str)] = &[
        (7 * 86_400_000, "w"),
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "min"),
        (1_000, "s"),
    ];

    if ms == 0 {
        return "0s".to_string();
    }
    for (size, unit) in UNITS {
        if ms % size == 0 {
            return format!("{}{unit}", ms / size);
        }
    }
    format!("{ms}ms")
}

/// Where the first cutoff of each entity lies.
#[derive(Debug, Clone, PartialEq)]
pub enum MinimumData {
    /// Same absolute start for every entity
    Timestamp(DateTime<Utc>),
    /// Offset from the entity's first record
    Offset(Duration),
    /// Explicit start per entity; entities not listed are skipped
    PerEntity(BTreeMap<EntityId, DateTime<Utc>>),
}

impl MinimumData {
    /// Resolve the first cutoff for an entity whose first record is at `first`.
    pub fn resolve(&self, entity: &EntityId, first: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            MinimumData::Timestamp(t) => Some(*t),
            MinimumData::Offset(d) => first.checked_add_signed(*d),
            MinimumData::PerEntity(starts) => starts.get(entity).copied(),
        }
    }
}

impl fmt::Display for MinimumData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinimumData::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            MinimumData::Offset(d) => f.write_str(&format_duration(*d)),
            MinimumData::PerEntity(starts) => write!(f, "per-entity ({} entities)", starts.len()),
        }
    }
}

/// Bound on the last admissible cutoff of each entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaximumData {
    /// Absolute last cutoff
    Timestamp(DateTime<Utc>),
    /// Offset from the entity's first cutoff
    Offset(Duration),
}

impl MaximumData {
    pub fn resolve(&self, first_cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            MaximumData::Timestamp(t) => Some(*t),
            MaximumData::Offset(d) => first_cutoff.checked_add_signed(*d),
        }
    }
}

impl fmt::Display for MaximumData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaximumData::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            MaximumData::Offset(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// One window over an entity's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Zero-based index of this window among the entity's emitted windows
    pub slice_number: usize,
    /// Cutoff time (inclusive start)
    pub start: DateTime<Utc>,
    /// Exclusive end; for row windows, the time of the first row after the window
    pub stop: Option<DateTime<Utc>>,
    /// Cutoff of the following candidate window
    pub next_start: Option<DateTime<Utc>>,
    /// Positions of the window's records inside the entity partition
    pub rows: Range<usize>,
}

impl Window {
    /// Check if a timestamp falls within this window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && self.stop.map_or(true, |stop| timestamp < stop)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Validated window/gap/limit parameters shared by every entity of a search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowPlan {
    pub window: WindowSize,
    pub gap: WindowSize,
    pub limit: Option<usize>,
    pub drop_empty: bool,
}

impl WindowPlan {
    pub fn new(
        window: WindowSize,
        gap: Option<WindowSize>,
        limit: Option<usize>,
        drop_empty: bool,
    ) -> Result<Self> {
        let gap = gap.unwrap_or(window);

        if !window.is_positive() {
            return Err(LabelError::config(format!(
                "window_size must be positive, got {window}"
            )));
        }
        if !gap.is_positive() {
            return Err(LabelError::config(format!("gap must be positive, got {gap}")));
        }
        if window.is_rows() != gap.is_rows() {
            return Err(LabelError::config(format!(
                "window_size ({window}) and gap ({gap}) must both be durations or both row counts"
            )));
        }
        if limit == Some(0) {
            return Err(LabelError::config(
                "num_examples_per_instance must be at least 1 (or unbounded)",
            ));
        }

        Ok(Self {
            window,
            gap,
            limit,
            drop_empty,
        })
    }

    /// Windows for one entity whose sorted record times are `times`.
    pub fn windows<'a>(
        &self,
        times: &'a [DateTime<Utc>],
        first_cutoff: DateTime<Utc>,
        max_cutoff: Option<DateTime<Utc>>,
    ) -> EntityWindows<'a> {
        let cursor = match self.window {
            WindowSize::Duration(_) => Cursor::Time(first_cutoff),
            WindowSize::Rows(_) => Cursor::Row(times.partition_point(|t| *t < first_cutoff)),
        };

        EntityWindows {
            plan: *self,
            times,
            max_cutoff,
            cursor: Some(cursor),
            emitted: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Time(DateTime<Utc>),
    Row(usize),
}

/// Iterator over the windows of a single entity.
#[derive(Debug)]
pub(crate) struct EntityWindows<'a> {
    plan: WindowPlan,
    times: &'a [DateTime<Utc>],
    max_cutoff: Option<DateTime<Utc>>,
    cursor: Option<Cursor>,
    emitted: usize,
}

impl<'a> EntityWindows<'a> {
    fn next_by_time(&mut self, mut cutoff: DateTime<Utc>, size: Duration, gap: Duration) -> Option<Window> {
        let last = *self.times.last()?;

        loop {
            match self.max_cutoff {
                Some(max) if cutoff > max => return None,
                None if cutoff > last => return None,
                _ => {}
            }

            let lo = self.times.partition_point(|t| *t < cutoff);
            if self.plan.drop_empty && lo == self.times.len() {
                return None;
            }

            let end = cutoff.checked_add_signed(size)?;
            let hi = self.times.partition_point(|t| *t < end);

            if lo == hi && self.plan.drop_empty {
                // jump straight to the first window that can hold the next record
                cutoff = skip_to_record(cutoff, end, self.times[lo], gap)?;
                continue;
            }

            let next = cutoff.checked_add_signed(gap);
            self.cursor = next.map(Cursor::Time);
            return Some(self.emit(cutoff, Some(end), next, lo..hi));
        }
    }

    fn next_by_rows(&mut self, idx: usize, size: usize, gap: usize) -> Option<Window> {
        let cutoff = *self.times.get(idx)?;
        if matches!(self.max_cutoff, Some(max) if cutoff > max) {
            return None;
        }

        let hi = idx.saturating_add(size).min(self.times.len());
        let next_idx = idx.saturating_add(gap);
        self.cursor = Some(Cursor::Row(next_idx));
        let stop = self.times.get(hi).copied();
        let next = self.times.get(next_idx).copied();
        Some(self.emit(cutoff, stop, next, idx..hi))
    }

    fn emit(
        &mut self,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
        next_start: Option<DateTime<Utc>>,
        rows: Range<usize>,
    ) -> Window {
        let window = Window {
            slice_number: self.emitted,
            start,
            stop,
            next_start,
            rows,
        };
        self.emitted += 1;
        window
    }
}

impl<'a> Iterator for EntityWindows<'a> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if matches!(self.plan.limit, Some(limit) if self.emitted >= limit) {
            return None;
        }

        let cursor = self.cursor.take()?;
        match (cursor, self.plan.window, self.plan.gap) {
            (Cursor::Time(cutoff), WindowSize::Duration(size), WindowSize::Duration(gap)) => {
                self.next_by_time(cutoff, size, gap)
            }
            (Cursor::Row(idx), WindowSize::Rows(size), WindowSize::Rows(gap)) => {
                self.next_by_rows(idx, size, gap)
            }
            // WindowPlan::new rejects mixed kinds
            _ => None,
        }
    }
}

/// Smallest cutoff on the gap grid whose window reaches `next_record`.
fn skip_to_record(
    cutoff: DateTime<Utc>,
    end: DateTime<Utc>,
    next_record: DateTime<Utc>,
    gap: Duration,
) -> Option<DateTime<Utc>> {
    let steps = match ((next_record - end).num_nanoseconds(), gap.num_nanoseconds()) {
        (Some(behind), Some(step)) if step > 0 => behind / step + 1,
        _ => 1,
    };
    let jump = gap
        .num_nanoseconds()
        .and_then(|step| step.checked_mul(steps))
        .map(Duration::nanoseconds)
        .unwrap_or(gap);
    cutoff.checked_add_signed(jump)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minutes(offsets: &[i64]) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap();
        offsets.iter().map(|m| base + Duration::minutes(*m)).collect()
    }

    fn plan(window: &str, gap: Option<&str>, limit: Option<usize>, drop_empty: bool) -> WindowPlan {
        WindowPlan::new(
            window.parse().unwrap(),
            gap.map(|g| g.parse().unwrap()),
            limit,
            drop_empty,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("10min").unwrap(), Duration::minutes(10));
        assert_eq!(parse_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_duration("2d").unwrap(), Duration::days(2));
        assert_eq!(parse_duration("1w").unwrap(), Duration::weeks(1));
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::milliseconds(500));
        assert_eq!(parse_duration("3 days").unwrap(), Duration::days(3));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10 fortnights").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(matches!(parse_duration("999999999999999w"), Err(LabelError::Parse(_))));
        assert!(matches!(
            "999999999999999d".parse::<WindowSize>(),
            Err(LabelError::Parse(_))
        ));
    }

    #[test]
    fn test_window_size_parse_and_display() {
        assert_eq!("5".parse::<WindowSize>().unwrap(), WindowSize::Rows(5));
        let size: WindowSize = "90min".parse().unwrap();
        assert_eq!(size, WindowSize::Duration(Duration::minutes(90)));
        assert_eq!(size.to_string(), "90min");
        assert_eq!(WindowSize::Duration(Duration::hours(24)).to_string(), "1d");
        assert_eq!(WindowSize::Duration(Duration::milliseconds(1500)).to_string(), "1500ms");
    }

    #[test]
    fn test_window_contains() {
        let times = minutes(&[0, 10]);
        let window = Window {
            slice_number: 0,
            start: times[0],
            stop: Some(times[1]),
            next_start: Some(times[1]),
            rows: 0..1,
        };

        assert!(window.contains(times[0]));
        assert!(window.contains(times[0] + Duration::minutes(5)));
        assert!(!window.contains(times[1]));
        assert!(!window.contains(times[0] - Duration::seconds(1)));
    }

    #[test]
    fn test_plan_rejects_bad_parameters() {
        let ten = WindowSize::Duration(Duration::minutes(10));
        assert!(WindowPlan::new(WindowSize::Rows(0), None, None, true).is_err());
        assert!(WindowPlan::new(ten, Some(WindowSize::Duration(Duration::zero())), None, true).is_err());
        assert!(WindowPlan::new(ten, Some(WindowSize::Rows(2)), None, true).is_err());
        assert!(WindowPlan::new(ten, None, Some(0), true).is_err());
    }

    #[test]
    fn test_non_overlapping_duration_windows() {
        let times = minutes(&[0, 5, 10, 15]);
        let windows: Vec<Window> = plan("10min", None, None, true)
            .windows(&times, times[0], None)
            .collect();

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].rows, 0..2);
        assert_eq!(windows[1].rows, 2..4);
        assert_eq!(windows[1].start, times[2]);
        assert_eq!(windows[1].slice_number, 1);
    }

    #[test]
    fn test_overlapping_windows() {
        let times = minutes(&[0, 5, 10, 15]);
        let windows: Vec<Window> = plan("10min", Some("5min"), None, true)
            .windows(&times, times[0], None)
            .collect();

        let rows: Vec<_> = windows.iter().map(|w| w.rows.clone()).collect();
        assert_eq!(rows, vec![0..2, 1..3, 2..4, 3..4]);
    }

    #[test]
    fn test_empty_windows_are_skipped_or_kept() {
        let times = minutes(&[0, 45]);

        let dropped: Vec<Window> = plan("10min", None, None, true)
            .windows(&times, times[0], None)
            .collect();
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[1].start, minutes(&[40])[0]);
        // skipped windows do not consume slice numbers
        assert_eq!(dropped[1].slice_number, 1);

        let kept: Vec<Window> = plan("10min", None, None, false)
            .windows(&times, times[0], None)
            .collect();
        assert_eq!(kept.len(), 5);
        assert!(kept[1..4].iter().all(Window::is_empty));
    }

    #[test]
    fn test_limit_and_maximum() {
        let times = minutes(&[0, 5, 10, 15, 20, 25]);

        let limited = plan("5min", None, Some(2), true).windows(&times, times[0], None).count();
        assert_eq!(limited, 2);

        let bounded: Vec<Window> = plan("5min", None, None, true)
            .windows(&times, times[0], Some(times[2]))
            .collect();
        assert_eq!(bounded.len(), 3);
        assert!(bounded.iter().all(|w| w.start <= times[2]));
    }

    #[test]
    fn test_maximum_beyond_data_keeps_empty_windows() {
        let times = minutes(&[0]);
        let windows = plan("10min", None, None, false)
            .windows(&times, times[0], Some(minutes(&[30])[0]))
            .count();
        assert_eq!(windows, 4);
    }

    #[test]
    fn test_row_windows() {
        let times = minutes(&[0, 1, 2, 3, 4]);
        let windows: Vec<Window> = plan("2", None, None, true)
            .windows(&times, times[1], None)
            .collect();

        let rows: Vec<_> = windows.iter().map(|w| w.rows.clone()).collect();
        assert_eq!(rows, vec![1..3, 3..5]);
        assert_eq!(windows[0].start, times[1]);
        assert_eq!(windows[0].stop, Some(times[3]));
        assert_eq!(windows[1].next_start, None);
    }

    #[test]
    fn test_huge_row_window_from_later_cutoff() {
        let times = minutes(&[0, 1]);
        let windows: Vec<Window> = WindowPlan::new(WindowSize::Rows(usize::MAX), None, None, true)
            .unwrap()
            .windows(&times, times[1], None)
            .collect();

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].rows, 1..2);
        assert_eq!(windows[0].stop, None);
    }

    #[test]
    fn test_minimum_data_resolution() {
        let entity = EntityId::from("A");
        let first = minutes(&[5])[0];
        assert_eq!(
            MinimumData::Offset(Duration::minutes(5)).resolve(&entity, first),
            Some(minutes(&[10])[0])
        );

        let per_entity = MinimumData::PerEntity(BTreeMap::from([(entity.clone(), first)]));
        assert_eq!(per_entity.resolve(&entity, first), Some(first));
        assert_eq!(per_entity.resolve(&EntityId::from("B"), first), None);
    }
}
