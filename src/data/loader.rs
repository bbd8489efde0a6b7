//! Loading records from JSON files.
//!
//! Accepts either a JSON array of objects or JSON Lines. The time index field is
//! normalised to [`Value::Timestamp`]; naive timestamp strings are interpreted in
//! the configured time zone.

use crate::data::types::{Record, Value};
use crate::error::{LabelError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::path::Path;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp string.
///
/// RFC3339 strings carry their own offset; anything else is read as a naive
/// date or date-time in `tz`.
pub fn parse_timestamp(s: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| LabelError::Parse(format!("unrecognised timestamp '{s}'")))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| LabelError::Parse(format!("timestamp '{s}' does not exist in {tz}")))
}

/// Parse an IANA time zone name such as `"UTC"` or `"America/New_York"`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| LabelError::Parse(format!("unknown time zone '{name}': {e}")))
}

/// Options controlling how records are read.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Field holding each record's timestamp
    pub time_index: String,
    /// Zone used for timestamps without an offset
    pub timezone: Tz,
}

impl LoadOptions {
    pub fn new(time_index: impl Into<String>) -> Self {
        Self {
            time_index: time_index.into(),
            timezone: Tz::UTC,
        }
    }
}

/// Read records from a JSON array or JSON Lines document.
pub fn parse_records(content: &str, options: &LoadOptions) -> Result<Vec<Record>> {
    let trimmed = content.trim_start();
    let mut records: Vec<Record> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?
    };

    for (index, record) in records.iter_mut().enumerate() {
        normalise_time(record, index, options)?;
    }

    Ok(records)
}

/// Read records from a file.
pub fn load_records(path: &Path, options: &LoadOptions) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)?;
    let records = parse_records(&content, options)?;
    tracing::debug!(path = %path.display(), count = records.len(), "loaded records");
    Ok(records)
}

fn normalise_time(record: &mut Record, index: usize, options: &LoadOptions) -> Result<()> {
    let field = options.time_index.as_str();
    let parsed = match record.get(field) {
        Some(Value::Timestamp(_)) => return Ok(()),
        Some(Value::Text(s)) => parse_timestamp(s, options.timezone).map_err(|e| {
            LabelError::InvalidRecord {
                index,
                reason: format!("field '{field}': {e}"),
            }
        })?,
        Some(other) => {
            return Err(LabelError::InvalidRecord {
                index,
                reason: format!("field '{field}' must be a timestamp, found {}", other.kind()),
            })
        }
        None => {
            return Err(LabelError::InvalidRecord {
                index,
                reason: format!("missing time index field '{field}'"),
            })
        }
    };

    record
        .fields_mut()
        .insert(field.to_string(), Value::Timestamp(parsed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2014, 1, 1, 0, 45, 0).unwrap();
        assert_eq!(parse_timestamp("2014-01-01 00:45:00", Tz::UTC).unwrap(), expected);
        assert_eq!(parse_timestamp("2014-01-01T00:45:00Z", Tz::UTC).unwrap(), expected);
        assert_eq!(parse_timestamp("2014-01-01 00:45", Tz::UTC).unwrap(), expected);
        assert_eq!(
            parse_timestamp("2014-01-01", Tz::UTC).unwrap(),
            Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_timestamp("yesterday", Tz::UTC).is_err());
    }

    #[test]
    fn test_naive_timestamps_use_zone() {
        let tz = parse_timezone("America/New_York").unwrap();
        let t = parse_timestamp("2014-01-01 00:00:00", tz).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2014, 1, 1, 5, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_json_lines() {
        let content = r#"
{"customer_id": 1, "time": "2014-01-01 00:00:00", "amount": 10.5}

{"customer_id": 2, "time": "2014-01-01T00:01:00Z", "amount": 3}
"#;
        let records = parse_records(content, &LoadOptions::new("time")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp("time").is_some());
        assert_eq!(records[1].get("amount"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_parse_json_array_rejects_missing_time() {
        let content = r#"[{"customer_id": 1, "time": "2014-01-01"}, {"customer_id": 2}]"#;
        let err = parse_records(content, &LoadOptions::new("time")).unwrap_err();
        assert!(matches!(err, LabelError::InvalidRecord { index: 1, .. }));
    }
}
