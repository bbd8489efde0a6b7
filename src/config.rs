//! Configuration for label searches.
//!
//! A [`SearchConfig`] is a JSON file holding the search parameters, so a
//! search can be repeated without restating every flag. Durations and
//! timestamps are stored as strings (`"1h"`, `"2014-01-01 00:00:00"`).

use crate::core::search::SearchOptions;
use crate::core::windowing::{parse_duration, MaximumData, MinimumData, WindowSize};
use crate::data::loader::{parse_timestamp, parse_timezone, LoadOptions};
use crate::data::types::EntityId;
use crate::error::{LabelError, Result};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Search parameters as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Field holding the entity key
    pub target_dataframe_name: String,

    /// Field holding the record timestamp
    pub time_index: String,

    /// Window length, a duration or a row count
    pub window_size: WindowSize,

    /// Step between cutoffs; the window size when unset
    pub gap: Option<WindowSize>,

    /// Offset from the first record (`"1d"`) or absolute timestamp
    pub minimum_data: Option<String>,

    /// First cutoff per entity; overrides `minimum_data` when not empty
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub minimum_data_per_entity: BTreeMap<String, String>,

    /// Offset from the first cutoff or absolute timestamp
    pub maximum_data: Option<String>,

    /// Labels per entity, -1 for no limit
    pub num_examples_per_instance: i64,

    pub drop_empty: bool,

    /// Name of the label column
    pub label_name: Option<String>,

    /// IANA zone for timestamps without an offset
    pub timezone: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_dataframe_name: "customer_id".to_string(),
            time_index: "time".to_string(),
            window_size: WindowSize::Duration(Duration::hours(1)),
            gap: None,
            minimum_data: None,
            minimum_data_per_entity: BTreeMap::new(),
            maximum_data: None,
            num_examples_per_instance: -1,
            drop_empty: true,
            label_name: None,
            timezone: "UTC".to_string(),
        }
    }
}

impl SearchConfig {
    /// Load configuration from the default location, or defaults if absent.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&content)
            .map_err(|e| LabelError::Parse(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded search config");
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a file, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("label-maker")
            .join("config.json")
    }

    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    /// Options for reading input records.
    pub fn load_options(&self) -> Result<LoadOptions> {
        Ok(LoadOptions {
            time_index: self.time_index.clone(),
            timezone: self.timezone()?,
        })
    }

    /// Convert to search options, parsing every duration and timestamp.
    pub fn to_options(&self) -> Result<SearchOptions> {
        let tz = self.timezone()?;

        let minimum_data = if !self.minimum_data_per_entity.is_empty() {
            let starts = self
                .minimum_data_per_entity
                .iter()
                .map(|(entity, at)| -> Result<(EntityId, DateTime<Utc>)> {
                    Ok((EntityId::new(entity.as_str()), parse_timestamp(at, tz)?))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Some(MinimumData::PerEntity(starts))
        } else {
            match self.minimum_data.as_deref() {
                None => None,
                Some(s) => Some(match parse_duration(s) {
                    Ok(offset) => MinimumData::Offset(offset),
                    Err(_) => MinimumData::Timestamp(parse_timestamp(s, tz)?),
                }),
            }
        };

        let maximum_data = match self.maximum_data.as_deref() {
            None => None,
            Some(s) => Some(match parse_duration(s) {
                Ok(offset) => MaximumData::Offset(offset),
                Err(_) => MaximumData::Timestamp(parse_timestamp(s, tz)?),
            }),
        };

        Ok(SearchOptions {
            num_examples_per_instance: SearchOptions::examples_from_i64(
                self.num_examples_per_instance,
            ),
            minimum_data,
            maximum_data,
            gap: self.gap,
            drop_empty: self.drop_empty,
            ..SearchOptions::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.window_size.to_string(), "1h");
        assert_eq!(config.num_examples_per_instance, -1);
        assert!(config.drop_empty);

        let options = config.to_options().unwrap();
        assert_eq!(options.num_examples_per_instance, None);
        assert!(options.minimum_data.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = SearchConfig {
            window_size: "10min".parse().unwrap(),
            gap: Some("5min".parse().unwrap()),
            num_examples_per_instance: 2,
            ..SearchConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = SearchConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"window_size": "3", "time_index": "ts"}"#).unwrap();

        let config = SearchConfig::load_from(&path).unwrap();
        assert_eq!(config.window_size, WindowSize::Rows(3));
        assert_eq!(config.time_index, "ts");
        assert_eq!(config.target_dataframe_name, "customer_id");
    }

    #[test]
    fn test_bounds_parse_as_offset_or_timestamp() {
        let config = SearchConfig {
            minimum_data: Some("2014-01-01 00:30".to_string()),
            maximum_data: Some("1d".to_string()),
            timezone: "America/New_York".to_string(),
            ..SearchConfig::default()
        };
        let options = config.to_options().unwrap();

        assert_eq!(
            options.minimum_data,
            Some(MinimumData::Timestamp(
                Utc.with_ymd_and_hms(2014, 1, 1, 5, 30, 0).unwrap()
            ))
        );
        assert_eq!(options.maximum_data, Some(MaximumData::Offset(Duration::days(1))));
    }

    #[test]
    fn test_per_entity_minimum_data() {
        let mut config = SearchConfig::default();
        config
            .minimum_data_per_entity
            .insert("1".to_string(), "2014-01-01".to_string());

        let Some(MinimumData::PerEntity(starts)) = config.to_options().unwrap().minimum_data else {
            panic!("expected per-entity minimum data");
        };
        assert_eq!(
            starts.get(&EntityId::from(1i64)),
            Some(&Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_values() {
        let config = SearchConfig {
            timezone: "Mars/Olympus".to_string(),
            ..SearchConfig::default()
        };
        assert!(matches!(config.to_options(), Err(LabelError::Parse(_))));

        let config = SearchConfig {
            maximum_data: Some("whenever".to_string()),
            ..SearchConfig::default()
        };
        assert!(config.to_options().is_err());
    }
}
