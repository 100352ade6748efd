//! Environment-backed timeline configuration.

use std::env;

use thiserror::Error;

use crate::history::bounded_paginate_limit;

const DEFAULT_WINDOW_SIZE: usize = 200;
const DEFAULT_INITIAL_HISTORY_LIMIT: u16 = 50;
const DEFAULT_PAGE_SIZE: u16 = 50;
const DEFAULT_PAGINATION_LIMIT_CAP: u16 = 100;
const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Tuning shared by the timeline store and its runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineConfig {
    /// Maximum number of messages in the active window.
    pub window_size: usize,
    /// Messages requested by the initial backfill.
    pub initial_history_limit: u16,
    /// Messages requested per older history page.
    pub page_size: u16,
    /// Server-side cap applied to every history request.
    pub pagination_limit_cap: u16,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            initial_history_limit: DEFAULT_INITIAL_HISTORY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            pagination_limit_cap: DEFAULT_PAGINATION_LIMIT_CAP,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl TimelineConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let window_size =
            parse_with_default("TIMELINE_WINDOW_SIZE", DEFAULT_WINDOW_SIZE, &mut lookup)?;
        let initial_history_limit = parse_with_default(
            "TIMELINE_INITIAL_HISTORY_LIMIT",
            DEFAULT_INITIAL_HISTORY_LIMIT,
            &mut lookup,
        )?;
        let page_size = parse_with_default("TIMELINE_PAGE_SIZE", DEFAULT_PAGE_SIZE, &mut lookup)?;
        let pagination_limit_cap = parse_with_default(
            "TIMELINE_PAGINATION_LIMIT_CAP",
            DEFAULT_PAGINATION_LIMIT_CAP,
            &mut lookup,
        )?;

        reject_zero("TIMELINE_WINDOW_SIZE", window_size)?;
        reject_zero("TIMELINE_INITIAL_HISTORY_LIMIT", usize::from(initial_history_limit))?;
        reject_zero("TIMELINE_PAGE_SIZE", usize::from(page_size))?;
        reject_zero("TIMELINE_PAGINATION_LIMIT_CAP", usize::from(pagination_limit_cap))?;

        Ok(Self {
            window_size,
            initial_history_limit,
            page_size,
            pagination_limit_cap,
            ..Self::default()
        })
    }

    /// Initial backfill limit after server caps.
    pub fn bounded_initial_limit(&self) -> u16 {
        bounded_paginate_limit(self.initial_history_limit, self.pagination_limit_cap)
    }

    /// Older-page limit after server caps.
    pub fn bounded_page_size(&self) -> u16 {
        bounded_paginate_limit(self.page_size, self.pagination_limit_cap)
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value could not be parsed or is out of range.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        reason: err.to_string(),
        value,
    })
}

fn reject_zero(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TimelineConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TimelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn uses_defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("empty config should parse");
        assert_eq!(cfg, TimelineConfig::default());
        assert_eq!(cfg.window_size, 200);
        assert_eq!(cfg.page_size, 50);
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("TIMELINE_WINDOW_SIZE", "120"),
            ("TIMELINE_INITIAL_HISTORY_LIMIT", " 40 "),
            ("TIMELINE_PAGE_SIZE", "25"),
            ("TIMELINE_PAGINATION_LIMIT_CAP", "30"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.window_size, 120);
        assert_eq!(cfg.initial_history_limit, 40);
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.pagination_limit_cap, 30);
    }

    #[test]
    fn applies_server_cap_to_request_limits() {
        let cfg = config_from_pairs(&[
            ("TIMELINE_INITIAL_HISTORY_LIMIT", "80"),
            ("TIMELINE_PAGE_SIZE", "60"),
            ("TIMELINE_PAGINATION_LIMIT_CAP", "30"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.bounded_initial_limit(), 30);
        assert_eq!(cfg.bounded_page_size(), 30);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("TIMELINE_PAGE_SIZE", "abc")])
            .expect_err("invalid page size should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "TIMELINE_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_window() {
        let err = config_from_pairs(&[("TIMELINE_WINDOW_SIZE", "0")])
            .expect_err("zero window should fail");
        assert_eq!(
            err.to_string(),
            "invalid TIMELINE_WINDOW_SIZE='0': must be at least 1"
        );
    }
}
