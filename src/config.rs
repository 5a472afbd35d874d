//! Engine configuration with environment overrides.
//!
//! - `TASKGRAPH_AUTO_COMPLETE_PARENTS`: default for `allowParentAutoComplete` (true)
//! - `TASKGRAPH_CUSTOM_RECURRENCE_UNIT`: day | week | month | year (unset)
//! - `TASKGRAPH_MAX_CASCADE_DEPTH`: cascade hop limit (64)
//! - `TASKGRAPH_CONFLICT_RETRIES`: retries after a version conflict (1)

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TgError};

pub const ENV_DB_PATH: &str = "TASKGRAPH_DB_PATH";
pub const ENV_AUTO_COMPLETE_PARENTS: &str = "TASKGRAPH_AUTO_COMPLETE_PARENTS";
pub const ENV_CUSTOM_RECURRENCE_UNIT: &str = "TASKGRAPH_CUSTOM_RECURRENCE_UNIT";
pub const ENV_MAX_CASCADE_DEPTH: &str = "TASKGRAPH_MAX_CASCADE_DEPTH";
pub const ENV_CONFLICT_RETRIES: &str = "TASKGRAPH_CONFLICT_RETRIES";
/// `tracing` filter directives for the CLI (default `warn`)
pub const ENV_LOG: &str = "TASKGRAPH_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceUnit {
    Day,
    Week,
    Month,
    Year,
}

impl FromStr for RecurrenceUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches('s') {
            "day" => Ok(RecurrenceUnit::Day),
            "week" => Ok(RecurrenceUnit::Week),
            "month" => Ok(RecurrenceUnit::Month),
            "year" => Ok(RecurrenceUnit::Year),
            other => Err(format!("unknown recurrence unit '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_allow_parent_auto_complete: bool,
    /// Unit for `Custom` recurrence when no resolver is installed
    pub custom_recurrence_unit: Option<RecurrenceUnit>,
    pub max_cascade_depth: usize,
    pub conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_allow_parent_auto_complete: true,
            custom_recurrence_unit: None,
            max_cascade_depth: 64,
            conflict_retries: 1,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `TASKGRAPH_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_AUTO_COMPLETE_PARENTS) {
            config.default_allow_parent_auto_complete = parse_bool(&raw)
                .ok_or_else(|| TgError::validation("TASKGRAPH_AUTO_COMPLETE_PARENTS", raw))?;
        }
        if let Some(raw) = lookup(ENV_CUSTOM_RECURRENCE_UNIT) {
            let unit = raw
                .parse()
                .map_err(|e: String| TgError::validation("TASKGRAPH_CUSTOM_RECURRENCE_UNIT", e))?;
            config.custom_recurrence_unit = Some(unit);
        }
        if let Some(raw) = lookup(ENV_MAX_CASCADE_DEPTH) {
            config.max_cascade_depth = raw
                .trim()
                .parse()
                .map_err(|_| TgError::validation("TASKGRAPH_MAX_CASCADE_DEPTH", raw))?;
        }
        if let Some(raw) = lookup(ENV_CONFLICT_RETRIES) {
            config.conflict_retries = raw
                .trim()
                .parse()
                .map_err(|_| TgError::validation("TASKGRAPH_CONFLICT_RETRIES", raw))?;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Determine the database path.
///
/// Resolution order:
/// 1. TASKGRAPH_DB_PATH env var (if set)
/// 2. CWD/.taskgraph/tasks.db
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        return PathBuf::from(path);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.join(".taskgraph").join("tasks.db")
}
