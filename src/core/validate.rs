//! Field constraints checked before any repository call.

use chrono::{DateTime, Utc};

use crate::error::{Result, TgError};
use crate::types::{Recurrence, TITLE_MAX_CHARS, TITLE_MIN_CHARS};

/// Trimmed title, 3 to 200 characters.
pub fn title(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&len) {
        return Err(TgError::validation(
            "title",
            format!("must be {TITLE_MIN_CHARS}-{TITLE_MAX_CHARS} characters, got {len}"),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn duration(minutes: Option<i64>) -> Result<()> {
    match minutes {
        Some(m) if m < 0 => Err(TgError::validation(
            "estimatedDurationMinutes",
            format!("must be non-negative, got {m}"),
        )),
        _ => Ok(()),
    }
}

pub fn schedule(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(TgError::validation(
            "scheduledEnd",
            "must not be before scheduledStart",
        )),
        _ => Ok(()),
    }
}

pub fn recurrence(pattern: Option<&Recurrence>) -> Result<()> {
    let Some(pattern) = pattern else {
        return Ok(());
    };
    if pattern.interval == 0 {
        return Err(TgError::validation("recurrence.interval", "must be positive"));
    }
    if pattern.end_date.is_some_and(|end| end < pattern.start_date) {
        return Err(TgError::validation(
            "recurrence.endDate",
            "must not be before startDate",
        ));
    }
    Ok(())
}
