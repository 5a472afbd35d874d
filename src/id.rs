//! Task identifiers: a ULID rendered as `task_01ARZ3NDEKTSV4RRFFQ69G5FAV`.
//!
//! Ids order by creation time, and the text form sorts the same way, so
//! `ORDER BY id` in SQL and `Ord` on `TaskId` agree.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdParseError {
    #[error("Invalid ULID format: {0}")]
    InvalidUlid(String),
    #[error("Missing prefix: expected '{expected}', got '{actual}'")]
    MissingPrefix {
        expected: &'static str,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(Ulid);

impl TaskId {
    pub const PREFIX: &'static str = "task_";

    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

/// Lowercase ULIDs are accepted; the canonical form is uppercase.
impl FromStr for TaskId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| IdParseError::MissingPrefix {
                expected: Self::PREFIX,
                actual: s.to_string(),
            })?;
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|_| IdParseError::InvalidUlid(s.to_string()))
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

impl ToSql for TaskId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for TaskId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: IdParseError| FromSqlError::Other(Box::new(e)))
    }
}
