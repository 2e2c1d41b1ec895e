use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::item::ParseEnumError;

/// Identifier of an iteration (decimal row id assigned by the store).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationId(String);

impl IterationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn from_row(row: i64) -> Self {
        Self(row.to_string())
    }

    #[must_use]
    pub fn row(&self) -> Option<i64> {
        self.0.parse::<i64>().ok().filter(|row| *row > 0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationState {
    #[default]
    New,
    Start,
    Close,
}

impl IterationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Start => "start",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IterationState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "start" | "started" => Ok(Self::Start),
            "close" | "closed" => Ok(Self::Close),
            _ => Err(ParseEnumError {
                expected: "iteration state",
                got: s.to_string(),
            }),
        }
    }
}

/// A time-boxed planning bucket inside a space. Iterations nest: a child
/// always lives in its parent's space.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Iteration {
    pub id: IterationId,
    pub space_id: String,
    pub parent_id: Option<IterationId>,
    pub name: String,
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub state: IterationState,
}

/// Work item totals for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IterationCounts {
    pub total: u64,
    pub closed: u64,
}
