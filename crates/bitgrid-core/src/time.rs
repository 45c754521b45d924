//! Time quantums and the view names they produce.
//!
//! A time field writes every bit to the standard view and additionally
//! to one view per unit of its quantum, named after the bucket the
//! timestamp falls in (`standard_2024`, `standard_202403`, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Name of the view every field writes to.
pub const VIEW_STANDARD: &str = "standard";

/// Name of the view holding bit-sliced integer values.
pub const VIEW_BSI: &str = "bsig";

const UNITS: &str = "YMDH";

/// An ordered, contiguous run of `Y`, `M`, `D`, `H`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeQuantum(String);

impl TimeQuantum {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn units(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars()
    }
}

impl FromStr for TimeQuantum {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let q = s.to_ascii_uppercase();
        if q.is_empty() || !UNITS.contains(q.as_str()) {
            return Err(StorageError::InvalidOption(format!(
                "invalid time quantum {s:?}"
            )));
        }
        Ok(Self(q))
    }
}

impl TryFrom<String> for TimeQuantum {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeQuantum> for String {
    fn from(q: TimeQuantum) -> Self {
        q.0
    }
}

impl fmt::Display for TimeQuantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// View name for one time unit, e.g. `standard_20240317` for `D`.
pub fn view_by_time_unit(name: &str, t: &DateTime<Utc>, unit: char) -> Option<String> {
    let suffix = match unit {
        'Y' => t.format("%Y"),
        'M' => t.format("%Y%m"),
        'D' => t.format("%Y%m%d"),
        'H' => t.format("%Y%m%d%H"),
        _ => return None,
    };
    Some(format!("{name}_{suffix}"))
}

/// All time views a timestamp maps to under `quantum`.
pub fn views_by_time(name: &str, t: &DateTime<Utc>, quantum: &TimeQuantum) -> Vec<String> {
    quantum
        .units()
        .filter_map(|unit| view_by_time_unit(name, t, unit))
        .collect()
}

/// Converts an import timestamp (nanoseconds since the epoch) to a time.
/// Zero means "no timestamp".
pub fn from_unix_nanos(ts: i64) -> Option<DateTime<Utc>> {
    if ts == 0 {
        None
    } else {
        Some(Utc.timestamp_nanos(ts))
    }
}
