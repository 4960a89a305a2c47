//! Schedules limiting how often a resource is applied
//!
//! A schedule is matched against the time the resource was last checked,
//! as recorded in the persistence store. A resource that was never checked
//! always matches, unless its period is `never`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a schedule window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// The resource is never applied
    Never,
}

impl Period {
    /// Window length; `None` for [`Period::Never`]
    pub fn length(&self) -> Option<TimeDelta> {
        match self {
            Self::Hourly => Some(TimeDelta::hours(1)),
            Self::Daily => Some(TimeDelta::days(1)),
            Self::Weekly => Some(TimeDelta::days(7)),
            Self::Monthly => Some(TimeDelta::days(30)),
            Self::Never => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "invalid period '{other}': expected hourly, daily, weekly, monthly or never"
            )),
        }
    }
}

fn default_repeat() -> u32 {
    1
}

/// How often a resource may be applied: `repeat` times per `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schedule {
    pub period: Period,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

impl Schedule {
    pub fn new(period: Period) -> Self {
        Self { period, repeat: 1 }
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Shortest time between two applications
    pub fn interval(&self) -> Option<TimeDelta> {
        let length = self.period.length()?;
        let repeat = i32::try_from(self.repeat.max(1)).unwrap_or(i32::MAX);
        Some(length / repeat)
    }

    /// Whether a resource last checked at `last_checked` may be applied at `now`
    pub fn matches(&self, last_checked: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.interval() else {
            return false;
        };
        match last_checked {
            None => true,
            Some(last) => now - last >= interval,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repeat > 1 {
            write!(f, "{} x{}", self.period, self.repeat)
        } else {
            write!(f, "{}", self.period)
        }
    }
}
