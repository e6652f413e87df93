use std::fmt;
use std::str::FromStr;

use serde::de::{value, Error};
use serde::{Deserialize, Serialize};

/// Wall-clock time of day at minute resolution, the unit every schedule
/// window is expressed in.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, value::Error> {
        if hour > 23 {
            return Err(value::Error::custom(format!("hour {} out of range", hour)));
        }

        if minute > 59 {
            return Err(value::Error::custom(format!(
                "minute {} out of range",
                minute
            )));
        }

        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| value::Error::custom(format!("expected HH:MM, got {:?}", s)))?;

        let hour = hour
            .parse()
            .map_err(|_| value::Error::custom(format!("invalid hour {:?}", hour)))?;
        let minute = minute
            .parse()
            .map_err(|_| value::Error::custom(format!("invalid minute {:?}", minute)))?;

        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = value::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> String {
        time.to_string()
    }
}

/// Recurring daily on/off window. `end <= start` is not representable:
/// equal endpoints are rejected at construction, and `end < start` means
/// the window spans midnight.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self, value::Error> {
        if start == end {
            return Err(value::Error::custom(
                "schedule start and end must not be equal",
            ));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    /// Half-open containment: on at the exact start minute, off at the
    /// exact end minute, wrapping around midnight when `end < start`.
    pub fn contains(&self, time: TimeOfDay) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}
