use std::fmt;
use std::str::FromStr;

use serde::de::{value, Error};

/// Per-device-family topic layout under a configurable namespace segment.
///
/// Motors get a dedicated control/status pair each; all valves share one
/// multiplexed pair and identify themselves inside the payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    MotorControl(u8),
    MotorStatus(u8),
    ValveControl,
    ValveStatus,
    LinkMode,
    Settings,
}

impl Topic {
    /// Full broker topic, e.g. `irrigation/motor1/control`.
    pub fn with_namespace(&self, namespace: &str) -> String {
        format!("{}/{}", namespace, self)
    }

    /// Parse a full broker topic back, checking the namespace segment.
    pub fn parse(namespace: &str, s: &str) -> Result<Topic, value::Error> {
        let suffix = s
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                value::Error::custom(format!("expected namespace {:?}, got {:?}", namespace, s))
            })?;

        suffix.parse()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::MotorControl(index) => write!(f, "motor{}/control", index),
            Topic::MotorStatus(index) => write!(f, "motor{}/status", index),
            Topic::ValveControl => write!(f, "valve/control"),
            Topic::ValveStatus => write!(f, "valve/status"),
            Topic::LinkMode => write!(f, "mqtt_mode"),
            Topic::Settings => write!(f, "settings"),
        }
    }
}

impl FromStr for Topic {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Topic, Self::Err> {
        const ERROR_MSG: &str = "supported topics are motor<N>/control, motor<N>/status, \
            valve/control, valve/status, mqtt_mode and settings";

        match s {
            "valve/control" => return Ok(Topic::ValveControl),
            "valve/status" => return Ok(Topic::ValveStatus),
            "mqtt_mode" => return Ok(Topic::LinkMode),
            "settings" => return Ok(Topic::Settings),
            _ => (),
        }

        let (device, channel) = s.split_once('/').ok_or_else(|| value::Error::custom(ERROR_MSG))?;

        let index = device
            .strip_prefix("motor")
            .and_then(|index| index.parse().ok())
            .ok_or_else(|| value::Error::custom(ERROR_MSG))?;

        match channel {
            "control" => Ok(Topic::MotorControl(index)),
            "status" => Ok(Topic::MotorStatus(index)),
            _ => Err(value::Error::custom(ERROR_MSG)),
        }
    }
}
