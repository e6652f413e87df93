use std::fmt;

use crate::Mode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Mqtt(paho_mqtt::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    Parse(serde::de::value::Error),
    EmptyWindow,
    EmptyTimer,
    WrongMode { device: String, required: Mode },
    LastValveOpen(String),
    NotAValve(String),
}

impl From<paho_mqtt::Error> for Error {
    fn from(err: paho_mqtt::Error) -> Self {
        Self::Mqtt(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde::de::value::Error> for Error {
    fn from(err: serde::de::value::Error) -> Self {
        Self::Parse(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mqtt(err) => write!(f, "mqtt error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Parse(err) => write!(f, "parse error: {err}"),
            Self::EmptyWindow => write!(f, "schedule start and end must differ"),
            Self::EmptyTimer => write!(f, "timer duration must be at least one minute"),
            Self::WrongMode { device, required } => {
                write!(f, "{device} must be in {required} mode")
            }
            Self::LastValveOpen(name) => {
                write!(f, "{name} is the last open valve in its group")
            }
            Self::NotAValve(name) => write!(f, "{name} does not take a run timer"),
        }
    }
}

impl std::error::Error for Error {}
