use std::fmt;
use std::str::FromStr;

use serde::de::{value, Error};
use serde::{Deserialize, Serialize};

use crate::{TimeOfDay, TimeWindow};

/// Confirmed device power state. Firmware reports it in several spellings
/// (`ON`, `1`, `true`), so parsing is tolerant; the canonical wire form is
/// the uppercase word.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "ON"),
            PowerState::Off => write!(f, "OFF"),
        }
    }
}

impl FromStr for PowerState {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("on") || s == "1" || s.eq_ignore_ascii_case("true") {
            Ok(PowerState::On)
        } else if s.eq_ignore_ascii_case("off") || s == "0" || s.eq_ignore_ascii_case("false") {
            Ok(PowerState::Off)
        } else {
            Err(value::Error::custom(format!(
                "unrecognized power state {:?}",
                s
            )))
        }
    }
}

/// One `Vk=ON`/`Vk=OFF` clause of the multiplexed valve topic pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValveClause {
    pub key: String,
    pub state: PowerState,
}

impl fmt::Display for ValveClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.state)
    }
}

impl FromStr for ValveClause {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, state) = s
            .split_once('=')
            .ok_or_else(|| value::Error::custom(format!("expected key=value, got {:?}", s)))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(value::Error::custom("empty valve key"));
        }

        Ok(Self {
            key: key.to_string(),
            state: state.trim().parse()?,
        })
    }
}

/// Parse a full valve status payload, e.g. `V1=ON,V2=OFF`. One malformed
/// clause poisons the whole message so stale state is never half-applied.
pub fn parse_valve_status(payload: &str) -> Result<Vec<ValveClause>, value::Error> {
    payload
        .split(',')
        .map(|clause| clause.trim().parse())
        .collect()
}

/// Control-topic payloads, in the exact wire spelling the devices expect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Power(PowerState),
    Manual,
    Auto(TimeWindow),
    Valve(ValveClause),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Power(state) => write!(f, "{}", state),
            Command::Manual => write!(f, "MANUAL"),
            Command::Auto(window) => write!(f, "AUTO,{},{}", window.start(), window.end()),
            Command::Valve(clause) => write!(f, "{}", clause),
        }
    }
}

impl FromStr for Command {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => return Ok(Command::Power(PowerState::On)),
            "OFF" => return Ok(Command::Power(PowerState::Off)),
            "MANUAL" => return Ok(Command::Manual),
            _ => (),
        }

        if let Some(times) = s.strip_prefix("AUTO,") {
            let (start, end) = times
                .split_once(',')
                .ok_or_else(|| value::Error::custom(format!("expected AUTO,start,end: {:?}", s)))?;

            let start: TimeOfDay = start.parse()?;
            let end: TimeOfDay = end.parse()?;

            return Ok(Command::Auto(TimeWindow::new(start, end)?));
        }

        if s.contains('=') {
            return Ok(Command::Valve(s.parse()?));
        }

        Err(value::Error::custom(format!("unrecognized command {:?}", s)))
    }
}

/// Device-side uplink in use, reported on the connectivity topic.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Wifi,
    Gsm,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMode::Wifi => write!(f, "WIFI"),
            LinkMode::Gsm => write!(f, "GSM"),
        }
    }
}

impl FromStr for LinkMode {
    type Err = value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("wifi") {
            Ok(LinkMode::Wifi)
        } else if s.eq_ignore_ascii_case("gsm") {
            Ok(LinkMode::Gsm)
        } else {
            Err(value::Error::custom(format!("unrecognized link mode {:?}", s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_tolerant_parse() {
        for on in ["ON", "on", "On", "1", "true", "TRUE"] {
            assert_eq!(on.parse::<PowerState>().unwrap(), PowerState::On, "{}", on);
        }

        for off in ["OFF", "off", "0", "false", "False"] {
            assert_eq!(off.parse::<PowerState>().unwrap(), PowerState::Off, "{}", off);
        }

        assert!("maybe".parse::<PowerState>().is_err());
        assert!("2".parse::<PowerState>().is_err());
    }

    #[test]
    fn test_power_state_wire_form() {
        assert_eq!(PowerState::On.to_string(), "ON");
        assert_eq!(PowerState::Off.to_string(), "OFF");
    }

    #[test]
    fn test_valve_clause_round_trip() {
        let clause: ValveClause = "V1=ON".parse().unwrap();
        assert_eq!(clause.key, "V1");
        assert_eq!(clause.state, PowerState::On);
        assert_eq!(clause.to_string(), "V1=ON");

        assert!("V1".parse::<ValveClause>().is_err());
        assert!("=ON".parse::<ValveClause>().is_err());
        assert!("V1=BLUE".parse::<ValveClause>().is_err());
    }

    #[test]
    fn test_valve_status_payload() {
        let clauses = parse_valve_status("V1=ON,V2=OFF").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].key, "V1");
        assert_eq!(clauses[0].state, PowerState::On);
        assert_eq!(clauses[1].key, "V2");
        assert_eq!(clauses[1].state, PowerState::Off);

        // whitespace between clauses is tolerated, garbage is not
        assert!(parse_valve_status("V1=ON, V2=OFF").is_ok());
        assert!(parse_valve_status("V1=ON,V2").is_err());
        assert!(parse_valve_status("").is_err());
    }

    #[test]
    fn test_command_round_trip() {
        let cases = ["ON", "OFF", "MANUAL", "AUTO,06:00,18:00", "V2=OFF"];

        for case in cases {
            let command: Command = case.parse().unwrap();
            assert_eq!(command.to_string(), case);
        }
    }

    #[test]
    fn test_command_rejects_noise() {
        assert!("on".parse::<Command>().is_err());
        assert!("AUTO,06:00".parse::<Command>().is_err());
        assert!("AUTO,06:00,06:00".parse::<Command>().is_err());
        assert!("RESET".parse::<Command>().is_err());
    }

    #[test]
    fn test_link_mode() {
        assert_eq!("WIFI".parse::<LinkMode>().unwrap(), LinkMode::Wifi);
        assert_eq!("gsm".parse::<LinkMode>().unwrap(), LinkMode::Gsm);
        assert_eq!(LinkMode::Wifi.to_string(), "WIFI");
        assert!("lora".parse::<LinkMode>().is_err());
    }
}
