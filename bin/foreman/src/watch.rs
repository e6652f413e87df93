use std::sync::Arc;

use log::warn;
use transport::{parse_valve_status, LinkMode, PowerState, Topic};

use crate::{Dispatcher, StateStore, Subscription};

/// Confirmed motor state. A malformed payload is logged and dropped; the
/// last good state stays in place.
pub fn watch_motor_status(
    dispatcher: &Dispatcher,
    namespace: &str,
    index: u8,
    store: Arc<StateStore>,
) -> Subscription {
    let topic = Topic::MotorStatus(index).with_namespace(namespace);
    let name = format!("motor{}", index);

    dispatcher.subscribe(&topic, move |message| {
        let payload = message.payload_str();

        match payload.trim().parse::<PowerState>() {
            Ok(state) => store.update(&name, |record| record.is_on = state.is_on()),
            Err(err) => warn!("{}: dropping status {:?}: {}", name, payload, err),
        }
    })
}

/// Confirmed valve states, multiplexed as `V1=ON,V2=OFF` clauses on the
/// shared status topic.
pub fn watch_valve_status(
    dispatcher: &Dispatcher,
    namespace: &str,
    store: Arc<StateStore>,
) -> Subscription {
    let topic = Topic::ValveStatus.with_namespace(namespace);

    dispatcher.subscribe(&topic, move |message| {
        let payload = message.payload_str();

        match parse_valve_status(payload.trim()) {
            Ok(clauses) => {
                for clause in clauses {
                    store.update(&clause.key, |record| record.is_on = clause.state.is_on());
                }
            }
            Err(err) => warn!("dropping valve status {:?}: {}", payload, err),
        }
    })
}

/// Device-side uplink in use (`WIFI`/`GSM`).
pub fn watch_link_mode(
    dispatcher: &Dispatcher,
    namespace: &str,
    store: Arc<StateStore>,
) -> Subscription {
    let topic = Topic::LinkMode.with_namespace(namespace);

    dispatcher.subscribe(&topic, move |message| {
        let payload = message.payload_str();

        match payload.trim().parse::<LinkMode>() {
            Ok(mode) => store.set_link_mode(mode),
            Err(err) => warn!("dropping link mode {:?}: {}", payload, err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use paho_mqtt as mqtt;

    fn setup() -> (Dispatcher, Arc<StateStore>) {
        let client = mqtt::AsyncClient::new("tcp://127.0.0.1:1883").unwrap();
        (Dispatcher::new(client), Arc::new(StateStore::in_memory()))
    }

    fn message(topic: &str, payload: &str) -> mqtt::Message {
        mqtt::Message::new(topic, payload, mqtt::QOS_1)
    }

    #[test]
    fn test_motor_status_updates_store() {
        let (dispatcher, store) = setup();
        let _watch = watch_motor_status(&dispatcher, "irrigation", 1, store.clone());

        dispatcher.dispatch(&message("irrigation/motor1/status", "ON"));
        assert!(store.is_on("motor1"));

        // firmware spellings vary
        dispatcher.dispatch(&message("irrigation/motor1/status", "0"));
        assert!(!store.is_on("motor1"));

        dispatcher.dispatch(&message("irrigation/motor1/status", "true"));
        assert!(store.is_on("motor1"));
    }

    #[test]
    fn test_malformed_motor_status_keeps_last_state() {
        let (dispatcher, store) = setup();
        let _watch = watch_motor_status(&dispatcher, "irrigation", 1, store.clone());

        dispatcher.dispatch(&message("irrigation/motor1/status", "ON"));
        dispatcher.dispatch(&message("irrigation/motor1/status", "garbled"));

        assert!(store.is_on("motor1"));
    }

    #[test]
    fn test_valve_status_applies_every_clause() {
        let (dispatcher, store) = setup();
        let _watch = watch_valve_status(&dispatcher, "irrigation", store.clone());

        dispatcher.dispatch(&message("irrigation/valve/status", "V1=ON,V2=OFF"));

        assert!(store.is_on("V1"));
        assert!(!store.is_on("V2"));
    }

    #[test]
    fn test_malformed_valve_status_dropped_whole() {
        let (dispatcher, store) = setup();
        let _watch = watch_valve_status(&dispatcher, "irrigation", store.clone());

        dispatcher.dispatch(&message("irrigation/valve/status", "V1=ON,V2=OFF"));
        dispatcher.dispatch(&message("irrigation/valve/status", "V1=OFF,V2"));

        // the bad message must not half-apply
        assert!(store.is_on("V1"));
        assert!(!store.is_on("V2"));
    }

    #[test]
    fn test_link_mode() {
        let (dispatcher, store) = setup();
        let _watch = watch_link_mode(&dispatcher, "irrigation", store.clone());

        dispatcher.dispatch(&message("irrigation/mqtt_mode", "GSM"));
        assert_eq!(store.link_mode(), Some(LinkMode::Gsm));

        dispatcher.dispatch(&message("irrigation/mqtt_mode", "satellite"));
        assert_eq!(store.link_mode(), Some(LinkMode::Gsm));
    }
}
