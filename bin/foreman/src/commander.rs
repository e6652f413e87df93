use log::{debug, error};
use paho_mqtt as mqtt;
use transport::{Command, ThresholdSettings, Topic};

const QOS: i32 = mqtt::QOS_1;

/// Sends command payloads on control topics over the shared connection.
///
/// "Sent" means handed to the transport: nothing is awaited, failures are
/// logged rather than returned, and confirmed device state only ever comes
/// back on the status topics.
#[derive(Clone)]
pub struct Commander {
    client: mqtt::AsyncClient,
    namespace: String,
}

impl Commander {
    pub fn new(client: mqtt::AsyncClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn send(&self, topic: &Topic, command: &Command) {
        self.send_raw(
            &topic.with_namespace(&self.namespace),
            command.to_string().into_bytes(),
        );
    }

    pub fn send_settings(&self, settings: &ThresholdSettings) {
        match serde_json::to_vec(settings) {
            Ok(payload) => {
                self.send_raw(&Topic::Settings.with_namespace(&self.namespace), payload)
            }
            Err(err) => error!("failed to encode settings: {err}"),
        }
    }

    pub fn send_raw(&self, topic: &str, payload: Vec<u8>) {
        let message = mqtt::MessageBuilder::new()
            .topic(topic)
            .payload(payload)
            .qos(QOS)
            .finalize();

        match self.client.try_publish(message) {
            Ok(_) => debug!("command handed to transport on '{}'", topic),
            Err(err) => error!("failed to publish on '{}': {}", topic, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use transport::PowerState;

    #[test]
    fn test_degraded_transport_never_panics() {
        // never connected: every publish fails into the log and the caller
        // carries on
        let client = mqtt::AsyncClient::new("tcp://127.0.0.1:1883").unwrap();
        let commander = Commander::new(client, "irrigation");

        commander.send(&Topic::MotorControl(1), &Command::Power(PowerState::On));
        commander.send(&Topic::MotorControl(1), &Command::Manual);
        commander.send_settings(&ThresholdSettings {
            v_thresh: 11.5,
            i_thresh: 2.0,
        });
        commander.send_raw("irrigation/valve/control", b"V1=ON".to_vec());
    }
}
