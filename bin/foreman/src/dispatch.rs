use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use paho_mqtt as mqtt;
use tokio::time;

use crate::MessageStream;

const QOS: i32 = mqtt::QOS_1;

type Handler = Arc<dyn Fn(&mqtt::Message) + Send + Sync>;

#[derive(Default)]
struct Registry {
    topics: HashMap<String, HashMap<u64, Handler>>,
    next_id: u64,
}

struct Shared {
    client: mqtt::AsyncClient,
    registry: Mutex<Registry>,
}

impl Shared {
    fn detach(&self, topic: &str, id: u64) {
        let last = {
            let mut registry = self.registry.lock().unwrap();

            let Some(handlers) = registry.topics.get_mut(topic) else {
                return;
            };

            handlers.remove(&id);

            if handlers.is_empty() {
                registry.topics.remove(topic);
                true
            } else {
                false
            }
        };

        if last {
            let _ = self.client.unsubscribe(topic);
            info!("Unsubscribed from topic: {}", topic);
        }
    }
}

/// Routes inbound messages to every handler registered for their topic.
///
/// Many widgets can watch the same topic over the one shared connection:
/// the broker-level subscribe is issued only when a topic gains its first
/// handler, and the unsubscribe only when it loses its last one. Broker
/// calls are fire-and-forget — a failed subscribe is logged and healed by
/// the reconnect path, which re-issues every registered topic.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(client: mqtt::AsyncClient) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register a handler. Dropping (or cancelling) the returned
    /// subscription detaches it again.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&mqtt::Message) + Send + Sync + 'static,
    {
        let (id, first) = {
            let mut registry = self.shared.registry.lock().unwrap();

            let id = registry.next_id;
            registry.next_id += 1;

            let handlers = registry.topics.entry(topic.to_string()).or_default();
            let first = handlers.is_empty();
            handlers.insert(id, Arc::new(handler));

            (id, first)
        };

        if first {
            // fire-and-forget; the reconnect path re-issues it on failure
            let _ = self.shared.client.subscribe(topic, QOS);
            info!("Subscribed to topic: {}", topic);
        }

        Subscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            id,
            active: true,
        }
    }

    /// Topics currently holding a broker-level subscription.
    pub fn active_topics(&self) -> Vec<String> {
        let registry = self.shared.registry.lock().unwrap();
        registry.topics.keys().cloned().collect()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        let registry = self.shared.registry.lock().unwrap();
        registry.topics.get(topic).map_or(0, HashMap::len)
    }

    pub(crate) fn dispatch(&self, message: &mqtt::Message) {
        // clone the handlers out so a handler can subscribe/cancel freely
        let handlers: Vec<Handler> = {
            let registry = self.shared.registry.lock().unwrap();

            match registry.topics.get(message.topic()) {
                Some(handlers) => handlers.values().cloned().collect(),
                None => {
                    debug!("message on unwatched topic {}", message.topic());
                    return;
                }
            }
        };

        for handler in handlers {
            handler(message);
        }
    }

    fn resubscribe(&self) {
        let topics = self.active_topics();
        if topics.is_empty() {
            return;
        }

        let qos = vec![QOS; topics.len()];
        let _ = self.shared.client.subscribe_many(&topics, &qos);
        info!("Resubscribed to topics: {:?}", topics);
    }

    /// Drain the shared inbound stream until the process exits. Intended to
    /// be `tokio::spawn`-ed once from main.
    pub async fn run(self, mut stream: MessageStream) {
        while let Some(msg_opt) = stream.next().await {
            if let Some(message) = msg_opt {
                self.dispatch(&message);
            } else {
                error!("Lost MQTT connection. Attempting reconnect.");
                while let Err(err) = self.shared.client.reconnect().await {
                    error!("Error MQTT reconnecting: {}", err);
                    time::sleep(Duration::from_millis(1000)).await;
                }

                // clean sessions forget their subscriptions
                self.resubscribe();
            }
        }

        warn!("message stream closed");
    }
}

/// A registered (topic, handler) pair. `cancel` is idempotent, runs on
/// drop, and is safe even while the connection is still coming up.
pub struct Subscription {
    shared: Arc<Shared>,
    topic: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn cancel(&mut self) {
        if self.active {
            self.active = false;
            self.shared.detach(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offline_dispatcher() -> Dispatcher {
        // never connected: broker calls fail into the log, which is all
        // the registry bookkeeping needs
        Dispatcher::new(mqtt::AsyncClient::new("tcp://127.0.0.1:1883").unwrap())
    }

    fn message(topic: &str, payload: &str) -> mqtt::Message {
        mqtt::Message::new(topic, payload, QOS)
    }

    #[test]
    fn test_ref_counted_subscribe() {
        let dispatcher = offline_dispatcher();

        let mut a = dispatcher.subscribe("irrigation/motor1/status", |_| {});
        let mut b = dispatcher.subscribe("irrigation/motor1/status", |_| {});
        let c = dispatcher.subscribe("irrigation/motor1/status", |_| {});

        assert_eq!(dispatcher.active_topics(), vec!["irrigation/motor1/status"]);
        assert_eq!(dispatcher.handler_count("irrigation/motor1/status"), 3);

        a.cancel();
        b.cancel();

        // two detached, one registrant left: still exactly one subscription
        assert_eq!(dispatcher.active_topics(), vec!["irrigation/motor1/status"]);
        assert_eq!(dispatcher.handler_count("irrigation/motor1/status"), 1);

        drop(c);

        assert!(dispatcher.active_topics().is_empty());
        assert_eq!(dispatcher.handler_count("irrigation/motor1/status"), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let dispatcher = offline_dispatcher();

        let keeper = dispatcher.subscribe("irrigation/valve/status", |_| {});
        let mut other = dispatcher.subscribe("irrigation/valve/status", |_| {});

        other.cancel();
        other.cancel();
        drop(other);

        assert_eq!(dispatcher.handler_count("irrigation/valve/status"), 1);
        drop(keeper);
    }

    #[test]
    fn test_dispatch_exact_topic_match() {
        let dispatcher = offline_dispatcher();

        let hits = Arc::new(AtomicUsize::new(0));

        let on_match = {
            let hits = hits.clone();
            dispatcher.subscribe("irrigation/motor1/status", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        let on_other = {
            let hits = hits.clone();
            dispatcher.subscribe("irrigation/motor2/status", move |_| {
                hits.fetch_add(100, Ordering::SeqCst);
            })
        };

        dispatcher.dispatch(&message("irrigation/motor1/status", "ON"));
        dispatcher.dispatch(&message("irrigation/motor1", "ON"));
        dispatcher.dispatch(&message("irrigation/motor1/status/extra", "ON"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(on_match);
        drop(on_other);
    }

    #[test]
    fn test_dispatch_fans_out_to_all_handlers() {
        let dispatcher = offline_dispatcher();

        let hits = Arc::new(AtomicUsize::new(0));

        let subscriptions: Vec<_> = (0..3)
            .map(|_| {
                let hits = hits.clone();
                dispatcher.subscribe("irrigation/mqtt_mode", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        dispatcher.dispatch(&message("irrigation/mqtt_mode", "WIFI"));

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        drop(subscriptions);
    }

    #[test]
    fn test_cancelled_handler_no_longer_fires() {
        let dispatcher = offline_dispatcher();

        let hits = Arc::new(AtomicUsize::new(0));

        let mut subscription = {
            let hits = hits.clone();
            dispatcher.subscribe("irrigation/valve/status", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        subscription.cancel();
        dispatcher.dispatch(&message("irrigation/valve/status", "V1=ON"));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
