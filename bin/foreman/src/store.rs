use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use log::{error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use transport::{LinkMode, TimeOfDay};

use crate::Mode;

const EVENT_CAPACITY: usize = 32;

/// Everything persisted per device, keyed by display name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DeviceRecord {
    pub is_on: bool,
    pub mode: Mode,
    pub on_time: TimeOfDay,
    pub off_time: TimeOfDay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_duration: Option<u32>,
    #[serde(default)]
    pub timer_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_remaining: Option<u32>,
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            is_on: false,
            mode: Mode::Manual,
            on_time: TimeOfDay::new(6, 0).expect("in range"),
            off_time: TimeOfDay::new(18, 0).expect("in range"),
            timer_duration: None,
            timer_active: false,
            timer_remaining: None,
        }
    }
}

/// Broadcast to every open view whenever the store changes, so nothing
/// has to poll.
#[derive(Clone, Debug, PartialEq)]
pub enum StateEvent {
    DeviceChanged { name: String },
    DeviceRemoved { name: String },
    LinkModeChanged { mode: LinkMode },
}

#[derive(Default, Deserialize, Serialize)]
struct Inner {
    devices: HashMap<String, DeviceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link_mode: Option<LinkMode>,
}

/// Cross-view store of last known device state.
///
/// Reads seed schedule parameters, writes reflect confirmed status (and
/// optimistic manual toggles). Persistence failures are logged, never
/// surfaced: the in-memory copy stays the source the views render from.
pub struct StateStore {
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
    events: broadcast::Sender<StateEvent>,
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self::with_inner(None, Inner::default())
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let inner = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(inner) => inner,
                Err(err) => {
                    warn!("corrupt state file {}: {err}; starting fresh", path.display());
                    Inner::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Inner::default(),
            Err(err) => {
                warn!("unable to read {}: {err}; starting fresh", path.display());
                Inner::default()
            }
        };

        Self::with_inner(Some(path), inner)
    }

    fn with_inner(path: Option<PathBuf>, inner: Inner) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            path,
            inner: RwLock::new(inner),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn device(&self, name: &str) -> Option<DeviceRecord> {
        let inner = self.inner.read().unwrap();
        inner.devices.get(name).cloned()
    }

    pub fn device_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.devices.keys().cloned().collect()
    }

    /// Fetch a record, creating it with defaults on first sight
    /// (mode=manual, off, 06:00–18:00).
    pub fn ensure(&self, name: &str) -> DeviceRecord {
        {
            let inner = self.inner.read().unwrap();
            if let Some(record) = inner.devices.get(name) {
                return record.clone();
            }
        }

        let record = {
            let mut inner = self.inner.write().unwrap();
            let record = inner
                .devices
                .entry(name.to_string())
                .or_default()
                .clone();
            self.persist(&inner);
            record
        };

        self.emit(StateEvent::DeviceChanged {
            name: name.to_string(),
        });

        record
    }

    /// Apply a mutation; persistence and the change event are skipped when
    /// the record comes out unchanged.
    pub fn update(&self, name: &str, apply: impl FnOnce(&mut DeviceRecord)) {
        let changed = {
            let mut inner = self.inner.write().unwrap();

            let created = !inner.devices.contains_key(name);
            let record = inner.devices.entry(name.to_string()).or_default();

            let before = record.clone();
            apply(record);
            let changed = created || *record != before;

            if changed {
                self.persist(&inner);
            }

            changed
        };

        if changed {
            self.emit(StateEvent::DeviceChanged {
                name: name.to_string(),
            });
        }
    }

    /// Drop a dynamically added device. Wired devices are simply re-created
    /// with defaults on the next status message or controller start.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write().unwrap();
            let removed = inner.devices.remove(name).is_some();

            if removed {
                self.persist(&inner);
            }

            removed
        };

        if removed {
            self.emit(StateEvent::DeviceRemoved {
                name: name.to_string(),
            });
        }

        removed
    }

    pub fn is_on(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap();
        inner.devices.get(name).is_some_and(|record| record.is_on)
    }

    /// Does any valve in `group` other than `except` report open?
    pub fn any_other_open(&self, group: &[String], except: &str) -> bool {
        let inner = self.inner.read().unwrap();

        group.iter().any(|name| {
            name != except
                && inner
                    .devices
                    .get(name)
                    .is_some_and(|record| record.is_on)
        })
    }

    pub fn link_mode(&self) -> Option<LinkMode> {
        let inner = self.inner.read().unwrap();
        inner.link_mode
    }

    pub fn set_link_mode(&self, mode: LinkMode) {
        let changed = {
            let mut inner = self.inner.write().unwrap();

            if inner.link_mode == Some(mode) {
                false
            } else {
                inner.link_mode = Some(mode);
                self.persist(&inner);
                true
            }
        };

        if changed {
            self.emit(StateEvent::LinkModeChanged { mode });
        }
    }

    fn persist(&self, inner: &Inner) {
        let Some(path) = &self.path else {
            return;
        };

        match serde_json::to_vec_pretty(inner) {
            Ok(bytes) => {
                if let Err(err) = fs::write(path, bytes) {
                    error!("failed to write {}: {err}", path.display());
                }
            }
            Err(err) => error!("failed to encode state: {err}"),
        }
    }

    fn emit(&self, event: StateEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    fn at(hour: u8, minute: u8) -> TimeOfDay {
        TimeOfDay::new(hour, minute).unwrap()
    }

    #[test]
    fn test_defaults_on_first_sight() {
        let store = StateStore::in_memory();
        let record = store.ensure("motor1");

        assert!(!record.is_on);
        assert_eq!(record.mode, Mode::Manual);
        assert_eq!(record.on_time, at(6, 0));
        assert_eq!(record.off_time, at(18, 0));
        assert!(!record.timer_active);
    }

    #[test]
    fn test_update_emits_once_per_actual_change() {
        let store = StateStore::in_memory();
        let mut events = store.subscribe();

        store.update("motor1", |record| record.is_on = true);
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::DeviceChanged {
                name: "motor1".to_string()
            }
        );

        // same value again: no event, no write
        store.update("motor1", |record| record.is_on = true);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_remove() {
        let store = StateStore::in_memory();
        store.ensure("extra device");

        let mut events = store.subscribe();
        assert!(store.remove("extra device"));
        assert!(!store.remove("extra device"));

        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::DeviceRemoved {
                name: "extra device".to_string()
            }
        );
        assert!(store.device("extra device").is_none());
    }

    #[test]
    fn test_any_other_open() {
        let store = StateStore::in_memory();
        let group = vec!["V1".to_string(), "V2".to_string()];

        store.update("V1", |record| record.is_on = true);
        store.update("V2", |record| record.is_on = false);

        assert!(store.any_other_open(&group, "V2"));
        assert!(!store.any_other_open(&group, "V1"));
    }

    #[test]
    fn test_link_mode_change_detection() {
        let store = StateStore::in_memory();
        let mut events = store.subscribe();

        store.set_link_mode(LinkMode::Gsm);
        store.set_link_mode(LinkMode::Gsm);

        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::LinkModeChanged {
                mode: LinkMode::Gsm
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir().join(format!("foreman-store-{}.json", Uuid::new_v4()));

        {
            let store = StateStore::open(&path);
            store.update("motor1", |record| {
                record.is_on = true;
                record.mode = Mode::Auto;
                record.on_time = at(22, 0);
                record.off_time = at(5, 0);
            });
            store.set_link_mode(LinkMode::Wifi);
        }

        let reloaded = StateStore::open(&path);
        let record = reloaded.device("motor1").unwrap();

        assert!(record.is_on);
        assert_eq!(record.mode, Mode::Auto);
        assert_eq!(record.on_time, at(22, 0));
        assert_eq!(record.off_time, at(5, 0));
        assert_eq!(reloaded.link_mode(), Some(LinkMode::Wifi));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_state_file_starts_fresh() {
        let path = std::env::temp_dir().join(format!("foreman-store-{}.json", Uuid::new_v4()));
        fs::write(&path, b"not json").unwrap();

        let store = StateStore::open(&path);
        assert!(store.device_names().is_empty());

        let _ = fs::remove_file(&path);
    }
}
