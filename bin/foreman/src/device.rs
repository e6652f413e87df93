use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time;
use transport::{Command, PowerState, TimeOfDay, TimeWindow, Topic, ValveClause};

use crate::{schedule, Commander, Error, Result, ScheduleHandle, StateStore};

/// Who drives the device: the operator directly, or the schedule.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Manual,
    Auto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Manual => write!(f, "manual"),
            Mode::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Motor { index: u8 },
    Valve { key: String },
}

impl DeviceKind {
    pub fn control_topic(&self) -> Topic {
        match self {
            DeviceKind::Motor { index } => Topic::MotorControl(*index),
            DeviceKind::Valve { .. } => Topic::ValveControl,
        }
    }

    pub fn status_topic(&self) -> Topic {
        match self {
            DeviceKind::Motor { index } => Topic::MotorStatus(*index),
            DeviceKind::Valve { .. } => Topic::ValveStatus,
        }
    }

    fn is_valve(&self) -> bool {
        matches!(self, DeviceKind::Valve { .. })
    }

    fn power_command(&self, state: PowerState) -> Command {
        match self {
            DeviceKind::Motor { .. } => Command::Power(state),
            DeviceKind::Valve { key } => Command::Valve(ValveClause {
                key: key.clone(),
                state,
            }),
        }
    }
}

struct TimerTask(JoinHandle<()>);

impl Drop for TimerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Per-device manual/auto state machine.
///
/// Entering auto only arms it; nothing actuates until the operator commits
/// a validated window, which also tells the firmware (`AUTO,start,end`) so
/// it can enforce the schedule on its own. Switching back to manual stops
/// the runner, hands control back with `MANUAL`, and forgets the dedup
/// cache.
pub struct DeviceController {
    name: String,
    kind: DeviceKind,
    group: Vec<String>,
    commander: Commander,
    store: Arc<StateStore>,
    mode: Mode,
    schedule: Option<ScheduleHandle>,
    timer: Option<TimerTask>,
}

impl DeviceController {
    pub fn motor(index: u8, commander: Commander, store: Arc<StateStore>) -> Self {
        Self::new(
            format!("motor{}", index),
            DeviceKind::Motor { index },
            Vec::new(),
            commander,
            store,
        )
    }

    /// `group` lists every valve sharing the multiplexed pair, this one
    /// included; the group invariant is checked against it.
    pub fn valve(
        key: &str,
        group: &[String],
        commander: Commander,
        store: Arc<StateStore>,
    ) -> Self {
        Self::new(
            key.to_string(),
            DeviceKind::Valve {
                key: key.to_string(),
            },
            group.to_vec(),
            commander,
            store,
        )
    }

    fn new(
        name: String,
        kind: DeviceKind,
        group: Vec<String>,
        commander: Commander,
        store: Arc<StateStore>,
    ) -> Self {
        let record = store.ensure(&name);

        Self {
            mode: record.mode,
            name,
            kind,
            group,
            commander,
            store,
            schedule: None,
            timer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_schedule_running(&self) -> bool {
        self.schedule.is_some()
    }

    /// Arm auto mode. The schedule runner stays stopped until a window is
    /// committed, so an unintended window never actuates hardware.
    pub fn enter_auto(&mut self) {
        if self.mode == Mode::Auto {
            return;
        }

        self.timer = None;
        self.mode = Mode::Auto;
        self.store.update(&self.name, |record| {
            record.mode = Mode::Auto;
            record.timer_active = false;
            record.timer_remaining = None;
        });

        info!("{}: armed auto mode", self.name);
    }

    /// Validate and activate a schedule window while in auto mode.
    pub fn commit_schedule(&mut self, start: TimeOfDay, end: TimeOfDay) -> Result<()> {
        if self.mode != Mode::Auto {
            return Err(Error::WrongMode {
                device: self.name.clone(),
                required: Mode::Auto,
            });
        }

        let window = TimeWindow::new(start, end).map_err(|_| Error::EmptyWindow)?;

        self.store.update(&self.name, |record| {
            record.on_time = start;
            record.off_time = end;
        });

        // motor firmware enforces the window on its own while we are away;
        // the multiplexed valve topic has no schedule syntax
        if !self.kind.is_valve() {
            self.commander
                .send(&self.kind.control_topic(), &Command::Auto(window));
        }

        self.restart_schedule(window);
        info!("{}: committed schedule {}-{}", self.name, start, end);

        Ok(())
    }

    /// Hand the device back to direct operator control.
    pub fn set_manual(&mut self) {
        if self.mode == Mode::Manual {
            return;
        }

        // aborting the runner also discards its dedup cache
        self.schedule = None;
        self.mode = Mode::Manual;
        self.store
            .update(&self.name, |record| record.mode = Mode::Manual);

        if !self.kind.is_valve() {
            self.commander
                .send(&self.kind.control_topic(), &Command::Manual);
        }

        info!("{}: back under manual control", self.name);
    }

    /// Direct ON/OFF while in manual mode. The store update is optimistic;
    /// the next status message stays authoritative.
    pub fn toggle(&mut self, state: PowerState) -> Result<()> {
        if self.mode != Mode::Manual {
            return Err(Error::WrongMode {
                device: self.name.clone(),
                required: Mode::Manual,
            });
        }

        if !emit_power(
            &self.commander,
            &self.store,
            &self.name,
            &self.kind,
            &self.group,
            state,
        ) {
            return Err(Error::LastValveOpen(self.name.clone()));
        }

        if !state.is_on() {
            self.timer = None;
        }

        self.store.update(&self.name, |record| {
            record.is_on = state.is_on();
            if !state.is_on() {
                record.timer_active = false;
                record.timer_remaining = None;
            }
        });

        Ok(())
    }

    /// Open a valve for a bounded number of minutes; expiry closes it
    /// through the same guarded path as a manual toggle.
    pub fn start_timer(&mut self, minutes: u32) -> Result<()> {
        if !self.kind.is_valve() {
            return Err(Error::NotAValve(self.name.clone()));
        }

        if self.mode != Mode::Manual {
            return Err(Error::WrongMode {
                device: self.name.clone(),
                required: Mode::Manual,
            });
        }

        if minutes == 0 {
            return Err(Error::EmptyTimer);
        }

        self.timer = None;

        if !emit_power(
            &self.commander,
            &self.store,
            &self.name,
            &self.kind,
            &self.group,
            PowerState::On,
        ) {
            // opening a valve never trips the group guard
            return Err(Error::LastValveOpen(self.name.clone()));
        }

        self.store.update(&self.name, |record| {
            record.is_on = true;
            record.timer_duration = Some(minutes);
            record.timer_active = true;
            record.timer_remaining = Some(minutes);
        });

        let store = self.store.clone();
        let name = self.name.clone();
        let emit = self.power_emitter();

        let task = tokio::spawn(async move {
            let mut remaining = minutes;

            loop {
                time::sleep(Duration::from_secs(60)).await;
                remaining -= 1;

                if remaining > 0 {
                    store.update(&name, |record| record.timer_remaining = Some(remaining));
                    continue;
                }

                if emit(PowerState::Off) {
                    store.update(&name, |record| {
                        record.is_on = false;
                        record.timer_active = false;
                        record.timer_remaining = None;
                    });
                } else {
                    warn!("{}: timer expired but the valve must stay open", name);
                    store.update(&name, |record| {
                        record.timer_active = false;
                        record.timer_remaining = None;
                    });
                }

                break;
            }
        });

        self.timer = Some(TimerTask(task));
        info!("{}: running for {} min", self.name, minutes);

        Ok(())
    }

    pub fn cancel_timer(&mut self) {
        self.timer = None;
        self.store.update(&self.name, |record| {
            record.timer_active = false;
            record.timer_remaining = None;
        });
    }

    /// Pick a persisted auto schedule back up after a restart. Stays armed
    /// when the stored window is unusable.
    pub fn resume(&mut self) {
        if self.mode != Mode::Auto {
            return;
        }

        let record = self.store.ensure(&self.name);

        match TimeWindow::new(record.on_time, record.off_time) {
            Ok(window) => {
                self.restart_schedule(window);
                info!(
                    "{}: resumed auto schedule {}-{}",
                    self.name, record.on_time, record.off_time
                );
            }
            Err(_) => warn!("{}: stored schedule window is unusable; auto stays armed", self.name),
        }
    }

    fn restart_schedule(&mut self, window: TimeWindow) {
        // stop before start: no stale tick may overlap the new runner
        self.schedule = None;
        self.schedule = Some(schedule::start(&self.name, window, self.power_emitter()));
    }

    fn power_emitter(&self) -> impl Fn(PowerState) -> bool + Send + Sync + 'static {
        let commander = self.commander.clone();
        let store = self.store.clone();
        let name = self.name.clone();
        let kind = self.kind.clone();
        let group = self.group.clone();

        move |state| emit_power(&commander, &store, &name, &kind, &group, state)
    }
}

/// The single emission gate every power command passes through: a valve is
/// never closed while it is the last open one in its group.
fn emit_power(
    commander: &Commander,
    store: &StateStore,
    name: &str,
    kind: &DeviceKind,
    group: &[String],
    state: PowerState,
) -> bool {
    if kind.is_valve()
        && !state.is_on()
        && store.is_on(name)
        && !store.any_other_open(group, name)
    {
        warn!("{}: refusing OFF, at least one valve must stay open", name);
        return false;
    }

    commander.send(&kind.control_topic(), &kind.power_command(state));
    true
}
