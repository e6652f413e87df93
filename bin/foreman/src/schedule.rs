use std::time::Duration;

use chrono::{Local, Timelike};
use log::info;
use tokio::task::JoinHandle;
use tokio::time;
use transport::{PowerState, TimeOfDay, TimeWindow};

/// Bounds the lag after a window boundary; short enough to feel live,
/// long enough not to flood the broker.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Decides the desired power state for one device's schedule window and
/// suppresses commands that would repeat the last one emitted.
pub struct Evaluator {
    window: TimeWindow,
    last_command: Option<PowerState>,
}

impl Evaluator {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            last_command: None,
        }
    }

    pub fn desired(&self, now: TimeOfDay) -> PowerState {
        if self.window.contains(now) {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    pub fn last_command(&self) -> Option<PowerState> {
        self.last_command
    }

    /// One evaluation step. `emit` hands the command off and reports
    /// whether it was actually emitted; only then does the dedup cache
    /// advance, so a refused command is retried on the next tick.
    pub fn tick(
        &mut self,
        now: TimeOfDay,
        emit: impl FnOnce(PowerState) -> bool,
    ) -> Option<PowerState> {
        let desired = self.desired(now);

        if self.last_command == Some(desired) {
            return None;
        }

        if emit(desired) {
            self.last_command = Some(desired);
            Some(desired)
        } else {
            None
        }
    }
}

fn wall_clock() -> TimeOfDay {
    let now = Local::now();

    // chrono always yields an in-range hour/minute
    TimeOfDay::new(now.hour() as u8, now.minute() as u8).expect("valid wall-clock time")
}

/// A running schedule poll for one device. Stopping aborts the task
/// immediately and discards the evaluator with its dedup cache, so the
/// next start re-asserts the command unconditionally.
pub struct ScheduleHandle {
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start polling a window. The first evaluation runs immediately so the
/// device reaches the correct state without waiting a full tick.
pub fn start(
    name: &str,
    window: TimeWindow,
    emit: impl Fn(PowerState) -> bool + Send + Sync + 'static,
) -> ScheduleHandle {
    let name = name.to_string();

    let task = tokio::spawn(async move {
        let mut evaluator = Evaluator::new(window);
        let mut ticker = time::interval(TICK_INTERVAL);

        loop {
            ticker.tick().await;

            if let Some(state) = evaluator.tick(wall_clock(), &emit) {
                info!("{}: schedule demands {}", name, state);
            }
        }
    });

    ScheduleHandle { task }
}
