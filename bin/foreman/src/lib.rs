mod broker;
mod commander;
mod device;
mod dispatch;
mod error;
mod schedule;
mod store;
mod watch;

pub use broker::{connect, BrokerConfig, MessageStream};
pub use commander::Commander;
pub use device::{DeviceController, DeviceKind, Mode};
pub use dispatch::{Dispatcher, Subscription};
pub use error::{Error, Result};
pub use schedule::{Evaluator, ScheduleHandle};
pub use store::{DeviceRecord, StateEvent, StateStore};
pub use watch::{watch_link_mode, watch_motor_status, watch_valve_status};
