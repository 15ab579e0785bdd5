pub mod backend;
mod config;
mod dispatch;
mod error;
mod gpio;
mod motor;
mod vehicle;
mod watcher;

pub use config::{
    AppConfig, CONFIG_ENV, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MAX_EVENTS, DEFAULT_SYSFS_ROOT,
    DEFAULT_WATCH_TIMEOUT_MS, Direction, EdgeDetect, LightPins, MAX_WATCH_TIMEOUT_MS, MotorPins,
    RPI_GPIOCHIP0_BASE, SysfsConfig, VehicleConfig, WatchConfig,
};
pub use dispatch::{
    ACTION_CYCLE, Action, SessionReport, Status, action, drive_vehicle, run_session,
};
pub use error::AppError;
pub use gpio::{EdgeSource, GpioBackend, PinHandle, Readiness, parse_level};
pub use motor::{MotorDriver, MotorState};
pub use vehicle::{Lights, Vehicle};
pub use watcher::{EdgeWatcher, WatchOutcome};

pub use backend::MockGpioBackend;
#[cfg(feature = "sysfs")]
pub use backend::SysfsBackend;
