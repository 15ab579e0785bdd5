use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Base of gpiochip0 on kernels that number the Raspberry Pi header from 512.
pub const RPI_GPIOCHIP0_BASE: u32 = 512;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_WATCH_TIMEOUT_MS: u64 = 10 * 1000;
pub const DEFAULT_MAX_EVENTS: u32 = 10;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Largest wait `poll(2)` accepts as a millisecond count.
pub const MAX_WATCH_TIMEOUT_MS: u64 = i32::MAX as u64;

/// Environment variable naming a config file when no path is given.
pub const CONFIG_ENV: &str = "GPIOCAR_CONFIG";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_sysfs_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    pub fn as_sysfs_str(&self) -> &'static str {
        match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SysfsConfig {
    pub root: PathBuf,
    /// Added to every logical pin number to obtain the kernel's pin number.
    pub pin_base: u32,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            pin_base: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    pub timeout_ms: u64,
    pub max_events: u32,
    pub max_consecutive_failures: u32,
    pub edge: EdgeDetect,
}

impl WatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.timeout_ms == 0 || self.timeout_ms > MAX_WATCH_TIMEOUT_MS {
            return Err(AppError::Config(format!(
                "timeout_ms must be between 1 and {MAX_WATCH_TIMEOUT_MS}, got {}",
                self.timeout_ms
            )));
        }
        if self.edge == EdgeDetect::None {
            return Err(AppError::Config(
                "watch edge must be rising, falling or both".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(AppError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WATCH_TIMEOUT_MS,
            max_events: DEFAULT_MAX_EVENTS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            edge: EdgeDetect::Falling,
        }
    }
}

/// The two H-bridge inputs of one motor.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct MotorPins {
    pub primary: u32,
    pub secondary: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LightPins {
    pub left_blinker: Option<u32>,
    pub right_blinker: Option<u32>,
    pub brake: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct VehicleConfig {
    pub left: MotorPins,
    pub right: MotorPins,
    #[serde(default)]
    pub lights: LightPins,
}

impl VehicleConfig {
    pub fn pins(&self) -> Vec<u32> {
        let mut pins = vec![
            self.left.primary,
            self.left.secondary,
            self.right.primary,
            self.right.secondary,
        ];
        pins.extend(
            [
                self.lights.left_blinker,
                self.lights.right_blinker,
                self.lights.brake,
            ]
            .into_iter()
            .flatten(),
        );
        pins
    }

    /// Rejects layouts that would drive the same pin from two roles.
    pub fn validate(&self) -> Result<(), AppError> {
        let pins = self.pins();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                return Err(AppError::Config(format!(
                    "pin {pin} is assigned more than once in vehicle layout"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sysfs: SysfsConfig,
    pub watch: WatchConfig,
    pub vehicle: Option<VehicleConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, else the file named by [`CONFIG_ENV`], else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, AppError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.watch.validate()?;
        if let Some(vehicle) = &self.vehicle {
            vehicle.validate()?;
        }
        Ok(())
    }
}
